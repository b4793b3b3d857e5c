use serde::Serialize;
use thiserror::Error;

/// Minimum term total (and report-card average) that counts as a pass.
pub const PASS_MARK: f64 = 40.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
    #[error("{field} cannot be negative (got {value})")]
    Negative { field: &'static str, value: f64 },
    #[error("{0}")]
    Constraint(String),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        "validation_failed"
    }
}

/// Letter grades ordered best-first, so `A < F` under `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Grade {
    pub const ALL: [Grade; 6] = [Grade::A, Grade::B, Grade::C, Grade::D, Grade::E, Grade::F];

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
            Grade::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Grade> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            "E" => Some(Grade::E),
            "F" => Some(Grade::F),
            _ => None,
        }
    }

    pub fn grade_point(self) -> u8 {
        match self {
            Grade::A => 5,
            Grade::B => 4,
            Grade::C => 3,
            Grade::D => 2,
            Grade::E => 1,
            Grade::F => 0,
        }
    }

    pub fn remark(self) -> &'static str {
        match self {
            Grade::A => "Excellent",
            Grade::B => "Very Good",
            Grade::C => "Good",
            Grade::D => "Fair",
            Grade::E => "Pass",
            Grade::F => "Fail",
        }
    }
}

// Lower bounds, descending. Anything below the last band is F.
const ASSESSMENT_BANDS: [(f64, Grade); 5] = [
    (80.0, Grade::A),
    (70.0, Grade::B),
    (60.0, Grade::C),
    (50.0, Grade::D),
    (40.0, Grade::E),
];

const TERM_BANDS: [(f64, Grade); 5] = [
    (75.0, Grade::A),
    (65.0, Grade::B),
    (55.0, Grade::C),
    (45.0, Grade::D),
    (40.0, Grade::E),
];

fn classify(value: f64, field: &'static str, bands: &[(f64, Grade)]) -> Result<Grade, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { field });
    }
    if value < 0.0 {
        return Err(ValidationError::Negative { field, value });
    }
    Ok(bands
        .iter()
        .find(|(lower, _)| value >= *lower)
        .map(|(_, g)| *g)
        .unwrap_or(Grade::F))
}

/// Grade for a single assessment, from its percentage (score / max * 100).
pub fn assessment_grade(percent: f64) -> Result<Grade, ValidationError> {
    classify(percent, "percentage", &ASSESSMENT_BANDS)
}

/// Grade for a term total on the 0-100 CA + exam scale.
pub fn term_grade(total: f64) -> Result<Grade, ValidationError> {
    classify(total, "total_score", &TERM_BANDS)
}

pub fn ordinal_suffix(position: u32) -> String {
    let suffix = if (10..=20).contains(&(position % 100)) {
        "th"
    } else {
        match position % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{}{}", position, suffix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PerformanceBand {
    pub label: &'static str,
    pub color: &'static str,
}

/// Report-card presentation band for an overall average.
pub fn performance_band(average: f64) -> PerformanceBand {
    let (label, color) = if average >= 90.0 {
        ("Excellent", "green")
    } else if average >= 80.0 {
        ("Good", "blue")
    } else if average >= 70.0 {
        ("Average", "yellow")
    } else if average >= 60.0 {
        ("Fair", "orange")
    } else {
        ("Poor", "red")
    };
    PerformanceBand { label, color }
}

pub fn teacher_comment(average: f64, attendance_rate: Option<f64>) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(2);
    parts.push(if average >= 75.0 {
        "Excellent performance. Keep up the outstanding work!"
    } else if average >= 65.0 {
        "Very good performance. Continue working hard."
    } else if average >= 55.0 {
        "Good performance. You can do better with more effort."
    } else if average >= 45.0 {
        "Fair performance. More dedication is needed."
    } else if average >= PASS_MARK {
        "Satisfactory performance. Significant improvement is required."
    } else {
        "Poor performance. Serious attention is needed."
    });
    if let Some(rate) = attendance_rate {
        parts.push(if rate >= 90.0 {
            "Excellent attendance."
        } else if rate >= 75.0 {
            "Good attendance."
        } else {
            "Attendance needs improvement."
        });
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assessment_table_boundaries() {
        assert_eq!(assessment_grade(100.0), Ok(Grade::A));
        assert_eq!(assessment_grade(80.0), Ok(Grade::A));
        assert_eq!(assessment_grade(79.99), Ok(Grade::B));
        assert_eq!(assessment_grade(70.0), Ok(Grade::B));
        assert_eq!(assessment_grade(60.0), Ok(Grade::C));
        assert_eq!(assessment_grade(50.0), Ok(Grade::D));
        assert_eq!(assessment_grade(40.0), Ok(Grade::E));
        assert_eq!(assessment_grade(39.9), Ok(Grade::F));
        assert_eq!(assessment_grade(0.0), Ok(Grade::F));
    }

    #[test]
    fn term_table_boundaries() {
        assert_eq!(term_grade(75.0), Ok(Grade::A));
        assert_eq!(term_grade(74.99), Ok(Grade::B));
        assert_eq!(term_grade(65.0), Ok(Grade::B));
        assert_eq!(term_grade(62.0), Ok(Grade::C));
        assert_eq!(term_grade(55.0), Ok(Grade::C));
        assert_eq!(term_grade(45.0), Ok(Grade::D));
        assert_eq!(term_grade(44.0), Ok(Grade::E));
        assert_eq!(term_grade(40.0), Ok(Grade::E));
        assert_eq!(term_grade(0.0), Ok(Grade::F));
    }

    #[test]
    fn tables_are_not_interchangeable() {
        // 76 is an A on the term scale but only a B per assessment.
        assert_eq!(term_grade(76.0), Ok(Grade::A));
        assert_eq!(assessment_grade(76.0), Ok(Grade::B));
    }

    #[test]
    fn rejects_negative_and_non_finite() {
        assert!(matches!(
            term_grade(-0.5),
            Err(ValidationError::Negative { .. })
        ));
        assert!(matches!(
            assessment_grade(f64::NAN),
            Err(ValidationError::NotFinite { .. })
        ));
        assert!(term_grade(f64::INFINITY).is_err());
    }

    #[test]
    fn grades_are_monotonic() {
        let mut prev = term_grade(0.0).expect("grade");
        let mut prev_pct = assessment_grade(0.0).expect("grade");
        for i in 1..=1200 {
            let x = i as f64 / 10.0;
            let g = term_grade(x).expect("grade");
            let gp = assessment_grade(x).expect("grade");
            assert!(g <= prev, "term grade regressed at {}", x);
            assert!(gp <= prev_pct, "assessment grade regressed at {}", x);
            prev = g;
            prev_pct = gp;
        }
    }

    #[test]
    fn ordinal_suffixes() {
        let got: Vec<String> = [1, 2, 3, 4, 11, 12, 13, 21, 22, 101, 111, 112]
            .iter()
            .map(|p| ordinal_suffix(*p))
            .collect();
        assert_eq!(
            got,
            vec!["1st", "2nd", "3rd", "4th", "11th", "12th", "13th", "21st", "22nd", "101st", "111th", "112th"]
        );
    }

    #[test]
    fn grade_points_and_remarks() {
        assert_eq!(Grade::A.grade_point(), 5);
        assert_eq!(Grade::F.grade_point(), 0);
        assert_eq!(Grade::E.remark(), "Pass");
        assert_eq!(Grade::parse(" b "), Some(Grade::B));
        assert_eq!(Grade::parse("Z"), None);
    }

    #[test]
    fn comments_follow_term_bands() {
        assert_eq!(
            teacher_comment(80.0, Some(95.0)),
            "Excellent performance. Keep up the outstanding work! Excellent attendance."
        );
        assert_eq!(
            teacher_comment(30.0, None),
            "Poor performance. Serious attention is needed."
        );
        assert_eq!(performance_band(85.0).color, "blue");
        assert_eq!(performance_band(59.9).label, "Poor");
    }
}
