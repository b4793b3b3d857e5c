use crate::grading::ValidationError;
use serde::Serialize;

pub const CA_ITEM_MAX: f64 = 10.0;
pub const CA_BUDGET: f64 = 40.0;
pub const TEST_MAX: f64 = 10.0;
pub const EXAM_MAX: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssessmentCode {
    Ca1,
    Ca2,
    Ca3,
    Test,
    Exam,
}

impl AssessmentCode {
    pub fn parse(s: &str) -> Option<AssessmentCode> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CA1" => Some(AssessmentCode::Ca1),
            "CA2" => Some(AssessmentCode::Ca2),
            "CA3" => Some(AssessmentCode::Ca3),
            "TEST" => Some(AssessmentCode::Test),
            "EXAM" => Some(AssessmentCode::Exam),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssessmentCode::Ca1 => "CA1",
            AssessmentCode::Ca2 => "CA2",
            AssessmentCode::Ca3 => "CA3",
            AssessmentCode::Test => "TEST",
            AssessmentCode::Exam => "EXAM",
        }
    }

    /// Codes starting with "CA" share the per-subject CA budget.
    pub fn is_ca(self) -> bool {
        self.as_str().starts_with("CA")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConstraintReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConstraintReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<ConstraintReport, ValidationError> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(ValidationError::Constraint(self.errors.join("; ")))
        }
    }
}

fn fmt_points(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{:.2}", v)
    }
}

/// Checks an assessment definition against the scoring budget.
///
/// `sibling_ca_total` is the summed max score of the other CA-coded assessments for the
/// same classroom/subject/term, excluding the one being checked.
pub fn check_assessment(
    code: AssessmentCode,
    max_score: f64,
    sibling_ca_total: f64,
) -> ConstraintReport {
    let mut report = ConstraintReport::default();

    if !max_score.is_finite() || max_score <= 0.0 {
        report
            .errors
            .push(format!("max score must be greater than 0 (got {})", max_score));
        return report;
    }

    match code {
        c if c.is_ca() => {
            if max_score > CA_ITEM_MAX {
                report.errors.push(format!(
                    "CA assessments cannot exceed {} points. You set {}.",
                    fmt_points(CA_ITEM_MAX),
                    fmt_points(max_score)
                ));
            }
            let combined = sibling_ca_total + max_score;
            if combined > CA_BUDGET {
                report.errors.push(format!(
                    "Total CA for this subject cannot exceed {}. Current total: {}, trying to add: {} = {}",
                    fmt_points(CA_BUDGET),
                    fmt_points(sibling_ca_total),
                    fmt_points(max_score),
                    fmt_points(combined)
                ));
            } else {
                report.warnings.push(format!(
                    "CA total: {} + {} = {}/{}",
                    fmt_points(sibling_ca_total),
                    fmt_points(max_score),
                    fmt_points(combined),
                    fmt_points(CA_BUDGET)
                ));
            }
        }
        AssessmentCode::Test => {
            if max_score > TEST_MAX {
                report.errors.push(format!(
                    "Test assessments cannot exceed {} points. You set {}.",
                    fmt_points(TEST_MAX),
                    fmt_points(max_score)
                ));
            }
        }
        AssessmentCode::Exam => {
            if max_score != EXAM_MAX {
                report.errors.push(format!(
                    "Exam must be exactly {} points. You set {}.",
                    fmt_points(EXAM_MAX),
                    fmt_points(max_score)
                ));
            }
        }
        _ => {}
    }

    report
}

pub fn validate_score(score: f64, max_score: f64) -> Result<(), ValidationError> {
    if !score.is_finite() {
        return Err(ValidationError::NotFinite { field: "score" });
    }
    if score < 0.0 {
        return Err(ValidationError::Negative {
            field: "score",
            value: score,
        });
    }
    if score > max_score {
        return Err(ValidationError::Constraint(format!(
            "score cannot exceed {}",
            fmt_points(max_score)
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Admin,
    Teacher,
}

impl ActorRole {
    pub fn parse(s: Option<&str>) -> Option<ActorRole> {
        match s.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("teacher") => Some(ActorRole::Teacher),
            Some("admin") => Some(ActorRole::Admin),
            _ => None,
        }
    }

    pub fn is_privileged(self) -> bool {
        self == ActorRole::Admin
    }
}

/// Locked assessments only accept score edits from the privileged role.
pub fn can_edit_scores(is_locked: bool, role: ActorRole) -> bool {
    !is_locked || role.is_privileged()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_item_cap_and_budget() {
        assert!(check_assessment(AssessmentCode::Ca1, 10.0, 0.0).is_valid());
        assert!(!check_assessment(AssessmentCode::Ca2, 11.0, 0.0).is_valid());
        assert!(check_assessment(AssessmentCode::Ca3, 10.0, 30.0).is_valid());

        let over = check_assessment(AssessmentCode::Ca3, 10.0, 35.0);
        assert!(!over.is_valid());
        assert!(over.errors[0].contains("cannot exceed 40"));
    }

    #[test]
    fn ca_budget_warning_reports_running_total() {
        let r = check_assessment(AssessmentCode::Ca1, 10.0, 20.0);
        assert_eq!(r.warnings, vec!["CA total: 20 + 10 = 30/40".to_string()]);
    }

    #[test]
    fn test_code_has_its_own_cap() {
        assert!(check_assessment(AssessmentCode::Test, 10.0, 40.0).is_valid());
        assert!(!check_assessment(AssessmentCode::Test, 12.0, 0.0).is_valid());
    }

    #[test]
    fn exam_must_be_exactly_sixty() {
        assert!(check_assessment(AssessmentCode::Exam, 60.0, 0.0).is_valid());
        assert!(!check_assessment(AssessmentCode::Exam, 59.0, 0.0).is_valid());
        assert!(!check_assessment(AssessmentCode::Exam, 100.0, 0.0).is_valid());
    }

    #[test]
    fn zero_max_score_is_rejected() {
        assert!(!check_assessment(AssessmentCode::Ca1, 0.0, 0.0).is_valid());
        assert!(!check_assessment(AssessmentCode::Exam, -60.0, 0.0).is_valid());
    }

    #[test]
    fn unknown_codes_do_not_parse() {
        assert_eq!(AssessmentCode::parse("ca2"), Some(AssessmentCode::Ca2));
        assert_eq!(AssessmentCode::parse("QUIZ"), None);
    }

    #[test]
    fn score_entry_bounds() {
        assert!(validate_score(0.0, 10.0).is_ok());
        assert!(validate_score(10.0, 10.0).is_ok());
        assert!(validate_score(10.5, 10.0).is_err());
        assert!(validate_score(-1.0, 10.0).is_err());
        assert!(validate_score(f64::NAN, 10.0).is_err());
    }

    #[test]
    fn lock_gates_non_admins() {
        assert!(can_edit_scores(false, ActorRole::Teacher));
        assert!(!can_edit_scores(true, ActorRole::Teacher));
        assert!(can_edit_scores(true, ActorRole::Admin));
        assert_eq!(ActorRole::parse(None), Some(ActorRole::Teacher));
        assert_eq!(ActorRole::parse(Some("root")), None);
    }
}
