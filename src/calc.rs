use crate::grading::{term_grade, Grade};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Two-decimal rounding matching the `DECIMAL(5,2)` storage of stored results.
pub fn round_2dp(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

/// One raw score joined with the scoring parameters of its assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreItem {
    pub code: String,
    pub score: f64,
    pub max_score: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermTotals {
    pub ca_total: f64,
    pub exam_score: f64,
    pub total_score: f64,
    pub grade: Grade,
}

fn fraction(score: f64, max_score: f64) -> f64 {
    if max_score > 0.0 && score.is_finite() {
        score / max_score
    } else {
        0.0
    }
}

/// Folds one student's scores for a subject/term into CA, exam and total.
///
/// Items whose code equals `exam_code` are exam items; only the first one counts and it
/// is scaled to `exam_weight`. Every other item contributes `score / max * weight` to the
/// CA total. Weights are used as configured, without normalization.
pub fn aggregate_scores<'a, I>(items: I, exam_code: &str, exam_weight: f64) -> TermTotals
where
    I: IntoIterator<Item = &'a ScoreItem>,
{
    let mut ca_total = 0.0_f64;
    let mut exam_score: Option<f64> = None;

    for item in items {
        if item.code.eq_ignore_ascii_case(exam_code) {
            if exam_score.is_none() {
                exam_score = Some(fraction(item.score, item.max_score) * exam_weight);
            }
        } else {
            ca_total += fraction(item.score, item.max_score) * item.weight;
        }
    }

    let ca_total = round_2dp(ca_total);
    let exam_score = round_2dp(exam_score.unwrap_or(0.0));
    let total_score = round_2dp(ca_total + exam_score);
    let grade = term_grade(total_score).unwrap_or(Grade::F);

    TermTotals {
        ca_total,
        exam_score,
        total_score,
        grade,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
}

pub fn class_stats(totals: &[f64]) -> Option<ClassStats> {
    if totals.is_empty() {
        return None;
    }
    let sum: f64 = totals.iter().sum();
    let highest = totals.iter().copied().fold(f64::MIN, f64::max);
    let lowest = totals.iter().copied().fold(f64::MAX, f64::min);
    Some(ClassStats {
        average: round_2dp(sum / totals.len() as f64),
        highest,
        lowest,
    })
}

fn desc_order(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    // Stable: equal values keep their input order.
    order.sort_by(|&a, &b| {
        round_2dp(values[b])
            .partial_cmp(&round_2dp(values[a]))
            .unwrap_or(Ordering::Equal)
    });
    order
}

/// Positions by plain sort order: 1-based ordinal in the descending sequence, ties broken
/// by input order. Returned positions line up with the input slice.
pub fn sequential_positions(values: &[f64]) -> Vec<u32> {
    let mut positions = vec![0_u32; values.len()];
    for (ordinal, idx) in desc_order(values).into_iter().enumerate() {
        positions[idx] = ordinal as u32 + 1;
    }
    positions
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieRanking {
    /// Ties share a rank and the next value resumes at its ordinal (1, 1, 3).
    #[default]
    Competition,
    /// Ties share a rank and the next value takes the following rank (1, 1, 2).
    Dense,
}

/// Positions where equal values share a rank. Returned positions line up with the input slice.
pub fn shared_positions(values: &[f64], mode: TieRanking) -> Vec<u32> {
    let mut positions = vec![0_u32; values.len()];
    let mut prev: Option<f64> = None;
    let mut rank = 0_u32;
    let mut distinct = 0_u32;

    for (ordinal, idx) in desc_order(values).into_iter().enumerate() {
        let v = round_2dp(values[idx]);
        if prev != Some(v) {
            distinct += 1;
            rank = match mode {
                TieRanking::Competition => ordinal as u32 + 1,
                TieRanking::Dense => distinct,
            };
            prev = Some(v);
        }
        positions[idx] = rank;
    }
    positions
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
