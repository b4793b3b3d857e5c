use crate::calc::{self, CalcError};
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPerformance {
    pub subject_id: String,
    pub subject_name: String,
    pub avg_score: f64,
    pub total_students: i64,
    pub pass_count: i64,
    pub fail_count: i64,
    pub pass_rate: f64,
}

pub fn subject_performance_summary(
    conn: &Connection,
    term_id: &str,
    classroom_id: Option<&str>,
    pass_mark: f64,
) -> Result<Vec<SubjectPerformance>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT r.subject_id, sub.name, AVG(r.total_score),
                    COUNT(DISTINCT r.student_id),
                    SUM(CASE WHEN r.total_score >= ?3 THEN 1 ELSE 0 END)
             FROM term_results r
             JOIN subjects sub ON sub.id = r.subject_id
             WHERE r.term_id = ?1
               AND (?2 IS NULL OR r.classroom_id = ?2)
             GROUP BY r.subject_id, sub.name
             ORDER BY AVG(r.total_score) DESC, sub.name",
        )
        .map_err(CalcError::query)?;
    let rows = stmt
        .query_map(
            (term_id, classroom_id, pass_mark),
            |r| {
                let total_students: i64 = r.get(3)?;
                let pass_count: i64 = r.get(4)?;
                Ok(SubjectPerformance {
                    subject_id: r.get(0)?,
                    subject_name: r.get(1)?,
                    avg_score: calc::round_2dp(r.get(2)?),
                    total_students,
                    pass_count,
                    fail_count: total_students - pass_count,
                    pass_rate: if total_students > 0 {
                        calc::round_2dp(pass_count as f64 / total_students as f64 * 100.0)
                    } else {
                        0.0
                    },
                })
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::query)?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPerformer {
    pub student_id: String,
    pub surname: String,
    pub other_name: String,
    pub admission_no: String,
    pub classroom: String,
    pub avg_score: f64,
    pub subject_count: i64,
}

pub fn top_performers(
    conn: &Connection,
    term_id: &str,
    classroom_id: Option<&str>,
    limit: i64,
) -> Result<Vec<TopPerformer>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.surname, s.other_name, s.admission_no, c.level || c.arm,
                    AVG(r.total_score), COUNT(r.subject_id)
             FROM term_results r
             JOIN students s ON s.id = r.student_id
             JOIN classrooms c ON c.id = r.classroom_id
             WHERE r.term_id = ?1
               AND (?2 IS NULL OR r.classroom_id = ?2)
             GROUP BY s.id, s.surname, s.other_name, s.admission_no, c.level, c.arm
             ORDER BY AVG(r.total_score) DESC, s.surname, s.other_name
             LIMIT ?3",
        )
        .map_err(CalcError::query)?;
    let rows = stmt
        .query_map(
            (term_id, classroom_id, limit.max(0)),
            |r| {
                Ok(TopPerformer {
                    student_id: r.get(0)?,
                    surname: r.get(1)?,
                    other_name: r.get(2)?,
                    admission_no: r.get(3)?,
                    classroom: r.get(4)?,
                    avg_score: calc::round_2dp(r.get(5)?),
                    subject_count: r.get(6)?,
                })
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::query)?;
    Ok(rows)
}

fn student_term_totals(conn: &Connection, student_id: &str, term_id: &str) -> Result<Vec<f64>, CalcError> {
    let mut stmt = conn
        .prepare("SELECT total_score FROM term_results WHERE student_id = ? AND term_id = ?")
        .map_err(CalcError::query)?;
    let totals = stmt
        .query_map((student_id, term_id), |r| r.get::<_, f64>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::query)?;
    Ok(totals)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermAverage {
    pub term_id: String,
    pub average: f64,
    pub results_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermComparison {
    pub term1: TermAverage,
    pub term2: TermAverage,
    pub difference: f64,
    pub percentage_change: f64,
    pub improved: bool,
}

/// Compares a student's averages across two terms; `term1` is the older one.
pub fn compare_terms(
    conn: &Connection,
    student_id: &str,
    term1: &str,
    term2: &str,
) -> Result<Option<TermComparison>, CalcError> {
    let t1 = student_term_totals(conn, student_id, term1)?;
    let t2 = student_term_totals(conn, student_id, term2)?;
    let (Some(avg1), Some(avg2)) = (calc::mean(&t1), calc::mean(&t2)) else {
        return Ok(None);
    };
    let difference = avg2 - avg1;
    let percentage_change = if avg1 > 0.0 {
        difference / avg1 * 100.0
    } else {
        0.0
    };
    Ok(Some(TermComparison {
        term1: TermAverage {
            term_id: term1.to_string(),
            average: calc::round_2dp(avg1),
            results_count: t1.len(),
        },
        term2: TermAverage {
            term_id: term2.to_string(),
            average: calc::round_2dp(avg2),
            results_count: t2.len(),
        },
        difference: calc::round_2dp(difference),
        percentage_change: calc::round_2dp(percentage_change),
        improved: difference > 0.0,
    }))
}

pub fn cumulative_average(
    conn: &Connection,
    student_id: &str,
    session_id: &str,
) -> Result<Option<f64>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT r.total_score FROM term_results r
             JOIN terms t ON t.id = r.term_id
             WHERE r.student_id = ? AND t.session_id = ?",
        )
        .map_err(CalcError::query)?;
    let totals: Vec<f64> = stmt
        .query_map((student_id, session_id), |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::query)?;
    Ok(calc::mean(&totals).map(calc::round_2dp))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub term_id: String,
    pub term: String,
    pub score: f64,
    pub grade: String,
    pub position: Option<i64>,
}

/// The student's last `num_terms` results in one subject, oldest first.
pub fn performance_trend(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    num_terms: i64,
) -> Result<Vec<TrendPoint>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT r.term_id, sess.name || ' - ' || t.name, r.total_score, r.grade, r.position
             FROM term_results r
             JOIN terms t ON t.id = r.term_id
             JOIN academic_sessions sess ON sess.id = t.session_id
             WHERE r.student_id = ? AND r.subject_id = ?
             ORDER BY sess.start_date DESC, t.start_date DESC
             LIMIT ?",
        )
        .map_err(CalcError::query)?;
    let mut points = stmt
        .query_map((student_id, subject_id, num_terms.max(0)), |r| {
            Ok(TrendPoint {
                term_id: r.get(0)?,
                term: r.get(1)?,
                score: r.get(2)?,
                grade: r.get(3)?,
                position: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::query)?;
    points.reverse();
    Ok(points)
}
