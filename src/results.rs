use crate::calc::{self, CalcError, ScoreItem};
use crate::config::Config;
use crate::db;
use crate::grading::{ordinal_suffix, Grade};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeSummary {
    pub classroom_id: String,
    pub term_id: String,
    pub subjects: usize,
    pub subjects_without_scores: usize,
    pub results_created: usize,
    pub results_updated: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermResultRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub term_id: String,
    pub classroom_id: String,
    pub ca_total: f64,
    pub exam_score: f64,
    pub total_score: f64,
    pub grade: String,
    pub grade_point: Option<u8>,
    pub remark: Option<&'static str>,
    pub position: Option<i64>,
    pub position_label: Option<String>,
    pub class_average: Option<f64>,
    pub highest_score: Option<f64>,
    pub lowest_score: Option<f64>,
    pub teacher_remarks: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStatistics {
    pub subject_id: String,
    pub average: f64,
    pub total_students: usize,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_rate: f64,
    pub grade_distribution: BTreeMap<&'static str, usize>,
}

fn ensure_exists(conn: &Connection, table: &str, id: &str, what: &str) -> Result<(), CalcError> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found = conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map_err(CalcError::query)?;
    if found.is_none() {
        return Err(CalcError::new("not_found", format!("{} not found", what))
            .with_details(json!({ "id": id })));
    }
    Ok(())
}

/// Recomputes every TermResult for one class/term and re-ranks each subject.
///
/// The batch is all-or-nothing: any failure rolls back every row written for the class/term.
pub fn recompute_class_term(
    conn: &Connection,
    classroom_id: &str,
    term_id: &str,
    cfg: &Config,
) -> Result<RecomputeSummary, CalcError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;
    let summary = match recompute_in_tx(&tx, classroom_id, term_id, cfg) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(classroom_id, term_id, code = %e.code, "recompute rolled back");
            return Err(e);
        }
    };
    tx.commit()
        .map_err(|e| CalcError::new("db_commit_failed", e.to_string()))?;
    tracing::info!(
        classroom_id,
        term_id,
        subjects = summary.subjects,
        created = summary.results_created,
        updated = summary.results_updated,
        "term results recomputed"
    );
    Ok(summary)
}

/// Recomputes every classroom of the current session for the current term in one transaction.
pub fn recompute_current(conn: &Connection, cfg: &Config) -> Result<Vec<RecomputeSummary>, CalcError> {
    let Some(term_id) = db::current_term_id(conn).map_err(CalcError::query)? else {
        return Err(CalcError::new("no_current_term", "no current term found"));
    };
    let classroom_ids: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT c.id FROM classrooms c
                 JOIN academic_sessions s ON s.id = c.session_id
                 WHERE s.is_current = 1
                 ORDER BY c.level, c.arm",
            )
            .map_err(CalcError::query)?;
        let ids = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::query)?;
        ids
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;
    let mut out = Vec::with_capacity(classroom_ids.len());
    for classroom_id in &classroom_ids {
        match recompute_in_tx(&tx, classroom_id, &term_id, cfg) {
            Ok(s) => out.push(s),
            Err(e) => {
                tracing::warn!(classroom_id = %classroom_id, term_id = %term_id, code = %e.code, "recompute rolled back");
                return Err(e);
            }
        }
    }
    tx.commit()
        .map_err(|e| CalcError::new("db_commit_failed", e.to_string()))?;
    tracing::info!(term_id = %term_id, classrooms = out.len(), "current term recomputed");
    Ok(out)
}

fn recompute_in_tx(
    conn: &Connection,
    classroom_id: &str,
    term_id: &str,
    cfg: &Config,
) -> Result<RecomputeSummary, CalcError> {
    ensure_exists(conn, "classrooms", classroom_id, "classroom")?;
    ensure_exists(conn, "terms", term_id, "term")?;

    let mut summary = RecomputeSummary {
        classroom_id: classroom_id.to_string(),
        term_id: term_id.to_string(),
        ..RecomputeSummary::default()
    };

    let student_ids: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT id FROM students
                 WHERE classroom_id = ?
                 ORDER BY surname, other_name, id",
            )
            .map_err(CalcError::query)?;
        let ids = stmt
            .query_map([classroom_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::query)?;
        ids
    };

    let assignments: Vec<(String, String)> = {
        let mut stmt = conn
            .prepare(
                "SELECT id, subject_id FROM subject_assignments
                 WHERE classroom_id = ? AND term_id = ?
                 ORDER BY rowid",
            )
            .map_err(CalcError::query)?;
        let rows = stmt
            .query_map((classroom_id, term_id), |r| Ok((r.get(0)?, r.get(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::query)?;
        rows
    };

    if student_ids.is_empty() || assignments.is_empty() {
        return Ok(summary);
    }

    let mut score_stmt = conn
        .prepare(
            "SELECT ss.student_id, t.code, ss.score, a.max_score, t.weight
             FROM student_scores ss
             JOIN assessments a ON a.id = ss.assessment_id
             JOIN assessment_types t ON t.id = a.assessment_type_id
             WHERE a.assignment_id = ?
             ORDER BY a.created_at, a.rowid",
        )
        .map_err(CalcError::query)?;

    for (assignment_id, subject_id) in &assignments {
        let rows = score_stmt
            .query_map([assignment_id], |r| {
                let student_id: String = r.get(0)?;
                Ok((
                    student_id,
                    ScoreItem {
                        code: r.get(1)?,
                        score: r.get(2)?,
                        max_score: r.get(3)?,
                        weight: r.get(4)?,
                    },
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::query)?;

        // A subject with nothing recorded yet produces no rows.
        if rows.is_empty() {
            summary.subjects_without_scores += 1;
            continue;
        }
        summary.subjects += 1;

        let mut by_student: HashMap<String, Vec<ScoreItem>> = HashMap::new();
        for (student_id, item) in rows {
            by_student.entry(student_id).or_default().push(item);
        }

        for student_id in &student_ids {
            let items = by_student.get(student_id).map(Vec::as_slice).unwrap_or(&[]);
            let totals = calc::aggregate_scores(items, &cfg.exam_code, cfg.exam_weight);
            let existed = upsert_term_result(
                conn,
                student_id,
                subject_id,
                term_id,
                classroom_id,
                &totals,
            )?;
            if existed {
                summary.results_updated += 1;
            } else {
                summary.results_created += 1;
            }
        }

        rank_subject(conn, subject_id, term_id, classroom_id)?;
    }

    Ok(summary)
}

fn upsert_term_result(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    term_id: &str,
    classroom_id: &str,
    totals: &calc::TermTotals,
) -> Result<bool, CalcError> {
    let existed = conn
        .query_row(
            "SELECT 1 FROM term_results WHERE student_id = ? AND subject_id = ? AND term_id = ?",
            (student_id, subject_id, term_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(CalcError::query)?
        .is_some();

    conn.execute(
        "INSERT INTO term_results(id, student_id, subject_id, term_id, classroom_id,
                                  ca_total, exam_score, total_score, grade)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, term_id) DO UPDATE SET
           classroom_id = excluded.classroom_id,
           ca_total = excluded.ca_total,
           exam_score = excluded.exam_score,
           total_score = excluded.total_score,
           grade = excluded.grade",
        (
            db::new_id(),
            student_id,
            subject_id,
            term_id,
            classroom_id,
            totals.ca_total,
            totals.exam_score,
            totals.total_score,
            totals.grade.as_str(),
        ),
    )
    .map_err(|e| {
        CalcError::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "term_results" }))
    })?;
    Ok(existed)
}

/// Writes class stats and plain sort-order positions onto every TermResult of one
/// subject/term/classroom. No rows means nothing to do.
pub fn rank_subject(
    conn: &Connection,
    subject_id: &str,
    term_id: &str,
    classroom_id: &str,
) -> Result<usize, CalcError> {
    let rows: Vec<(String, f64)> = {
        let mut stmt = conn
            .prepare(
                "SELECT r.id, r.total_score
                 FROM term_results r
                 JOIN students s ON s.id = r.student_id
                 WHERE r.subject_id = ? AND r.term_id = ? AND r.classroom_id = ?
                 ORDER BY s.surname, s.other_name, s.id",
            )
            .map_err(CalcError::query)?;
        let rows = stmt
            .query_map((subject_id, term_id, classroom_id), |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::query)?;
        rows
    };

    let totals: Vec<f64> = rows.iter().map(|(_, t)| *t).collect();
    let Some(stats) = calc::class_stats(&totals) else {
        return Ok(0);
    };
    let positions = calc::sequential_positions(&totals);

    let mut update = conn
        .prepare(
            "UPDATE term_results
             SET class_average = ?, highest_score = ?, lowest_score = ?, position = ?
             WHERE id = ?",
        )
        .map_err(CalcError::query)?;
    for ((id, _), position) in rows.iter().zip(positions) {
        update
            .execute((stats.average, stats.highest, stats.lowest, position, id))
            .map_err(|e| {
                CalcError::new("db_update_failed", e.to_string())
                    .with_details(json!({ "table": "term_results" }))
            })?;
    }
    Ok(rows.len())
}

const RESULT_SELECT: &str = "SELECT r.id, r.student_id, s.surname || ' ' || s.other_name,
        r.subject_id, sub.name, r.term_id, r.classroom_id, r.ca_total, r.exam_score,
        r.total_score, r.grade, r.position, r.class_average, r.highest_score,
        r.lowest_score, r.teacher_remarks
     FROM term_results r
     JOIN students s ON s.id = r.student_id
     JOIN subjects sub ON sub.id = r.subject_id";

fn map_result_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TermResultRow> {
    let position: Option<i64> = r.get(11)?;
    let grade: String = r.get(10)?;
    let parsed = Grade::parse(&grade);
    Ok(TermResultRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        subject_id: r.get(3)?,
        subject_name: r.get(4)?,
        term_id: r.get(5)?,
        classroom_id: r.get(6)?,
        ca_total: r.get(7)?,
        exam_score: r.get(8)?,
        total_score: r.get(9)?,
        grade_point: parsed.map(Grade::grade_point),
        remark: parsed.map(Grade::remark),
        grade,
        position,
        position_label: position
            .filter(|p| *p > 0)
            .map(|p| ordinal_suffix(p as u32)),
        class_average: r.get(12)?,
        highest_score: r.get(13)?,
        lowest_score: r.get(14)?,
        teacher_remarks: r.get(15)?,
    })
}

pub fn list_class_results(
    conn: &Connection,
    classroom_id: &str,
    term_id: &str,
) -> Result<Vec<TermResultRow>, CalcError> {
    let sql = format!(
        "{} WHERE r.classroom_id = ? AND r.term_id = ?
         ORDER BY sub.name, r.position, s.surname, s.other_name",
        RESULT_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(CalcError::query)?;
    let rows = stmt
        .query_map((classroom_id, term_id), map_result_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::query)?;
    Ok(rows)
}

pub fn list_student_results(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<Vec<TermResultRow>, CalcError> {
    let sql = format!(
        "{} WHERE r.student_id = ? AND r.term_id = ? ORDER BY sub.name",
        RESULT_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(CalcError::query)?;
    let rows = stmt
        .query_map((student_id, term_id), map_result_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::query)?;
    Ok(rows)
}

pub fn subject_statistics(
    conn: &Connection,
    subject_id: &str,
    term_id: &str,
    classroom_id: &str,
    pass_mark: f64,
) -> Result<Option<SubjectStatistics>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT total_score, grade FROM term_results
             WHERE subject_id = ? AND term_id = ? AND classroom_id = ?",
        )
        .map_err(CalcError::query)?;
    let rows: Vec<(f64, String)> = stmt
        .query_map((subject_id, term_id, classroom_id), |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::query)?;
    if rows.is_empty() {
        return Ok(None);
    }

    let totals: Vec<f64> = rows.iter().map(|(t, _)| *t).collect();
    let total_students = rows.len();
    let pass_count = totals.iter().filter(|t| **t >= pass_mark).count();
    let mut grade_distribution: BTreeMap<&'static str, usize> =
        Grade::ALL.iter().map(|g| (g.as_str(), 0)).collect();
    for (_, g) in &rows {
        if let Some(grade) = Grade::parse(g) {
            *grade_distribution.entry(grade.as_str()).or_insert(0) += 1;
        }
    }

    Ok(Some(SubjectStatistics {
        subject_id: subject_id.to_string(),
        average: calc::round_2dp(calc::mean(&totals).unwrap_or(0.0)),
        total_students,
        pass_count,
        fail_count: total_students - pass_count,
        pass_rate: calc::round_2dp(pass_count as f64 / total_students as f64 * 100.0),
        grade_distribution,
    }))
}
