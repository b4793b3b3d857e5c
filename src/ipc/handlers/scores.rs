use crate::calc;
use crate::constraints;
use crate::db;
use crate::grading::{self, ValidationError};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_role, db_conn, db_query_err, db_write_err, optional_str, required_f64, required_str,
    respond, to_json, validation_err, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};

struct AssessmentInfo {
    max_score: f64,
    is_locked: bool,
    classroom_id: String,
}

/// Loads the assessment and enforces the lock for the caller's role.
fn writable_assessment(
    conn: &Connection,
    req: &Request,
    assessment_id: &str,
) -> Result<AssessmentInfo, serde_json::Value> {
    let info = conn
        .query_row(
            "SELECT a.max_score, a.is_locked, sa.classroom_id
             FROM assessments a
             JOIN subject_assignments sa ON sa.id = a.assignment_id
             WHERE a.id = ?",
            [assessment_id],
            |r| {
                Ok(AssessmentInfo {
                    max_score: r.get(0)?,
                    is_locked: r.get::<_, i64>(1)? != 0,
                    classroom_id: r.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| db_query_err(req, e))?;
    let Some(info) = info else {
        return Err(err(&req.id, "not_found", "assessment not found", None));
    };
    let role = actor_role(req)?;
    if !constraints::can_edit_scores(info.is_locked, role) {
        return Err(err(
            &req.id,
            "locked",
            "assessment is locked; only an admin can change its scores",
            Some(json!({ "assessmentId": assessment_id })),
        ));
    }
    Ok(info)
}

struct ScoreEntry {
    student_id: String,
    score: f64,
    remarks: String,
}

/// Range-checks a score and derives its percentage and grade.
fn grade_entry(score: f64, max_score: f64) -> Result<(f64, grading::Grade), ValidationError> {
    constraints::validate_score(score, max_score)?;
    let percentage = calc::round_2dp(score / max_score * 100.0);
    let grade = grading::assessment_grade(percentage)?;
    Ok((percentage, grade))
}

fn write_score(
    conn: &Connection,
    assessment_id: &str,
    entry: &ScoreEntry,
    percentage: f64,
    grade: grading::Grade,
    submitted_by: Option<&str>,
) -> rusqlite::Result<()> {
    let now = db::now_rfc3339();
    conn.execute(
        "INSERT INTO student_scores(
            id, assessment_id, student_id, score, percentage, grade, remarks,
            submitted_by, submitted_at, updated_at
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
         ON CONFLICT(assessment_id, student_id) DO UPDATE SET
            score = excluded.score,
            percentage = excluded.percentage,
            grade = excluded.grade,
            remarks = excluded.remarks,
            submitted_by = COALESCE(excluded.submitted_by, student_scores.submitted_by),
            updated_at = excluded.updated_at",
        (
            db::new_id(),
            assessment_id,
            &entry.student_id,
            entry.score,
            percentage,
            grade.as_str(),
            &entry.remarks,
            submitted_by,
            &now,
        ),
    )?;
    Ok(())
}

fn handle_scores_upsert(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let assessment_id = required_str(req, "assessmentId")?;
    let student_id = required_str(req, "studentId")?;
    let score = required_f64(req, "score")?;
    let remarks = optional_str(req, "remarks")?.unwrap_or_default();
    let submitted_by = optional_str(req, "submittedBy")?;

    let info = writable_assessment(conn, req, &assessment_id)?;
    let (percentage, grade) =
        grade_entry(score, info.max_score).map_err(|e| validation_err(req, e))?;
    let entry = ScoreEntry {
        student_id,
        score,
        remarks,
    };
    write_score(
        conn,
        &assessment_id,
        &entry,
        percentage,
        grade,
        submitted_by.as_deref(),
    )
    .map_err(|e| db_write_err(req, "db_insert_failed", "student_scores", e))?;
    Ok(ok(
        &req.id,
        json!({
            "studentId": entry.student_id,
            "score": score,
            "percentage": percentage,
            "grade": grade.as_str(),
        }),
    ))
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RowError {
    row: usize,
    key: Option<String>,
    message: String,
}

fn rows_param<'a>(req: &'a Request) -> Result<&'a Vec<serde_json::Value>, serde_json::Value> {
    req.params
        .get("rows")
        .and_then(|v| v.as_array())
        .ok_or_else(|| err(&req.id, "bad_params", "missing rows", None))
}

/// Validates each row, collecting per-row failures, then writes the accepted rows in one
/// transaction.
fn save_batch(
    conn: &Connection,
    req: &Request,
    assessment_id: &str,
    info: &AssessmentInfo,
    key_field: &str,
    resolve: impl Fn(&str) -> Option<String>,
) -> HandlerResult {
    let rows = rows_param(req)?;
    let submitted_by = optional_str(req, "submittedBy")?;
    let mut accepted: Vec<(ScoreEntry, f64, grading::Grade)> = Vec::new();
    let mut errors: Vec<RowError> = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let key = row
            .get(key_field)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let Some(key) = key else {
            errors.push(RowError {
                row: i,
                key: None,
                message: format!("missing {}", key_field),
            });
            continue;
        };
        let Some(student_id) = resolve(&key) else {
            errors.push(RowError {
                row: i,
                key: Some(key),
                message: "student not found in this class".to_string(),
            });
            continue;
        };
        let Some(score) = row.get("score").and_then(|v| v.as_f64()) else {
            errors.push(RowError {
                row: i,
                key: Some(key),
                message: "score must be numeric".to_string(),
            });
            continue;
        };
        match grade_entry(score, info.max_score) {
            Ok((percentage, grade)) => {
                let remarks = row
                    .get("remarks")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                accepted.push((
                    ScoreEntry {
                        student_id,
                        score,
                        remarks,
                    },
                    percentage,
                    grade,
                ));
            }
            Err(e) => errors.push(RowError {
                row: i,
                key: Some(key),
                message: e.to_string(),
            }),
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    for (entry, percentage, grade) in &accepted {
        write_score(
            &tx,
            assessment_id,
            entry,
            *percentage,
            *grade,
            submitted_by.as_deref(),
        )
        .map_err(|e| db_write_err(req, "db_insert_failed", "student_scores", e))?;
    }
    tx.commit()
        .map_err(|e| err(&req.id, "db_commit_failed", e.to_string(), None))?;

    if !errors.is_empty() {
        tracing::debug!(
            assessment_id,
            rejected = errors.len(),
            "score rows rejected"
        );
    }
    tracing::info!(assessment_id, saved = accepted.len(), "scores saved");
    let rejected = errors.len();
    let errors = to_json(req, &errors)?;
    Ok(ok(
        &req.id,
        json!({ "saved": accepted.len(), "rejected": rejected, "errors": errors }),
    ))
}

fn class_students(
    conn: &Connection,
    req: &Request,
    classroom_id: &str,
) -> Result<HashMap<String, String>, serde_json::Value> {
    let mut stmt = conn
        .prepare("SELECT admission_no, id FROM students WHERE classroom_id = ?")
        .map_err(|e| db_query_err(req, e))?;
    let map = stmt
        .query_map([classroom_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(|e| db_query_err(req, e))?;
    Ok(map)
}

fn handle_scores_bulk_entry(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let assessment_id = required_str(req, "assessmentId")?;
    let info = writable_assessment(conn, req, &assessment_id)?;
    let ids: HashSet<String> = class_students(conn, req, &info.classroom_id)?
        .into_values()
        .collect();
    save_batch(conn, req, &assessment_id, &info, "studentId", |id| {
        ids.contains(id).then(|| id.to_string())
    })
}

fn handle_scores_import(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let assessment_id = required_str(req, "assessmentId")?;
    let info = writable_assessment(conn, req, &assessment_id)?;
    let by_admission = class_students(conn, req, &info.classroom_id)?;
    save_batch(conn, req, &assessment_id, &info, "admissionNo", |no| {
        by_admission.get(no).cloned()
    })
}

fn handle_scores_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let assessment_id = required_str(req, "assessmentId")?;
    let mut stmt = conn
        .prepare(
            "SELECT ss.student_id, s.surname || ' ' || s.other_name, s.admission_no,
                    ss.score, ss.percentage, ss.grade, ss.remarks, ss.submitted_by, ss.updated_at
             FROM student_scores ss
             JOIN students s ON s.id = ss.student_id
             WHERE ss.assessment_id = ?
             ORDER BY s.surname, s.other_name, s.id",
        )
        .map_err(|e| db_query_err(req, e))?;
    let scores = stmt
        .query_map([&assessment_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "studentName": r.get::<_, String>(1)?,
                "admissionNo": r.get::<_, String>(2)?,
                "score": r.get::<_, f64>(3)?,
                "percentage": r.get::<_, f64>(4)?,
                "grade": r.get::<_, String>(5)?,
                "remarks": r.get::<_, String>(6)?,
                "submittedBy": r.get::<_, Option<String>>(7)?,
                "updatedAt": r.get::<_, String>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_query_err(req, e))?;
    Ok(ok(&req.id, json!({ "scores": scores })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "scores.upsert" => handle_scores_upsert(state, req),
        "scores.bulkEntry" => handle_scores_bulk_entry(state, req),
        "scores.import" => handle_scores_import(state, req),
        "scores.list" => handle_scores_list(state, req),
        _ => return None,
    };
    Some(respond(result))
}
