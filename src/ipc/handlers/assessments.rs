use crate::constraints::{self, AssessmentCode, ConstraintReport};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_role, db_conn, db_query_err, db_write_err, optional_str, required_f64, required_str,
    respond, to_json, validation_err, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn handle_types_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let name = required_str(req, "name")?;
    let code = required_str(req, "code")?.to_ascii_uppercase();
    let weight = required_f64(req, "weight")?;
    let max_score = match req.params.get("maxScore") {
        None => 100.0,
        Some(_) => required_f64(req, "maxScore")?,
    };
    let description = optional_str(req, "description")?.unwrap_or_default();

    if !(0.0..=100.0).contains(&weight) {
        return Err(err(
            &req.id,
            "validation_failed",
            "weight must be between 0 and 100",
            Some(json!({ "weight": weight })),
        ));
    }
    if !max_score.is_finite() || max_score <= 0.0 {
        return Err(err(
            &req.id,
            "validation_failed",
            "maxScore must be greater than 0",
            Some(json!({ "maxScore": max_score })),
        ));
    }

    let id = db::new_id();
    conn.execute(
        "INSERT INTO assessment_types(id, name, code, weight, max_score, description)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &name, &code, weight, max_score, &description),
    )
    .map_err(|e| db_write_err(req, "db_insert_failed", "assessment_types", e))?;
    Ok(ok(
        &req.id,
        json!({ "assessmentTypeId": id, "code": code, "weight": weight }),
    ))
}

fn handle_types_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, name, code, weight, max_score, description
             FROM assessment_types
             ORDER BY code",
        )
        .map_err(|e| db_query_err(req, e))?;
    let types = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "weight": r.get::<_, f64>(3)?,
                "maxScore": r.get::<_, f64>(4)?,
                "description": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_query_err(req, e))?;
    Ok(ok(&req.id, json!({ "assessmentTypes": types })))
}

fn parse_code(req: &Request) -> Result<AssessmentCode, serde_json::Value> {
    let raw = required_str(req, "code")?;
    AssessmentCode::parse(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "code must be one of: CA1, CA2, CA3, TEST, EXAM",
            Some(json!({ "code": raw })),
        )
    })
}

/// Summed max score of the other CA-coded assessments sharing this assignment.
fn sibling_ca_total(
    conn: &Connection,
    assignment_id: &str,
    exclude_id: Option<&str>,
) -> rusqlite::Result<f64> {
    conn.query_row(
        "SELECT COALESCE(SUM(max_score), 0)
         FROM assessments
         WHERE assignment_id = ?1
           AND UPPER(code) LIKE 'CA%'
           AND (?2 IS NULL OR id <> ?2)",
        (assignment_id, exclude_id),
        |r| r.get(0),
    )
}

fn run_constraints(
    conn: &Connection,
    req: &Request,
    assignment_id: &str,
    exclude_id: Option<&str>,
    code: AssessmentCode,
    max_score: f64,
) -> Result<ConstraintReport, serde_json::Value> {
    let siblings =
        sibling_ca_total(conn, assignment_id, exclude_id).map_err(|e| db_query_err(req, e))?;
    Ok(constraints::check_assessment(code, max_score, siblings))
}

fn ensure_assignment(conn: &Connection, req: &Request, assignment_id: &str) -> Result<(), serde_json::Value> {
    let found = conn
        .query_row(
            "SELECT 1 FROM subject_assignments WHERE id = ?",
            [assignment_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| db_query_err(req, e))?;
    if found.is_none() {
        return Err(err(&req.id, "not_found", "assignment not found", None));
    }
    Ok(())
}

fn handle_assessments_validate(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let assignment_id = required_str(req, "assignmentId")?;
    let code = parse_code(req)?;
    let max_score = required_f64(req, "maxScore")?;
    let exclude = optional_str(req, "assessmentId")?;
    let report = run_constraints(conn, req, &assignment_id, exclude.as_deref(), code, max_score)?;
    Ok(ok(
        &req.id,
        json!({
            "valid": report.is_valid(),
            "errors": report.errors,
            "warnings": report.warnings,
        }),
    ))
}

fn handle_assessments_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let assignment_id = required_str(req, "assignmentId")?;
    let type_id = required_str(req, "assessmentTypeId")?;
    let code = parse_code(req)?;
    let title = required_str(req, "title")?;
    let date = optional_str(req, "date")?;
    let max_score = required_f64(req, "maxScore")?;

    ensure_assignment(conn, req, &assignment_id)?;
    let report = run_constraints(conn, req, &assignment_id, None, code, max_score)?
        .into_result()
        .map_err(|e| validation_err(req, e))?;

    let id = db::new_id();
    conn.execute(
        "INSERT INTO assessments(id, assignment_id, assessment_type_id, code, title, date, max_score, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &assignment_id,
            &type_id,
            code.as_str(),
            &title,
            &date,
            max_score,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| db_write_err(req, "db_insert_failed", "assessments", e))?;
    Ok(ok(
        &req.id,
        json!({ "assessmentId": id, "warnings": report.warnings }),
    ))
}

fn handle_assessments_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let assessment_id = required_str(req, "assessmentId")?;
    let existing = conn
        .query_row(
            "SELECT assignment_id, code, title, date, max_score, is_locked
             FROM assessments WHERE id = ?",
            [&assessment_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, f64>(4)?,
                    r.get::<_, i64>(5)? != 0,
                ))
            },
        )
        .optional()
        .map_err(|e| db_query_err(req, e))?;
    let Some((assignment_id, old_code, old_title, old_date, old_max, is_locked)) = existing else {
        return Err(err(&req.id, "not_found", "assessment not found", None));
    };
    let role = actor_role(req)?;
    if !constraints::can_edit_scores(is_locked, role) {
        return Err(err(
            &req.id,
            "locked",
            "assessment is locked",
            Some(json!({ "assessmentId": assessment_id })),
        ));
    }

    let code = match req.params.get("code") {
        Some(_) => parse_code(req)?,
        None => AssessmentCode::parse(&old_code).ok_or_else(|| {
            err(
                &req.id,
                "validation_failed",
                format!("stored code {} is not recognised", old_code),
                None,
            )
        })?,
    };
    let title = optional_str(req, "title")?.unwrap_or(old_title);
    let date = match req.params.get("date") {
        Some(_) => optional_str(req, "date")?,
        None => old_date,
    };
    let max_score = match req.params.get("maxScore") {
        Some(_) => required_f64(req, "maxScore")?,
        None => old_max,
    };

    let report = run_constraints(
        conn,
        req,
        &assignment_id,
        Some(&assessment_id),
        code,
        max_score,
    )?
    .into_result()
    .map_err(|e| validation_err(req, e))?;

    conn.execute(
        "UPDATE assessments SET code = ?, title = ?, date = ?, max_score = ? WHERE id = ?",
        (code.as_str(), &title, &date, max_score, &assessment_id),
    )
    .map_err(|e| db_write_err(req, "db_update_failed", "assessments", e))?;
    Ok(ok(
        &req.id,
        json!({ "assessmentId": assessment_id, "warnings": report.warnings }),
    ))
}

fn set_lock(state: &mut AppState, req: &Request, lock: bool) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let assessment_id = required_str(req, "assessmentId")?;
    let role = actor_role(req)?;
    if !role.is_privileged() {
        return Err(err(
            &req.id,
            "forbidden",
            "only admins can lock or unlock assessments",
            None,
        ));
    }
    let current = conn
        .query_row(
            "SELECT is_locked FROM assessments WHERE id = ?",
            [&assessment_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| db_query_err(req, e))?;
    let Some(current) = current else {
        return Err(err(&req.id, "not_found", "assessment not found", None));
    };
    if (current != 0) == lock {
        return Ok(ok(
            &req.id,
            json!({ "assessmentId": assessment_id, "isLocked": lock, "changed": false }),
        ));
    }

    let actor = optional_str(req, "actor")?.unwrap_or_else(|| "admin".to_string());
    let updated = if lock {
        conn.execute(
            "UPDATE assessments SET is_locked = 1, locked_by = ?, locked_at = ? WHERE id = ?",
            (&actor, db::now_rfc3339(), &assessment_id),
        )
    } else {
        conn.execute(
            "UPDATE assessments SET is_locked = 0, locked_by = NULL, locked_at = NULL WHERE id = ?",
            [&assessment_id],
        )
    };
    updated.map_err(|e| db_write_err(req, "db_update_failed", "assessments", e))?;
    tracing::info!(assessment_id = %assessment_id, locked = lock, "assessment lock changed");
    Ok(ok(
        &req.id,
        json!({ "assessmentId": assessment_id, "isLocked": lock, "changed": true }),
    ))
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentRow {
    id: String,
    assessment_type_id: String,
    type_code: String,
    code: String,
    title: String,
    date: Option<String>,
    max_score: f64,
    is_locked: bool,
    locked_by: Option<String>,
    locked_at: Option<String>,
    score_count: i64,
}

fn handle_assessments_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let assignment_id = required_str(req, "assignmentId")?;
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.assessment_type_id, t.code, a.code, a.title, a.date, a.max_score,
                    a.is_locked, a.locked_by, a.locked_at,
                    (SELECT COUNT(*) FROM student_scores ss WHERE ss.assessment_id = a.id)
             FROM assessments a
             JOIN assessment_types t ON t.id = a.assessment_type_id
             WHERE a.assignment_id = ?
             ORDER BY a.created_at, a.rowid",
        )
        .map_err(|e| db_query_err(req, e))?;
    let rows = stmt
        .query_map([&assignment_id], |r| {
            Ok(AssessmentRow {
                id: r.get(0)?,
                assessment_type_id: r.get(1)?,
                type_code: r.get(2)?,
                code: r.get(3)?,
                title: r.get(4)?,
                date: r.get(5)?,
                max_score: r.get(6)?,
                is_locked: r.get::<_, i64>(7)? != 0,
                locked_by: r.get(8)?,
                locked_at: r.get(9)?,
                score_count: r.get(10)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_query_err(req, e))?;
    let assessments = to_json(req, &rows)?;
    Ok(ok(&req.id, json!({ "assessments": assessments })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "assessmentTypes.create" => handle_types_create(state, req),
        "assessmentTypes.list" => handle_types_list(state, req),
        "assessments.create" => handle_assessments_create(state, req),
        "assessments.update" => handle_assessments_update(state, req),
        "assessments.validate" => handle_assessments_validate(state, req),
        "assessments.lock" => set_lock(state, req, true),
        "assessments.unlock" => set_lock(state, req, false),
        "assessments.list" => handle_assessments_list(state, req),
        _ => return None,
    };
    Some(respond(result))
}
