use crate::analytics;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err, db_conn, optional_str, required_str, respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn optional_limit(req: &Request, key: &str, default: i64) -> Result<i64, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_i64().filter(|n| *n > 0).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a positive integer", key),
                Some(json!({ key: v })),
            )
        }),
    }
}

fn handle_subject_summary(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let term_id = required_str(req, "termId")?;
    let classroom_id = optional_str(req, "classroomId")?;
    let subjects = analytics::subject_performance_summary(
        conn,
        &term_id,
        classroom_id.as_deref(),
        state.config.pass_mark,
    )
    .map_err(|e| calc_err(req, e))?;
    let subjects = to_json(req, &subjects)?;
    Ok(ok(&req.id, json!({ "subjects": subjects })))
}

fn handle_top_performers(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let term_id = required_str(req, "termId")?;
    let classroom_id = optional_str(req, "classroomId")?;
    let limit = optional_limit(req, "limit", 10)?;
    let students = analytics::top_performers(conn, &term_id, classroom_id.as_deref(), limit)
        .map_err(|e| calc_err(req, e))?;
    let students = to_json(req, &students)?;
    Ok(ok(&req.id, json!({ "students": students })))
}

fn handle_compare_terms(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let term1 = required_str(req, "term1Id")?;
    let term2 = required_str(req, "term2Id")?;
    let comparison = analytics::compare_terms(conn, &student_id, &term1, &term2)
        .map_err(|e| calc_err(req, e))?;
    let comparison = to_json(req, &comparison)?;
    Ok(ok(&req.id, json!({ "comparison": comparison })))
}

fn handle_cumulative_average(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let session_id = required_str(req, "sessionId")?;
    let average = analytics::cumulative_average(conn, &student_id, &session_id)
        .map_err(|e| calc_err(req, e))?;
    Ok(ok(
        &req.id,
        json!({ "studentId": student_id, "sessionId": session_id, "average": average }),
    ))
}

fn handle_trend(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let subject_id = required_str(req, "subjectId")?;
    let num_terms = optional_limit(req, "numTerms", 3)?;
    let points = analytics::performance_trend(conn, &student_id, &subject_id, num_terms)
        .map_err(|e| calc_err(req, e))?;
    let points = to_json(req, &points)?;
    Ok(ok(&req.id, json!({ "trend": points })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "analytics.subjectSummary" => handle_subject_summary(state, req),
        "analytics.topPerformers" => handle_top_performers(state, req),
        "analytics.compareTerms" => handle_compare_terms(state, req),
        "analytics.cumulativeAverage" => handle_cumulative_average(state, req),
        "analytics.trend" => handle_trend(state, req),
        _ => return None,
    };
    Some(respond(result))
}
