use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, required_str, respond, to_json, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::results;
use serde_json::json;

fn handle_recompute(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let classroom_id = required_str(req, "classroomId")?;
    let term_id = required_str(req, "termId")?;
    let summary = results::recompute_class_term(conn, &classroom_id, &term_id, &state.config)
        .map_err(|e| calc_err(req, e))?;
    Ok(ok(&req.id, to_json(req, &summary)?))
}

fn handle_recompute_current(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let summaries =
        results::recompute_current(conn, &state.config).map_err(|e| calc_err(req, e))?;
    let classes = to_json(req, &summaries)?;
    Ok(ok(&req.id, json!({ "classes": classes })))
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let classroom_id = required_str(req, "classroomId")?;
    let term_id = required_str(req, "termId")?;
    let rows = results::list_class_results(conn, &classroom_id, &term_id)
        .map_err(|e| calc_err(req, e))?;
    let rows = to_json(req, &rows)?;
    Ok(ok(&req.id, json!({ "results": rows })))
}

fn handle_student(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let term_id = required_str(req, "termId")?;
    let rows = results::list_student_results(conn, &student_id, &term_id)
        .map_err(|e| calc_err(req, e))?;
    let rows = to_json(req, &rows)?;
    Ok(ok(&req.id, json!({ "results": rows })))
}

fn handle_subject_stats(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let subject_id = required_str(req, "subjectId")?;
    let term_id = required_str(req, "termId")?;
    let classroom_id = required_str(req, "classroomId")?;
    let stats = results::subject_statistics(
        conn,
        &subject_id,
        &term_id,
        &classroom_id,
        state.config.pass_mark,
    )
    .map_err(|e| calc_err(req, e))?;
    let Some(stats) = stats else {
        return Err(err(
            &req.id,
            "not_found",
            "no results for subject in class/term",
            Some(json!({ "subjectId": subject_id, "termId": term_id, "classroomId": classroom_id })),
        ));
    };
    Ok(ok(&req.id, to_json(req, &stats)?))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "results.recompute" => handle_recompute(state, req),
        "results.recomputeCurrent" => handle_recompute_current(state, req),
        "results.list" => handle_list(state, req),
        "results.student" => handle_student(state, req),
        "results.subjectStats" => handle_subject_stats(state, req),
        _ => return None,
    };
    Some(respond(result))
}
