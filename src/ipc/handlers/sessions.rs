use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_query_err, db_write_err, optional_bool, required_str, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde_json::json;

const TERM_NAMES: [&str; 3] = ["First", "Second", "Third"];

fn required_date(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let raw = required_str(req, key)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a YYYY-MM-DD date", key),
                Some(json!({ key: raw })),
            )
        })
}

fn check_date_order(req: &Request, start: &str, end: &str) -> Result<(), serde_json::Value> {
    if end < start {
        return Err(err(
            &req.id,
            "bad_params",
            "endDate must not be before startDate",
            Some(json!({ "startDate": start, "endDate": end })),
        ));
    }
    Ok(())
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let name = required_str(req, "name")?;
    let start = required_date(req, "startDate")?;
    let end = required_date(req, "endDate")?;
    check_date_order(req, &start, &end)?;

    let id = db::new_id();
    conn.execute(
        "INSERT INTO academic_sessions(id, name, start_date, end_date, is_current)
         VALUES(?, ?, ?, ?, 0)",
        (&id, &name, &start, &end),
    )
    .map_err(|e| db_write_err(req, "db_insert_failed", "academic_sessions", e))?;

    let is_current = optional_bool(req, "isCurrent", false);
    if is_current {
        db::set_current_session(conn, &id)
            .map_err(|e| db_write_err(req, "db_update_failed", "academic_sessions", e))?;
    }
    Ok(ok(
        &req.id,
        json!({ "sessionId": id, "name": name, "isCurrent": is_current }),
    ))
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, name, start_date, end_date, is_current
             FROM academic_sessions
             ORDER BY start_date DESC",
        )
        .map_err(|e| db_query_err(req, e))?;
    let sessions = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "startDate": r.get::<_, String>(2)?,
                "endDate": r.get::<_, String>(3)?,
                "isCurrent": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_query_err(req, e))?;
    Ok(ok(&req.id, json!({ "sessions": sessions })))
}

fn handle_sessions_set_current(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let session_id = required_str(req, "sessionId")?;
    let found = db::set_current_session(conn, &session_id)
        .map_err(|e| db_write_err(req, "db_update_failed", "academic_sessions", e))?;
    if !found {
        return Err(err(&req.id, "not_found", "session not found", None));
    }
    tracing::info!(session_id = %session_id, "current session changed");
    Ok(ok(&req.id, json!({ "sessionId": session_id })))
}

fn handle_sessions_current(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let Some(session_id) = db::current_session_id(conn).map_err(|e| db_query_err(req, e))?
    else {
        return Ok(ok(&req.id, json!({ "session": null })));
    };
    let session = conn
        .query_row(
            "SELECT id, name, start_date, end_date FROM academic_sessions WHERE id = ?",
            [&session_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "startDate": r.get::<_, String>(2)?,
                    "endDate": r.get::<_, String>(3)?,
                    "isCurrent": true,
                }))
            },
        )
        .optional()
        .map_err(|e| db_query_err(req, e))?;
    Ok(ok(&req.id, json!({ "session": session })))
}

fn handle_terms_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let session_id = required_str(req, "sessionId")?;
    let name = required_str(req, "name")?;
    let Some(name) = TERM_NAMES
        .iter()
        .find(|n| n.eq_ignore_ascii_case(&name))
        .copied()
    else {
        return Err(err(
            &req.id,
            "bad_params",
            "term name must be one of: First, Second, Third",
            Some(json!({ "name": name })),
        ));
    };
    let start = required_date(req, "startDate")?;
    let end = required_date(req, "endDate")?;
    check_date_order(req, &start, &end)?;

    let id = db::new_id();
    conn.execute(
        "INSERT INTO terms(id, session_id, name, start_date, end_date, is_current)
         VALUES(?, ?, ?, ?, ?, 0)",
        (&id, &session_id, name, &start, &end),
    )
    .map_err(|e| db_write_err(req, "db_insert_failed", "terms", e))?;

    let is_current = optional_bool(req, "isCurrent", false);
    if is_current {
        db::set_current_term(conn, &id)
            .map_err(|e| db_write_err(req, "db_update_failed", "terms", e))?;
    }
    Ok(ok(
        &req.id,
        json!({ "termId": id, "name": name, "isCurrent": is_current }),
    ))
}

fn term_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "sessionId": r.get::<_, String>(1)?,
        "sessionName": r.get::<_, String>(2)?,
        "name": r.get::<_, String>(3)?,
        "startDate": r.get::<_, String>(4)?,
        "endDate": r.get::<_, String>(5)?,
        "isCurrent": r.get::<_, i64>(6)? != 0,
    }))
}

const TERM_SELECT: &str = "SELECT t.id, t.session_id, s.name, t.name, t.start_date, t.end_date, t.is_current
     FROM terms t
     JOIN academic_sessions s ON s.id = t.session_id";

fn handle_terms_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let sql = format!("{} ORDER BY s.start_date DESC, t.start_date", TERM_SELECT);
    let mut stmt = conn.prepare(&sql).map_err(|e| db_query_err(req, e))?;
    let terms = stmt
        .query_map([], term_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_query_err(req, e))?;
    Ok(ok(&req.id, json!({ "terms": terms })))
}

fn handle_terms_set_current(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let term_id = required_str(req, "termId")?;
    let found = db::set_current_term(conn, &term_id)
        .map_err(|e| db_write_err(req, "db_update_failed", "terms", e))?;
    if !found {
        return Err(err(&req.id, "not_found", "term not found", None));
    }
    tracing::info!(term_id = %term_id, "current term changed");
    Ok(ok(&req.id, json!({ "termId": term_id })))
}

fn handle_terms_current(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let Some(term_id) = db::current_term_id(conn).map_err(|e| db_query_err(req, e))? else {
        return Ok(ok(&req.id, json!({ "term": null })));
    };
    let sql = format!("{} WHERE t.id = ?", TERM_SELECT);
    let term = conn
        .query_row(&sql, [&term_id], term_json)
        .optional()
        .map_err(|e| db_query_err(req, e))?;
    Ok(ok(&req.id, json!({ "term": term })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sessions.create" => handle_sessions_create(state, req),
        "sessions.list" => handle_sessions_list(state, req),
        "sessions.setCurrent" => handle_sessions_set_current(state, req),
        "sessions.current" => handle_sessions_current(state, req),
        "terms.create" => handle_terms_create(state, req),
        "terms.list" => handle_terms_list(state, req),
        "terms.setCurrent" => handle_terms_set_current(state, req),
        "terms.current" => handle_terms_current(state, req),
        _ => return None,
    };
    Some(respond(result))
}
