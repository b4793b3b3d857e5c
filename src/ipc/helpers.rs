use crate::calc::CalcError;
use crate::constraints::ActorRole;
use crate::grading::ValidationError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

pub type HandlerResult = Result<serde_json::Value, serde_json::Value>;

pub fn respond(result: HandlerResult) -> serde_json::Value {
    match result {
        Ok(v) | Err(v) => v,
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Absent and null both read as `None`; any other non-string is rejected.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_str().map(|s| Some(s.to_string())).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a string or null", key),
                None,
            )
        }),
    }
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    match req.params.get(key) {
        Some(v) => v.as_f64().ok_or_else(|| {
            err(
                &req.id,
                "validation_failed",
                format!("{} must be numeric", key),
                Some(json!({ key: v })),
            )
        }),
        None => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

pub fn optional_bool(req: &Request, key: &str, default: bool) -> bool {
    req.params
        .get(key)
        .and_then(|v| v.as_bool())
        .unwrap_or(default)
}

pub fn actor_role(req: &Request) -> Result<ActorRole, serde_json::Value> {
    let raw = req.params.get("actorRole").and_then(|v| v.as_str());
    ActorRole::parse(raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "actorRole must be one of: admin, teacher",
            Some(json!({ "actorRole": raw })),
        )
    })
}

pub fn calc_err(req: &Request, e: CalcError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

pub fn validation_err(req: &Request, e: ValidationError) -> serde_json::Value {
    tracing::debug!(request_id = %req.id, method = %req.method, error = %e, "validation rejected");
    err(&req.id, e.code(), e.to_string(), None)
}

/// Maps a write failure; uniqueness and foreign-key violations surface as `conflict`.
pub fn db_write_err(req: &Request, code: &str, table: &str, e: rusqlite::Error) -> serde_json::Value {
    let code = match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation => {
            "conflict"
        }
        _ => code,
    };
    err(&req.id, code, e.to_string(), Some(json!({ "table": table })))
}

pub fn db_query_err(req: &Request, e: rusqlite::Error) -> serde_json::Value {
    err(&req.id, "db_query_failed", e.to_string(), None)
}

pub fn to_json<T: serde::Serialize>(req: &Request, value: &T) -> HandlerResult {
    serde_json::to_value(value)
        .map_err(|e| err(&req.id, "internal", format!("serialize failed: {}", e), None))
}
