use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_role, calc_err, db_conn, optional_bool, optional_str, required_str, respond, to_json,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::report_cards::{self, CardFilter, CardStatus, Narrative, Transition};
use serde_json::json;

fn narrative(req: &Request) -> Result<Narrative, serde_json::Value> {
    Ok(Narrative {
        class_teacher_remarks: optional_str(req, "classTeacherRemarks")?,
        principal_remarks: optional_str(req, "principalRemarks")?,
        next_term_recommendation: optional_str(req, "nextTermRecommendation")?,
        auto_comment: optional_bool(req, "autoComment", false),
    })
}

fn handle_generate(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let classroom_id = required_str(req, "classroomId")?;
    let term_id = required_str(req, "termId")?;
    let narrative = narrative(req)?;
    let summary = report_cards::compile_class_term(
        conn,
        &classroom_id,
        &term_id,
        &narrative,
        &state.config,
    )
    .map_err(|e| calc_err(req, e))?;
    Ok(ok(&req.id, to_json(req, &summary)?))
}

fn handle_generate_one(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let term_id = required_str(req, "termId")?;
    let narrative = narrative(req)?;
    let card = report_cards::compile_one(conn, &student_id, &term_id, &narrative, &state.config)
        .map_err(|e| calc_err(req, e))?;
    let card = to_json(req, &card)?;
    Ok(ok(&req.id, json!({ "card": card })))
}

fn handle_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let card = match optional_str(req, "cardId")? {
        Some(card_id) => report_cards::get_card_by_id(conn, &card_id),
        None => {
            let student_id = required_str(req, "studentId")?;
            let term_id = required_str(req, "termId")?;
            report_cards::get_card(conn, &student_id, &term_id)
        }
    }
    .map_err(|e| calc_err(req, e))?;
    let Some(card) = card else {
        return Err(err(&req.id, "not_found", "report card not found", None));
    };
    let card = to_json(req, &card)?;
    Ok(ok(&req.id, json!({ "card": card })))
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let status = match optional_str(req, "status")? {
        None => None,
        Some(raw) => Some(CardStatus::parse(&raw).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "status must be one of: Draft, Published, Archived",
                Some(json!({ "status": raw })),
            )
        })?),
    };
    let filter = CardFilter {
        term_id: optional_str(req, "termId")?,
        classroom_id: optional_str(req, "classroomId")?,
        student_id: optional_str(req, "studentId")?,
        status,
    };
    let cards = report_cards::list_cards(conn, &filter).map_err(|e| calc_err(req, e))?;
    let cards = to_json(req, &cards)?;
    Ok(ok(&req.id, json!({ "cards": cards })))
}

fn handle_published(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let cards = report_cards::published_for_student(conn, &student_id)
        .map_err(|e| calc_err(req, e))?;
    let cards = to_json(req, &cards)?;
    Ok(ok(&req.id, json!({ "cards": cards })))
}

fn required_days(req: &Request, key: &str) -> Result<u32, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a non-negative integer", key),
                None,
            )
        })
}

fn handle_set_attendance(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let card_id = required_str(req, "cardId")?;
    let days_present = required_days(req, "daysPresent")?;
    let days_absent = required_days(req, "daysAbsent")?;
    let card = report_cards::set_attendance(conn, &card_id, days_present, days_absent)
        .map_err(|e| calc_err(req, e))?;
    let card = to_json(req, &card)?;
    Ok(ok(&req.id, json!({ "card": card })))
}

fn handle_transition(state: &mut AppState, req: &Request, transition: Transition) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let card_id = required_str(req, "cardId")?;
    let role = actor_role(req)?;
    let card = report_cards::apply_transition(conn, &card_id, transition, role)
        .map_err(|e| calc_err(req, e))?;
    let card = to_json(req, &card)?;
    Ok(ok(&req.id, json!({ "card": card })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reportCards.generate" => handle_generate(state, req),
        "reportCards.generateOne" => handle_generate_one(state, req),
        "reportCards.get" => handle_get(state, req),
        "reportCards.list" => handle_list(state, req),
        "reportCards.published" => handle_published(state, req),
        "reportCards.setAttendance" => handle_set_attendance(state, req),
        "reportCards.publish" => handle_transition(state, req, Transition::Publish),
        "reportCards.unpublish" => handle_transition(state, req, Transition::Unpublish),
        "reportCards.archive" => handle_transition(state, req, Transition::Archive),
        _ => return None,
    };
    Some(respond(result))
}
