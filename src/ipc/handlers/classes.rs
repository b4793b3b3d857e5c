use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_query_err, db_write_err, optional_bool, optional_str, required_str, respond,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const CLASS_LEVELS: [&str; 6] = ["JSS1", "JSS2", "JSS3", "SS1", "SS2", "SS3"];
const CLASS_ARMS: [&str; 8] = ["A", "B", "C", "D", "E", "F", "G", "H"];

fn handle_subjects_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let name = required_str(req, "name")?;
    let code = required_str(req, "code")?.to_ascii_uppercase();
    let description = optional_str(req, "description")?.unwrap_or_default();
    let is_core = optional_bool(req, "isCore", true);

    let id = db::new_id();
    conn.execute(
        "INSERT INTO subjects(id, name, code, description, is_core) VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &code, &description, is_core as i64),
    )
    .map_err(|e| db_write_err(req, "db_insert_failed", "subjects", e))?;
    Ok(ok(
        &req.id,
        json!({ "subjectId": id, "name": name, "code": code }),
    ))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let mut stmt = conn
        .prepare("SELECT id, name, code, description, is_core FROM subjects ORDER BY name")
        .map_err(|e| db_query_err(req, e))?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "description": r.get::<_, String>(3)?,
                "isCore": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_query_err(req, e))?;
    Ok(ok(&req.id, json!({ "subjects": subjects })))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let level = required_str(req, "level")?.to_ascii_uppercase();
    let arm = required_str(req, "arm")?.to_ascii_uppercase();
    let session_id = required_str(req, "sessionId")?;
    let class_teacher = optional_str(req, "classTeacher")?;

    if !CLASS_LEVELS.contains(&level.as_str()) {
        return Err(err(
            &req.id,
            "bad_params",
            format!("level must be one of: {}", CLASS_LEVELS.join(", ")),
            Some(json!({ "level": level })),
        ));
    }
    if !CLASS_ARMS.contains(&arm.as_str()) {
        return Err(err(
            &req.id,
            "bad_params",
            format!("arm must be one of: {}", CLASS_ARMS.join(", ")),
            Some(json!({ "arm": arm })),
        ));
    }

    let id = db::new_id();
    conn.execute(
        "INSERT INTO classrooms(id, level, arm, session_id, class_teacher) VALUES(?, ?, ?, ?, ?)",
        (&id, &level, &arm, &session_id, &class_teacher),
    )
    .map_err(|e| db_write_err(req, "db_insert_failed", "classrooms", e))?;
    Ok(ok(
        &req.id,
        json!({ "classroomId": id, "name": format!("{}{}", level, arm) }),
    ))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let session_id = optional_str(req, "sessionId")?;
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id, c.level, c.arm, c.session_id, c.class_teacher,
               (SELECT COUNT(*) FROM students s WHERE s.classroom_id = c.id) AS student_count
             FROM classrooms c
             WHERE (?1 IS NULL OR c.session_id = ?1)
             ORDER BY c.level, c.arm",
        )
        .map_err(|e| db_query_err(req, e))?;
    let classes = stmt
        .query_map([&session_id], |r| {
            let level: String = r.get(1)?;
            let arm: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": format!("{}{}", level, arm),
                "level": level,
                "arm": arm,
                "sessionId": r.get::<_, String>(3)?,
                "classTeacher": r.get::<_, Option<String>>(4)?,
                "studentCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_query_err(req, e))?;
    Ok(ok(&req.id, json!({ "classes": classes })))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let classroom_id = required_str(req, "classroomId")?;
    let surname = required_str(req, "surname")?;
    let other_name = required_str(req, "otherName")?;
    let admission_no = required_str(req, "admissionNo")?;
    let active = optional_bool(req, "active", true);

    let id = db::new_id();
    conn.execute(
        "INSERT INTO students(id, classroom_id, surname, other_name, admission_no, active, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &classroom_id,
            &surname,
            &other_name,
            &admission_no,
            active as i64,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| db_write_err(req, "db_insert_failed", "students", e))?;
    Ok(ok(
        &req.id,
        json!({ "studentId": id, "admissionNo": admission_no }),
    ))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let classroom_id = required_str(req, "classroomId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, surname, other_name, admission_no, active
             FROM students
             WHERE classroom_id = ?
             ORDER BY surname, other_name, id",
        )
        .map_err(|e| db_query_err(req, e))?;
    let students = stmt
        .query_map([&classroom_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "surname": r.get::<_, String>(1)?,
                "otherName": r.get::<_, String>(2)?,
                "admissionNo": r.get::<_, String>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_query_err(req, e))?;
    Ok(ok(&req.id, json!({ "students": students })))
}

fn handle_assignments_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let classroom_id = required_str(req, "classroomId")?;
    let subject_id = required_str(req, "subjectId")?;
    let term_id = required_str(req, "termId")?;
    let teacher = optional_str(req, "teacher")?;

    let id = db::new_id();
    conn.execute(
        "INSERT INTO subject_assignments(id, classroom_id, subject_id, term_id, teacher)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &classroom_id, &subject_id, &term_id, &teacher),
    )
    .map_err(|e| db_write_err(req, "db_insert_failed", "subject_assignments", e))?;
    Ok(ok(&req.id, json!({ "assignmentId": id })))
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let classroom_id = required_str(req, "classroomId")?;
    let term_id = required_str(req, "termId")?;
    let mut stmt = conn
        .prepare(
            "SELECT sa.id, sa.subject_id, s.name, s.code, sa.teacher
             FROM subject_assignments sa
             JOIN subjects s ON s.id = sa.subject_id
             WHERE sa.classroom_id = ? AND sa.term_id = ?
             ORDER BY s.name",
        )
        .map_err(|e| db_query_err(req, e))?;
    let assignments = stmt
        .query_map((&classroom_id, &term_id), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subjectId": r.get::<_, String>(1)?,
                "subjectName": r.get::<_, String>(2)?,
                "subjectCode": r.get::<_, String>(3)?,
                "teacher": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_query_err(req, e))?;
    Ok(ok(&req.id, json!({ "assignments": assignments })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "subjects.create" => handle_subjects_create(state, req),
        "subjects.list" => handle_subjects_list(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.list" => handle_classes_list(state, req),
        "students.create" => handle_students_create(state, req),
        "students.list" => handle_students_list(state, req),
        "assignments.create" => handle_assignments_create(state, req),
        "assignments.list" => handle_assignments_list(state, req),
        _ => return None,
    };
    Some(respond(result))
}
