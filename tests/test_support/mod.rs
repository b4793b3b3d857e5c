#![allow(dead_code)]

use serde_json::json;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub fn temp_dir(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("create temp dir")
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_termresultsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn termresultsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .cloned()
            .unwrap_or_else(|| json!({ "message": "unknown error" }))
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Sends a request that must fail and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

pub fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

pub fn f64_field(value: &serde_json::Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
}

/// A running sidecar with an open workspace and a request counter.
pub struct Sidecar {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    seq: u64,
    pub workspace: tempfile::TempDir,
}

impl Sidecar {
    pub fn start(prefix: &str) -> Sidecar {
        let workspace = temp_dir(prefix);
        let (child, stdin, reader) = spawn_sidecar();
        let mut sidecar = Sidecar {
            _child: child,
            stdin,
            reader,
            seq: 0,
            workspace,
        };
        let path = sidecar.workspace.path().to_string_lossy().to_string();
        sidecar.ok("workspace.select", json!({ "path": path }));
        sidecar
    }

    fn next_id(&mut self) -> String {
        self.seq += 1;
        self.seq.to_string()
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.next_id();
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    pub fn err(&mut self, method: &str, params: serde_json::Value) -> String {
        let id = self.next_id();
        request_err(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    pub fn raw(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.next_id();
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    pub fn send_line(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write line");
        self.stdin.flush().expect("flush line");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        serde_json::from_str(out.trim()).expect("parse response json")
    }
}

/// One current session/term with a JSS1 A class of three students
/// (Adams, Bello, Chukwu) and the five standard assessment types.
pub struct School {
    pub session_id: String,
    pub term_id: String,
    pub classroom_id: String,
    pub students: Vec<String>,
    pub admission_nos: Vec<String>,
    pub types: HashMap<&'static str, String>,
}

pub fn seed_school(sc: &mut Sidecar) -> School {
    let session = sc.ok(
        "sessions.create",
        json!({
            "name": "2024/2025",
            "startDate": "2024-09-01",
            "endDate": "2025-07-31",
            "isCurrent": true,
        }),
    );
    let session_id = str_field(&session, "sessionId");
    let term = sc.ok(
        "terms.create",
        json!({
            "sessionId": session_id,
            "name": "First",
            "startDate": "2024-09-09",
            "endDate": "2024-12-13",
            "isCurrent": true,
        }),
    );
    let term_id = str_field(&term, "termId");
    let class = sc.ok(
        "classes.create",
        json!({ "level": "JSS1", "arm": "A", "sessionId": session_id }),
    );
    let classroom_id = str_field(&class, "classroomId");

    let mut students = Vec::new();
    let mut admission_nos = Vec::new();
    for (i, (surname, other)) in [("Adams", "Tola"), ("Bello", "Musa"), ("Chukwu", "Ada")]
        .into_iter()
        .enumerate()
    {
        let admission_no = format!("ADM/{:03}", i + 1);
        let s = sc.ok(
            "students.create",
            json!({
                "classroomId": classroom_id,
                "surname": surname,
                "otherName": other,
                "admissionNo": admission_no,
            }),
        );
        students.push(str_field(&s, "studentId"));
        admission_nos.push(admission_no);
    }

    let mut types = HashMap::new();
    for (code, weight, max) in [
        ("CA1", 10.0, 10.0),
        ("CA2", 10.0, 10.0),
        ("CA3", 10.0, 10.0),
        ("TEST", 10.0, 10.0),
        ("EXAM", 60.0, 60.0),
    ] {
        let t = sc.ok(
            "assessmentTypes.create",
            json!({ "name": code, "code": code, "weight": weight, "maxScore": max }),
        );
        types.insert(code, str_field(&t, "assessmentTypeId"));
    }

    School {
        session_id,
        term_id,
        classroom_id,
        students,
        admission_nos,
        types,
    }
}

pub fn create_subject(sc: &mut Sidecar, name: &str, code: &str) -> String {
    let s = sc.ok("subjects.create", json!({ "name": name, "code": code }));
    str_field(&s, "subjectId")
}

pub fn assign(sc: &mut Sidecar, classroom_id: &str, subject_id: &str, term_id: &str) -> String {
    let a = sc.ok(
        "assignments.create",
        json!({
            "classroomId": classroom_id,
            "subjectId": subject_id,
            "termId": term_id,
            "teacher": "Mrs. Okafor",
        }),
    );
    str_field(&a, "assignmentId")
}

pub fn add_assessment(
    sc: &mut Sidecar,
    school: &School,
    assignment_id: &str,
    code: &str,
    max_score: f64,
) -> String {
    let type_id = school.types.get(code).expect("assessment type").clone();
    let a = sc.ok(
        "assessments.create",
        json!({
            "assignmentId": assignment_id,
            "assessmentTypeId": type_id,
            "code": code,
            "title": format!("{} assessment", code),
            "maxScore": max_score,
        }),
    );
    str_field(&a, "assessmentId")
}

pub fn score(sc: &mut Sidecar, assessment_id: &str, student_id: &str, value: f64) {
    sc.ok(
        "scores.upsert",
        json!({ "assessmentId": assessment_id, "studentId": student_id, "score": value }),
    );
}

/// Finds the row for `student_id` in a list of result or card objects.
pub fn row_for<'a>(rows: &'a serde_json::Value, student_id: &str) -> &'a serde_json::Value {
    rows.as_array()
        .expect("rows array")
        .iter()
        .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(student_id))
        .unwrap_or_else(|| panic!("no row for {}", student_id))
}
