use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "termresults.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_sessions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id),
            UNIQUE(session_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_terms_session ON terms(session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            is_core INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            level TEXT NOT NULL,
            arm TEXT NOT NULL,
            session_id TEXT NOT NULL,
            class_teacher TEXT,
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id),
            UNIQUE(level, arm, session_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            surname TEXT NOT NULL,
            other_name TEXT NOT NULL,
            admission_no TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    ensure_students_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_classroom ON students(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_assignments(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            teacher TEXT,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(classroom_id, subject_id, term_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_types(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            weight REAL NOT NULL,
            max_score REAL NOT NULL DEFAULT 100,
            description TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            assessment_type_id TEXT NOT NULL,
            code TEXT NOT NULL,
            title TEXT NOT NULL,
            date TEXT,
            max_score REAL NOT NULL,
            created_at TEXT NOT NULL,
            is_locked INTEGER NOT NULL DEFAULT 0,
            locked_by TEXT,
            locked_at TEXT,
            FOREIGN KEY(assignment_id) REFERENCES subject_assignments(id),
            FOREIGN KEY(assessment_type_id) REFERENCES assessment_types(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_assignment ON assessments(assignment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_scores(
            id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            score REAL NOT NULL,
            percentage REAL NOT NULL DEFAULT 0,
            grade TEXT NOT NULL DEFAULT 'F',
            remarks TEXT NOT NULL DEFAULT '',
            submitted_by TEXT,
            submitted_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(assessment_id) REFERENCES assessments(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(assessment_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_scores_student ON student_scores(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS term_results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            ca_total REAL NOT NULL DEFAULT 0,
            exam_score REAL NOT NULL DEFAULT 0,
            total_score REAL NOT NULL DEFAULT 0,
            grade TEXT NOT NULL,
            position INTEGER,
            class_average REAL,
            highest_score REAL,
            lowest_score REAL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            UNIQUE(student_id, subject_id, term_id)
        )",
        [],
    )?;
    ensure_term_results_teacher_remarks(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_term_results_class_term ON term_results(classroom_id, term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_cards(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            total_score REAL NOT NULL,
            average_score REAL NOT NULL,
            position INTEGER NOT NULL,
            out_of INTEGER NOT NULL,
            class_average REAL,
            performance_label TEXT NOT NULL DEFAULT '',
            performance_color TEXT NOT NULL DEFAULT '',
            days_present INTEGER NOT NULL DEFAULT 0,
            days_absent INTEGER NOT NULL DEFAULT 0,
            attendance_percentage REAL NOT NULL DEFAULT 0,
            class_teacher_remarks TEXT NOT NULL DEFAULT '',
            principal_remarks TEXT NOT NULL DEFAULT '',
            next_term_recommendation TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'Draft',
            is_published INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL,
            published_at TEXT,
            archived_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            UNIQUE(student_id, term_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_report_cards_status_term ON report_cards(status, term_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_term_results_teacher_remarks(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "term_results", "teacher_remarks")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE term_results ADD COLUMN teacher_remarks TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The single session flagged current, if any.
pub fn current_session_id(conn: &Connection) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM academic_sessions WHERE is_current = 1 ORDER BY start_date DESC LIMIT 1",
        [],
        |r| r.get(0),
    )
    .optional()
}

/// The single term flagged current, if any.
pub fn current_term_id(conn: &Connection) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM terms WHERE is_current = 1 LIMIT 1",
        [],
        |r| r.get(0),
    )
    .optional()
}

/// Flags one session current and clears the flag on every other session.
/// Returns false when the session does not exist.
pub fn set_current_session(conn: &Connection, session_id: &str) -> rusqlite::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let exists = tx
        .query_row(
            "SELECT 1 FROM academic_sessions WHERE id = ?",
            [session_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !exists {
        return Ok(false);
    }
    tx.execute(
        "UPDATE academic_sessions SET is_current = CASE WHEN id = ? THEN 1 ELSE 0 END",
        [session_id],
    )?;
    tx.commit()?;
    Ok(true)
}

/// Flags one term current and clears the flag on every other term.
/// Returns false when the term does not exist.
pub fn set_current_term(conn: &Connection, term_id: &str) -> rusqlite::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let exists = tx
        .query_row("SELECT 1 FROM terms WHERE id = ?", [term_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Ok(false);
    }
    tx.execute(
        "UPDATE terms SET is_current = CASE WHEN id = ? THEN 1 ELSE 0 END",
        [term_id],
    )?;
    tx.commit()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("open db");
        (dir, conn)
    }

    #[test]
    fn open_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        drop(open_db(dir.path()).expect("first open"));
        let conn = open_db(dir.path()).expect("second open");
        assert!(table_has_column(&conn, "term_results", "teacher_remarks").expect("pragma"));
        assert!(table_has_column(&conn, "students", "updated_at").expect("pragma"));
    }

    #[test]
    fn only_one_current_term() {
        let (_dir, conn) = open_temp();
        conn.execute(
            "INSERT INTO academic_sessions(id, name, start_date, end_date, is_current)
             VALUES('s1', '2024/2025', '2024-09-01', '2025-07-31', 1)",
            [],
        )
        .expect("insert session");
        for (id, name) in [("t1", "First"), ("t2", "Second")] {
            conn.execute(
                "INSERT INTO terms(id, session_id, name, start_date, end_date, is_current)
                 VALUES(?, 's1', ?, '2024-09-01', '2024-12-15', 0)",
                (id, name),
            )
            .expect("insert term");
        }

        assert!(set_current_term(&conn, "t1").expect("set t1"));
        assert!(set_current_term(&conn, "t2").expect("set t2"));
        let current: i64 = conn
            .query_row("SELECT COUNT(*) FROM terms WHERE is_current = 1", [], |r| {
                r.get(0)
            })
            .expect("count");
        assert_eq!(current, 1);
        assert_eq!(current_term_id(&conn).expect("lookup").as_deref(), Some("t2"));
        assert!(!set_current_term(&conn, "missing").expect("set missing"));
        assert_eq!(current_session_id(&conn).expect("lookup").as_deref(), Some("s1"));
    }
}
