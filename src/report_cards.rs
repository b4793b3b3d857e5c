use crate::calc::{self, CalcError};
use crate::config::Config;
use crate::constraints::ActorRole;
use crate::db;
use crate::grading::{ordinal_suffix, performance_band, teacher_comment};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

pub const RECOMMENDATIONS: [&str; 5] = [
    "Promoted",
    "Promoted with Caution",
    "Retained",
    "Special Intervention",
    "Referred to Counselor",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CardStatus {
    Draft,
    Published,
    Archived,
}

impl CardStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CardStatus::Draft => "Draft",
            CardStatus::Published => "Published",
            CardStatus::Archived => "Archived",
        }
    }

    pub fn parse(s: &str) -> Option<CardStatus> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(CardStatus::Draft),
            "published" => Some(CardStatus::Published),
            "archived" => Some(CardStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Publish,
    Unpublish,
    Archive,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Publish => "publish",
            Transition::Unpublish => "unpublish",
            Transition::Archive => "archive",
        }
    }
}

/// Publication workflow. Archived is terminal.
pub fn next_status(from: CardStatus, transition: Transition) -> Result<CardStatus, CalcError> {
    match (from, transition) {
        (CardStatus::Draft, Transition::Publish) => Ok(CardStatus::Published),
        (CardStatus::Published, Transition::Unpublish) => Ok(CardStatus::Draft),
        (CardStatus::Draft | CardStatus::Published, Transition::Archive) => Ok(CardStatus::Archived),
        _ => Err(CalcError::new(
            "invalid_transition",
            format!("cannot {} a {} report card", transition.as_str(), from.as_str()),
        )
        .with_details(json!({ "from": from.as_str(), "transition": transition.as_str() }))),
    }
}

/// Narrative fields applied during compilation. `None` keeps what is stored.
#[derive(Debug, Clone, Default)]
pub struct Narrative {
    pub class_teacher_remarks: Option<String>,
    pub principal_remarks: Option<String>,
    pub next_term_recommendation: Option<String>,
    /// Fill empty class-teacher remarks with a generated comment.
    pub auto_comment: bool,
}

impl Narrative {
    pub fn validate(&self) -> Result<(), CalcError> {
        if let Some(rec) = self.next_term_recommendation.as_deref() {
            if !rec.is_empty() && !RECOMMENDATIONS.contains(&rec) {
                return Err(CalcError::new(
                    "bad_params",
                    format!("nextTermRecommendation must be one of: {}", RECOMMENDATIONS.join(", ")),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileSummary {
    pub classroom_id: String,
    pub term_id: String,
    pub generated: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped_archived: usize,
    pub out_of: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub term_id: String,
    pub classroom_id: String,
    pub total_score: f64,
    pub average_score: f64,
    pub position: i64,
    pub position_label: String,
    pub out_of: i64,
    pub class_average: Option<f64>,
    pub performance_label: String,
    pub performance_color: String,
    pub days_present: i64,
    pub days_absent: i64,
    pub attendance_percentage: f64,
    pub class_teacher_remarks: String,
    pub principal_remarks: String,
    pub next_term_recommendation: String,
    pub status: String,
    pub is_published: bool,
    pub generated_at: String,
    pub published_at: Option<String>,
    pub archived_at: Option<String>,
}

struct StudentTotals {
    student_id: String,
    totals: Vec<f64>,
}

fn load_class_totals(
    conn: &Connection,
    classroom_id: &str,
    term_id: &str,
) -> Result<Vec<StudentTotals>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT r.student_id, r.total_score
             FROM term_results r
             JOIN students s ON s.id = r.student_id
             WHERE r.classroom_id = ? AND r.term_id = ?
             ORDER BY s.surname, s.other_name, s.id, r.subject_id",
        )
        .map_err(CalcError::query)?;
    let rows: Vec<(String, f64)> = stmt
        .query_map((classroom_id, term_id), |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::query)?;

    let mut out: Vec<StudentTotals> = Vec::new();
    for (student_id, total) in rows {
        match out.last_mut() {
            Some(last) if last.student_id == student_id => last.totals.push(total),
            _ => out.push(StudentTotals {
                student_id,
                totals: vec![total],
            }),
        }
    }
    Ok(out)
}

fn existing_card(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<Option<(CardStatus, f64, String)>, CalcError> {
    let row: Option<(String, f64, String)> = conn
        .query_row(
            "SELECT status, attendance_percentage, class_teacher_remarks
             FROM report_cards WHERE student_id = ? AND term_id = ?",
            (student_id, term_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(CalcError::query)?;
    Ok(row.map(|(status, pct, remarks)| {
        (
            CardStatus::parse(&status).unwrap_or(CardStatus::Draft),
            pct,
            remarks,
        )
    }))
}

/// Builds or refreshes the report card of every student with at least one TermResult in
/// the class/term. Positions rank student averages with shared ties; archived cards are
/// left untouched.
pub fn compile_class_term(
    conn: &Connection,
    classroom_id: &str,
    term_id: &str,
    narrative: &Narrative,
    cfg: &Config,
) -> Result<CompileSummary, CalcError> {
    narrative.validate()?;
    for (table, id, what) in [
        ("classrooms", classroom_id, "classroom"),
        ("terms", term_id, "term"),
    ] {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
        let found = conn
            .query_row(&sql, [id], |r| r.get::<_, i64>(0))
            .optional()
            .map_err(CalcError::query)?;
        if found.is_none() {
            return Err(CalcError::new("not_found", format!("{} not found", what)));
        }
    }

    let students = load_class_totals(conn, classroom_id, term_id)?;
    let averages: Vec<f64> = students
        .iter()
        .map(|s| calc::round_2dp(calc::mean(&s.totals).unwrap_or(0.0)))
        .collect();
    let positions = calc::shared_positions(&averages, cfg.report_card_ranking);
    let out_of = students.len();
    let class_average = calc::mean(&averages).map(calc::round_2dp);

    let mut summary = CompileSummary {
        classroom_id: classroom_id.to_string(),
        term_id: term_id.to_string(),
        out_of,
        ..CompileSummary::default()
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;
    let now = db::now_rfc3339();

    for ((student, average), position) in students.iter().zip(&averages).zip(&positions) {
        let existing = existing_card(&tx, &student.student_id, term_id)?;
        if matches!(existing, Some((CardStatus::Archived, _, _))) {
            summary.skipped_archived += 1;
            continue;
        }

        let total_score = calc::round_2dp(student.totals.iter().sum());
        let band = performance_band(*average);

        let mut teacher_remarks = narrative.class_teacher_remarks.clone();
        if teacher_remarks.is_none() && narrative.auto_comment {
            let stored_empty = existing
                .as_ref()
                .map(|(_, _, r)| r.trim().is_empty())
                .unwrap_or(true);
            if stored_empty {
                let attendance = existing.as_ref().map(|(_, pct, _)| *pct).filter(|p| *p > 0.0);
                teacher_remarks = Some(teacher_comment(*average, attendance));
            }
        }

        tx.execute(
            "INSERT INTO report_cards(id, student_id, term_id, classroom_id, total_score,
                average_score, position, out_of, class_average, performance_label,
                performance_color, class_teacher_remarks, principal_remarks,
                next_term_recommendation, status, is_published, generated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                COALESCE(?12, ''), COALESCE(?13, ''), COALESCE(?14, ''), 'Draft', 0, ?15)
             ON CONFLICT(student_id, term_id) DO UPDATE SET
                classroom_id = excluded.classroom_id,
                total_score = excluded.total_score,
                average_score = excluded.average_score,
                position = excluded.position,
                out_of = excluded.out_of,
                class_average = excluded.class_average,
                performance_label = excluded.performance_label,
                performance_color = excluded.performance_color,
                class_teacher_remarks = COALESCE(?12, report_cards.class_teacher_remarks),
                principal_remarks = COALESCE(?13, report_cards.principal_remarks),
                next_term_recommendation = COALESCE(?14, report_cards.next_term_recommendation)",
            (
                db::new_id(),
                &student.student_id,
                term_id,
                classroom_id,
                total_score,
                average,
                position,
                out_of as i64,
                class_average,
                band.label,
                band.color,
                &teacher_remarks,
                &narrative.principal_remarks,
                &narrative.next_term_recommendation,
                &now,
            ),
        )
        .map_err(|e| {
            CalcError::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "report_cards" }))
        })?;

        summary.generated += 1;
        if existing.is_some() {
            summary.updated += 1;
        } else {
            summary.created += 1;
        }
    }

    tx.commit()
        .map_err(|e| CalcError::new("db_commit_failed", e.to_string()))?;
    tracing::info!(
        classroom_id,
        term_id,
        generated = summary.generated,
        skipped_archived = summary.skipped_archived,
        out_of,
        "report cards compiled"
    );
    Ok(summary)
}

/// Recompiles the class the student's results belong to, then applies `narrative` to this
/// student's card only.
pub fn compile_one(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
    narrative: &Narrative,
    cfg: &Config,
) -> Result<ReportCardRow, CalcError> {
    narrative.validate()?;
    let classroom_id: Option<String> = conn
        .query_row(
            "SELECT classroom_id FROM term_results WHERE student_id = ? AND term_id = ? LIMIT 1",
            (student_id, term_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(CalcError::query)?;
    let Some(classroom_id) = classroom_id else {
        return Err(CalcError::new("not_found", "no term results for student in term")
            .with_details(json!({ "studentId": student_id, "termId": term_id })));
    };

    let class_narrative = Narrative {
        auto_comment: false,
        ..Narrative::default()
    };
    compile_class_term(conn, &classroom_id, term_id, &class_narrative, cfg)?;

    let Some(card) = get_card(conn, student_id, term_id)? else {
        return Err(CalcError::new("not_found", "report card not found"));
    };
    if card.status == CardStatus::Archived.as_str() {
        return Ok(card);
    }

    let mut teacher_remarks = narrative.class_teacher_remarks.clone();
    if teacher_remarks.is_none() && narrative.auto_comment && card.class_teacher_remarks.trim().is_empty() {
        let attendance = Some(card.attendance_percentage).filter(|p| *p > 0.0);
        teacher_remarks = Some(teacher_comment(card.average_score, attendance));
    }
    conn.execute(
        "UPDATE report_cards SET
            class_teacher_remarks = COALESCE(?, class_teacher_remarks),
            principal_remarks = COALESCE(?, principal_remarks),
            next_term_recommendation = COALESCE(?, next_term_recommendation)
         WHERE id = ?",
        (
            teacher_remarks,
            &narrative.principal_remarks,
            &narrative.next_term_recommendation,
            &card.id,
        ),
    )
    .map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;

    get_card_by_id(conn, &card.id)?.ok_or_else(|| CalcError::new("not_found", "report card not found"))
}

const CARD_SELECT: &str = "SELECT rc.id, rc.student_id, s.surname || ' ' || s.other_name,
        rc.term_id, rc.classroom_id, rc.total_score, rc.average_score, rc.position,
        rc.out_of, rc.class_average, rc.performance_label, rc.performance_color,
        rc.days_present, rc.days_absent, rc.attendance_percentage,
        rc.class_teacher_remarks, rc.principal_remarks, rc.next_term_recommendation,
        rc.status, rc.is_published, rc.generated_at, rc.published_at, rc.archived_at
     FROM report_cards rc
     JOIN students s ON s.id = rc.student_id";

fn map_card(r: &rusqlite::Row<'_>) -> rusqlite::Result<ReportCardRow> {
    let position: i64 = r.get(7)?;
    Ok(ReportCardRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        term_id: r.get(3)?,
        classroom_id: r.get(4)?,
        total_score: r.get(5)?,
        average_score: r.get(6)?,
        position,
        position_label: ordinal_suffix(position.max(0) as u32),
        out_of: r.get(8)?,
        class_average: r.get(9)?,
        performance_label: r.get(10)?,
        performance_color: r.get(11)?,
        days_present: r.get(12)?,
        days_absent: r.get(13)?,
        attendance_percentage: r.get(14)?,
        class_teacher_remarks: r.get(15)?,
        principal_remarks: r.get(16)?,
        next_term_recommendation: r.get(17)?,
        status: r.get(18)?,
        is_published: r.get::<_, i64>(19)? != 0,
        generated_at: r.get(20)?,
        published_at: r.get(21)?,
        archived_at: r.get(22)?,
    })
}

pub fn get_card(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<Option<ReportCardRow>, CalcError> {
    let sql = format!("{} WHERE rc.student_id = ? AND rc.term_id = ?", CARD_SELECT);
    conn.query_row(&sql, (student_id, term_id), map_card)
        .optional()
        .map_err(CalcError::query)
}

pub fn get_card_by_id(conn: &Connection, card_id: &str) -> Result<Option<ReportCardRow>, CalcError> {
    let sql = format!("{} WHERE rc.id = ?", CARD_SELECT);
    conn.query_row(&sql, [card_id], map_card)
        .optional()
        .map_err(CalcError::query)
}

#[derive(Debug, Clone, Default)]
pub struct CardFilter {
    pub term_id: Option<String>,
    pub classroom_id: Option<String>,
    pub student_id: Option<String>,
    pub status: Option<CardStatus>,
}

pub fn list_cards(conn: &Connection, filter: &CardFilter) -> Result<Vec<ReportCardRow>, CalcError> {
    let sql = format!(
        "{} WHERE (?1 IS NULL OR rc.term_id = ?1)
           AND (?2 IS NULL OR rc.classroom_id = ?2)
           AND (?3 IS NULL OR rc.student_id = ?3)
           AND (?4 IS NULL OR rc.status = ?4)
         ORDER BY rc.term_id, rc.classroom_id, rc.position, s.surname, s.other_name",
        CARD_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(CalcError::query)?;
    let rows = stmt
        .query_map(
            (
                &filter.term_id,
                &filter.classroom_id,
                &filter.student_id,
                filter.status.map(CardStatus::as_str),
            ),
            map_card,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::query)?;
    Ok(rows)
}

/// Cards visible to the student/parent-facing side: published only.
pub fn published_for_student(conn: &Connection, student_id: &str) -> Result<Vec<ReportCardRow>, CalcError> {
    list_cards(
        conn,
        &CardFilter {
            student_id: Some(student_id.to_string()),
            status: Some(CardStatus::Published),
            ..CardFilter::default()
        },
    )
}

fn load_status(conn: &Connection, card_id: &str) -> Result<CardStatus, CalcError> {
    let status: Option<String> = conn
        .query_row("SELECT status FROM report_cards WHERE id = ?", [card_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(CalcError::query)?;
    let Some(status) = status else {
        return Err(CalcError::new("not_found", "report card not found")
            .with_details(json!({ "id": card_id })));
    };
    CardStatus::parse(&status)
        .ok_or_else(|| CalcError::new("db_query_failed", format!("unknown report card status: {}", status)))
}

pub fn set_attendance(
    conn: &Connection,
    card_id: &str,
    days_present: u32,
    days_absent: u32,
) -> Result<ReportCardRow, CalcError> {
    if load_status(conn, card_id)? == CardStatus::Archived {
        return Err(CalcError::new("invalid_transition", "archived report cards cannot be edited"));
    }
    let total_days = days_present + days_absent;
    let pct = if total_days > 0 {
        calc::round_2dp(days_present as f64 / total_days as f64 * 100.0)
    } else {
        0.0
    };
    conn.execute(
        "UPDATE report_cards SET days_present = ?, days_absent = ?, attendance_percentage = ? WHERE id = ?",
        (days_present, days_absent, pct, card_id),
    )
    .map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;
    get_card_by_id(conn, card_id)?.ok_or_else(|| CalcError::new("not_found", "report card not found"))
}

pub fn apply_transition(
    conn: &Connection,
    card_id: &str,
    transition: Transition,
    role: ActorRole,
) -> Result<ReportCardRow, CalcError> {
    if !role.is_privileged() {
        return Err(CalcError::new(
            "forbidden",
            format!("only an admin may {} report cards", transition.as_str()),
        ));
    }
    let from = load_status(conn, card_id)?;
    let to = next_status(from, transition)?;
    let now = db::now_rfc3339();

    let result = match to {
        CardStatus::Published => conn.execute(
            "UPDATE report_cards SET status = ?, is_published = 1, published_at = ? WHERE id = ?",
            (to.as_str(), &now, card_id),
        ),
        CardStatus::Draft => conn.execute(
            "UPDATE report_cards SET status = ?, is_published = 0, published_at = NULL WHERE id = ?",
            (to.as_str(), card_id),
        ),
        CardStatus::Archived => conn.execute(
            "UPDATE report_cards SET status = ?, archived_at = ? WHERE id = ?",
            (to.as_str(), &now, card_id),
        ),
    };
    result.map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;
    tracing::info!(card_id, from = from.as_str(), to = to.as_str(), "report card status changed");

    get_card_by_id(conn, card_id)?.ok_or_else(|| CalcError::new("not_found", "report card not found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_transitions() {
        assert_eq!(next_status(CardStatus::Draft, Transition::Publish).ok(), Some(CardStatus::Published));
        assert_eq!(next_status(CardStatus::Published, Transition::Unpublish).ok(), Some(CardStatus::Draft));
        assert_eq!(next_status(CardStatus::Published, Transition::Archive).ok(), Some(CardStatus::Archived));
        assert_eq!(next_status(CardStatus::Draft, Transition::Archive).ok(), Some(CardStatus::Archived));
    }

    #[test]
    fn archived_is_terminal() {
        for t in [Transition::Publish, Transition::Unpublish, Transition::Archive] {
            let e = next_status(CardStatus::Archived, t).expect_err("archived should be terminal");
            assert_eq!(e.code, "invalid_transition");
        }
        assert!(next_status(CardStatus::Draft, Transition::Unpublish).is_err());
        assert!(next_status(CardStatus::Published, Transition::Publish).is_err());
    }

    #[test]
    fn recommendation_vocabulary() {
        let ok = Narrative {
            next_term_recommendation: Some("Retained".into()),
            ..Narrative::default()
        };
        assert!(ok.validate().is_ok());
        let bad = Narrative {
            next_term_recommendation: Some("Expelled".into()),
            ..Narrative::default()
        };
        assert_eq!(bad.validate().map_err(|e| e.code).err().as_deref(), Some("bad_params"));
    }
}
