mod test_support;

use serde_json::json;
use test_support::{
    add_assessment, assign, create_subject, f64_field, row_for, score, seed_school, str_field,
    Sidecar, School,
};

/// One exam-only subject: Adams 54, Bello 54, Chukwu 30.
fn seed_exam_only(sc: &mut Sidecar) -> (School, String) {
    let school = seed_school(sc);
    let subject = create_subject(sc, "Basic Science", "BSC");
    let assignment = assign(sc, &school.classroom_id, &subject, &school.term_id);
    let exam = add_assessment(sc, &school, &assignment, "EXAM", 60.0);
    for (student, value) in school.students.iter().zip([54.0, 54.0, 30.0]) {
        score(sc, &exam, student, value);
    }
    sc.ok(
        "results.recompute",
        json!({ "classroomId": school.classroom_id, "termId": school.term_id }),
    );
    (school, subject)
}

fn card_id(card: &serde_json::Value) -> String {
    str_field(&card["card"], "id")
}

#[test]
fn report_cards_share_tied_positions_and_count_ranked_students() {
    let mut sc = Sidecar::start("termresults-cards-rank");
    let (school, subject) = seed_exam_only(&mut sc);

    // Subject positions stay sequential even on a tie.
    let results = sc.ok(
        "results.list",
        json!({ "classroomId": school.classroom_id, "termId": school.term_id }),
    );
    let rows = &results["results"];
    assert_eq!(row_for(rows, &school.students[0])["position"].as_i64(), Some(1));
    assert_eq!(row_for(rows, &school.students[1])["position"].as_i64(), Some(2));
    assert_eq!(str_field(row_for(rows, &school.students[0]), "subjectId"), subject);

    // A student enrolled after the recompute has no results and is not ranked.
    sc.ok(
        "students.create",
        json!({
            "classroomId": school.classroom_id,
            "surname": "Danjuma",
            "otherName": "Ibrahim",
            "admissionNo": "ADM/099",
        }),
    );

    let summary = sc.ok(
        "reportCards.generate",
        json!({
            "classroomId": school.classroom_id,
            "termId": school.term_id,
            "autoComment": true,
        }),
    );
    assert_eq!(summary["generated"].as_u64(), Some(3));
    assert_eq!(summary["created"].as_u64(), Some(3));
    assert_eq!(summary["outOf"].as_u64(), Some(3));

    let cards = sc.ok(
        "reportCards.list",
        json!({ "classroomId": school.classroom_id, "termId": school.term_id }),
    );
    let cards = &cards["cards"];
    assert_eq!(cards.as_array().map(|a| a.len()), Some(3));
    let positions: Vec<i64> = school
        .students
        .iter()
        .map(|s| row_for(cards, s)["position"].as_i64().expect("position"))
        .collect();
    assert_eq!(positions, vec![1, 1, 3]);

    let adams = row_for(cards, &school.students[0]);
    assert_eq!(f64_field(adams, "averageScore"), 54.0);
    assert_eq!(adams["outOf"].as_i64(), Some(3));
    assert_eq!(str_field(adams, "positionLabel"), "1st");
    assert_eq!(str_field(adams, "status"), "Draft");
    assert_eq!(f64_field(adams, "classAverage"), 46.0);
    assert!(!str_field(adams, "classTeacherRemarks").is_empty());

    // Regenerating updates in place.
    let again = sc.ok(
        "reportCards.generate",
        json!({ "classroomId": school.classroom_id, "termId": school.term_id }),
    );
    assert_eq!(again["created"].as_u64(), Some(0));
    assert_eq!(again["updated"].as_u64(), Some(3));
}

#[test]
fn publication_workflow_is_admin_only_and_archived_is_terminal() {
    let mut sc = Sidecar::start("termresults-cards-workflow");
    let (school, _) = seed_exam_only(&mut sc);
    let adams = school.students[0].clone();

    let card = sc.ok(
        "reportCards.generateOne",
        json!({
            "studentId": adams,
            "termId": school.term_id,
            "principalRemarks": "Well done.",
            "nextTermRecommendation": "Promoted",
        }),
    );
    let id = card_id(&card);
    assert_eq!(str_field(&card["card"], "principalRemarks"), "Well done.");
    assert_eq!(
        sc.err(
            "reportCards.generateOne",
            json!({
                "studentId": adams,
                "termId": school.term_id,
                "nextTermRecommendation": "Expelled",
            }),
        ),
        "bad_params"
    );

    let attendance = sc.ok(
        "reportCards.setAttendance",
        json!({ "cardId": id, "daysPresent": 45, "daysAbsent": 5 }),
    );
    assert_eq!(f64_field(&attendance["card"], "attendancePercentage"), 90.0);

    assert_eq!(
        sc.err("reportCards.publish", json!({ "cardId": id })),
        "forbidden"
    );
    assert_eq!(
        sc.err(
            "reportCards.unpublish",
            json!({ "cardId": id, "actorRole": "admin" }),
        ),
        "invalid_transition"
    );

    let published = sc.ok(
        "reportCards.publish",
        json!({ "cardId": id, "actorRole": "admin" }),
    );
    assert_eq!(str_field(&published["card"], "status"), "Published");
    assert_eq!(published["card"]["isPublished"].as_bool(), Some(true));

    let visible = sc.ok("reportCards.published", json!({ "studentId": adams }));
    assert_eq!(visible["cards"].as_array().map(|a| a.len()), Some(1));

    sc.ok(
        "reportCards.unpublish",
        json!({ "cardId": id, "actorRole": "admin" }),
    );
    let visible = sc.ok("reportCards.published", json!({ "studentId": adams }));
    assert_eq!(visible["cards"].as_array().map(|a| a.len()), Some(0));

    let archived = sc.ok(
        "reportCards.archive",
        json!({ "cardId": id, "actorRole": "admin" }),
    );
    assert_eq!(str_field(&archived["card"], "status"), "Archived");
    for method in [
        "reportCards.publish",
        "reportCards.unpublish",
        "reportCards.archive",
    ] {
        assert_eq!(
            sc.err(method, json!({ "cardId": id, "actorRole": "admin" })),
            "invalid_transition"
        );
    }
    assert_eq!(
        sc.err(
            "reportCards.setAttendance",
            json!({ "cardId": id, "daysPresent": 1, "daysAbsent": 0 }),
        ),
        "invalid_transition"
    );

    // Compilation leaves the archived card frozen.
    let summary = sc.ok(
        "reportCards.generate",
        json!({ "classroomId": school.classroom_id, "termId": school.term_id }),
    );
    assert_eq!(summary["skippedArchived"].as_u64(), Some(1));
    let fetched = sc.ok(
        "reportCards.get",
        json!({ "studentId": adams, "termId": school.term_id }),
    );
    assert_eq!(str_field(&fetched["card"], "status"), "Archived");

    let by_status = sc.ok(
        "reportCards.list",
        json!({ "termId": school.term_id, "status": "archived" }),
    );
    assert_eq!(by_status["cards"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(
        sc.err("reportCards.get", json!({ "cardId": "missing" })),
        "not_found"
    );
}
