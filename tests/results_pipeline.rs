mod test_support;

use serde_json::json;
use test_support::{
    add_assessment, assign, create_subject, f64_field, row_for, score, seed_school, str_field,
    Sidecar, School,
};

struct Seeded {
    school: School,
    maths: String,
    english: String,
}

/// Maths: Adams 8/9/45 (62), Bello 10 + 60 (70), Chukwu nothing recorded.
/// English: Bello 90, Adams 80, Chukwu 80.
fn seed_scores(sc: &mut Sidecar) -> Seeded {
    let school = seed_school(sc);
    let [adams, bello, chukwu] = [
        school.students[0].clone(),
        school.students[1].clone(),
        school.students[2].clone(),
    ];

    let maths = create_subject(sc, "Mathematics", "MTH");
    let mth = assign(sc, &school.classroom_id, &maths, &school.term_id);
    let ca1 = add_assessment(sc, &school, &mth, "CA1", 10.0);
    let ca2 = add_assessment(sc, &school, &mth, "CA2", 10.0);
    let exam = add_assessment(sc, &school, &mth, "EXAM", 60.0);
    score(sc, &ca1, &adams, 8.0);
    score(sc, &ca2, &adams, 9.0);
    score(sc, &exam, &adams, 45.0);
    score(sc, &ca1, &bello, 10.0);
    score(sc, &exam, &bello, 60.0);

    let english = create_subject(sc, "English Language", "ENG");
    let eng = assign(sc, &school.classroom_id, &english, &school.term_id);
    let ids: Vec<String> = ["CA1", "CA2", "CA3", "TEST"]
        .into_iter()
        .map(|code| add_assessment(sc, &school, &eng, code, 10.0))
        .collect();
    let eng_exam = add_assessment(sc, &school, &eng, "EXAM", 60.0);
    for student in [&adams, &bello, &chukwu] {
        for id in &ids {
            score(sc, id, student, 10.0);
        }
    }
    score(sc, &eng_exam, &bello, 50.0);
    score(sc, &eng_exam, &adams, 40.0);
    score(sc, &eng_exam, &chukwu, 40.0);

    Seeded {
        school,
        maths,
        english,
    }
}

fn subject_rows(results: &serde_json::Value, subject_id: &str) -> serde_json::Value {
    json!(results
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results")
        .iter()
        .filter(|r| r.get("subjectId").and_then(|v| v.as_str()) == Some(subject_id))
        .cloned()
        .collect::<Vec<_>>())
}

#[test]
fn recompute_aggregates_ca_and_exam_and_ranks_by_sort_order() {
    let mut sc = Sidecar::start("termresults-pipeline");
    let seeded = seed_scores(&mut sc);
    let school = &seeded.school;

    let summary = sc.ok(
        "results.recompute",
        json!({ "classroomId": school.classroom_id, "termId": school.term_id }),
    );
    assert_eq!(summary["subjects"].as_u64(), Some(2));
    assert_eq!(summary["resultsCreated"].as_u64(), Some(6));
    assert_eq!(summary["resultsUpdated"].as_u64(), Some(0));

    let results = sc.ok(
        "results.list",
        json!({ "classroomId": school.classroom_id, "termId": school.term_id }),
    );

    let maths = subject_rows(&results, &seeded.maths);
    let adams = row_for(&maths, &school.students[0]);
    assert_eq!(f64_field(adams, "caTotal"), 17.0);
    assert_eq!(f64_field(adams, "examScore"), 45.0);
    assert_eq!(f64_field(adams, "totalScore"), 62.0);
    assert_eq!(str_field(adams, "grade"), "C");
    assert_eq!(adams["position"].as_i64(), Some(2));
    assert_eq!(str_field(adams, "positionLabel"), "2nd");

    // No scores at all in a scored subject: zero row graded F.
    let chukwu = row_for(&maths, &school.students[2]);
    assert_eq!(f64_field(chukwu, "caTotal"), 0.0);
    assert_eq!(f64_field(chukwu, "examScore"), 0.0);
    assert_eq!(f64_field(chukwu, "totalScore"), 0.0);
    assert_eq!(str_field(chukwu, "grade"), "F");
    assert_eq!(chukwu["position"].as_i64(), Some(3));

    let bello = row_for(&maths, &school.students[1]);
    assert_eq!(f64_field(bello, "totalScore"), 70.0);
    assert_eq!(bello["position"].as_i64(), Some(1));
    assert_eq!(f64_field(bello, "classAverage"), 44.0);
    assert_eq!(f64_field(bello, "highestScore"), 70.0);
    assert_eq!(f64_field(bello, "lowestScore"), 0.0);

    // 90, 80, 80: plain sort order gives 1, 2, 3 with ties kept in name order.
    let english = subject_rows(&results, &seeded.english);
    let positions: Vec<(f64, i64)> = school
        .students
        .iter()
        .map(|s| {
            let r = row_for(&english, s);
            (f64_field(r, "totalScore"), r["position"].as_i64().expect("position"))
        })
        .collect();
    assert_eq!(positions, vec![(80.0, 2), (90.0, 1), (80.0, 3)]);
}

#[test]
fn recompute_is_idempotent() {
    let mut sc = Sidecar::start("termresults-idempotent");
    let seeded = seed_scores(&mut sc);
    let school = &seeded.school;
    let params = json!({ "classroomId": school.classroom_id, "termId": school.term_id });

    sc.ok("results.recompute", params.clone());
    let first = sc.ok("results.list", params.clone());
    let again = sc.ok("results.recompute", params.clone());
    assert_eq!(again["resultsCreated"].as_u64(), Some(0));
    assert_eq!(again["resultsUpdated"].as_u64(), Some(6));

    let second = sc.ok("results.list", params);
    let strip = |v: &serde_json::Value| -> Vec<(String, String, f64, Option<i64>)> {
        v["results"]
            .as_array()
            .expect("results")
            .iter()
            .map(|r| {
                (
                    str_field(r, "studentId"),
                    str_field(r, "subjectId"),
                    f64_field(r, "totalScore"),
                    r["position"].as_i64(),
                )
            })
            .collect()
    };
    assert_eq!(strip(&first), strip(&second));
}

#[test]
fn class_without_scores_creates_nothing() {
    let mut sc = Sidecar::start("termresults-empty");
    let school = test_support::seed_school(&mut sc);
    let civic = create_subject(&mut sc, "Civic Education", "CVE");
    let assignment = assign(&mut sc, &school.classroom_id, &civic, &school.term_id);
    add_assessment(&mut sc, &school, &assignment, "CA1", 10.0);

    let summary = sc.ok(
        "results.recompute",
        json!({ "classroomId": school.classroom_id, "termId": school.term_id }),
    );
    assert_eq!(summary["resultsCreated"].as_u64(), Some(0));
    assert_eq!(summary["subjectsWithoutScores"].as_u64(), Some(1));

    let results = sc.ok(
        "results.list",
        json!({ "classroomId": school.classroom_id, "termId": school.term_id }),
    );
    assert_eq!(results["results"].as_array().map(|a| a.len()), Some(0));

    let code = sc.err(
        "results.recompute",
        json!({ "classroomId": "missing", "termId": school.term_id }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn recompute_current_uses_the_current_term() {
    let mut sc = Sidecar::start("termresults-current");
    assert_eq!(sc.err("results.recomputeCurrent", json!({})), "no_current_term");

    let seeded = seed_scores(&mut sc);
    let out = sc.ok("results.recomputeCurrent", json!({}));
    let classes = out["classes"].as_array().expect("classes");
    assert_eq!(classes.len(), 1);
    assert_eq!(str_field(&classes[0], "termId"), seeded.school.term_id);
    assert_eq!(classes[0]["resultsCreated"].as_u64(), Some(6));

    let stats = sc.ok(
        "results.subjectStats",
        json!({
            "subjectId": seeded.maths,
            "termId": seeded.school.term_id,
            "classroomId": seeded.school.classroom_id,
        }),
    );
    assert_eq!(f64_field(&stats, "average"), 44.0);
    assert_eq!(stats["passCount"].as_u64(), Some(2));
    assert_eq!(stats["failCount"].as_u64(), Some(1));
    assert_eq!(stats["gradeDistribution"]["C"].as_u64(), Some(1));
    assert_eq!(stats["gradeDistribution"]["F"].as_u64(), Some(1));

    let student = sc.ok(
        "results.student",
        json!({ "studentId": seeded.school.students[0], "termId": seeded.school.term_id }),
    );
    assert_eq!(student["results"].as_array().map(|a| a.len()), Some(2));
}
