mod test_support;

use serde_json::json;
use test_support::{seed_class, spawn_sidecar, str_field};

fn grade_cell<'a>(
    open: &'a serde_json::Value,
    student_id: &str,
    lesson_id: &str,
) -> &'a serde_json::Value {
    open["grades"]
        .as_array()
        .and_then(|cells| {
            cells
                .iter()
                .find(|g| g["studentId"] == student_id && g["lessonId"] == lesson_id)
        })
        .expect("grade cell")
}

#[test]
fn lessons_and_students_keep_one_grade_cell_per_pair() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = spawn_sidecar();
    sidecar.open(workspace.path());

    let (class_id, subject_id, students) = seed_class(
        &mut sidecar,
        "7A",
        &[("Ann", "Lee"), ("Boris", "Orlov")],
        "Algebra",
    );

    let lesson = sidecar.request_ok(
        "lessons.create",
        json!({ "subjectId": subject_id, "date": "2024-09-02" }),
    );
    assert_eq!(lesson["gradeCellsCreated"], 2);
    let lesson_id = str_field(&lesson, "lessonId");

    let late = sidecar.request_ok(
        "students.create",
        json!({ "classId": class_id, "firstName": "Vera", "lastName": "Adams" }),
    );
    assert_eq!(late["gradeCellsCreated"], 1);

    let open = sidecar.request_ok(
        "gradebook.open",
        json!({ "classId": class_id, "subjectId": subject_id }),
    );
    assert_eq!(open["students"].as_array().map(|a| a.len()), Some(3));
    assert_eq!(open["grades"].as_array().map(|a| a.len()), Some(3));
    // Sorted by last name.
    assert_eq!(open["students"][0]["lastName"], "Adams");
    assert_eq!(open["lessons"][0]["topic"], "No topic");
    assert_eq!(open["lessons"][0]["lessonType"], "Default");

    let cell = grade_cell(&open, &students[0], &lesson_id);
    assert!(cell["grade"].is_null());
    assert_eq!(cell["attendance"], "present");
}

#[test]
fn grade_updates_respect_attendance_and_max_points() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = spawn_sidecar();
    sidecar.open(workspace.path());

    let (class_id, subject_id, students) =
        seed_class(&mut sidecar, "7B", &[("Ann", "Lee")], "Geometry");
    let lesson = sidecar.request_ok(
        "lessons.create",
        json!({ "subjectId": subject_id, "date": "2024-09-03" }),
    );
    let lesson_id = str_field(&lesson, "lessonId");
    let open = sidecar.request_ok("gradebook.open", json!({ "classId": class_id }));
    let grade_id = str_field(grade_cell(&open, &students[0], &lesson_id), "id");

    // Formative lessons cap at 10.
    assert_eq!(
        sidecar.request_err(
            "grades.update",
            json!({ "gradeId": grade_id, "attendance": "present", "grade": 11 }),
        ),
        "bad_params"
    );

    sidecar.request_ok(
        "lessons.update",
        json!({ "lessonId": lesson_id, "lessonType": "SOR", "maxPoints": 20, "topic": "Angles" }),
    );
    let saved = sidecar.request_ok(
        "grades.update",
        json!({ "gradeId": grade_id, "attendance": "present", "grade": 18, "comment": " neat " }),
    );
    assert_eq!(saved["grade"], 18);
    assert_eq!(saved["comment"], "neat");

    let absent = sidecar.request_ok(
        "grades.update",
        json!({ "gradeId": grade_id, "attendance": "absent", "grade": 18 }),
    );
    assert!(absent["grade"].is_null());

    let reset = sidecar.request_ok(
        "lessons.update",
        json!({ "lessonId": lesson_id, "lessonType": "Default", "maxPoints": 20 }),
    );
    assert!(reset["maxPoints"].is_null());

    let open = sidecar.request_ok("gradebook.open", json!({ "classId": class_id }));
    assert_eq!(open["lessons"][0]["topic"], "Angles");
    assert!(open["lessons"][0]["maxPoints"].is_null());
    assert_eq!(open["lessons"][0]["isSummative"], false);

    assert_eq!(
        sidecar.request_err(
            "lessons.update",
            json!({ "lessonId": lesson_id, "lessonType": "Homework" }),
        ),
        "bad_params"
    );
}

#[test]
fn deleting_a_class_removes_everything_under_it() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = spawn_sidecar();
    sidecar.open(workspace.path());

    let (class_id, subject_id, students) =
        seed_class(&mut sidecar, "8A", &[("Ann", "Lee")], "Physics");
    let (other_class, other_subject, _) =
        seed_class(&mut sidecar, "8B", &[("Ivan", "Petrov")], "Physics");
    sidecar.request_ok(
        "lessons.create",
        json!({ "subjectId": subject_id, "date": "2024-09-02" }),
    );
    sidecar.request_ok(
        "lessons.create",
        json!({ "subjectId": other_subject, "date": "2024-09-02" }),
    );
    let year = sidecar.request_ok("years.create", json!({ "name": "2024-2025" }));
    sidecar.request_ok(
        "finalGrades.set",
        json!({
            "studentId": students[0],
            "subjectId": subject_id,
            "academicPeriodId": str_field(&year, "yearId"),
            "periodType": "year",
            "grade": 5,
        }),
    );

    sidecar.request_ok("classes.delete", json!({ "classId": class_id }));

    assert_eq!(
        sidecar.request_err("classes.open", json!({ "classId": class_id })),
        "not_found"
    );
    let classes = sidecar.request_ok("classes.list", json!({}));
    assert_eq!(classes["classes"].as_array().map(|a| a.len()), Some(1));

    let export = sidecar.request_ok("export.data", json!({ "format": "json" }));
    let data: serde_json::Value =
        serde_json::from_str(export["data"].as_str().expect("data")).expect("json");
    assert_eq!(data["students"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(data["lessons"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(data["grades"].as_array().map(|a| a.len()), Some(1));

    // The other class is untouched.
    let open = sidecar.request_ok("gradebook.open", json!({ "classId": other_class }));
    assert_eq!(open["grades"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn duplicate_names_are_conflicts() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = spawn_sidecar();
    sidecar.open(workspace.path());

    let (class_id, _, _) = seed_class(&mut sidecar, "9A", &[], "Chemistry");
    assert_eq!(
        sidecar.request_err("classes.create", json!({ "name": "9A" })),
        "conflict"
    );
    assert_eq!(
        sidecar.request_err(
            "subjects.create",
            json!({ "classId": class_id, "name": "Chemistry" })
        ),
        "conflict"
    );
    assert_eq!(
        sidecar.request_err("classes.create", json!({ "name": "   " })),
        "bad_params"
    );
}

#[test]
fn attendance_summary_counts_marks_in_range() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = spawn_sidecar();
    sidecar.open(workspace.path());

    let (class_id, subject_id, students) =
        seed_class(&mut sidecar, "6A", &[("Ann", "Lee")], "Reading");
    let mut lesson_ids = Vec::new();
    for date in ["2024-09-02", "2024-09-03", "2024-09-04", "2024-10-01"] {
        let l = sidecar.request_ok(
            "lessons.create",
            json!({ "subjectId": subject_id, "date": date }),
        );
        lesson_ids.push(str_field(&l, "lessonId"));
    }
    let open = sidecar.request_ok("gradebook.open", json!({ "classId": class_id }));
    let absent_id = str_field(grade_cell(&open, &students[0], &lesson_ids[1]), "id");
    sidecar.request_ok(
        "grades.update",
        json!({ "gradeId": absent_id, "attendance": "absent" }),
    );

    let september = sidecar.request_ok(
        "attendance.summary",
        json!({ "classId": class_id, "from": "2024-09-01", "to": "2024-09-30" }),
    );
    let row = &september["students"][0];
    assert_eq!(row["present"], 2);
    assert_eq!(row["absent"], 1);
    assert_eq!(row["total"], 3);
    assert_eq!(row["presentPercent"], 67);
    assert_eq!(row["lowAttendance"], true);

    let all = sidecar.request_ok("attendance.summary", json!({ "classId": class_id }));
    assert_eq!(all["students"][0]["presentPercent"], 75);

    assert_eq!(
        sidecar.request_err(
            "attendance.summary",
            json!({ "classId": class_id, "from": "2024-10-01", "to": "2024-09-01" }),
        ),
        "bad_params"
    );
}
