use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::helpers::{
    format_date, get_optional_date, get_optional_i64, get_optional_str, get_required_date,
    get_required_str, require_class, row_exists,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Attendance, LessonType};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

/// Out-of score for lessons without an explicit maximum.
pub const DEFAULT_MAX_POINTS: i64 = 10;

pub(crate) fn lesson_type_from_db(raw: &str) -> LessonType {
    raw.parse().unwrap_or(LessonType::Default)
}

pub(crate) fn attendance_from_db(raw: &str) -> Attendance {
    raw.parse().unwrap_or(Attendance::Present)
}

fn lesson_type_names() -> Vec<&'static str> {
    LessonType::ALL.iter().map(|t| t.as_str()).collect()
}

fn first_subject_of_class(conn: &Connection, class_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT id FROM subjects WHERE class_id = ? ORDER BY name LIMIT 1",
        [class_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn gradebook_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let class_name = require_class(conn, &class_id)?;
    let today = get_optional_date(params, "today")?
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    let subject_id = match get_optional_str(params, "subjectId")? {
        Some(id) => {
            let belongs = conn
                .query_row(
                    "SELECT 1 FROM subjects WHERE id = ? AND class_id = ?",
                    (&id, &class_id),
                    |r| r.get::<_, i64>(0),
                )
                .optional()
                .map_err(HandlerErr::query)?
                .is_some();
            if !belongs {
                return Err(HandlerErr::not_found("subject"));
            }
            Some(id)
        }
        None => first_subject_of_class(conn, &class_id)?,
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, first_name, last_name
             FROM students
             WHERE class_id = ?
             ORDER BY last_name, first_name",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let current_quarter: Option<(String, String)> = conn
        .query_row(
            "SELECT id, name FROM quarters
             WHERE start_date <= ?1 AND end_date >= ?1
             ORDER BY start_date
             LIMIT 1",
            [format_date(today)],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;

    let Some(subject_id) = subject_id else {
        return Ok(json!({
            "class": { "id": class_id, "name": class_name },
            "subjectId": null,
            "students": students,
            "lessons": [],
            "grades": [],
            "currentQuarter": current_quarter.map(|(id, name)| json!({ "id": id, "name": name })),
            "finalGrades": [],
            "lessonTypes": lesson_type_names(),
        }));
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, date, topic, homework, lesson_type, max_points
             FROM lessons
             WHERE subject_id = ?
             ORDER BY date, rowid",
        )
        .map_err(HandlerErr::query)?;
    let lessons = stmt
        .query_map([&subject_id], |r| {
            let lesson_type = lesson_type_from_db(&r.get::<_, String>(4)?);
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "date": r.get::<_, String>(1)?,
                "topic": r.get::<_, String>(2)?,
                "homework": r.get::<_, String>(3)?,
                "lessonType": lesson_type.as_str(),
                "isSummative": lesson_type.is_summative(),
                "maxPoints": r.get::<_, Option<i64>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut stmt = conn
        .prepare(
            "SELECT g.id, g.student_id, g.lesson_id, g.grade, g.attendance, g.comment
             FROM grades g
             JOIN lessons l ON l.id = g.lesson_id
             WHERE l.subject_id = ?",
        )
        .map_err(HandlerErr::query)?;
    let grades = stmt
        .query_map([&subject_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "lessonId": r.get::<_, String>(2)?,
                "grade": r.get::<_, Option<i64>>(3)?,
                "attendance": attendance_from_db(&r.get::<_, String>(4)?).as_str(),
                "comment": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let final_grades = match current_quarter.as_ref() {
        Some((quarter_id, _)) => {
            let mut stmt = conn
                .prepare(
                    "SELECT fg.student_id, fg.grade
                     FROM final_grades fg
                     JOIN students s ON s.id = fg.student_id
                     WHERE s.class_id = ?
                       AND fg.subject_id = ?
                       AND fg.period_type = 'quarter'
                       AND fg.academic_period_id = ?",
                )
                .map_err(HandlerErr::query)?;
            let rows = stmt
                .query_map((&class_id, &subject_id, quarter_id), |r| {
                    Ok(json!({
                        "studentId": r.get::<_, String>(0)?,
                        "grade": r.get::<_, i64>(1)?,
                    }))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::query)?;
            rows
        }
        None => Vec::new(),
    };

    debug!(
        class_id = %class_id,
        subject_id = %subject_id,
        lessons = lessons.len(),
        grades = grades.len(),
        "gradebook opened"
    );

    Ok(json!({
        "class": { "id": class_id, "name": class_name },
        "subjectId": subject_id,
        "students": students,
        "lessons": lessons,
        "grades": grades,
        "currentQuarter": current_quarter.map(|(id, name)| json!({ "id": id, "name": name })),
        "finalGrades": final_grades,
        "lessonTypes": lesson_type_names(),
    }))
}

fn lessons_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let date = get_required_date(params, "date")?;

    let class_id: String = conn
        .query_row(
            "SELECT class_id FROM subjects WHERE id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("subject"))?;

    let lesson_id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO lessons(id, subject_id, date) VALUES(?, ?, ?)",
        (&lesson_id, &subject_id, format_date(date)),
    )
    .map_err(|e| HandlerErr::insert("lessons", e))?;

    let student_ids: Vec<String> = {
        let mut stmt = tx
            .prepare("SELECT id FROM students WHERE class_id = ?")
            .map_err(HandlerErr::query)?;
        let ids = stmt
            .query_map([&class_id], |r| r.get(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        ids
    };
    for student_id in &student_ids {
        tx.execute(
            "INSERT INTO grades(id, student_id, lesson_id, attendance) VALUES(?, ?, ?, 'present')",
            (Uuid::new_v4().to_string(), student_id, &lesson_id),
        )
        .map_err(|e| HandlerErr::insert("grades", e))?;
    }
    tx.commit().map_err(HandlerErr::commit)?;

    info!(
        lesson_id = %lesson_id,
        subject_id = %subject_id,
        grade_cells = student_ids.len(),
        "lesson created"
    );
    Ok(json!({ "lessonId": lesson_id, "gradeCellsCreated": student_ids.len() }))
}

fn lessons_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = get_required_str(params, "lessonId")?;
    let lesson_type: LessonType = get_required_str(params, "lessonType")?.parse()?;
    let topic = get_optional_str(params, "topic")?;
    let homework = get_optional_str(params, "homework")?;
    let max_points = match lesson_type {
        LessonType::Default => None,
        _ => get_optional_i64(params, "maxPoints")?,
    };
    if let Some(m) = max_points {
        if m <= 0 {
            return Err(HandlerErr::bad_params("maxPoints must be > 0")
                .with_details(json!({ "maxPoints": m })));
        }
    }
    if !row_exists(conn, "SELECT 1 FROM lessons WHERE id = ?", &lesson_id)? {
        return Err(HandlerErr::not_found("lesson"));
    }

    let topic = topic.map(|t| {
        let t = t.trim().to_string();
        if t.is_empty() {
            "No topic".to_string()
        } else {
            t
        }
    });
    conn.execute(
        "UPDATE lessons SET
           topic = COALESCE(?, topic),
           homework = COALESCE(?, homework),
           lesson_type = ?,
           max_points = ?
         WHERE id = ?",
        (topic, homework, lesson_type.as_str(), max_points, &lesson_id),
    )
    .map_err(|e| HandlerErr::update("lessons", e))?;

    Ok(json!({ "ok": true, "lessonType": lesson_type.as_str(), "maxPoints": max_points }))
}

fn lessons_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = get_required_str(params, "lessonId")?;
    if !row_exists(conn, "SELECT 1 FROM lessons WHERE id = ?", &lesson_id)? {
        return Err(HandlerErr::not_found("lesson"));
    }
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM lessons WHERE id = ?", [&lesson_id])
        .map_err(|e| HandlerErr::delete("lessons", e))?;
    tx.commit().map_err(HandlerErr::commit)?;

    info!(lesson_id = %lesson_id, "lesson deleted");
    Ok(json!({ "ok": true }))
}

fn grades_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_required_str(params, "gradeId")?;
    let attendance: Attendance = get_required_str(params, "attendance")?.parse()?;
    let grade = get_optional_i64(params, "grade")?;
    let comment = get_optional_str(params, "comment")?
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let max_points: Option<i64> = conn
        .query_row(
            "SELECT l.max_points
             FROM grades g
             JOIN lessons l ON l.id = g.lesson_id
             WHERE g.id = ?",
            [&grade_id],
            |r| r.get::<_, Option<i64>>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("grade"))?;
    let max = max_points.filter(|m| *m > 0).unwrap_or(DEFAULT_MAX_POINTS);

    // Only a present student can carry a mark.
    let grade = match attendance {
        Attendance::Present => grade,
        Attendance::Absent | Attendance::Excused => None,
    };
    if let Some(g) = grade {
        if !(0..=max).contains(&g) {
            return Err(HandlerErr::bad_params(format!("grade must be between 0 and {max}"))
                .with_details(json!({ "grade": g, "max": max })));
        }
    }

    conn.execute(
        "UPDATE grades SET grade = ?, attendance = ?, comment = ? WHERE id = ?",
        (grade, attendance.as_str(), &comment, &grade_id),
    )
    .map_err(|e| HandlerErr::update("grades", e))?;

    Ok(json!({
        "gradeId": grade_id,
        "grade": grade,
        "attendance": attendance.as_str(),
        "comment": comment,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gradebook.open" => Some(with_db(state, req, gradebook_open)),
        "lessons.create" => Some(with_db(state, req, lessons_create)),
        "lessons.update" => Some(with_db(state, req, lessons_update)),
        "lessons.delete" => Some(with_db(state, req, lessons_delete)),
        "grades.update" => Some(with_db(state, req, grades_update)),
        _ => None,
    }
}
