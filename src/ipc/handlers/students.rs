use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::helpers::{get_required_str, get_required_text, require_class, row_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;

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
                "classId": class_id,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let first_name = get_required_text(params, "firstName")?;
    let last_name = get_required_text(params, "lastName")?;
    require_class(conn, &class_id)?;

    let student_id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO students(id, class_id, first_name, last_name) VALUES(?, ?, ?, ?)",
        (&student_id, &class_id, &first_name, &last_name),
    )
    .map_err(|e| HandlerErr::insert("students", e))?;

    // A new student gets an empty grade cell for every lesson the class already has.
    let lesson_ids: Vec<String> = {
        let mut stmt = tx
            .prepare(
                "SELECT l.id
                 FROM lessons l
                 JOIN subjects sub ON sub.id = l.subject_id
                 WHERE sub.class_id = ?",
            )
            .map_err(HandlerErr::query)?;
        let ids = stmt
            .query_map([&class_id], |r| r.get(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        ids
    };
    for lesson_id in &lesson_ids {
        tx.execute(
            "INSERT INTO grades(id, student_id, lesson_id, attendance) VALUES(?, ?, ?, 'present')",
            (Uuid::new_v4().to_string(), &student_id, lesson_id),
        )
        .map_err(|e| HandlerErr::insert("grades", e))?;
    }
    tx.commit().map_err(HandlerErr::commit)?;

    info!(
        student_id = %student_id,
        class_id = %class_id,
        grade_cells = lesson_ids.len(),
        "student created"
    );
    Ok(json!({ "studentId": student_id, "gradeCellsCreated": lesson_ids.len() }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !row_exists(conn, "SELECT 1 FROM students WHERE id = ?", &student_id)? {
        return Err(HandlerErr::not_found("student"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::delete("students", e))?;
    tx.commit().map_err(HandlerErr::commit)?;

    info!(student_id = %student_id, "student deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, students_list)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        _ => None,
    }
}
