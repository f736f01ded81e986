use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::helpers::{get_required_str, get_required_text, require_class};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn classes_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    // Correlated subqueries so the two counts do not multiply each other.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
               (SELECT COUNT(*) FROM subjects sub WHERE sub.class_id = c.id) AS subject_count
             FROM classes c
             ORDER BY c.name",
        )
        .map_err(HandlerErr::query)?;

    let classes = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_count: i64 = row.get(2)?;
            let subject_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "studentCount": student_count,
                "subjectCount": subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "classes": classes }))
}

fn classes_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let name = require_class(conn, &class_id)?;

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

    let mut stmt = conn
        .prepare("SELECT id, name FROM subjects WHERE class_id = ? ORDER BY name")
        .map_err(HandlerErr::query)?;
    let subjects = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "class": { "id": class_id, "name": name },
        "students": students,
        "subjects": subjects,
    }))
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_text(params, "name")?;

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, &name),
    )
    .map_err(|e| HandlerErr::insert("classes", e))?;

    info!(class_id = %class_id, name = %name, "class created");
    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;

    // Students, subjects, schedule, lessons, grades and final grades go with
    // the class through ON DELETE CASCADE.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM classes WHERE id = ?", [&class_id])
        .map_err(|e| HandlerErr::delete("classes", e))?;
    tx.commit().map_err(HandlerErr::commit)?;

    info!(class_id = %class_id, "class deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(with_db(state, req, classes_list)),
        "classes.open" => Some(with_db(state, req, classes_open)),
        "classes.create" => Some(with_db(state, req, classes_create)),
        "classes.delete" => Some(with_db(state, req, classes_delete)),
        _ => None,
    }
}
