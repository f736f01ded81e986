use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::helpers::{get_required_str, get_required_text, require_class, row_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn subjects_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT
               sub.id,
               sub.name,
               (SELECT COUNT(*) FROM lessons l WHERE l.subject_id = sub.id) AS lesson_count
             FROM subjects sub
             WHERE sub.class_id = ?
             ORDER BY sub.name",
        )
        .map_err(HandlerErr::query)?;
    let subjects = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "lessonCount": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let name = get_required_text(params, "name")?;
    require_class(conn, &class_id)?;

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, class_id, name) VALUES(?, ?, ?)",
        (&subject_id, &class_id, &name),
    )
    .map_err(|e| HandlerErr::insert("subjects", e))?;

    info!(subject_id = %subject_id, class_id = %class_id, name = %name, "subject created");
    Ok(json!({ "subjectId": subject_id, "name": name }))
}

fn subjects_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    if !row_exists(conn, "SELECT 1 FROM subjects WHERE id = ?", &subject_id)? {
        return Err(HandlerErr::not_found("subject"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| HandlerErr::delete("subjects", e))?;
    tx.commit().map_err(HandlerErr::commit)?;

    info!(subject_id = %subject_id, "subject deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(with_db(state, req, subjects_list)),
        "subjects.create" => Some(with_db(state, req, subjects_create)),
        "subjects.delete" => Some(with_db(state, req, subjects_delete)),
        _ => None,
    }
}
