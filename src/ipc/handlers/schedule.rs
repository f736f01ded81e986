use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::helpers::{get_required_i64, get_required_str, require_class, row_exists};
use crate::ipc::types::{AppState, Request};
use crate::model::DayOfWeek;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn schedule_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT si.id, si.day_of_week, si.lesson_number, si.subject_id, sub.name
             FROM schedule_items si
             JOIN subjects sub ON sub.id = si.subject_id
             WHERE si.class_id = ?
             ORDER BY si.day_index, si.lesson_number",
        )
        .map_err(HandlerErr::query)?;
    let items = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "dayOfWeek": r.get::<_, String>(1)?,
                "lessonNumber": r.get::<_, i64>(2)?,
                "subjectId": r.get::<_, String>(3)?,
                "subjectName": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "items": items }))
}

fn schedule_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let day: DayOfWeek = get_required_str(params, "dayOfWeek")?.parse()?;
    let lesson_number = get_required_i64(params, "lessonNumber")?;
    let subject_id = get_required_str(params, "subjectId")?;
    if lesson_number < 1 {
        return Err(HandlerErr::bad_params("lessonNumber must be >= 1")
            .with_details(json!({ "lessonNumber": lesson_number })));
    }
    require_class(conn, &class_id)?;

    let subject_class: Option<String> = conn
        .query_row(
            "SELECT class_id FROM subjects WHERE id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    match subject_class {
        None => return Err(HandlerErr::not_found("subject")),
        Some(c) if c != class_id => {
            return Err(HandlerErr::bad_params("subject belongs to another class"))
        }
        Some(_) => {}
    }

    let item_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schedule_items(id, class_id, day_of_week, day_index, lesson_number, subject_id)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &item_id,
            &class_id,
            day.as_str(),
            day.index(),
            lesson_number,
            &subject_id,
        ),
    )
    .map_err(|e| HandlerErr::insert("schedule_items", e))?;

    info!(item_id = %item_id, class_id = %class_id, day = day.as_str(), lesson_number, "schedule item added");
    Ok(json!({ "itemId": item_id }))
}

fn schedule_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let item_id = get_required_str(params, "itemId")?;
    if !row_exists(conn, "SELECT 1 FROM schedule_items WHERE id = ?", &item_id)? {
        return Err(HandlerErr::not_found("schedule item"));
    }
    conn.execute("DELETE FROM schedule_items WHERE id = ?", [&item_id])
        .map_err(|e| HandlerErr::delete("schedule_items", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.list" => Some(with_db(state, req, schedule_list)),
        "schedule.add" => Some(with_db(state, req, schedule_add)),
        "schedule.delete" => Some(with_db(state, req, schedule_delete)),
        _ => None,
    }
}
