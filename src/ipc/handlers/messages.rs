use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::helpers::{get_required_str, get_required_text, row_exists};
use crate::ipc::types::{AppState, Request};
use crate::model::Recipient;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn recipient_name(conn: &Connection, recipient: &Recipient) -> Result<String, HandlerErr> {
    match recipient {
        Recipient::Class(id) => conn
            .query_row("SELECT name FROM classes WHERE id = ?", [id], |r| {
                r.get::<_, String>(0)
            })
            .optional()
            .map_err(HandlerErr::query)?
            .ok_or_else(|| HandlerErr::not_found("class")),
        Recipient::Student(id) => conn
            .query_row(
                "SELECT first_name, last_name FROM students WHERE id = ?",
                [id],
                |r| Ok(format!("{} {}", r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(HandlerErr::query)?
            .ok_or_else(|| HandlerErr::not_found("student")),
    }
}

fn messages_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, recipient_id, recipient_name, recipient_type, message, timestamp
             FROM messages
             ORDER BY timestamp DESC, rowid DESC",
        )
        .map_err(HandlerErr::query)?;
    let messages = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "recipientId": r.get::<_, String>(1)?,
                "recipientName": r.get::<_, String>(2)?,
                "recipientType": r.get::<_, String>(3)?,
                "message": r.get::<_, String>(4)?,
                "timestamp": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "messages": messages }))
}

fn messages_send(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let recipient: Recipient = get_required_str(params, "recipient")?.parse()?;
    let message = get_required_text(params, "message")?;
    let name = recipient_name(conn, &recipient)?;

    let message_id = Uuid::new_v4().to_string();
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    conn.execute(
        "INSERT INTO messages(id, recipient_id, recipient_name, recipient_type, message, timestamp)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &message_id,
            recipient.to_string(),
            &name,
            recipient.kind(),
            &message,
            &timestamp,
        ),
    )
    .map_err(|e| HandlerErr::insert("messages", e))?;

    info!(message_id = %message_id, recipient = %recipient, "message sent");
    Ok(json!({
        "messageId": message_id,
        "recipientName": name,
        "recipientType": recipient.kind(),
        "timestamp": timestamp,
    }))
}

fn messages_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let message_id = get_required_str(params, "messageId")?;
    if !row_exists(conn, "SELECT 1 FROM messages WHERE id = ?", &message_id)? {
        return Err(HandlerErr::not_found("message"));
    }
    conn.execute("DELETE FROM messages WHERE id = ?", [&message_id])
        .map_err(|e| HandlerErr::delete("messages", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "messages.list" => Some(with_db(state, req, messages_list)),
        "messages.send" => Some(with_db(state, req, messages_send)),
        "messages.delete" => Some(with_db(state, req, messages_delete)),
        _ => None,
    }
}
