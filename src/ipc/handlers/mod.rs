pub mod attendance;
pub mod classes;
pub mod core;
pub mod export;
pub mod gradebook;
pub mod messages;
pub mod results;
pub mod schedule;
pub mod students;
pub mod subjects;

use rusqlite::Connection;

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};

type DbOp = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

/// Runs `op` against the open workspace and wraps the outcome in the response envelope.
pub(crate) fn with_db(state: &AppState, req: &Request, op: DbOp) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match op(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}
