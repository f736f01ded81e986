use crate::export::{self, ExportFormat};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::handlers::with_db;
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};

fn export_data(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let raw = get_required_str(params, "format")?;
    let format = ExportFormat::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params("format must be json or csv").with_details(json!({ "format": raw }))
    })?;
    let file = export::export_data(conn, format)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    info!(file_name = file.file_name, bytes = file.data.len(), "export prepared");
    Ok(json!({
        "fileName": file.file_name,
        "mimeType": file.mime_type,
        "data": file.data,
    }))
}

fn handle_export_archive(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(p) => PathBuf::from(p),
        Err(e) => return e.response(&req.id),
    };
    // Relative paths land inside the workspace folder.
    let out_path = match (out_path.is_relative(), state.workspace.as_ref()) {
        (true, Some(ws)) => ws.join(out_path),
        _ => out_path,
    };

    match export::write_export_archive(conn, &out_path) {
        Ok(summary) => {
            info!(
                out_path = %out_path.display(),
                entries = summary.entry_count,
                "export archive written"
            );
            ok(
                &req.id,
                json!({
                    "outPath": out_path.to_string_lossy(),
                    "format": summary.format,
                    "entryCount": summary.entry_count,
                    "gradeRows": summary.grade_rows,
                }),
            )
        }
        Err(e) => {
            error!(out_path = %out_path.display(), error = %format!("{e:#}"), "export archive failed");
            err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "outPath": out_path.to_string_lossy() })),
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.data" => Some(with_db(state, req, export_data)),
        "export.archive" => Some(handle_export_archive(state, req)),
        _ => None,
    }
}
