use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Credentials;
use crate::db;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Login state for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub username: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Session,
    pub credentials: Credentials,
}

impl AppState {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            workspace: None,
            db: None,
            session: Session::default(),
            credentials,
        }
    }

    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        let conn = db::open_db(path)?;
        self.workspace = Some(path.to_path_buf());
        self.db = Some(conn);
        Ok(())
    }
}
