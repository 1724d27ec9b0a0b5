use std::path::PathBuf;

use crate::config::AppConfig;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// School selected with `school.select`; requests may override it with `schoolId`.
    pub school_id: Option<String>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            workspace: None,
            db: None,
            school_id: None,
            config,
        }
    }
}
