//! Generative-AI access: the Gemini HTTP client, per-pool model rotation and
//! the prompts the daemon sends.

pub mod gemini;
pub mod prompts;
pub mod rotation;

use crate::classes::SETTINGS;
use crate::db;
use rusqlite::Connection;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Gemini API key not configured")]
    MissingApiKey,

    #[error("model {model} quota exhausted: {message}")]
    Quota { model: String, message: String },

    #[error("model {model} not found: {message}")]
    ModelNotFound { model: String, message: String },

    #[error("model {model} response truncated (finishReason: {reason})")]
    Truncated { model: String, reason: String },

    #[error("model {model} failed: {message}")]
    Api {
        model: String,
        code: Option<i64>,
        message: String,
    },

    #[error("request to model {model} failed: {message}")]
    Transport { model: String, message: String },

    #[error("no text returned from model {model}")]
    EmptyResponse { model: String },

    #[error("all {attempts} models exhausted: {}", .failures.join("; "))]
    Exhausted {
        attempts: usize,
        failures: Vec<String>,
    },

    #[error("model pool is empty")]
    NoModels,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl AiError {
    /// Quota and missing-model failures move on to the next model; so does a
    /// truncated answer when the pool asks for it. Everything else is final.
    pub fn is_rotatable(&self) -> bool {
        matches!(
            self,
            Self::Quota { .. } | Self::ModelNotFound { .. } | Self::Truncated { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "ai_key_missing",
            Self::Exhausted { .. } => "ai_quota_exhausted",
            Self::Storage(_) => "db_query_failed",
            _ => "ai_failed",
        }
    }
}

/// Sorts an API error into quota / not-found / other.
pub fn classify_error(model: &str, code: Option<i64>, message: &str) -> AiError {
    let lower = message.to_lowercase();
    if code == Some(429) || lower.contains("quota") || lower.contains("limit") {
        return AiError::Quota {
            model: model.to_string(),
            message: message.to_string(),
        };
    }
    if code == Some(404) || lower.contains("not found") {
        return AiError::ModelNotFound {
            model: model.to_string(),
            message: message.to_string(),
        };
    }
    AiError::Api {
        model: model.to_string(),
        code,
        message: message.to_string(),
    }
}

fn key_doc_id(school_id: &str) -> String {
    format!("gemini_{}", school_id)
}

/// An explicit non-empty key wins over the stored one.
pub fn resolve_api_key(
    conn: &Connection,
    school_id: &str,
    explicit: Option<&str>,
) -> Result<String, AiError> {
    if let Some(k) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(k.to_string());
    }
    let stored = db::doc_get(conn, SETTINGS, &key_doc_id(school_id))?
        .and_then(|d| d.get("apiKey").and_then(Value::as_str).map(str::to_string))
        .filter(|k| !k.trim().is_empty());
    stored.ok_or(AiError::MissingApiKey)
}

pub fn store_api_key(conn: &Connection, school_id: &str, api_key: &str) -> anyhow::Result<()> {
    db::doc_set(
        conn,
        SETTINGS,
        &key_doc_id(school_id),
        &json!({
            "apiKey": api_key.trim(),
            "schoolId": school_id,
            "updatedAt": db::now_rfc3339(),
        }),
    )
}
