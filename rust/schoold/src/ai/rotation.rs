//! Ordered model pools with a persisted "current model" cursor per pool.
//!
//! A call starts at the pool's cursor. Quota, missing-model and (for pools
//! that ask for it) truncation failures advance the cursor, persist it and try
//! the next model; any other failure is returned as-is. At most one attempt is
//! made per model, so a call never issues more requests than the pool size.

use super::gemini::GenerateRequest;
use super::AiError;
use crate::db;
use rusqlite::Connection;
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub text: String,
    pub model: String,
    pub attempts: usize,
}

pub trait ContentGenerator {
    fn generate(&self, model: &str, request: &GenerateRequest) -> Result<Generation, AiError>;
}

pub trait CursorStore {
    fn load(&self, key: &str) -> anyhow::Result<Option<usize>>;
    fn store(&self, key: &str, index: usize) -> anyhow::Result<()>;
}

impl CursorStore for Connection {
    fn load(&self, key: &str) -> anyhow::Result<Option<usize>> {
        Ok(db::settings_get_json(self, key)?
            .and_then(|v| v.as_u64())
            .map(|n| n as usize))
    }

    fn store(&self, key: &str, index: usize) -> anyhow::Result<()> {
        db::settings_set_json(self, key, &json!(index))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPool {
    General,
    Ocr,
    Routine,
    Paper,
}

const GENERAL_MODELS: [&str; 4] = [
    "gemini-3-flash-preview",
    "gemini-3.1-pro-preview",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
];

const OCR_MODELS: [&str; 3] = [
    "gemini-3-flash-preview",
    "gemini-2.5-flash",
    "gemini-3-pro-preview",
];

const ROUTINE_MODELS: [&str; 4] = [
    "gemini-3-pro-preview",
    "gemini-3.1-pro-preview",
    "gemini-3-flash-preview",
    "gemini-2.5-pro",
];

const PAPER_MODELS: [&str; 5] = [
    "gemini-3-flash-preview",
    "gemini-2.5-flash-lite",
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-1.5-flash",
];

impl ModelPool {
    pub const ALL: [ModelPool; 4] = [Self::General, Self::Ocr, Self::Routine, Self::Paper];

    pub fn models(self) -> &'static [&'static str] {
        match self {
            Self::General => &GENERAL_MODELS,
            Self::Ocr => &OCR_MODELS,
            Self::Routine => &ROUTINE_MODELS,
            Self::Paper => &PAPER_MODELS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Ocr => "ocr",
            Self::Routine => "routine",
            Self::Paper => "paper",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == s)
    }

    pub fn cursor_key(self) -> String {
        format!("ai.cursor.{}", self.name())
    }

    /// Transcription output cut short is useless; other pools keep partial text.
    pub fn rotates_on_truncation(self) -> bool {
        matches!(self, Self::Ocr)
    }
}

/// Current cursor for a pool, reset to 0 when missing or out of range.
pub fn current_index(store: &dyn CursorStore, pool: ModelPool) -> Result<usize, AiError> {
    let len = pool.models().len();
    Ok(match store.load(&pool.cursor_key())? {
        Some(i) if i < len => i,
        _ => 0,
    })
}

pub fn run(
    generator: &dyn ContentGenerator,
    store: &dyn CursorStore,
    pool: ModelPool,
    request: &GenerateRequest,
) -> Result<Outcome, AiError> {
    let models = pool.models();
    if models.is_empty() {
        return Err(AiError::NoModels);
    }
    let key = pool.cursor_key();
    let mut index = current_index(store, pool)?;
    let mut failures = Vec::new();

    for attempt in 1..=models.len() {
        let model = models[index];
        log::info!("{} pool: attempt {} with {}", pool.name(), attempt, model);

        let result = generator.generate(model, request).and_then(|g| {
            match g.finish_reason.as_deref() {
                Some(reason) if pool.rotates_on_truncation() && reason != "STOP" => {
                    Err(AiError::Truncated {
                        model: model.to_string(),
                        reason: reason.to_string(),
                    })
                }
                _ => Ok(g),
            }
        });

        match result {
            Ok(g) => {
                return Ok(Outcome {
                    text: g.text,
                    model: model.to_string(),
                    attempts: attempt,
                })
            }
            Err(e) if e.is_rotatable() => {
                let next = (index + 1) % models.len();
                log::warn!(
                    "{} pool: {} failed ({}); switching to {}",
                    pool.name(),
                    model,
                    e,
                    models[next]
                );
                failures.push(format!("{}: {}", model, e));
                store.store(&key, next)?;
                index = next;
            }
            Err(e) => {
                log::error!("{} pool: {} failed: {}", pool.name(), model, e);
                return Err(e);
            }
        }
    }

    Err(AiError::Exhausted {
        attempts: models.len(),
        failures,
    })
}
