//! Question bank: questions transcribed from photographed pages, filed under
//! class / subject / chapter in `question_bank_<schoolId>`.

use crate::academics::{self, AcademicsError};
use crate::ai::gemini::{GenerateRequest, GenerationConfig};
use crate::ai::prompts::{self, NO_QUESTIONS_MARKER};
use crate::ai::rotation::{self, ContentGenerator, ModelPool};
use crate::ai::AiError;
use crate::db;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;
const SUPPORTED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

#[derive(Debug, Error)]
pub enum QuestionBankError {
    #[error("unsupported image type: {0} (expected JPEG, PNG or WebP)")]
    UnsupportedImage(String),

    #[error("image is {0} bytes; the limit is 20 MiB")]
    ImageTooLarge(usize),

    #[error("image data is not valid base64")]
    BadBase64,

    #[error("image is empty")]
    EmptyImage,

    #[error("failed to read image {path}: {source}")]
    ReadImage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("question text must not be empty")]
    EmptyText,

    #[error("question bank entry not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Academics(#[from] AcademicsError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl QuestionBankError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedImage(_)
            | Self::ImageTooLarge(_)
            | Self::BadBase64
            | Self::EmptyImage
            | Self::EmptyText => "bad_params",
            Self::ReadImage { .. } => "io_failed",
            Self::NotFound(_) => "not_found",
            Self::Academics(e) => e.code(),
            Self::Ai(e) => e.code(),
            Self::Storage(_) => "db_query_failed",
        }
    }
}

pub fn collection(school_id: &str) -> String {
    format!("question_bank_{}", school_id)
}

#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Inline { mime_type: String, base64: String },
}

#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub mime_type: String,
    pub base64: String,
}

fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn check_size(len: usize) -> Result<(), QuestionBankError> {
    if len == 0 {
        return Err(QuestionBankError::EmptyImage);
    }
    if len > MAX_IMAGE_BYTES {
        return Err(QuestionBankError::ImageTooLarge(len));
    }
    Ok(())
}

/// Validates type and size and returns the image as base64.
pub fn load_image(source: &ImageSource) -> Result<ImagePayload, QuestionBankError> {
    match source {
        ImageSource::Path(path) => {
            let mime = mime_from_path(path).ok_or_else(|| {
                QuestionBankError::UnsupportedImage(path.to_string_lossy().to_string())
            })?;
            let read_err = |source| QuestionBankError::ReadImage {
                path: path.clone(),
                source,
            };
            let on_disk = std::fs::metadata(path).map_err(read_err)?.len();
            check_size(usize::try_from(on_disk).unwrap_or(usize::MAX))?;
            let bytes = std::fs::read(path).map_err(read_err)?;
            check_size(bytes.len())?;
            Ok(ImagePayload {
                mime_type: mime.to_string(),
                base64: STANDARD.encode(&bytes),
            })
        }
        ImageSource::Inline { mime_type, base64 } => {
            let mime = mime_type.trim().to_ascii_lowercase();
            if !SUPPORTED_MIME_TYPES.contains(&mime.as_str()) {
                return Err(QuestionBankError::UnsupportedImage(mime));
            }
            // Accept data URLs as produced by browser file readers.
            let raw = match base64.split_once(";base64,") {
                Some((_, data)) => data,
                None => base64.as_str(),
            };
            let raw: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = STANDARD
                .decode(raw.as_bytes())
                .map_err(|_| QuestionBankError::BadBase64)?;
            check_size(bytes.len())?;
            Ok(ImagePayload {
                mime_type: mime,
                base64: raw,
            })
        }
    }
}

/// Lines that open with `Q<n>` or `<n>.` / `<n>)` count as questions.
pub fn count_questions(text: &str) -> usize {
    text.lines()
        .map(str::trim_start)
        .filter(|line| {
            let rest = line
                .strip_prefix('Q')
                .or_else(|| line.strip_prefix('q'))
                .unwrap_or(line);
            let digits = rest.chars().take_while(char::is_ascii_digit).count();
            if digits == 0 {
                return false;
            }
            let after = &rest[digits..];
            line.len() != rest.len() || after.starts_with('.') || after.starts_with(')')
        })
        .count()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BankEntry {
    #[serde(default)]
    pub id: String,
    pub class_name: String,
    pub subject_name: String,
    pub chapter_name: String,
    pub text: String,
    #[serde(default)]
    pub question_count: usize,
    #[serde(default)]
    pub source_mime_type: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub class_name: String,
    pub subject: String,
    pub chapter: String,
    pub image: ImageSource,
}

#[derive(Debug, Clone)]
pub enum ExtractOutcome {
    Saved(BankEntry),
    NoQuestions { model: String },
}

pub fn extract(
    conn: &Connection,
    generator: &dyn ContentGenerator,
    school_id: &str,
    req: &ExtractRequest,
) -> Result<ExtractOutcome, QuestionBankError> {
    let (structure, _) = academics::load(conn, school_id)?;
    structure.require_chapter(&req.subject, &req.class_name, &req.chapter)?;
    let image = load_image(&req.image)?;

    let request = GenerateRequest::inline(
        &image.mime_type,
        image.base64,
        prompts::ocr_prompt(&req.class_name, &req.subject, &req.chapter),
    )
    .with_config(GenerationConfig {
        temperature: Some(0.1),
        max_output_tokens: Some(8192),
        ..GenerationConfig::default()
    });
    let outcome = rotation::run(generator, conn, ModelPool::Ocr, &request)?;

    if outcome.text.trim() == NO_QUESTIONS_MARKER {
        log::info!(
            "no questions found in page for {} / {} / {}",
            req.class_name,
            req.subject,
            req.chapter
        );
        return Ok(ExtractOutcome::NoQuestions {
            model: outcome.model,
        });
    }

    let mut entry = BankEntry {
        id: String::new(),
        class_name: req.class_name.clone(),
        subject_name: req.subject.clone(),
        chapter_name: req.chapter.clone(),
        question_count: count_questions(&outcome.text),
        text: outcome.text,
        source_mime_type: image.mime_type,
        model: outcome.model,
        created_at: db::now_rfc3339(),
        updated_at: None,
    };
    let mut doc = serde_json::to_value(&entry).map_err(anyhow::Error::from)?;
    if let Some(obj) = doc.as_object_mut() {
        obj.remove("id");
        obj.insert("schoolId".into(), json!(school_id));
    }
    entry.id = db::doc_add(conn, &collection(school_id), &doc)?;
    log::info!(
        "saved {} questions for {} / {} / {}",
        entry.question_count,
        entry.class_name,
        entry.subject_name,
        entry.chapter_name
    );
    Ok(ExtractOutcome::Saved(entry))
}

#[derive(Debug, Clone, Default)]
pub struct BankFilter {
    pub class_name: Option<String>,
    pub subject: Option<String>,
    pub chapter: Option<String>,
}

fn parse_entry(id: String, data: Value) -> Option<BankEntry> {
    match serde_json::from_value::<BankEntry>(data) {
        Ok(mut e) => {
            e.id = id;
            Some(e)
        }
        Err(err) => {
            log::warn!("skipping malformed question bank entry {}: {}", id, err);
            None
        }
    }
}

/// Oldest first.
pub fn list(conn: &Connection, school_id: &str, filter: &BankFilter) -> anyhow::Result<Vec<BankEntry>> {
    let mut filters: Vec<(&str, Value)> = Vec::new();
    if let Some(c) = &filter.class_name {
        filters.push(("className", json!(c)));
    }
    if let Some(s) = &filter.subject {
        filters.push(("subjectName", json!(s)));
    }
    if let Some(ch) = &filter.chapter {
        filters.push(("chapterName", json!(ch)));
    }
    let mut entries: Vec<BankEntry> = db::doc_query(conn, &collection(school_id), &filters)?
        .into_iter()
        .filter_map(|(id, data)| parse_entry(id, data))
        .collect();
    entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(entries)
}

pub fn get(conn: &Connection, school_id: &str, id: &str) -> Result<BankEntry, QuestionBankError> {
    db::doc_get(conn, &collection(school_id), id)?
        .and_then(|data| parse_entry(id.to_string(), data))
        .ok_or_else(|| QuestionBankError::NotFound(id.to_string()))
}

pub fn update_text(
    conn: &Connection,
    school_id: &str,
    id: &str,
    text: &str,
) -> Result<BankEntry, QuestionBankError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(QuestionBankError::EmptyText);
    }
    let mut patch = Map::new();
    patch.insert("text".into(), json!(text));
    patch.insert("questionCount".into(), json!(count_questions(text)));
    patch.insert("updatedAt".into(), json!(db::now_rfc3339()));
    if db::doc_update(conn, &collection(school_id), id, &patch)?.is_none() {
        return Err(QuestionBankError::NotFound(id.to_string()));
    }
    get(conn, school_id, id)
}

pub fn delete(conn: &Connection, school_id: &str, id: &str) -> Result<(), QuestionBankError> {
    if !db::doc_delete(conn, &collection(school_id), id)? {
        return Err(QuestionBankError::NotFound(id.to_string()));
    }
    Ok(())
}
