//! Question-paper generation from the academic structure, institution
//! branding and stored question-bank text.

use crate::academics;
use crate::ai::gemini::{GenerateRequest, GenerationConfig};
use crate::ai::rotation::{self, ContentGenerator, ModelPool};
use crate::ai::AiError;
use crate::institution::{self, SchoolInfo};
use crate::question_bank::{self, BankEntry, BankFilter};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference text from the bank is capped so the prompt stays bounded.
const MAX_BANK_CHARS: usize = 12_000;

/// Sections are lettered A to Z.
const MAX_SECTIONS: usize = 26;

#[derive(Debug, Error)]
pub enum PaperError {
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Academics(#[from] academics::AcademicsError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PaperError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "bad_params",
            Self::Academics(e) => e.code(),
            Self::Ai(e) => e.code(),
            Self::Storage(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionType {
    pub name: String,
    pub marks: u32,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DifficultyLevel {
    pub name: String,
    pub percentage: u32,
}

pub fn default_question_types() -> Vec<QuestionType> {
    [
        ("Multiple Choice Questions", 1),
        ("Fill in the Blanks", 1),
        ("True/False", 1),
        ("Matching Columns", 2),
        ("Very Short Answer Questions", 2),
        ("Short Answer Questions", 3),
        ("Long Answer Questions", 5),
    ]
    .into_iter()
    .map(|(name, marks)| QuestionType {
        name: name.to_string(),
        marks,
        count: 0,
    })
    .collect()
}

pub fn default_difficulty() -> Vec<DifficultyLevel> {
    [("Easy", 20), ("Moderate", 50), ("Difficult", 20), ("Extreme Difficult", 10)]
        .into_iter()
        .map(|(name, percentage)| DifficultyLevel {
            name: name.to_string(),
            percentage,
        })
        .collect()
}

fn default_duration() -> f64 {
    3.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaperSpec {
    pub exam_name: String,
    pub class_name: String,
    pub subject: String,
    pub chapters: Vec<String>,
    #[serde(default = "default_question_types")]
    pub question_types: Vec<QuestionType>,
    #[serde(default = "default_difficulty")]
    pub difficulty: Vec<DifficultyLevel>,
    /// Hours.
    #[serde(default = "default_duration")]
    pub duration_hours: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Section {
    pub letter: char,
    pub name: String,
    pub count: u32,
    pub marks: u32,
}

impl Section {
    pub fn total(&self) -> u32 {
        self.count.saturating_mul(self.marks)
    }

    pub fn header(&self) -> String {
        format!(
            "Section {}: {} ({} x {} = {})",
            self.letter,
            self.name,
            self.count,
            self.marks,
            self.total()
        )
    }
}

impl PaperSpec {
    pub fn validate(&self) -> Result<(), PaperError> {
        let invalid = |m: &str| Err(PaperError::Invalid(m.to_string()));
        if self.exam_name.trim().is_empty() {
            return invalid("examName must not be empty");
        }
        if self.class_name.trim().is_empty() || self.subject.trim().is_empty() {
            return invalid("className and subject are required");
        }
        if self.chapters.iter().all(|c| c.trim().is_empty()) {
            return invalid("select at least one chapter");
        }
        let Some((questions, _)) = self.checked_totals() else {
            return invalid("question counts and marks are too large");
        };
        if questions == 0 {
            return invalid("the paper needs at least one question");
        }
        if self.question_types.iter().any(|q| q.count > 0 && q.marks == 0) {
            return invalid("question types in use must carry marks");
        }
        if self.question_types.iter().filter(|q| q.count > 0).count() > MAX_SECTIONS {
            return Err(PaperError::Invalid(format!(
                "at most {} question types can be used",
                MAX_SECTIONS
            )));
        }
        let pct = self
            .difficulty
            .iter()
            .try_fold(0u32, |acc, d| acc.checked_add(d.percentage));
        if pct != Some(100) {
            let got = pct.map_or_else(|| "more than 100".to_string(), |p| p.to_string());
            return Err(PaperError::Invalid(format!(
                "difficulty percentages must total 100 (got {})",
                got
            )));
        }
        if !(self.duration_hours.is_finite() && self.duration_hours > 0.0) {
            return invalid("durationHours must be positive");
        }
        Ok(())
    }

    /// Question types with a non-zero count, lettered A, B, C...
    pub fn sections(&self) -> Vec<Section> {
        self.question_types
            .iter()
            .filter(|q| q.count > 0)
            .zip('A'..='Z')
            .map(|(q, letter)| Section {
                letter,
                name: q.name.clone(),
                count: q.count,
                marks: q.marks,
            })
            .collect()
    }

    /// (questions, marks), or `None` when either overflows.
    fn checked_totals(&self) -> Option<(u32, u32)> {
        self.question_types
            .iter()
            .try_fold((0u32, 0u32), |(questions, marks), q| {
                Some((
                    questions.checked_add(q.count)?,
                    marks.checked_add(q.marks.checked_mul(q.count)?)?,
                ))
            })
    }

    pub fn total_marks(&self) -> u32 {
        self.question_types
            .iter()
            .fold(0u32, |acc, q| acc.saturating_add(q.marks.saturating_mul(q.count)))
    }

    pub fn total_questions(&self) -> u32 {
        self.question_types
            .iter()
            .fold(0u32, |acc, q| acc.saturating_add(q.count))
    }
}

fn bank_reference(entries: &[BankEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        let block = format!("[{}]\n{}\n\n", e.chapter_name, e.text.trim());
        if out.len() + block.len() > MAX_BANK_CHARS {
            break;
        }
        out.push_str(&block);
    }
    out.trim_end().to_string()
}

pub fn build_prompt(spec: &PaperSpec, school: &SchoolInfo, bank: &[BankEntry]) -> String {
    let pattern = spec
        .sections()
        .iter()
        .map(|s| format!("- {}", s.header()))
        .collect::<Vec<_>>()
        .join("\n");
    let difficulty = spec
        .difficulty
        .iter()
        .map(|d| format!("- {}: {}%", d.name, d.percentage))
        .collect::<Vec<_>>()
        .join("\n");
    let contact = school.contact_line();
    let contact_line = if contact.is_empty() {
        String::new()
    } else {
        format!("{}\n", contact)
    };
    let reference = bank_reference(bank);
    let reference_block = if reference.is_empty() {
        String::new()
    } else {
        format!(
            "\nQuestions already collected for these chapters (use them as a guide to level \
and style; you may reuse or adapt them):\n{}\n",
            reference
        )
    };

    format!(
        "Write a complete question paper in Markdown.

Header (reproduce as-is at the top):
# {school}
{contact}## {exam} - {class} - {subject}
**Maximum Marks: {marks} | Time Allowed: {hours} Hours**
---

Pattern:
{pattern}

Difficulty mix across the whole paper:
{difficulty}

Chapters: {chapters}
{reference}
Rules:
- One `##` heading per section, written exactly as in the pattern.
- Number questions 1, 2, 3... continuously across all sections.
- Multiple choice questions get four options a) b) c) d).
- Fill in the blanks are full sentences with the blank as underscores.
- Matching columns list Column A (continuing the question numbers) and Column B lettered (a), (b)...
- Write formulas in LaTeX between dollar signs, e.g. $H_2O$.
- Questions must suit {class} and cover every listed chapter.
- Never print difficulty labels, chapter names or any other internal tags next to questions.
- No code fences and no tables.",
        school = school.display_name(),
        contact = contact_line,
        exam = spec.exam_name.trim(),
        class = spec.class_name,
        subject = spec.subject,
        marks = spec.total_marks(),
        hours = spec.duration_hours,
        pattern = pattern,
        difficulty = difficulty,
        chapters = spec.chapters.join(", "),
        reference = reference_block,
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPaper {
    pub paper: String,
    pub model: String,
    pub total_marks: u32,
    pub total_questions: u32,
    pub sections: Vec<Section>,
    pub reference_entries: usize,
}

pub fn generate(
    conn: &Connection,
    generator: &dyn ContentGenerator,
    school_id: &str,
    spec: &PaperSpec,
) -> Result<GeneratedPaper, PaperError> {
    spec.validate()?;

    let (structure, _) = academics::load(conn, school_id)?;
    for chapter in spec.chapters.iter().filter(|c| !c.trim().is_empty()) {
        structure.require_chapter(&spec.subject, &spec.class_name, chapter)?;
    }

    let school = institution::get(conn, school_id)?;
    let bank: Vec<BankEntry> = question_bank::list(
        conn,
        school_id,
        &BankFilter {
            class_name: Some(spec.class_name.clone()),
            subject: Some(spec.subject.clone()),
            chapter: None,
        },
    )?
    .into_iter()
    .filter(|e| spec.chapters.contains(&e.chapter_name))
    .collect();

    let request = GenerateRequest::text(build_prompt(spec, &school, &bank)).with_config(
        GenerationConfig {
            temperature: Some(0.7),
            top_k: Some(40),
            top_p: Some(0.95),
            max_output_tokens: Some(8192),
        },
    );
    let outcome = rotation::run(generator, conn, ModelPool::Paper, &request)?;
    log::info!(
        "generated {} paper for {} {} with {}",
        spec.exam_name,
        spec.class_name,
        spec.subject,
        outcome.model
    );

    Ok(GeneratedPaper {
        paper: strip_code_fence(&outcome.text),
        model: outcome.model,
        total_marks: spec.total_marks(),
        total_questions: spec.total_questions(),
        sections: spec.sections(),
        reference_entries: bank.len(),
    })
}

/// Models sometimes wrap the whole answer in a Markdown fence anyway.
fn strip_code_fence(text: &str) -> String {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t.to_string();
    };
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().trim_end_matches("```").trim().to_string()
}
