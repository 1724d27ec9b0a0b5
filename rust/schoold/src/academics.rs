//! Subjects & chapters.
//!
//! The whole structure is one document, `settings/academic_structure_<schoolId>`:
//! it is loaded, mutated in memory and written back wholesale.

use crate::classes::{self, ClassSetting};
use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub const MASTER_SUBJECTS: [&str; 27] = [
    "Activity",
    "Bio",
    "Chemistry",
    "Computer",
    "Computer Practical",
    "Craft",
    "Current Affairs",
    "Deeniyat",
    "Drawing",
    "English",
    "English Grammar",
    "English Writing",
    "EVS",
    "GK",
    "Hindi",
    "Hindi Grammar",
    "Hindi Writing",
    "Islamic Studies",
    "Maths",
    "Maths Table",
    "Oration",
    "Physics",
    "Rhymes",
    "S.St.",
    "Science Practical",
    "Spelling",
    "Urdu",
];

#[derive(Debug, Error)]
pub enum AcademicsError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("a subject named {0} already exists")]
    DuplicateSubject(String),

    #[error("subject not found: {0}")]
    SubjectNotFound(String),

    #[error("subject {subject} is not enabled for {class}")]
    NotEnabled { subject: String, class: String },

    #[error("chapter {chapter} not found in {subject} for {class}")]
    ChapterNotFound {
        subject: String,
        class: String,
        chapter: String,
    },

    #[error("no active classes found; enable classes in the class master first")]
    NoActiveClasses,

    #[error("malformed academic structure: {0}")]
    Malformed(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl AcademicsError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Empty(_) | Self::NotEnabled { .. } | Self::NoActiveClasses => "bad_params",
            Self::DuplicateSubject(_) => "conflict",
            Self::SubjectNotFound(_) | Self::ChapterNotFound { .. } => "not_found",
            Self::Malformed(_) => "malformed_document",
            Self::Storage(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub name: String,
    #[serde(default)]
    pub chapters_per_class: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub enabled_for: Vec<String>,
}

impl Subject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_enabled_for(&self, class_name: &str) -> bool {
        self.enabled_for.iter().any(|c| c == class_name)
    }

    pub fn chapters_for(&self, class_name: &str) -> &[String] {
        self.chapters_per_class
            .get(class_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Shape written before chapters were tracked per class.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySubject {
    name: String,
    chapters: Vec<String>,
    #[serde(default)]
    enabled_for: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcademicStructure {
    pub subjects: Vec<Subject>,
    /// Stored entries that could not be read. Written back untouched until
    /// `academics.save` replaces the structure.
    pub unreadable: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClassView {
    pub name: String,
    pub subjects: Vec<ClassViewSubject>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClassViewSubject {
    pub name: String,
    pub chapters: Vec<String>,
}

/// Reshapes a stored subject. A flat `chapters` array is copied to every
/// enabled class. Returns the subject and whether it was migrated.
pub fn migrate_subject(raw: &Value) -> Result<(Subject, bool), AcademicsError> {
    if raw.get("chapters").map(Value::is_array).unwrap_or(false) {
        let legacy: LegacySubject = serde_json::from_value(raw.clone())
            .map_err(|e| AcademicsError::Malformed(e.to_string()))?;
        log::info!("migrating subject {} to per-class chapters", legacy.name);
        let chapters_per_class = legacy
            .enabled_for
            .iter()
            .map(|c| (c.clone(), legacy.chapters.clone()))
            .collect();
        return Ok((
            Subject {
                name: legacy.name,
                chapters_per_class,
                enabled_for: legacy.enabled_for,
            },
            true,
        ));
    }
    let subject =
        serde_json::from_value(raw.clone()).map_err(|e| AcademicsError::Malformed(e.to_string()))?;
    Ok((subject, false))
}

pub fn structure_doc_id(school_id: &str) -> String {
    format!("academic_structure_{}", school_id)
}

/// Loads and migrates. The second value counts migrated subjects.
/// Subjects that fail to parse are kept aside in `unreadable`.
pub fn load(conn: &Connection, school_id: &str) -> Result<(AcademicStructure, usize), AcademicsError> {
    let Some(doc) = db::doc_get(conn, classes::SETTINGS, &structure_doc_id(school_id))? else {
        return Ok((AcademicStructure::default(), 0));
    };
    let Some(raw_subjects) = doc.get("subjects").and_then(Value::as_array) else {
        return Ok((AcademicStructure::default(), 0));
    };

    let mut migrated = 0;
    let mut structure = AcademicStructure::default();
    for raw in raw_subjects {
        match migrate_subject(raw) {
            Ok((subject, was_legacy)) => {
                if was_legacy {
                    migrated += 1;
                }
                structure.subjects.push(subject);
            }
            Err(e) => {
                log::warn!("skipping subject in school {}: {}", school_id, e);
                structure.unreadable.push(raw.clone());
            }
        }
    }
    Ok((structure, migrated))
}

pub fn save(conn: &Connection, school_id: &str, structure: &AcademicStructure) -> Result<(), AcademicsError> {
    let mut subjects = serde_json::to_value(&structure.subjects)
        .map_err(|e| AcademicsError::Malformed(e.to_string()))?;
    if let Some(list) = subjects.as_array_mut() {
        list.extend(structure.unreadable.iter().cloned());
    }
    db::doc_set(
        conn,
        classes::SETTINGS,
        &structure_doc_id(school_id),
        &json!({
            "subjects": subjects,
            "schoolId": school_id,
            "type": "academic_structure",
            "updatedAt": db::now_rfc3339(),
        }),
    )?;
    Ok(())
}

fn clean(value: &str, what: &'static str) -> Result<String, AcademicsError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(AcademicsError::Empty(what));
    }
    Ok(v.to_string())
}

impl AcademicStructure {
    pub fn subject(&self, name: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.name == name)
    }

    fn subject_mut(&mut self, name: &str) -> Result<&mut Subject, AcademicsError> {
        self.subjects
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| AcademicsError::SubjectNotFound(name.to_string()))
    }

    fn name_taken(&self, name: &str, except: Option<&str>) -> bool {
        let lower = name.to_lowercase();
        self.subjects
            .iter()
            .filter(|s| Some(s.name.as_str()) != except)
            .any(|s| s.name.to_lowercase() == lower)
    }

    pub fn add_subject(&mut self, name: &str) -> Result<(), AcademicsError> {
        let name = clean(name, "subject name")?;
        if self.name_taken(&name, None) {
            return Err(AcademicsError::DuplicateSubject(name));
        }
        self.subjects.push(Subject::new(name));
        Ok(())
    }

    pub fn rename_subject(&mut self, old: &str, new: &str) -> Result<(), AcademicsError> {
        let new = clean(new, "subject name")?;
        if new == old {
            return Ok(());
        }
        if self.name_taken(&new, Some(old)) {
            return Err(AcademicsError::DuplicateSubject(new));
        }
        self.subject_mut(old)?.name = new;
        Ok(())
    }

    /// Drops the subject together with its chapters for every class.
    pub fn remove_subject(&mut self, name: &str) -> Result<(), AcademicsError> {
        let before = self.subjects.len();
        self.subjects.retain(|s| s.name != name);
        if self.subjects.len() == before {
            return Err(AcademicsError::SubjectNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Returns the new enabled state. Disabling keeps the class's chapters.
    pub fn toggle_subject_for_class(&mut self, subject: &str, class_name: &str) -> Result<bool, AcademicsError> {
        let class_name = clean(class_name, "class name")?;
        let s = self.subject_mut(subject)?;
        if s.is_enabled_for(&class_name) {
            s.enabled_for.retain(|c| *c != class_name);
            Ok(false)
        } else {
            s.chapters_per_class.entry(class_name.clone()).or_default();
            s.enabled_for.push(class_name);
            Ok(true)
        }
    }

    /// Returns false when the chapter was already listed for that class.
    pub fn add_chapter(&mut self, subject: &str, class_name: &str, chapter: &str) -> Result<bool, AcademicsError> {
        let class_name = clean(class_name, "class name")?;
        let chapter = clean(chapter, "chapter name")?;
        let list = self
            .subject_mut(subject)?
            .chapters_per_class
            .entry(class_name)
            .or_default();
        if list.contains(&chapter) {
            return Ok(false);
        }
        list.push(chapter);
        Ok(true)
    }

    /// One chapter per line. Returns (parsed, added).
    pub fn bulk_add_chapters(
        &mut self,
        subject: &str,
        class_name: &str,
        text: &str,
    ) -> Result<(usize, usize), AcademicsError> {
        let class_name = clean(class_name, "class name")?;
        let names: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if names.is_empty() {
            return Err(AcademicsError::Empty("chapter list"));
        }

        let list = self
            .subject_mut(subject)?
            .chapters_per_class
            .entry(class_name)
            .or_default();
        let mut added = 0;
        for name in &names {
            if !list.iter().any(|c| c == name) {
                list.push(name.to_string());
                added += 1;
            }
        }
        Ok((names.len(), added))
    }

    pub fn remove_chapter(&mut self, subject: &str, class_name: &str, chapter: &str) -> Result<(), AcademicsError> {
        let s = self.subject_mut(subject)?;
        let subject_name = s.name.clone();
        let list = s.chapters_per_class.entry(class_name.to_string()).or_default();
        let before = list.len();
        list.retain(|c| c != chapter);
        if list.len() == before {
            return Err(AcademicsError::ChapterNotFound {
                subject: subject_name,
                class: class_name.to_string(),
                chapter: chapter.to_string(),
            });
        }
        Ok(())
    }

    pub fn subjects_for_class(&self, class_name: &str) -> Vec<&Subject> {
        self.subjects
            .iter()
            .filter(|s| s.is_enabled_for(class_name))
            .collect()
    }

    pub fn search(&self, term: &str) -> Vec<&Subject> {
        let term = term.to_lowercase();
        self.subjects
            .iter()
            .filter(|s| s.name.to_lowercase().contains(&term))
            .collect()
    }

    /// Merges the master subject list into the structure, enabling every
    /// listed subject for every given class. Returns how many were created.
    pub fn seed(&mut self, active_classes: &[String]) -> Result<usize, AcademicsError> {
        if active_classes.is_empty() {
            return Err(AcademicsError::NoActiveClasses);
        }
        let mut created = 0;
        for name in MASTER_SUBJECTS {
            let lower = name.to_lowercase();
            let idx = match self
                .subjects
                .iter()
                .position(|s| s.name.to_lowercase() == lower)
            {
                Some(i) => i,
                None => {
                    self.subjects.push(Subject::new(name));
                    created += 1;
                    self.subjects.len() - 1
                }
            };
            let subject = &mut self.subjects[idx];
            for class_name in active_classes {
                if !subject.is_enabled_for(class_name) {
                    subject.enabled_for.push(class_name.clone());
                }
                subject
                    .chapters_per_class
                    .entry(class_name.clone())
                    .or_default();
            }
        }
        Ok(created)
    }

    /// Class -> subjects -> chapters, for pickers. Classes switched off in
    /// the class master are hidden; unknown classes stay visible.
    pub fn class_view(&self, class_settings: &[ClassSetting]) -> Vec<ClassView> {
        let mut by_class: BTreeMap<String, ClassView> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        for subject in &self.subjects {
            for class_name in &subject.enabled_for {
                let entry = by_class.entry(class_name.clone()).or_insert_with(|| {
                    order.push(class_name.clone());
                    ClassView {
                        name: class_name.clone(),
                        subjects: Vec::new(),
                    }
                });
                entry.subjects.push(ClassViewSubject {
                    name: subject.name.clone(),
                    chapters: subject.chapters_for(class_name).to_vec(),
                });
            }
        }

        let views: Vec<ClassView> = order
            .into_iter()
            .filter_map(|name| by_class.remove(&name))
            .collect();
        classes::sort_classes(views, |v| &mut v.name)
            .into_iter()
            .filter(|v| !classes::is_explicitly_inactive(class_settings, &v.name))
            .collect()
    }

    pub fn require_chapter(&self, subject: &str, class_name: &str, chapter: &str) -> Result<(), AcademicsError> {
        let s = self
            .subject(subject)
            .ok_or_else(|| AcademicsError::SubjectNotFound(subject.to_string()))?;
        if !s.is_enabled_for(class_name) {
            return Err(AcademicsError::NotEnabled {
                subject: subject.to_string(),
                class: class_name.to_string(),
            });
        }
        if !s.chapters_for(class_name).iter().any(|c| c == chapter) {
            return Err(AcademicsError::ChapterNotFound {
                subject: subject.to_string(),
                class: class_name.to_string(),
                chapter: chapter.to_string(),
            });
        }
        Ok(())
    }
}
