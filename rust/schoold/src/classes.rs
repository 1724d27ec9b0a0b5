//! Class & Section master.
//!
//! Each class a school offers is one `settings` document keyed by
//! `class_<slug>_<schoolId>`. Sections are stored sorted on the document.

use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use thiserror::Error;

pub const SETTINGS: &str = "settings";

pub const CLASS_ORDER: [&str; 18] = [
    "Pre-Nursery",
    "Nursery",
    "KG",
    "Prep",
    "LKG",
    "UKG",
    "Class 1",
    "Class 2",
    "Class 3",
    "Class 4",
    "Class 5",
    "Class 6",
    "Class 7",
    "Class 8",
    "Class 9",
    "Class 10",
    "Class 11",
    "Class 12",
];

pub const PRESET_SECTIONS: [&str; 4] = ["A", "B", "C", "D"];

const ROMAN: [&str; 12] = [
    "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII",
];

#[derive(Debug, Error)]
pub enum ClassError {
    #[error("class name must not be empty")]
    EmptyName,

    #[error("section must be 1..=8 characters")]
    BadSection,

    #[error("class not found: {0}")]
    NotFound(String),

    #[error("activate class {0} before changing its sections")]
    Inactive(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ClassError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyName | Self::BadSection => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::Inactive(_) => "class_inactive",
            Self::Storage(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassSetting {
    pub name: String,
    #[serde(default)]
    pub sections: Vec<String>,
    // Documents written before the toggle existed carry no flag; they count as enabled.
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_year: Option<String>,
}

fn default_active() -> bool {
    true
}

pub fn slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' })
        .collect()
}

pub fn class_doc_id(class_name: &str, school_id: &str) -> String {
    format!("class_{}_{}", slug(class_name), school_id)
}

pub fn normalize_class_name(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn dedup_key(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn preset_rank(name: &str) -> Option<usize> {
    let lower = name.to_lowercase();
    CLASS_ORDER.iter().position(|c| c.to_lowercase() == lower)
}

/// Normalizes names, drops duplicates (first one wins) and orders presets
/// first in school order, then everything else alphabetically.
pub fn sort_classes<T, F>(items: Vec<T>, name_of: F) -> Vec<T>
where
    F: Fn(&mut T) -> &mut String,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for mut item in items {
        let norm = normalize_class_name(name_of(&mut item));
        if norm.is_empty() {
            continue;
        }
        if seen.insert(dedup_key(&norm)) {
            *name_of(&mut item) = norm;
            unique.push(item);
        }
    }

    let mut keyed: Vec<(Option<usize>, String, T)> = unique
        .into_iter()
        .map(|mut item| {
            let name = name_of(&mut item).clone();
            (preset_rank(&name), name, item)
        })
        .collect();
    keyed.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.1.cmp(&b.1),
    });
    keyed.into_iter().map(|(_, _, item)| item).collect()
}

pub fn sort_class_names(names: Vec<String>) -> Vec<String> {
    sort_classes(names, |s| s)
}

/// "Class 7" becomes "STD VII" when Roman numerals are on; other "Class X"
/// names lose their prefix.
pub fn format_class_name(name: &str, use_roman: bool) -> String {
    if !use_roman {
        return name.to_string();
    }
    let Some(rest) = name.strip_prefix("Class ") else {
        return name.to_string();
    };
    let rest = rest.trim();
    match rest.parse::<usize>() {
        Ok(n) if (1..=12).contains(&n) => format!("STD {}", ROMAN[n - 1]),
        _ => rest.to_string(),
    }
}

pub fn format_class_section(name: &str, section: Option<&str>, use_roman: bool) -> String {
    let display = format_class_name(name, use_roman);
    match section.map(str::trim) {
        Some(s) if !s.is_empty() => format!("{} - Section {}", display, s),
        _ => display,
    }
}

pub fn load_all(conn: &Connection, school_id: &str) -> anyhow::Result<Vec<ClassSetting>> {
    let rows = db::doc_query(
        conn,
        SETTINGS,
        &[("type", json!("class")), ("schoolId", json!(school_id))],
    )?;
    let mut out = Vec::with_capacity(rows.len());
    for (id, data) in rows {
        match serde_json::from_value::<ClassSetting>(data) {
            Ok(c) => out.push(c),
            Err(e) => log::warn!("skipping malformed class document {}: {}", id, e),
        }
    }
    Ok(out)
}

pub fn list(
    conn: &Connection,
    school_id: &str,
    include_inactive: bool,
    financial_year: Option<&str>,
) -> anyhow::Result<Vec<ClassSetting>> {
    let filtered: Vec<ClassSetting> = load_all(conn, school_id)?
        .into_iter()
        .filter(|c| include_inactive || c.active)
        .filter(|c| match financial_year {
            Some(fy) => c.financial_year.as_deref() == Some(fy),
            None => true,
        })
        .collect();
    Ok(sort_classes(filtered, |c| &mut c.name))
}

pub fn active_class_names(conn: &Connection, school_id: &str) -> anyhow::Result<Vec<String>> {
    Ok(list(conn, school_id, false, None)?
        .into_iter()
        .map(|c| c.name)
        .collect())
}

fn find(conn: &Connection, school_id: &str, class_name: &str) -> anyhow::Result<Option<ClassSetting>> {
    match db::doc_get(conn, SETTINGS, &class_doc_id(class_name, school_id))? {
        Some(v) => Ok(serde_json::from_value(v).ok()),
        None => Ok(None),
    }
}

/// Creates the class enabled on first use, flips `active` afterwards.
pub fn toggle_class(conn: &Connection, school_id: &str, class_name: &str) -> Result<bool, ClassError> {
    let name = normalize_class_name(class_name);
    if name.is_empty() {
        return Err(ClassError::EmptyName);
    }
    let doc_id = class_doc_id(&name, school_id);
    let now = db::now_rfc3339();

    let active = match find(conn, school_id, &name)? {
        Some(existing) => {
            let mut patch = Map::new();
            patch.insert("active".into(), Value::Bool(!existing.active));
            patch.insert("updatedAt".into(), Value::String(now));
            db::doc_merge(conn, SETTINGS, &doc_id, &patch)?;
            !existing.active
        }
        None => {
            db::doc_set(
                conn,
                SETTINGS,
                &doc_id,
                &json!({
                    "name": name,
                    "sections": [],
                    "active": true,
                    "type": "class",
                    "schoolId": school_id,
                    "createdAt": now,
                }),
            )?;
            true
        }
    };
    log::info!("class {} active={} (school {})", name, active, school_id);
    Ok(active)
}

/// Adds the section when absent, removes it when present. Returns the new list.
pub fn toggle_section(
    conn: &Connection,
    school_id: &str,
    class_name: &str,
    section: &str,
) -> Result<Vec<String>, ClassError> {
    let name = normalize_class_name(class_name);
    let section = section.trim().to_uppercase();
    if section.is_empty() || section.chars().count() > 8 {
        return Err(ClassError::BadSection);
    }
    let Some(existing) = find(conn, school_id, &name)? else {
        return Err(ClassError::NotFound(name));
    };
    if !existing.active {
        return Err(ClassError::Inactive(name));
    }

    let mut sections = existing.sections;
    if let Some(pos) = sections.iter().position(|s| *s == section) {
        sections.remove(pos);
    } else {
        sections.push(section);
    }
    sections.sort();

    let mut patch = Map::new();
    patch.insert("sections".into(), json!(sections));
    patch.insert("updatedAt".into(), Value::String(db::now_rfc3339()));
    db::doc_merge(conn, SETTINGS, &class_doc_id(&name, school_id), &patch)?;
    Ok(sections)
}

/// Turns every preset class on. Existing sections are left alone.
pub fn enable_all(conn: &Connection, school_id: &str) -> Result<usize, ClassError> {
    let now = db::now_rfc3339();
    for name in CLASS_ORDER {
        let doc_id = class_doc_id(name, school_id);
        let mut patch = Map::new();
        patch.insert("name".into(), json!(name));
        patch.insert("active".into(), json!(true));
        patch.insert("type".into(), json!("class"));
        patch.insert("schoolId".into(), json!(school_id));
        patch.insert("updatedAt".into(), json!(now));
        if db::doc_get(conn, SETTINGS, &doc_id)?.is_none() {
            patch.insert("sections".into(), json!([]));
            patch.insert("createdAt".into(), json!(now));
        }
        db::doc_merge(conn, SETTINGS, &doc_id, &patch)?;
    }
    Ok(CLASS_ORDER.len())
}

pub fn is_explicitly_inactive(classes: &[ClassSetting], class_name: &str) -> bool {
    let key = normalize_class_name(class_name).to_lowercase();
    classes
        .iter()
        .find(|c| normalize_class_name(&c.name).to_lowercase() == key)
        .map(|c| !c.active)
        .unwrap_or(false)
}
