//! Institution profile and branding.
//!
//! The profile lives on `schools/<schoolId>`. A trimmed copy is mirrored into
//! `settings/school_info_<schoolId>` for readers that only look at settings.

use crate::classes::SETTINGS;
use crate::db;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const SCHOOLS: &str = "schools";

#[derive(Debug, Error)]
pub enum InstitutionError {
    #[error("{0}")]
    BadField(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl InstitutionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadField(_) => "bad_params",
            Self::Storage(_) => "db_update_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SchoolInfo {
    pub name: String,
    pub full_name: String,
    pub email: String,
    pub address: String,
    pub phone: String,
    pub website: String,
    pub contact_person: String,
    pub contact_number: String,
    pub logo_url: String,
    pub custom_title: String,
    pub admission_number_prefix: String,
    pub admission_number_start_number: String,
    pub use_roman_numerals: bool,
}

impl SchoolInfo {
    /// Name printed on headers and papers.
    pub fn display_name(&self) -> &str {
        if !self.full_name.is_empty() {
            &self.full_name
        } else if !self.name.is_empty() {
            &self.name
        } else {
            "School Name"
        }
    }

    pub fn contact_line(&self) -> String {
        let contact = if self.phone.is_empty() {
            &self.contact_number
        } else {
            &self.phone
        };
        match (self.address.is_empty(), contact.is_empty()) {
            (false, false) => format!("{} | Contact: {}", self.address, contact),
            (false, true) => self.address.clone(),
            (true, false) => format!("Contact: {}", contact),
            (true, true) => String::new(),
        }
    }
}

/// (field, max length)
const TEXT_FIELDS: [(&str, usize); 12] = [
    ("name", 120),
    ("fullName", 200),
    ("email", 200),
    ("address", 400),
    ("phone", 40),
    ("website", 200),
    ("contactPerson", 120),
    ("contactNumber", 40),
    ("logoUrl", 1000),
    ("customTitle", 120),
    ("admissionNumberPrefix", 16),
    ("admissionNumberStartNumber", 16),
];

fn text(doc: &Value, key: &str) -> String {
    match doc.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

pub fn get(conn: &Connection, school_id: &str) -> anyhow::Result<SchoolInfo> {
    let doc = db::doc_get(conn, SCHOOLS, school_id)?.unwrap_or_else(|| json!({}));
    let name = text(&doc, "name");
    let full_name = match text(&doc, "fullName") {
        s if s.is_empty() => name.clone(),
        s => s,
    };
    let logo_url = match text(&doc, "logoUrl") {
        s if s.is_empty() => text(&doc, "logo"),
        s => s,
    };
    Ok(SchoolInfo {
        name,
        full_name,
        email: text(&doc, "email"),
        address: text(&doc, "address"),
        phone: text(&doc, "phone"),
        website: text(&doc, "website"),
        contact_person: text(&doc, "contactPerson"),
        contact_number: text(&doc, "contactNumber"),
        logo_url,
        custom_title: text(&doc, "customTitle"),
        admission_number_prefix: text(&doc, "admissionNumberPrefix"),
        admission_number_start_number: text(&doc, "admissionNumberStartNumber"),
        use_roman_numerals: doc
            .get("useRomanNumerals")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn validate_patch(patch: &Map<String, Value>) -> Result<Map<String, Value>, InstitutionError> {
    let mut clean = Map::new();
    for (k, v) in patch {
        let Some((_, max)) = TEXT_FIELDS.iter().find(|(f, _)| f == k) else {
            return Err(InstitutionError::BadField(format!("unknown institution field: {}", k)));
        };
        let s = match v {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) if k == "admissionNumberStartNumber" => n.to_string(),
            _ => return Err(InstitutionError::BadField(format!("{} must be string", k))),
        };
        if s.chars().count() > *max {
            return Err(InstitutionError::BadField(format!(
                "{} length must be <= {}",
                k, max
            )));
        }
        if k == "name" && s.is_empty() {
            return Err(InstitutionError::BadField("name must not be empty".into()));
        }
        clean.insert(k.clone(), Value::String(s));
    }
    Ok(clean)
}

pub fn update(
    conn: &Connection,
    school_id: &str,
    patch: &Map<String, Value>,
) -> Result<SchoolInfo, InstitutionError> {
    let mut clean = validate_patch(patch)?;
    let now = db::now_rfc3339();
    clean.insert("updatedAt".into(), json!(now));

    let tx = conn.unchecked_transaction().map_err(anyhow::Error::from)?;
    db::doc_merge(&tx, SCHOOLS, school_id, &clean)?;

    let info = get(&tx, school_id)?;
    let mut mirror = Map::new();
    mirror.insert("name".into(), json!(info.name));
    mirror.insert("fullName".into(), json!(info.full_name));
    mirror.insert("email".into(), json!(info.email));
    mirror.insert("address".into(), json!(info.address));
    mirror.insert("phone".into(), json!(info.phone));
    mirror.insert("website".into(), json!(info.website));
    mirror.insert("web".into(), json!(info.website));
    mirror.insert("admissionNumberPrefix".into(), json!(info.admission_number_prefix));
    mirror.insert(
        "admissionNumberStartNumber".into(),
        json!(info.admission_number_start_number),
    );
    mirror.insert("type".into(), json!("school_info"));
    mirror.insert("schoolId".into(), json!(school_id));
    mirror.insert("updatedAt".into(), json!(now));
    db::doc_merge(&tx, SETTINGS, &format!("school_info_{}", school_id), &mirror)?;
    tx.commit().map_err(anyhow::Error::from)?;

    log::info!("institution profile updated for school {}", school_id);
    Ok(info)
}

pub fn set_roman_numerals(conn: &Connection, school_id: &str, enabled: bool) -> anyhow::Result<()> {
    let mut patch = Map::new();
    patch.insert("useRomanNumerals".into(), json!(enabled));
    patch.insert("updatedAt".into(), json!(db::now_rfc3339()));
    db::doc_merge(conn, SCHOOLS, school_id, &patch)?;
    Ok(())
}
