//! Inventory master: sellable items and their prices.

use crate::classes::{self, slug};
use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("item name must not be empty")]
    EmptyName,

    #[error("class name must not be empty")]
    EmptyClass,

    #[error("price must be a non-negative number")]
    BadPrice,

    #[error("inventory item not found: {0}")]
    NotFound(String),

    #[error("no price configured for {item} in {class}")]
    PriceNotConfigured { item: String, class: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl InventoryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyName | Self::EmptyClass | Self::BadPrice => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::PriceNotConfigured { .. } => "price_not_configured",
            Self::Storage(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PricingType {
    #[default]
    Flat,
    Classwise,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub pricing_type: PricingType,
    #[serde(default)]
    pub class_prices: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_year: Option<String>,
}

impl InventoryItem {
    /// Classwise items must carry a positive price for the class; flat items
    /// (or calls without a class) use the base price.
    pub fn resolve_price(&self, class_name: Option<&str>) -> Result<f64, InventoryError> {
        match (self.pricing_type, class_name.map(classes::normalize_class_name)) {
            (PricingType::Classwise, Some(class)) => match self.class_prices.get(&class) {
                Some(p) if *p > 0.0 => Ok(*p),
                _ => Err(InventoryError::PriceNotConfigured {
                    item: self.name.clone(),
                    class,
                }),
            },
            _ => Ok(self.price),
        }
    }
}

pub fn item_doc_id(name: &str, school_id: &str) -> String {
    format!("inv_{}_{}", slug(name.trim()), school_id)
}

fn check_price(price: f64) -> Result<f64, InventoryError> {
    if !price.is_finite() || price < 0.0 {
        return Err(InventoryError::BadPrice);
    }
    Ok(price)
}

fn parse_item(id: String, data: Value) -> Option<InventoryItem> {
    match serde_json::from_value::<InventoryItem>(data) {
        Ok(mut item) => {
            item.id = id;
            Some(item)
        }
        Err(e) => {
            log::warn!("skipping malformed inventory item {}: {}", id, e);
            None
        }
    }
}

/// Items of the given financial year plus items not tied to any year.
pub fn list(
    conn: &Connection,
    school_id: &str,
    financial_year: Option<&str>,
) -> anyhow::Result<Vec<InventoryItem>> {
    let rows = db::doc_query(
        conn,
        classes::SETTINGS,
        &[("type", json!("inventory")), ("schoolId", json!(school_id))],
    )?;
    let mut items: Vec<InventoryItem> = rows
        .into_iter()
        .filter_map(|(id, data)| parse_item(id, data))
        .filter(|item| match (financial_year, item.financial_year.as_deref()) {
            (Some(fy), Some(item_fy)) => fy == item_fy,
            _ => true,
        })
        .collect();
    items.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(items)
}

pub fn get(conn: &Connection, id: &str) -> Result<InventoryItem, InventoryError> {
    let data = db::doc_get(conn, classes::SETTINGS, id)?
        .filter(|d| d.get("type").and_then(Value::as_str) == Some("inventory"))
        .ok_or_else(|| InventoryError::NotFound(id.to_string()))?;
    parse_item(id.to_string(), data).ok_or_else(|| InventoryError::NotFound(id.to_string()))
}

/// Writes the item under its name-derived id, replacing any item of the same name.
pub fn add(
    conn: &Connection,
    school_id: &str,
    name: &str,
    price: f64,
    financial_year: Option<&str>,
) -> Result<InventoryItem, InventoryError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(InventoryError::EmptyName);
    }
    let price = check_price(price)?;
    let id = item_doc_id(name, school_id);

    let mut doc = json!({
        "name": name,
        "price": price,
        "pricingType": "flat",
        "classPrices": {},
        "type": "inventory",
        "schoolId": school_id,
        "createdAt": db::now_rfc3339(),
    });
    if let Some(fy) = financial_year {
        doc["financialYear"] = json!(fy);
    }
    db::doc_set(conn, classes::SETTINGS, &id, &doc)?;
    log::info!("inventory item {} saved at {}", name, price);
    get(conn, &id)
}

fn patch_item(conn: &Connection, id: &str, mut patch: Map<String, Value>) -> Result<InventoryItem, InventoryError> {
    get(conn, id)?;
    patch.insert("updatedAt".into(), json!(db::now_rfc3339()));
    db::doc_update(conn, classes::SETTINGS, id, &patch)?;
    get(conn, id)
}

pub fn update_price(conn: &Connection, id: &str, price: f64) -> Result<InventoryItem, InventoryError> {
    let price = check_price(price)?;
    let mut patch = Map::new();
    patch.insert("price".into(), json!(price));
    patch_item(conn, id, patch)
}

/// Sets one class's price and switches the item to classwise pricing.
/// A zero price removes the class entry.
pub fn set_class_price(
    conn: &Connection,
    id: &str,
    class_name: &str,
    price: f64,
) -> Result<InventoryItem, InventoryError> {
    let price = check_price(price)?;
    let class_name = classes::normalize_class_name(class_name);
    if class_name.is_empty() {
        return Err(InventoryError::EmptyClass);
    }
    let mut item = get(conn, id)?;
    if price > 0.0 {
        item.class_prices.insert(class_name, price);
    } else {
        item.class_prices.remove(&class_name);
    }

    let mut patch = Map::new();
    patch.insert("pricingType".into(), json!(PricingType::Classwise));
    patch.insert("classPrices".into(), json!(item.class_prices));
    patch_item(conn, id, patch)
}

pub fn delete(conn: &Connection, id: &str) -> Result<(), InventoryError> {
    get(conn, id)?;
    db::doc_delete(conn, classes::SETTINGS, id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn classwise_requires_positive_class_price() {
        let mut item = InventoryItem {
            id: "inv_tie_s1".into(),
            name: "Tie".into(),
            price: 50.0,
            pricing_type: PricingType::Flat,
            class_prices: BTreeMap::new(),
            financial_year: None,
        };
        assert_eq!(item.resolve_price(Some("Class 1")).expect("flat"), 50.0);

        item.pricing_type = PricingType::Classwise;
        item.class_prices.insert("Class 1".into(), 80.0);
        item.class_prices.insert("Class 2".into(), 0.0);
        assert_eq!(item.resolve_price(Some("Class 1")).expect("classwise"), 80.0);
        assert_eq!(item.resolve_price(Some(" Class  1 ")).expect("spacing"), 80.0);
        assert_eq!(
            item.resolve_price(Some("Class 2")).expect_err("zero").code(),
            "price_not_configured"
        );
        assert!(item.resolve_price(Some("Class 3")).is_err());
        assert_eq!(item.resolve_price(None).expect("no class"), 50.0);
    }

    #[test]
    fn list_filters_year_and_sorts() {
        let conn = mem();
        add(&conn, "s1", "Uniform", 900.0, Some("2025-26")).expect("uniform");
        add(&conn, "s1", "Belt", 120.0, None).expect("belt");
        add(&conn, "s1", "Diary", 60.0, Some("2026-27")).expect("diary");
        add(&conn, "s2", "Atlas", 300.0, None).expect("other school");

        let names: Vec<String> = list(&conn, "s1", Some("2025-26"))
            .expect("list")
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["Belt", "Uniform"]);
        assert_eq!(list(&conn, "s1", None).expect("all").len(), 3);
    }

    #[test]
    fn class_price_switches_to_classwise() {
        let conn = mem();
        let item = add(&conn, "s1", "Book Set", 0.0, None).expect("add");
        assert_eq!(item.id, "inv_book_set_s1");

        let item = set_class_price(&conn, &item.id, "Class 4", 1450.0).expect("class price");
        assert_eq!(item.pricing_type, PricingType::Classwise);
        assert_eq!(item.resolve_price(Some("Class 4")).expect("price"), 1450.0);

        assert!(matches!(update_price(&conn, &item.id, -1.0), Err(InventoryError::BadPrice)));
        delete(&conn, &item.id).expect("delete");
        assert!(matches!(get(&conn, &item.id), Err(InventoryError::NotFound(_))));
    }
}
