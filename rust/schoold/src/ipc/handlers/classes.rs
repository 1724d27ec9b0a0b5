use crate::classes::{self, ClassSetting};
use crate::institution;
use crate::ipc::error::ok;
use crate::ipc::helpers::{self, fail};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn class_json(c: &ClassSetting, use_roman: bool) -> serde_json::Value {
    json!({
        "name": c.name,
        "displayName": classes::format_class_name(&c.name, use_roman),
        "sections": c.sections,
        "active": c.active,
        "financialYear": c.financial_year,
    })
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let include_inactive = helpers::opt_bool(req, "includeInactive").unwrap_or(false);
    let financial_year = helpers::opt_str(req, "financialYear");

    let use_roman = match institution::get(conn, &school) {
        Ok(info) => info.use_roman_numerals,
        Err(e) => return fail(req, "db_query_failed", e),
    };
    match classes::list(conn, &school, include_inactive, financial_year.as_deref()) {
        Ok(list) => {
            let rows: Vec<_> = list.iter().map(|c| class_json(c, use_roman)).collect();
            ok(
                &req.id,
                json!({
                    "classes": rows,
                    "useRomanNumerals": use_roman,
                    "presetSections": classes::PRESET_SECTIONS,
                }),
            )
        }
        Err(e) => fail(req, "db_query_failed", e),
    }
}

fn handle_classes_toggle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_name = match helpers::req_str(req, "className") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match classes::toggle_class(conn, &school, &class_name) {
        Ok(active) => ok(
            &req.id,
            json!({ "className": classes::normalize_class_name(&class_name), "active": active }),
        ),
        Err(e) => fail(req, e.code(), e),
    }
}

fn handle_classes_toggle_section(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (class_name, section) = match (
        helpers::req_str(req, "className"),
        helpers::req_str(req, "section"),
    ) {
        (Ok(c), Ok(s)) => (c, s),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    match classes::toggle_section(conn, &school, &class_name, &section) {
        Ok(sections) => ok(
            &req.id,
            json!({ "className": classes::normalize_class_name(&class_name), "sections": sections }),
        ),
        Err(e) => fail(req, e.code(), e),
    }
}

fn handle_classes_enable_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match classes::enable_all(conn, &school) {
        Ok(n) => ok(&req.id, json!({ "enabled": n })),
        Err(e) => fail(req, e.code(), e),
    }
}

fn handle_classes_set_roman_numerals(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let enabled = match helpers::req_bool(req, "enabled") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match institution::set_roman_numerals(conn, &school, enabled) {
        Ok(()) => ok(&req.id, json!({ "useRomanNumerals": enabled })),
        Err(e) => fail(req, "db_update_failed", e),
    }
}

/// Works without a workspace when `useRomanNumerals` is passed explicitly.
fn handle_classes_display_name(state: &mut AppState, req: &Request) -> serde_json::Value {
    let class_name = match helpers::req_str(req, "className") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let section = helpers::opt_str(req, "section");
    let use_roman = match helpers::opt_bool(req, "useRomanNumerals") {
        Some(v) => v,
        None => match (state.db.as_ref(), helpers::school_id(state, req)) {
            (Some(conn), Ok(school)) => match institution::get(conn, &school) {
                Ok(info) => info.use_roman_numerals,
                Err(e) => return fail(req, "db_query_failed", e),
            },
            _ => false,
        },
    };
    ok(
        &req.id,
        json!({
            "displayName": classes::format_class_section(&class_name, section.as_deref(), use_roman),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.toggle" => Some(handle_classes_toggle(state, req)),
        "classes.toggleSection" => Some(handle_classes_toggle_section(state, req)),
        "classes.enableAll" => Some(handle_classes_enable_all(state, req)),
        "classes.setRomanNumerals" => Some(handle_classes_set_roman_numerals(state, req)),
        "classes.displayName" => Some(handle_classes_display_name(state, req)),
        _ => None,
    }
}
