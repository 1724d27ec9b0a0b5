use crate::institution;
use crate::ipc::error::ok;
use crate::ipc::helpers::{self, fail};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn profile_json(info: &institution::SchoolInfo) -> Value {
    json!({
        "profile": info,
        "displayName": info.display_name(),
        "contactLine": info.contact_line(),
    })
}

fn handle_institution_get(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match institution::get(conn, &school) {
        Ok(info) => ok(&req.id, profile_json(&info)),
        Err(e) => fail(req, "db_query_failed", e),
    }
}

fn handle_institution_update(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(Value::as_object) else {
        return fail(req, "bad_params", "missing patch object");
    };
    match institution::update(conn, &school, patch) {
        Ok(info) => ok(&req.id, profile_json(&info)),
        Err(e) => fail(req, e.code(), e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "institution.get" => Some(handle_institution_get(state, req)),
        "institution.update" => Some(handle_institution_update(state, req)),
        _ => None,
    }
}
