use super::error::err;
use super::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::Value;

/// Error response for a domain failure that already knows its code.
pub fn fail(req: &Request, code: &str, e: impl std::fmt::Display) -> Value {
    err(&req.id, code, e.to_string(), None)
}

pub fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn req_str(req: &Request, key: &str) -> Result<String, Value> {
    opt_str(req, key).ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Raw string without trimming; empty strings are kept.
pub fn req_raw_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, Value> {
    req.params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn req_f64(req: &Request, key: &str) -> Result<f64, Value> {
    req.params
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be a number", key), None))
}

pub fn req_bool(req: &Request, key: &str) -> Result<bool, Value> {
    req.params
        .get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be boolean", key), None))
}

pub fn opt_bool(req: &Request, key: &str) -> Option<bool> {
    req.params.get(key).and_then(Value::as_bool)
}

pub fn require_db<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// School ids become part of document ids, so whitespace and `/` are refused.
pub fn check_school_id(req: &Request, school_id: String) -> Result<String, Value> {
    if school_id.contains(|c: char| c.is_whitespace() || c == '/') {
        return Err(err(
            &req.id,
            "bad_params",
            "schoolId must not contain spaces or '/'",
            None,
        ));
    }
    Ok(school_id)
}

/// `params.schoolId` wins over the selected school.
pub fn school_id(state: &AppState, req: &Request) -> Result<String, Value> {
    match opt_str(req, "schoolId") {
        Some(id) => check_school_id(req, id),
        None => state
            .school_id
            .clone()
            .ok_or_else(|| err(&req.id, "no_school", "select a school first", None)),
    }
}

pub fn require_school<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<(&'a Connection, String), Value> {
    let conn = require_db(state, req)?;
    let school = school_id(state, req)?;
    Ok((conn, school))
}
