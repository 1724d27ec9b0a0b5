use crate::academics::{self, AcademicStructure, AcademicsError, Subject};
use crate::classes;
use crate::ipc::error::ok;
use crate::ipc::helpers::{self, fail};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

/// Loads the school's structure, applies `f` and writes the result back.
fn mutate<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&mut AcademicStructure) -> Result<Value, AcademicsError>,
{
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (mut structure, _) = match academics::load(conn, &school) {
        Ok(v) => v,
        Err(e) => return fail(req, e.code(), e),
    };
    let result = match f(&mut structure) {
        Ok(v) => v,
        Err(e) => return fail(req, e.code(), e),
    };
    if let Err(e) = academics::save(conn, &school, &structure) {
        return fail(req, "db_update_failed", e);
    }
    ok(&req.id, result)
}

fn strings(req: &Request, keys: &[&str]) -> Result<Vec<String>, Value> {
    keys.iter().map(|k| helpers::req_str(req, k)).collect()
}

fn handle_academics_get(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (structure, migrated) = match academics::load(conn, &school) {
        Ok(v) => v,
        Err(e) => return fail(req, e.code(), e),
    };
    if migrated > 0 {
        if let Err(e) = academics::save(conn, &school, &structure) {
            return fail(req, "db_update_failed", e);
        }
        log::info!("migrated {} legacy subjects for school {}", migrated, school);
    }
    let subjects: Vec<&Subject> = match helpers::opt_str(req, "query") {
        Some(q) => structure.search(&q),
        None => structure.subjects.iter().collect(),
    };
    let class_names = classes::sort_class_names(
        structure
            .subjects
            .iter()
            .flat_map(|s| s.enabled_for.iter().cloned())
            .collect(),
    );
    ok(
        &req.id,
        json!({
            "subjects": subjects,
            "classes": class_names,
            "migrated": migrated,
            "skipped": structure.unreadable.len(),
        }),
    )
}

fn handle_academics_save(state: &mut AppState, req: &Request) -> Value {
    let Some(raw) = req.params.get("subjects").and_then(Value::as_array) else {
        return helpers::fail(req, "bad_params", "subjects must be an array");
    };
    let mut subjects = Vec::with_capacity(raw.len());
    for item in raw {
        match academics::migrate_subject(item) {
            Ok((s, _)) => subjects.push(s),
            Err(e) => return fail(req, "bad_params", e),
        }
    }
    // Replaces the stored structure without reading it, so a damaged
    // document can always be overwritten.
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let structure = AcademicStructure {
        subjects,
        unreadable: Vec::new(),
    };
    if let Err(e) = academics::save(conn, &school, &structure) {
        return fail(req, "db_update_failed", e);
    }
    ok(&req.id, json!({ "saved": structure.subjects.len() }))
}

fn handle_subjects_add(state: &mut AppState, req: &Request) -> Value {
    let name = match helpers::req_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    mutate(state, req, |s| {
        s.add_subject(&name)?;
        Ok(json!({ "name": name }))
    })
}

fn handle_subjects_rename(state: &mut AppState, req: &Request) -> Value {
    let [old, new]: [String; 2] = match strings(req, &["oldName", "newName"]) {
        Ok(v) => match v.try_into() {
            Ok(arr) => arr,
            Err(_) => return fail(req, "bad_params", "oldName and newName are required"),
        },
        Err(resp) => return resp,
    };
    mutate(state, req, |s| {
        s.rename_subject(&old, &new)?;
        Ok(json!({ "name": new }))
    })
}

fn handle_subjects_remove(state: &mut AppState, req: &Request) -> Value {
    let name = match helpers::req_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    mutate(state, req, |s| {
        s.remove_subject(&name)?;
        Ok(json!({ "removed": name }))
    })
}

fn handle_subjects_toggle_class(state: &mut AppState, req: &Request) -> Value {
    let v = match strings(req, &["subject", "className"]) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    mutate(state, req, |s| {
        let enabled = s.toggle_subject_for_class(&v[0], &v[1])?;
        Ok(json!({ "subject": v[0], "className": v[1], "enabled": enabled }))
    })
}

fn handle_subjects_for_class(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_name = match helpers::req_str(req, "className") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (structure, _) = match academics::load(conn, &school) {
        Ok(v) => v,
        Err(e) => return fail(req, e.code(), e),
    };
    let subjects: Vec<Value> = structure
        .subjects_for_class(&class_name)
        .into_iter()
        .map(|s| json!({ "name": s.name, "chapters": s.chapters_for(&class_name) }))
        .collect();
    ok(&req.id, json!({ "className": class_name, "subjects": subjects }))
}

fn handle_chapters_add(state: &mut AppState, req: &Request) -> Value {
    let v = match strings(req, &["subject", "className", "chapter"]) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    mutate(state, req, |s| {
        let added = s.add_chapter(&v[0], &v[1], &v[2])?;
        Ok(json!({ "added": added }))
    })
}

fn handle_chapters_bulk_add(state: &mut AppState, req: &Request) -> Value {
    let v = match strings(req, &["subject", "className"]) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let text = match helpers::req_raw_str(req, "text") {
        Ok(t) => t.to_string(),
        Err(resp) => return resp,
    };
    mutate(state, req, |s| {
        let (parsed, added) = s.bulk_add_chapters(&v[0], &v[1], &text)?;
        Ok(json!({ "parsed": parsed, "added": added, "skipped": parsed - added }))
    })
}

fn handle_chapters_remove(state: &mut AppState, req: &Request) -> Value {
    let v = match strings(req, &["subject", "className", "chapter"]) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    mutate(state, req, |s| {
        s.remove_chapter(&v[0], &v[1], &v[2])?;
        Ok(json!({ "removed": v[2] }))
    })
}

fn handle_academics_seed(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let active = match classes::active_class_names(conn, &school) {
        Ok(v) => v,
        Err(e) => return fail(req, "db_query_failed", e),
    };
    mutate(state, req, |s| {
        let created = s.seed(&active)?;
        Ok(json!({
            "created": created,
            "classes": active.len(),
            "subjects": s.subjects.len(),
        }))
    })
}

fn handle_academics_class_view(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let settings = match classes::load_all(conn, &school) {
        Ok(v) => v,
        Err(e) => return fail(req, "db_query_failed", e),
    };
    match academics::load(conn, &school) {
        Ok((structure, _)) => ok(
            &req.id,
            json!({ "classes": structure.class_view(&settings) }),
        ),
        Err(e) => fail(req, e.code(), e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "academics.get" => Some(handle_academics_get(state, req)),
        "academics.save" => Some(handle_academics_save(state, req)),
        "academics.subjects.add" => Some(handle_subjects_add(state, req)),
        "academics.subjects.rename" => Some(handle_subjects_rename(state, req)),
        "academics.subjects.remove" => Some(handle_subjects_remove(state, req)),
        "academics.subjects.toggleClass" => Some(handle_subjects_toggle_class(state, req)),
        "academics.subjects.forClass" => Some(handle_subjects_for_class(state, req)),
        "academics.chapters.add" => Some(handle_chapters_add(state, req)),
        "academics.chapters.bulkAdd" => Some(handle_chapters_bulk_add(state, req)),
        "academics.chapters.remove" => Some(handle_chapters_remove(state, req)),
        "academics.seed" => Some(handle_academics_seed(state, req)),
        "academics.classView" => Some(handle_academics_class_view(state, req)),
        _ => None,
    }
}
