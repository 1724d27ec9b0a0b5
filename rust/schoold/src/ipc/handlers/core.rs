use crate::db;
use crate::institution;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "schoolId": state.school_id,
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = helpers::opt_str(req, "path").map(PathBuf::from) else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            log::info!("workspace opened at {}", path.to_string_lossy());
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_school_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let school_id = match helpers::req_str(req, "schoolId")
        .and_then(|id| helpers::check_school_id(req, id))
    {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let display_name = match state.db.as_ref() {
        Some(conn) => match institution::get(conn, &school_id) {
            Ok(info) => Some(info.display_name().to_string()),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        None => None,
    };
    state.school_id = Some(school_id.clone());
    ok(
        &req.id,
        json!({ "schoolId": school_id, "displayName": display_name }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "school.select" => Some(handle_school_select(state, req)),
        _ => None,
    }
}
