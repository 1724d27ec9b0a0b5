use crate::classes;
use crate::inventory;
use crate::ipc::error::ok;
use crate::ipc::helpers::{self, fail};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn handle_inventory_list(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let fy = helpers::opt_str(req, "financialYear");
    match inventory::list(conn, &school, fy.as_deref()) {
        Ok(items) => ok(&req.id, json!({ "items": items })),
        Err(e) => fail(req, "db_query_failed", e),
    }
}

fn handle_inventory_add(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match helpers::req_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let price = match helpers::req_f64(req, "price") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let fy = helpers::opt_str(req, "financialYear");
    match inventory::add(conn, &school, &name, price, fy.as_deref()) {
        Ok(item) => ok(&req.id, json!({ "item": item })),
        Err(e) => fail(req, e.code(), e),
    }
}

fn handle_inventory_update_price(state: &mut AppState, req: &Request) -> Value {
    let conn = match helpers::require_db(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (id, price) = match (helpers::req_str(req, "id"), helpers::req_f64(req, "price")) {
        (Ok(id), Ok(p)) => (id, p),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    match inventory::update_price(conn, &id, price) {
        Ok(item) => ok(&req.id, json!({ "item": item })),
        Err(e) => fail(req, e.code(), e),
    }
}

fn handle_inventory_set_class_price(state: &mut AppState, req: &Request) -> Value {
    let conn = match helpers::require_db(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match helpers::req_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (class_name, price) = match (
        helpers::req_str(req, "className"),
        helpers::req_f64(req, "price"),
    ) {
        (Ok(c), Ok(p)) => (c, p),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    match inventory::set_class_price(conn, &id, &class_name, price) {
        Ok(item) => ok(&req.id, json!({ "item": item })),
        Err(e) => fail(req, e.code(), e),
    }
}

fn handle_inventory_delete(state: &mut AppState, req: &Request) -> Value {
    let conn = match helpers::require_db(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match helpers::req_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match inventory::delete(conn, &id) {
        Ok(()) => ok(&req.id, json!({ "deleted": id })),
        Err(e) => fail(req, e.code(), e),
    }
}

fn handle_inventory_resolve_price(state: &mut AppState, req: &Request) -> Value {
    let conn = match helpers::require_db(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match helpers::req_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_name = helpers::opt_str(req, "className").map(|c| classes::normalize_class_name(&c));
    let resolved = inventory::get(conn, &id)
        .and_then(|item| item.resolve_price(class_name.as_deref()).map(|p| (item, p)));
    match resolved {
        Ok((item, price)) => ok(
            &req.id,
            json!({
                "id": item.id,
                "name": item.name,
                "pricingType": item.pricing_type,
                "className": class_name,
                "price": price,
            }),
        ),
        Err(e) => fail(req, e.code(), e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "inventory.list" => Some(handle_inventory_list(state, req)),
        "inventory.add" => Some(handle_inventory_add(state, req)),
        "inventory.updatePrice" => Some(handle_inventory_update_price(state, req)),
        "inventory.setClassPrice" => Some(handle_inventory_set_class_price(state, req)),
        "inventory.delete" => Some(handle_inventory_delete(state, req)),
        "inventory.resolvePrice" => Some(handle_inventory_resolve_price(state, req)),
        _ => None,
    }
}
