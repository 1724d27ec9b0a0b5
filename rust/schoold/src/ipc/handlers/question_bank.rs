use super::ai::{ai_error, client_for};
use crate::ipc::error::ok;
use crate::ipc::helpers::{self, fail};
use crate::ipc::types::{AppState, Request};
use crate::paper::{self, PaperError, PaperSpec};
use crate::question_bank::{
    self, BankFilter, ExtractOutcome, ExtractRequest, ImageSource, QuestionBankError,
};
use serde_json::{json, Value};
use std::path::PathBuf;

fn bank_error(req: &Request, e: &QuestionBankError) -> Value {
    match e {
        QuestionBankError::Ai(inner) => ai_error(req, inner),
        other => fail(req, other.code(), other),
    }
}

fn image_source(req: &Request) -> Result<ImageSource, Value> {
    if let Some(path) = helpers::opt_str(req, "imagePath") {
        return Ok(ImageSource::Path(PathBuf::from(path)));
    }
    match (
        helpers::opt_str(req, "imageBase64"),
        helpers::opt_str(req, "mimeType"),
    ) {
        (Some(base64), Some(mime_type)) => Ok(ImageSource::Inline { mime_type, base64 }),
        (Some(_), None) => Err(fail(req, "bad_params", "mimeType is required with imageBase64")),
        _ => Err(fail(req, "bad_params", "missing imagePath or imageBase64")),
    }
}

fn handle_extract(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (class_name, subject, chapter) = match (
        helpers::req_str(req, "className"),
        helpers::req_str(req, "subject"),
        helpers::req_str(req, "chapter"),
    ) {
        (Ok(c), Ok(s), Ok(ch)) => (c, s, ch),
        (Err(resp), _, _) | (_, Err(resp), _) | (_, _, Err(resp)) => return resp,
    };
    let image = match image_source(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let extract_req = ExtractRequest {
        class_name,
        subject,
        chapter,
        image,
    };
    let client = match client_for(state, req, conn, &school) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match question_bank::extract(conn, &client, &school, &extract_req) {
        Ok(ExtractOutcome::Saved(entry)) => ok(
            &req.id,
            json!({ "saved": true, "entry": entry, "model": entry.model }),
        ),
        Ok(ExtractOutcome::NoQuestions { model }) => ok(
            &req.id,
            json!({ "saved": false, "entry": null, "model": model }),
        ),
        Err(e) => bank_error(req, &e),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = BankFilter {
        class_name: helpers::opt_str(req, "className"),
        subject: helpers::opt_str(req, "subject"),
        chapter: helpers::opt_str(req, "chapter"),
    };
    match question_bank::list(conn, &school, &filter) {
        Ok(entries) => {
            let total: usize = entries.iter().map(|e| e.question_count).sum();
            ok(&req.id, json!({ "entries": entries, "questionCount": total }))
        }
        Err(e) => fail(req, "db_query_failed", e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match helpers::req_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let text = match helpers::req_raw_str(req, "text") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match question_bank::update_text(conn, &school, &id, text) {
        Ok(entry) => ok(&req.id, json!({ "entry": entry })),
        Err(e) => bank_error(req, &e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match helpers::req_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match question_bank::delete(conn, &school, &id) {
        Ok(()) => ok(&req.id, json!({ "deleted": id })),
        Err(e) => bank_error(req, &e),
    }
}

fn handle_generate_paper(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let spec: PaperSpec = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return fail(req, "bad_params", format!("invalid paper spec: {}", e)),
    };
    if let Err(e) = spec.validate() {
        return fail(req, e.code(), e);
    }
    let client = match client_for(state, req, conn, &school) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match paper::generate(conn, &client, &school, &spec) {
        Ok(generated) => ok(&req.id, json!(generated)),
        Err(PaperError::Ai(e)) => ai_error(req, &e),
        Err(e) => fail(req, e.code(), e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "questionBank.extract" => Some(handle_extract(state, req)),
        "questionBank.list" => Some(handle_list(state, req)),
        "questionBank.update" => Some(handle_update(state, req)),
        "questionBank.delete" => Some(handle_delete(state, req)),
        "questionBank.generatePaper" => Some(handle_generate_paper(state, req)),
        _ => None,
    }
}
