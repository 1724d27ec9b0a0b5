use crate::ai::gemini::{GeminiClient, GenerateRequest, GenerationConfig};
use crate::ai::rotation::{self, ModelPool, Outcome};
use crate::ai::{self, prompts, AiError};
use crate::institution;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, fail};
use crate::ipc::types::{AppState, Request};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::Connection;
use serde_json::{json, Value};

pub fn ai_error(req: &Request, e: &AiError) -> Value {
    let details = match e {
        AiError::Exhausted { attempts, failures } => {
            Some(json!({ "attempts": attempts, "failures": failures }))
        }
        AiError::Api { model, code, .. } => Some(json!({ "model": model, "status": code })),
        _ => None,
    };
    err(&req.id, e.code(), e.to_string(), details)
}

/// Client for the school's key, or the `apiKey` passed with the request.
pub fn client_for(
    state: &AppState,
    req: &Request,
    conn: &Connection,
    school: &str,
) -> Result<GeminiClient, Value> {
    let explicit = helpers::opt_str(req, "apiKey");
    let key = ai::resolve_api_key(conn, school, explicit.as_deref())
        .map_err(|e| ai_error(req, &e))?;
    GeminiClient::new(&state.config.ai, key).map_err(|e| fail(req, "ai_failed", e))
}

fn outcome_json(o: &Outcome) -> Value {
    json!({ "text": o.text, "model": o.model, "attempts": o.attempts })
}

fn handle_ai_key_status(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ai::resolve_api_key(conn, &school, None) {
        Ok(_) => ok(&req.id, json!({ "configured": true })),
        Err(AiError::MissingApiKey) => ok(&req.id, json!({ "configured": false })),
        Err(e) => ai_error(req, &e),
    }
}

fn handle_ai_set_key(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let key = match helpers::req_str(req, "apiKey") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ai::store_api_key(conn, &school, &key) {
        Ok(()) => {
            log::info!("Gemini API key updated for school {}", school);
            ok(&req.id, json!({ "configured": true }))
        }
        Err(e) => fail(req, "db_update_failed", e),
    }
}

fn handle_ai_cursors(state: &mut AppState, req: &Request) -> Value {
    let conn = match helpers::require_db(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let selected: Vec<ModelPool> = match helpers::opt_str(req, "pool") {
        Some(name) => match ModelPool::parse(&name) {
            Some(p) => vec![p],
            None => return fail(req, "bad_params", format!("unknown model pool: {}", name)),
        },
        None => ModelPool::ALL.to_vec(),
    };
    let mut pools = Vec::new();
    for pool in selected {
        let index = match rotation::current_index(conn, pool) {
            Ok(i) => i,
            Err(e) => return ai_error(req, &e),
        };
        pools.push(json!({
            "pool": pool.name(),
            "models": pool.models(),
            "index": index,
            "current": pool.models()[index],
        }));
    }
    ok(&req.id, json!({ "pools": pools }))
}

fn handle_ai_list_models(state: &mut AppState, req: &Request) -> Value {
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let client = match client_for(state, req, conn, &school) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match client.list_models() {
        Ok(models) => ok(&req.id, json!({ "models": models })),
        Err(e) => ai_error(req, &e),
    }
}

fn run_pool<F>(state: &AppState, req: &Request, pool: ModelPool, build: F) -> Value
where
    F: FnOnce(&Connection, &str) -> Result<GenerateRequest, Value>,
{
    let (conn, school) = match helpers::require_school(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let request = match build(conn, &school) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let client = match client_for(state, req, conn, &school) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match rotation::run(&client, conn, pool, &request) {
        Ok(outcome) => ok(&req.id, outcome_json(&outcome)),
        Err(e) => ai_error(req, &e),
    }
}

fn handle_ai_analyze(state: &mut AppState, req: &Request) -> Value {
    let prompt = match helpers::req_str(req, "prompt") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let context = req.params.get("context").cloned().unwrap_or(Value::Null);
    run_pool(state, req, ModelPool::General, |conn, school| {
        let name = match helpers::opt_str(req, "schoolName") {
            Some(n) => n,
            None => institution::get(conn, school)
                .map(|i| i.display_name().to_string())
                .map_err(|e| fail(req, "db_query_failed", e))?,
        };
        Ok(GenerateRequest::text(prompts::analysis_prompt(
            &prompt,
            &context,
            Some(&name),
        )))
    })
}

fn handle_ai_routine(state: &mut AppState, req: &Request) -> Value {
    let prompt = match helpers::req_str(req, "prompt") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let context = req.params.get("context").cloned().unwrap_or(Value::Null);
    run_pool(state, req, ModelPool::Routine, |_, _| {
        Ok(
            GenerateRequest::text(prompts::routine_prompt(&prompt, &context)).with_config(
                GenerationConfig {
                    temperature: Some(0.0),
                    top_k: Some(1),
                    top_p: Some(1.0),
                    max_output_tokens: None,
                },
            ),
        )
    })
}

fn handle_ai_transcribe(state: &mut AppState, req: &Request) -> Value {
    let audio = match helpers::req_str(req, "audioBase64") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mime = helpers::opt_str(req, "mimeType").unwrap_or_else(|| "audio/webm".to_string());
    if !mime.starts_with("audio/") {
        return fail(req, "bad_params", "mimeType must be an audio type");
    }
    match STANDARD.decode(audio.as_bytes()) {
        Ok(bytes) if !bytes.is_empty() => {}
        _ => return fail(req, "bad_params", "audioBase64 is not valid base64 audio"),
    }
    run_pool(state, req, ModelPool::General, |_, _| {
        Ok(GenerateRequest::inline(&mime, audio, prompts::TRANSCRIBE_PROMPT))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "ai.keyStatus" => Some(handle_ai_key_status(state, req)),
        "ai.setKey" => Some(handle_ai_set_key(state, req)),
        "ai.cursors" => Some(handle_ai_cursors(state, req)),
        "ai.listModels" => Some(handle_ai_list_models(state, req)),
        "ai.analyze" => Some(handle_ai_analyze(state, req)),
        "ai.routine" => Some(handle_ai_routine(state, req)),
        "ai.transcribe" => Some(handle_ai_transcribe(state, req)),
        _ => None,
    }
}
