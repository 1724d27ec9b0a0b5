//! Scripted stand-in for the Gemini HTTP endpoint.
#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: String,
}

pub struct FakeGemini {
    pub base_url: String,
    recorded: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeGemini {
    /// Serves the scripted `(status, body)` replies in order; anything past
    /// the script gets a 500.
    pub fn start(script: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake gemini");
        let addr = listener.local_addr().expect("local addr");
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&recorded);
        thread::spawn(move || {
            let mut replies = script.into_iter();
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let reply = replies
                    .next()
                    .unwrap_or((500, r#"{"error":{"code":500,"message":"unscripted"}}"#.to_string()));
                serve_one(stream, reply, &log);
            }
        });
        Self {
            base_url: format!("http://{}", addr),
            recorded,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.recorded.lock().expect("recorded lock").clone()
    }

    /// Model names in request order, parsed from the URL path.
    pub fn models_called(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| {
                let rest = r.path.strip_prefix("/v1beta/models/")?;
                let model = rest.split(':').next()?;
                Some(model.to_string())
            })
            .collect()
    }
}

fn serve_one(stream: TcpStream, (status, body): (u16, String), log: &Arc<Mutex<Vec<Recorded>>>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut buf = vec![0u8; content_length];
    let _ = reader.read_exact(&mut buf);
    log.lock().expect("recorded lock").push(Recorded {
        method,
        path,
        body: String::from_utf8_lossy(&buf).to_string(),
    });

    let reason = if status < 400 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let mut stream = stream;
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

pub fn text_reply(text: &str) -> (u16, String) {
    (
        200,
        serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }]
        })
        .to_string(),
    )
}

pub fn truncated_reply(text: &str) -> (u16, String) {
    (
        200,
        serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }] },
                "finishReason": "MAX_TOKENS"
            }]
        })
        .to_string(),
    )
}

pub fn quota_reply() -> (u16, String) {
    (
        429,
        r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED"}}"#
            .to_string(),
    )
}

pub fn not_found_reply(model: &str) -> (u16, String) {
    (
        404,
        serde_json::json!({
            "error": {
                "code": 404,
                "message": format!("models/{} is not found for API version v1beta", model),
                "status": "NOT_FOUND"
            }
        })
        .to_string(),
    )
}

pub fn bad_key_reply() -> (u16, String) {
    (
        400,
        r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#
            .to_string(),
    )
}
