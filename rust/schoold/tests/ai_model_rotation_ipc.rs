mod support;

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use support::FakeGemini;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar(base_url: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env("SCHOOLD_GEMINI_BASE_URL", base_url)
        .env("SCHOOLD_HTTP_TIMEOUT_SECS", "10")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(value["ok"], true, "{} failed: {}", method, value);
    value["result"].clone()
}

fn open_school(
    prefix: &str,
    server: &FakeGemini,
) -> (Child, ChildStdin, BufReader<ChildStdout>, PathBuf) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar(&server.base_url);
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "sc",
        "school.select",
        json!({ "schoolId": "s1" }),
    );
    (child, stdin, reader, workspace)
}

fn cursor(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    pool: &str,
) -> serde_json::Value {
    let r = request_ok(stdin, reader, "cur", "ai.cursors", json!({ "pool": pool }));
    r["pools"][0].clone()
}

#[test]
fn quota_and_missing_model_rotate_and_cursor_sticks() {
    let server = FakeGemini::start(vec![
        support::quota_reply(),
        support::not_found_reply("gemini-3.1-pro-preview"),
        support::text_reply("Net balance is 4,500."),
        support::text_reply("Second answer."),
    ]);
    let (mut child, mut stdin, mut reader, workspace) = open_school("schoold-ai-rotate", &server);

    let status = request_ok(&mut stdin, &mut reader, "k0", "ai.keyStatus", json!({}));
    assert_eq!(status["configured"], false);
    request_ok(
        &mut stdin,
        &mut reader,
        "k1",
        "ai.setKey",
        json!({ "apiKey": "test-key" }),
    );
    let status = request_ok(&mut stdin, &mut reader, "k2", "ai.keyStatus", json!({}));
    assert_eq!(status["configured"], true);
    request_ok(
        &mut stdin,
        &mut reader,
        "i",
        "institution.update",
        json!({ "patch": { "name": "Green Valley" } }),
    );

    let answer = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "ai.analyze",
        json!({ "prompt": "What is the balance?", "context": { "income": 5000, "expense": 500 } }),
    );
    assert_eq!(answer["text"], "Net balance is 4,500.");
    assert_eq!(answer["model"], "gemini-2.5-flash");
    assert_eq!(answer["attempts"], 3);

    let general = cursor(&mut stdin, &mut reader, "general");
    assert_eq!(general["index"], 2);
    assert_eq!(general["current"], "gemini-2.5-flash");

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "a2",
        "ai.analyze",
        json!({ "prompt": "Anything else?" }),
    );
    assert_eq!(again["model"], "gemini-2.5-flash");
    assert_eq!(again["attempts"], 1);

    assert_eq!(
        server.models_called(),
        vec![
            "gemini-3-flash-preview",
            "gemini-3.1-pro-preview",
            "gemini-2.5-flash",
            "gemini-2.5-flash",
        ]
    );
    let requests = server.requests();
    assert!(requests.iter().all(|r| r.method == "POST"));
    assert!(requests[0].path.ends_with(":generateContent?key=test-key"));
    assert!(requests[0].body.contains("Green Valley"));
    assert!(requests[0].body.contains("What is the balance?"));

    // Other pools keep their own cursor.
    let ocr = cursor(&mut stdin, &mut reader, "ocr");
    assert_eq!(ocr["index"], 0);

    let unknown = request(
        &mut stdin,
        &mut reader,
        "bad-pool",
        "ai.cursors",
        json!({ "pool": "vision" }),
    );
    assert_eq!(unknown["error"]["code"], "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn other_api_errors_stop_without_moving_cursor() {
    let server = FakeGemini::start(vec![support::bad_key_reply()]);
    let (mut child, mut stdin, mut reader, workspace) = open_school("schoold-ai-badkey", &server);

    let missing = request(
        &mut stdin,
        &mut reader,
        "m",
        "ai.analyze",
        json!({ "prompt": "hello" }),
    );
    assert_eq!(missing["error"]["code"], "ai_key_missing");
    assert!(server.requests().is_empty());

    let failed = request(
        &mut stdin,
        &mut reader,
        "a1",
        "ai.analyze",
        json!({ "prompt": "hello", "apiKey": "wrong-key" }),
    );
    assert_eq!(failed["ok"], false);
    assert_eq!(failed["error"]["code"], "ai_failed");
    assert_eq!(failed["error"]["details"]["status"], 400);
    assert_eq!(failed["error"]["details"]["model"], "gemini-3-flash-preview");
    assert!(!failed["error"]["message"].as_str().unwrap_or("").contains("wrong-key"));

    assert_eq!(server.models_called(), vec!["gemini-3-flash-preview"]);
    assert!(server.requests()[0].path.ends_with("key=wrong-key"));
    assert_eq!(cursor(&mut stdin, &mut reader, "general")["index"], 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn every_model_on_quota_reports_exhaustion() {
    let server = FakeGemini::start(vec![
        support::quota_reply(),
        support::quota_reply(),
        support::quota_reply(),
        support::quota_reply(),
    ]);
    let (mut child, mut stdin, mut reader, workspace) = open_school("schoold-ai-exhausted", &server);
    request_ok(
        &mut stdin,
        &mut reader,
        "k",
        "ai.setKey",
        json!({ "apiKey": "test-key" }),
    );

    let exhausted = request(
        &mut stdin,
        &mut reader,
        "r1",
        "ai.routine",
        json!({ "prompt": "Build the timetable", "context": "Teachers: A, B" }),
    );
    assert_eq!(exhausted["error"]["code"], "ai_quota_exhausted");
    assert_eq!(exhausted["error"]["details"]["attempts"], 4);
    assert_eq!(
        exhausted["error"]["details"]["failures"].as_array().map(Vec::len),
        Some(4)
    );
    assert_eq!(
        server.models_called(),
        vec![
            "gemini-3-pro-preview",
            "gemini-3.1-pro-preview",
            "gemini-3-flash-preview",
            "gemini-2.5-pro",
        ]
    );
    let body: serde_json::Value =
        serde_json::from_str(&server.requests()[0].body).expect("request body json");
    assert_eq!(body["generationConfig"]["temperature"], 0.0);
    assert_eq!(body["generationConfig"]["topK"], 1);
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().expect("prompt text");
    assert!(prompt.starts_with("Context Data:\nTeachers: A, B"));

    // A full lap brings the cursor back to the first model.
    assert_eq!(cursor(&mut stdin, &mut reader, "routine")["index"], 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn truncated_answers_are_kept_outside_ocr_and_models_listed() {
    let server = FakeGemini::start(vec![
        support::truncated_reply("Partial report"),
        support::text_reply("namaste sab log"),
        (
            200,
            json!({
                "models": [
                    { "name": "models/gemini-2.5-flash", "supportedGenerationMethods": ["generateContent", "countTokens"] },
                    { "name": "models/text-embedding-004", "supportedGenerationMethods": ["embedContent"] }
                ]
            })
            .to_string(),
        ),
    ]);
    let (mut child, mut stdin, mut reader, workspace) = open_school("schoold-ai-truncated", &server);
    request_ok(
        &mut stdin,
        &mut reader,
        "k",
        "ai.setKey",
        json!({ "apiKey": "test-key" }),
    );

    let partial = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "ai.analyze",
        json!({ "prompt": "Long report please", "schoolName": "Override Academy" }),
    );
    assert_eq!(partial["text"], "Partial report");
    assert_eq!(partial["attempts"], 1);
    assert!(server.requests()[0].body.contains("Override Academy"));

    let bad_audio = request(
        &mut stdin,
        &mut reader,
        "t0",
        "ai.transcribe",
        json!({ "audioBase64": "***" }),
    );
    assert_eq!(bad_audio["error"]["code"], "bad_params");
    let not_audio = request(
        &mut stdin,
        &mut reader,
        "t1",
        "ai.transcribe",
        json!({ "audioBase64": "AAEC", "mimeType": "image/png" }),
    );
    assert_eq!(not_audio["error"]["code"], "bad_params");

    let spoken = request_ok(
        &mut stdin,
        &mut reader,
        "t2",
        "ai.transcribe",
        json!({ "audioBase64": "AAECAwQ=" }),
    );
    assert_eq!(spoken["text"], "namaste sab log");
    let body: serde_json::Value =
        serde_json::from_str(&server.requests()[1].body).expect("request body json");
    assert_eq!(body["contents"][0]["parts"][0]["inline_data"]["mime_type"], "audio/webm");
    assert_eq!(body["contents"][0]["parts"][0]["inline_data"]["data"], "AAECAwQ=");

    let models = request_ok(&mut stdin, &mut reader, "lm", "ai.listModels", json!({}));
    assert_eq!(models["models"], json!(["gemini-2.5-flash"]));
    let list_req = &server.requests()[2];
    assert_eq!(list_req.method, "GET");
    assert_eq!(list_req.path, "/v1beta/models?key=test-key");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
