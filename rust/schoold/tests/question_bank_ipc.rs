mod support;

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use support::FakeGemini;

// PNG signature bytes.
const PNG_B64: &str = "iVBORw0KGgo=";

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

/// Workspace with Science enabled for Class 8 and chapters Light / Sound.
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
    request_ok(
        &mut stdin,
        &mut reader,
        "key",
        "ai.setKey",
        json!({ "apiKey": "test-key" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "sub",
        "academics.subjects.add",
        json!({ "name": "Science" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "en",
        "academics.subjects.toggleClass",
        json!({ "subject": "Science", "className": "Class 8" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "ch",
        "academics.chapters.bulkAdd",
        json!({ "subject": "Science", "className": "Class 8", "text": "Light\nSound" }),
    );
    (child, stdin, reader, workspace)
}

fn extract_params(chapter: &str) -> serde_json::Value {
    json!({
        "className": "Class 8",
        "subject": "Science",
        "chapter": chapter,
        "imageBase64": PNG_B64,
        "mimeType": "image/png",
    })
}

#[test]
fn extraction_rotates_on_truncation_and_files_questions() {
    let server = FakeGemini::start(vec![
        support::truncated_reply("Q1. What is"),
        support::text_reply("Q1. What is light?\nQ2. Define reflection.\n(a) regular\n(b) diffuse\nQ3. State the laws of reflection."),
        support::text_reply("No questions found in image."),
        support::text_reply("1. Sound needs a medium. True or false?\n2) Define pitch."),
    ]);
    let (mut child, mut stdin, mut reader, workspace) = open_school("schoold-qbank-extract", &server);

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "x1",
        "questionBank.extract",
        extract_params("Light"),
    );
    assert_eq!(saved["saved"], true);
    assert_eq!(saved["model"], "gemini-2.5-flash");
    let entry = &saved["entry"];
    assert_eq!(entry["questionCount"], 3);
    assert_eq!(entry["chapterName"], "Light");
    assert_eq!(entry["sourceMimeType"], "image/png");
    let light_id = entry["id"].as_str().expect("entry id").to_string();

    assert_eq!(
        server.models_called(),
        vec!["gemini-3-flash-preview", "gemini-2.5-flash"]
    );
    let body: serde_json::Value =
        serde_json::from_str(&server.requests()[0].body).expect("request body json");
    assert_eq!(body["contents"][0]["parts"][0]["inline_data"]["data"], PNG_B64);
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
    assert!(body["contents"][0]["parts"][1]["text"]
        .as_str()
        .unwrap_or("")
        .contains("chapter \"Light\""));

    let cursors = request_ok(
        &mut stdin,
        &mut reader,
        "cur",
        "ai.cursors",
        json!({ "pool": "ocr" }),
    );
    assert_eq!(cursors["pools"][0]["index"], 1);

    let blank_page = request_ok(
        &mut stdin,
        &mut reader,
        "x2",
        "questionBank.extract",
        extract_params("Light"),
    );
    assert_eq!(blank_page["saved"], false);
    assert!(blank_page["entry"].is_null());

    let photo = workspace.join("page.JPG");
    std::fs::write(&photo, [0xFFu8, 0xD8, 0xFF, 0xE0, 0x00, 0x10]).expect("write photo");
    let from_file = request_ok(
        &mut stdin,
        &mut reader,
        "x3",
        "questionBank.extract",
        json!({
            "className": "Class 8",
            "subject": "Science",
            "chapter": "Sound",
            "imagePath": photo.to_string_lossy(),
        }),
    );
    assert_eq!(from_file["entry"]["questionCount"], 2);
    assert_eq!(from_file["entry"]["sourceMimeType"], "image/jpeg");

    let all = request_ok(&mut stdin, &mut reader, "l1", "questionBank.list", json!({}));
    assert_eq!(all["entries"].as_array().map(Vec::len), Some(2));
    assert_eq!(all["questionCount"], 5);
    assert_eq!(all["entries"][0]["id"], light_id.as_str());

    let sound_only = request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "questionBank.list",
        json!({ "chapter": "Sound" }),
    );
    assert_eq!(sound_only["entries"].as_array().map(Vec::len), Some(1));

    let edited = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "questionBank.update",
        json!({ "id": light_id, "text": "Q1. What is light?" }),
    );
    assert_eq!(edited["entry"]["questionCount"], 1);
    assert!(edited["entry"]["updatedAt"].as_str().is_some());
    let empty = request(
        &mut stdin,
        &mut reader,
        "u2",
        "questionBank.update",
        json!({ "id": light_id, "text": "   " }),
    );
    assert_eq!(empty["error"]["code"], "bad_params");

    request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "questionBank.delete",
        json!({ "id": light_id }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "d2",
        "questionBank.delete",
        json!({ "id": light_id }),
    );
    assert_eq!(gone["error"]["code"], "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn extraction_rejects_bad_targets_and_images_before_calling_out() {
    let server = FakeGemini::start(vec![]);
    let (mut child, mut stdin, mut reader, workspace) = open_school("schoold-qbank-reject", &server);

    let unknown_chapter = request(
        &mut stdin,
        &mut reader,
        "x1",
        "questionBank.extract",
        extract_params("Magnetism"),
    );
    assert_eq!(unknown_chapter["error"]["code"], "not_found");

    let mut wrong_class = extract_params("Light");
    wrong_class["className"] = json!("Class 9");
    let not_enabled = request(&mut stdin, &mut reader, "x2", "questionBank.extract", wrong_class);
    assert_eq!(not_enabled["error"]["code"], "bad_params");

    let mut gif = extract_params("Light");
    gif["mimeType"] = json!("image/gif");
    let unsupported = request(&mut stdin, &mut reader, "x3", "questionBank.extract", gif);
    assert_eq!(unsupported["error"]["code"], "bad_params");

    let mut garbled = extract_params("Light");
    garbled["imageBase64"] = json!("not*base64");
    let bad_b64 = request(&mut stdin, &mut reader, "x4", "questionBank.extract", garbled);
    assert_eq!(bad_b64["error"]["code"], "bad_params");

    let mut no_mime = extract_params("Light");
    no_mime.as_object_mut().expect("params").remove("mimeType");
    let missing_mime = request(&mut stdin, &mut reader, "x5", "questionBank.extract", no_mime);
    assert_eq!(missing_mime["error"]["code"], "bad_params");

    let missing_file = request(
        &mut stdin,
        &mut reader,
        "x6",
        "questionBank.extract",
        json!({
            "className": "Class 8",
            "subject": "Science",
            "chapter": "Light",
            "imagePath": workspace.join("nope.png").to_string_lossy(),
        }),
    );
    assert_eq!(missing_file["error"]["code"], "io_failed");

    let mut data_url = extract_params("Light");
    data_url["imageBase64"] = json!(format!("data:image/png;base64,{}", PNG_B64));
    data_url["apiKey"] = json!("explicit-key");
    // Nothing scripted: the server answers 500, which is not rotatable.
    let server_error = request(&mut stdin, &mut reader, "x7", "questionBank.extract", data_url);
    assert_eq!(server_error["error"]["code"], "ai_failed");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].path.ends_with("key=explicit-key"));
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).expect("body json");
    assert_eq!(body["contents"][0]["parts"][0]["inline_data"]["data"], PNG_B64);

    let listed = request_ok(&mut stdin, &mut reader, "l", "questionBank.list", json!({}));
    assert_eq!(listed["entries"], json!([]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn paper_generation_uses_bank_and_branding() {
    let server = FakeGemini::start(vec![
        support::text_reply("Q1. Why does a spoon look bent in water?"),
        support::text_reply("```markdown\n# Green Valley\n## Section A\n1. Light travels in ...\n```"),
    ]);
    let (mut child, mut stdin, mut reader, workspace) = open_school("schoold-qbank-paper", &server);
    request_ok(
        &mut stdin,
        &mut reader,
        "inst",
        "institution.update",
        json!({ "patch": { "name": "Green Valley", "address": "12 Hill Road" } }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "x",
        "questionBank.extract",
        extract_params("Light"),
    );

    let spec = json!({
        "examName": "Half Yearly",
        "className": "Class 8",
        "subject": "Science",
        "chapters": ["Light"],
        "questionTypes": [
            { "name": "Multiple Choice Questions", "marks": 1, "count": 10 },
            { "name": "Fill in the Blanks", "marks": 1, "count": 0 },
            { "name": "Short Answer Questions", "marks": 3, "count": 4 }
        ],
        "durationHours": 2
    });

    let mut bad_mix = spec.clone();
    bad_mix["difficulty"] = json!([{ "name": "Easy", "percentage": 60 }]);
    let rejected = request(
        &mut stdin,
        &mut reader,
        "p0",
        "questionBank.generatePaper",
        bad_mix,
    );
    assert_eq!(rejected["error"]["code"], "bad_params");

    let mut unknown = spec.clone();
    unknown["chapters"] = json!(["Electricity"]);
    let missing = request(
        &mut stdin,
        &mut reader,
        "p1",
        "questionBank.generatePaper",
        unknown,
    );
    assert_eq!(missing["error"]["code"], "not_found");

    let paper = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "questionBank.generatePaper",
        spec,
    );
    assert_eq!(paper["totalMarks"], 22);
    assert_eq!(paper["totalQuestions"], 14);
    assert_eq!(paper["referenceEntries"], 1);
    assert_eq!(paper["model"], "gemini-3-flash-preview");
    assert_eq!(paper["sections"].as_array().map(Vec::len), Some(2));
    assert_eq!(paper["sections"][1]["letter"], "B");
    assert!(paper["paper"].as_str().unwrap_or("").starts_with("# Green Valley"));
    assert!(!paper["paper"].as_str().unwrap_or("").contains("```"));

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    let body: serde_json::Value = serde_json::from_str(&requests[1].body).expect("body json");
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().expect("prompt");
    assert!(prompt.contains("# Green Valley"));
    assert!(prompt.contains("12 Hill Road"));
    assert!(prompt.contains("Why does a spoon look bent in water?"));
    assert!(prompt.contains("Section B: Short Answer Questions (4 x 3 = 12)"));
    assert_eq!(body["generationConfig"]["topK"], 40);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
