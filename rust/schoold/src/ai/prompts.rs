use serde_json::Value;

pub const NO_QUESTIONS_MARKER: &str = "No questions found in image.";

fn render_context(context: &Value) -> String {
    match context {
        Value::String(s) => s.clone(),
        Value::Null => "(none)".to_string(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

pub fn analysis_prompt(query: &str, context: &Value, school_name: Option<&str>) -> String {
    let school = school_name
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("the school");
    format!(
        "You assist the administration office of {school}. You answer questions about \
students, fee collections, expenses, notices, attendance and staff using only the data \
provided below.

The question was dictated and may contain speech-recognition mistakes or Hinglish; \
work out the intended request before answering.

Question: \"{query}\"

Data:
{data}

Answer format:
- Give the final report only, with no reasoning steps or intermediate arithmetic.
- Financial summaries end with total income, total expense and net balance.
- Lists of dues include only students with an outstanding amount above zero.
- Use bold headings and Markdown tables with leading and trailing pipes.",
        school = school,
        query = query.trim(),
        data = render_context(context),
    )
}

pub fn routine_prompt(task: &str, context: &Value) -> String {
    format!(
        "Context Data:\n{}\n\nTask:\n{}",
        render_context(context),
        task.trim()
    )
}

pub const TRANSCRIBE_PROMPT: &str = "Transcribe the speech in this recording as Hinglish: \
Hindi words written in Latin letters only. Drop stutters and repeated words, fix obvious \
phonetic slips, and when several languages are mixed write one clean Hinglish sentence \
carrying the meaning. Reply with the transcription and nothing else.";

/// Instructions for pulling questions out of a photographed page.
pub fn ocr_prompt(class_name: &str, subject: &str, chapter: &str) -> String {
    format!(
        "The page belongs to {class_name}, {subject}, chapter \"{chapter}\".
List every question on the page, in order, one per line, numbered Q1., Q2., ...
Keep sub-parts (a), (b), (c) under their question exactly as printed.
Copy marks shown on the page in square brackets, e.g. [2 marks].
Write formulas in plain text (x^2, sqrt(9)). Hindi and Urdu stay in their own script.
Do not answer or explain anything, and continue to the last question on the page.
If the page has no questions, reply exactly: {marker}",
        class_name = class_name,
        subject = subject,
        chapter = chapter,
        marker = NO_QUESTIONS_MARKER,
    )
}
