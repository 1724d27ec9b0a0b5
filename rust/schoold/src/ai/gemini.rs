//! Gemini `generateContent` wire types and a blocking HTTP client.

use super::rotation::{ContentGenerator, Generation};
use super::{classify_error, AiError};
use crate::config::AiConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InlineData {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl GenerateRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part::Text {
                    text: prompt.into(),
                }],
            }],
            generation_config: None,
        }
    }

    /// Media first, instructions second.
    pub fn inline(mime_type: &str, base64_data: String, prompt: impl Into<String>) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: mime_type.to_string(),
                            data: base64_data,
                        },
                    },
                    Part::Text {
                        text: prompt.into(),
                    },
                ],
            }],
            generation_config: None,
        }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.generation_config = Some(config);
        self
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Turns an HTTP status + body into text or a classified error. The error
/// object in the body wins over the status code.
pub fn parse_generate_response(model: &str, status: u16, body: &str) -> Result<Generation, AiError> {
    let parsed: GenerateResponse = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) if (200..300).contains(&status) => {
            return Err(AiError::Api {
                model: model.to_string(),
                code: Some(i64::from(status)),
                message: format!("invalid JSON response: {}", snippet(body)),
            })
        }
        Err(_) => return Err(classify_error(model, Some(i64::from(status)), &snippet(body))),
    };

    if let Some(err) = parsed.error {
        let code = err.code.or(Some(i64::from(status)));
        let message = if err.message.is_empty() {
            "unknown AI error".to_string()
        } else {
            err.message
        };
        return Err(classify_error(model, code, &message));
    }
    if !(200..300).contains(&status) {
        return Err(classify_error(model, Some(i64::from(status)), &snippet(body)));
    }

    let first = parsed.candidates.into_iter().next();
    let finish_reason = first.as_ref().and_then(|c| c.finish_reason.clone());
    let text = first
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(AiError::EmptyResponse {
            model: model.to_string(),
        });
    }
    Ok(Generation {
        text,
        finish_reason,
    })
}

pub struct GeminiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &AiConfig, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let mut builder = reqwest::blocking::Client::builder().timeout(config.timeout);
        if config.is_loopback() {
            builder = builder.no_proxy();
        }
        Ok(Self {
            http: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }

    /// Models that support `generateContent`, without the `models/` prefix.
    pub fn list_models(&self) -> Result<Vec<String>, AiError> {
        let url = format!("{}/v1beta/models?key={}", self.base_url, self.api_key);
        let resp = self
            .http
            .get(url)
            .send()
            .map_err(|e| AiError::Transport {
                model: "models.list".into(),
                message: e.without_url().to_string(),
            })?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(|e| AiError::Transport {
            model: "models.list".into(),
            message: e.without_url().to_string(),
        })?;
        let list: ModelList = serde_json::from_str(&body).map_err(|_| AiError::Api {
            model: "models.list".into(),
            code: Some(i64::from(status)),
            message: format!("invalid JSON response: {}", snippet(&body)),
        })?;
        if let Some(err) = list.error {
            return Err(AiError::Api {
                model: "models.list".into(),
                code: err.code,
                message: err.message,
            });
        }
        Ok(list
            .models
            .into_iter()
            .filter(|m| m.supported_generation_methods.iter().any(|g| g == "generateContent"))
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }
}

impl ContentGenerator for GeminiClient {
    fn generate(&self, model: &str, request: &GenerateRequest) -> Result<Generation, AiError> {
        let resp = self
            .http
            .post(self.generate_url(model))
            .json(request)
            .send()
            .map_err(|e| AiError::Transport {
                model: model.to_string(),
                message: e.without_url().to_string(),
            })?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(|e| AiError::Transport {
            model: model.to_string(),
            message: e.without_url().to_string(),
        })?;
        parse_generate_response(model, status, &body)
    }
}
