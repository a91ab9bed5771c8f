use std::time::Duration;

use flora_contracts::errors::GenerationError;
use flora_contracts::media::Image;
use flora_contracts::settings::Credential;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::config::DEFAULT_API_BASE;

/// The key travels in a header so it never appears in URLs or error text.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// One request/response exchange with the generative service.
#[derive(Debug, Clone)]
pub struct ServiceCall<'a> {
    pub image: &'a Image,
    pub instruction: &'a str,
    pub model: &'a str,
    pub timeout: Duration,
}

/// Generative image backend. Returns the raw response document; turning it
/// into an image is [`interpret_response`]'s job.
pub trait ImageService: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, credential: &Credential, call: &ServiceCall<'_>) -> Result<Value, GenerationError>;
}

pub struct GeminiService {
    api_base: String,
    http: HttpClient,
}

impl GeminiService {
    pub fn new(api_base: &str) -> Self {
        let api_base = api_base.trim().trim_end_matches('/');
        Self {
            api_base: if api_base.is_empty() {
                DEFAULT_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            http: HttpClient::new(),
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub fn build_payload(call: &ServiceCall<'_>) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": call.image.encoding(),
                            "data": call.image.to_inline(),
                        }
                    },
                    { "text": call.instruction },
                ],
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE", "TEXT"],
            },
        })
    }
}

impl ImageService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, credential: &Credential, call: &ServiceCall<'_>) -> Result<Value, GenerationError> {
        let endpoint = self.endpoint_for_model(call.model);
        tracing::debug!(%endpoint, encoding = call.image.encoding(), bytes = call.image.len(), "calling image service");
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, credential.expose())
            .timeout(call.timeout)
            .json(&Self::build_payload(call))
            .send()
            .map_err(|err| GenerationError::TransportFailure(error_chain_text(&err.without_url(), 512)))?;
        response_json(response)
    }
}

fn response_json(response: HttpResponse) -> Result<Value, GenerationError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GenerationError::RateLimited);
    }
    let body = response
        .text()
        .map_err(|err| GenerationError::TransportFailure(format!("response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(GenerationError::TransportFailure(format!(
            "request failed ({}): {}",
            status.as_u16(),
            truncate_text(&body, 512)
        )));
    }
    serde_json::from_str(&body)
        .map_err(|err| GenerationError::TransportFailure(format!("invalid JSON payload: {err}")))
}

/// Maps a `generateContent` response to an image or a typed failure.
///
/// Order matters: an explicit block or non-`STOP` finish reason wins over
/// any partial payload, and a response without inline image data is
/// `NoImageProduced`.
pub fn interpret_response(payload: &Value) -> Result<Image, GenerationError> {
    if let Some(reason) = payload
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
        .filter(|reason| !reason.is_empty())
    {
        return Err(GenerationError::SafetyRejected {
            reason: reason.to_string(),
        });
    }

    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for candidate in &candidates {
        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            if !matches!(reason, "" | "STOP" | "FINISH_REASON_UNSPECIFIED") {
                return Err(GenerationError::SafetyRejected {
                    reason: reason.to_string(),
                });
            }
        }
    }

    for candidate in &candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let encoding = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            return Image::from_inline(data, encoding).map_err(|err| {
                GenerationError::TransportFailure(format!("image payload unreadable: {err}"))
            });
        }
    }

    Err(GenerationError::NoImageProduced)
}

fn error_chain_text(err: &(dyn std::error::Error + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = cause {
        let text = current.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(|last| last != trimmed).unwrap_or(true) {
            parts.push(trimmed.to_string());
        }
        cause = current.source();
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
