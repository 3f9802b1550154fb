//! Gemini `generateContent` client.
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::credentials::CredentialLoader;
use crate::error::{AppError, AppResult};
use crate::llm::TextGenerator;

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    credentials: CredentialLoader,
}

impl GeminiClient {
    pub fn new(base_url: String, credentials: CredentialLoader) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        GeminiClient { client: Client::new(), base_url: base, credentials }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate_text(&self, instruction: &str, model_id: &str) -> AppResult<String> {
        let api_key = self.credentials.resolve().await?;
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model_id);
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": instruction }] }],
        });

        tracing::debug!(target: "llm.gemini", model = model_id, chars = instruction.len(), "calling Gemini");
        let response = self.client.post(&url)
            .header("x-goog-api-key", &api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Upstream(redact(&e.to_string(), &api_key)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_failure(status, &redact(&body, &api_key));
            tracing::warn!(target: "llm.gemini", status = %status, "Gemini request failed: {}", err);
            return Err(err);
        }

        let value: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("malformed Gemini response: {}", redact(&e.to_string(), &api_key))))?;
        extract_text(value)
    }
}

/// Map a non-success reply onto the error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> AppError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.pointer("/error/message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    let upstream_status = parsed
        .as_ref()
        .and_then(|v| v.pointer("/error/status"))
        .and_then(Value::as_str);

    if status == StatusCode::FORBIDDEN || upstream_status == Some("PERMISSION_DENIED") {
        let leaked = message.to_lowercase().contains("leaked");
        AppError::PermissionDenied { leaked, message }
    } else {
        AppError::Upstream(format!("status {}: {}", status, message))
    }
}

fn extract_text(response: GeminiResponse) -> AppResult<String> {
    let text: String = response
        .candidates
        .into_iter()
        .flatten()
        .filter_map(|c| c.content)
        .filter_map(|c| c.parts)
        .flatten()
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(AppError::Upstream("Gemini returned no text".to_string()));
    }
    Ok(text)
}

fn redact(text: &str, key: &str) -> String {
    if key.is_empty() {
        return text.to_string();
    }
    text.replace(key, "[redacted]")
}
