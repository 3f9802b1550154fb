//! Axum request handlers for the HTTP API.
use std::fmt::Display;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::api::routes::AppState;
use crate::error::{AppError, AppResult};
use crate::pipeline::{GenerationOutcome, GenerationRequest, PromptStage, SketchUpload, NOTES};
use crate::vocabulary::{KANSEI_WORDS, TONES};

#[derive(Debug, Serialize)]
pub struct GenerateDesignResponse {
    pub status: &'static str,
    pub generated_image_url: String,
    /// Final prompt, or the diagnostic that replaced it.
    pub llm_prompt: String,
    pub notes: &'static str,
    pub final_prompt: Option<String>,
    pub prompt_error: Option<PromptErrorBody>,
    pub image_source: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PromptErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl From<&GenerationOutcome> for GenerateDesignResponse {
    fn from(outcome: &GenerationOutcome) -> Self {
        let prompt_error = match &outcome.prompt {
            PromptStage::Ready(_) => None,
            PromptStage::Degraded { kind, diagnostic } => Some(PromptErrorBody { kind: *kind, message: diagnostic.clone() }),
        };
        GenerateDesignResponse {
            status: "ok",
            generated_image_url: outcome.artifact.url.clone(),
            llm_prompt: outcome.llm_prompt().to_string(),
            notes: NOTES,
            final_prompt: outcome.final_prompt().map(str::to_string),
            prompt_error,
            image_source: outcome.image_source.label(),
        }
    }
}

pub async fn generate_design(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<GenerateDesignResponse>, AppError> {
    let request = read_generation_form(multipart).await?;
    let outcome = state.pipeline.run(request).await?;
    Ok(Json(GenerateDesignResponse::from(&outcome)))
}

pub async fn tones() -> Json<Value> {
    Json(json!({ "tones": TONES, "kansei_words": KANSEI_WORDS }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

fn bad_request(e: impl Display) -> AppError {
    AppError::BadRequest(e.to_string())
}

/// Collect the upload form. Repeated `tones`/`kansei_words` fields may carry
/// a `[]` suffix; unknown fields are ignored.
async fn read_generation_form(mut multipart: Multipart) -> AppResult<GenerationRequest> {
    let mut sketch: Option<SketchUpload> = None;
    let mut kansei_text: Option<String> = None;
    let mut style_profile: Option<String> = None;
    let mut tones: Vec<String> = Vec::new();
    let mut kansei_words: Vec<String> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or("").to_string();
        match name.trim_end_matches("[]") {
            "image" => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(bad_request)?;
                sketch = Some(SketchUpload { bytes: bytes.to_vec(), file_name });
            }
            "kansei_text" => kansei_text = Some(field.text().await.map_err(bad_request)?),
            "style_profile" => {
                let value = field.text().await.map_err(bad_request)?;
                style_profile = Some(value).filter(|v| !v.trim().is_empty());
            }
            "tones" => push_selection(&mut tones, field.text().await.map_err(bad_request)?),
            "kansei_words" => push_selection(&mut kansei_words, field.text().await.map_err(bad_request)?),
            other => tracing::debug!("ignoring form field '{}'", other),
        }
    }

    let sketch = sketch.ok_or_else(|| AppError::BadRequest("Missing required field: image".to_string()))?;
    let kansei_text = kansei_text.ok_or_else(|| AppError::BadRequest("Missing required field: kansei_text".to_string()))?;
    Ok(GenerationRequest { sketch, kansei_text, style_profile, tones, kansei_words })
}

fn push_selection(list: &mut Vec<String>, value: String) {
    let value = value.trim();
    if !value.is_empty() {
        list.push(value.to_string());
    }
}
