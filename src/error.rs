//! Common error type and alias.
//!
//! Prompt-stage failures are not returned to HTTP callers as errors; the
//! pipeline turns them into a diagnostic via [`AppError::diagnostic`]. Storage
//! failures and malformed requests go through the `IntoResponse` impl.
use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("ComfyUI error: {0}")]
    ComfyUI(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing Gemini API key. Set 'GEMINI_API_KEY' env var or add 'API_KEY=...' in .env")]
    CredentialMissing,

    #[error("Gemini permission denied: {message}")]
    PermissionDenied { leaked: bool, message: String },

    #[error("Gemini request failed: {0}")]
    Upstream(String),

    #[error("Image generation unavailable: {0}")]
    ImageGenerationUnavailable(String),

    #[error("Image generation failed: {0}")]
    ImageGenerationFailure(String),

    #[error("Failed to write {}: {}", .path.display(), .source)]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Stable tag for the `prompt_error.kind` response field.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::CredentialMissing => "credential_missing",
            AppError::PermissionDenied { leaked: true, .. } => "credential_leaked",
            AppError::PermissionDenied { leaked: false, .. } => "permission_denied",
            AppError::Upstream(_) | AppError::HttpClient(_) => "upstream",
            AppError::ImageGenerationUnavailable(_) => "image_generation_unavailable",
            AppError::ImageGenerationFailure(_) | AppError::ComfyUI(_) => "image_generation_failure",
            AppError::Workflow(_) => "workflow",
            AppError::Config(_) => "config",
            AppError::StorageWrite { .. } | AppError::Io(_) => "storage",
            AppError::BadRequest(_) => "bad_request",
        }
    }

    /// Operator-facing text that stands in for the prompt when the prompt
    /// stage fails.
    pub fn diagnostic(&self) -> String {
        match self {
            AppError::CredentialMissing => {
                "Gemini API Error: Missing Gemini API key. Set GEMINI_API_KEY in your environment or add API_KEY=... to your .env file.".to_string()
            }
            AppError::PermissionDenied { leaked: true, .. } => {
                "Gemini API Error: Your API key has been reported as leaked and disabled. Please generate a new API key from https://aistudio.google.com/apikey and update your .env file.".to_string()
            }
            AppError::PermissionDenied { leaked: false, .. } => {
                "Gemini API Error: Permission denied. Please check your API key has the correct permissions.".to_string()
            }
            AppError::Upstream(message) => format!("Gemini API Error: {}", message),
            other => format!("Gemini API Error: {}", other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(kind = self.kind(), "request failed: {}", self);
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaked_key_gets_rotation_advice() {
        let err = AppError::PermissionDenied { leaked: true, message: "API key was reported as leaked".into() };
        assert_eq!(err.kind(), "credential_leaked");
        assert!(err.diagnostic().contains("leaked and disabled"));
        assert!(err.diagnostic().contains("aistudio.google.com/apikey"));
    }

    #[test]
    fn missing_credential_diagnostic_names_the_key() {
        let text = AppError::CredentialMissing.diagnostic();
        assert!(text.contains("Missing Gemini API key"));
        assert!(text.contains("GEMINI_API_KEY"));
    }

    #[test]
    fn upstream_diagnostic_carries_raw_text() {
        let err = AppError::Upstream("status 429 Too Many Requests: quota exhausted".into());
        assert_eq!(err.diagnostic(), "Gemini API Error: status 429 Too Many Requests: quota exhausted");
    }

    #[test]
    fn bad_request_maps_to_400() {
        let response = AppError::BadRequest("Missing required field: image".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = AppError::StorageWrite {
            path: PathBuf::from("/nope/sketch.png"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
