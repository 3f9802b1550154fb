//! Language-model gateway.
use async_trait::async_trait;

use crate::error::AppResult;

pub mod gemini;

pub use gemini::GeminiClient;

/// A single text-generation call; no retries.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, instruction: &str, model_id: &str) -> AppResult<String>;
}
