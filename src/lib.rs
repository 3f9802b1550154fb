//! Kansei design proxy library
//!
//! Modules:
//! - `api`: Axum HTTP handlers and router setup used by the server binary.
//! - `pipeline`: The sketch -> prompt -> design orchestration shared with the CLI.
//! - `prompt`: Instruction and final-prompt construction.
//! - `llm`: Language-model gateway (Gemini).
//! - `comfyui`: ComfyUI client, ControlNet workflow handling and the image backend.
//! - `storage`: Upload and artifact files under the media root.
//! - `vocabulary`: Tone and Kansei word lists.
//! - `credentials`: Gemini API key resolution.
//! - `config`: Env-driven configuration loader.
//! - `error`: Common error type and alias.
//!
//! Re-exports are provided for common types: `Config`, `DesignPipeline`,
//! `GeminiClient`, `ImageBackend` and `MediaStore`.
pub mod api;
pub mod comfyui;
pub mod config;
pub mod credentials;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod storage;
pub mod vocabulary;

pub use comfyui::generator::ImageBackend;
pub use config::Config;
pub use llm::GeminiClient;
pub use pipeline::DesignPipeline;
pub use storage::MediaStore;
