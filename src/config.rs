//! Env-driven configuration for the service and the CLI.
//!
//! Values are read from the process environment; `dotenv` is loaded on demand
//! by the binaries. Defaults are provided for convenience during development.
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use dotenv;

use crate::error::{AppError, AppResult};

/// Keys reported at startup. The credential keys are reported as set/unset only.
const REPORTED_KEYS: &[&str] = &[
    "API_HOST",
    "API_PORT",
    "MEDIA_DIR",
    "FRONTEND_DIR",
    "ENV_FILE",
    "GEMINI_MODEL",
    "COMFYUI_URL",
    "COMFYUI_WORKFLOW",
    "IMAGE_GENERATION",
];
const SECRET_KEYS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: String,
    pub media_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub env_file: PathBuf,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub comfyui_url: String,
    pub comfyui_workflow: Option<PathBuf>,
    pub comfyui_checkpoint: Option<String>,
    pub comfyui_controlnet: Option<String>,
    pub image_generation: bool,
    pub inference_steps: u32,
    pub guidance_scale: f64,
    pub controlnet_scale: f64,
    pub generation_timeout_secs: u64,
}

impl Config {
    pub fn dotenv_load() {
        dotenv::dotenv().ok();
    }

    pub fn new() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Config {
            api_host: text("API_HOST", "0.0.0.0"),
            api_port: text("API_PORT", "8000"),
            media_dir: PathBuf::from(text("MEDIA_DIR", "./media")),
            frontend_dir: PathBuf::from(text("FRONTEND_DIR", "./frontend")),
            env_file: PathBuf::from(text("ENV_FILE", ".env")),
            gemini_model: text("GEMINI_MODEL", "gemini-2.5-flash"),
            gemini_base_url: text("GEMINI_BASE_URL", "https://generativelanguage.googleapis.com"),
            comfyui_url: text("COMFYUI_URL", "http://localhost:8188"),
            comfyui_workflow: optional("COMFYUI_WORKFLOW").map(PathBuf::from),
            comfyui_checkpoint: optional("COMFYUI_CHECKPOINT"),
            comfyui_controlnet: optional("COMFYUI_CONTROLNET"),
            image_generation: parse_switch("IMAGE_GENERATION", &text("IMAGE_GENERATION", "on"))?,
            inference_steps: parse_number("INFERENCE_STEPS", &text("INFERENCE_STEPS", "20"))?,
            guidance_scale: parse_number("GUIDANCE_SCALE", &text("GUIDANCE_SCALE", "7.5"))?,
            controlnet_scale: parse_number("CONTROLNET_SCALE", &text("CONTROLNET_SCALE", "1.0"))?,
            generation_timeout_secs: parse_number("GENERATION_TIMEOUT_SECS", &text("GENERATION_TIMEOUT_SECS", "600"))?,
        })
    }

    pub fn print_env_vars() {
        for key in REPORTED_KEYS {
            tracing::info!("{}: {}", key, env::var(key).unwrap_or_else(|_| "<unset>".to_string()));
        }
        for key in SECRET_KEYS {
            let state = if env::var(key).map(|v| !v.trim().is_empty()).unwrap_or(false) { "<set>" } else { "<unset>" };
            tracing::info!("{}: {}", key, state);
        }
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> AppResult<T> {
    raw.parse::<T>()
        .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", key, raw)))
}

fn parse_switch(key: &str, raw: &str) -> AppResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(AppError::Config(format!("{} must be on/off, got '{}'", key, raw))),
    }
}
