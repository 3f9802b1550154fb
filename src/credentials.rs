//! Gemini API key resolution.
//!
//! Order: `GEMINI_API_KEY`, then `API_KEY`, then the first matching
//! `KEY=value` line of the configured env file. Nothing is cached, so a key
//! added to the file later is picked up by the next request.
use std::env;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{AppError, AppResult};

pub const CREDENTIAL_KEYS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone)]
pub struct CredentialLoader {
    env_file: PathBuf,
    use_process_env: bool,
}

impl CredentialLoader {
    pub fn new(env_file: impl Into<PathBuf>) -> Self {
        CredentialLoader { env_file: env_file.into(), use_process_env: true }
    }

    /// Only consult the env file, never the process environment.
    pub fn file_only(env_file: impl Into<PathBuf>) -> Self {
        CredentialLoader { env_file: env_file.into(), use_process_env: false }
    }

    pub async fn resolve(&self) -> AppResult<String> {
        if self.use_process_env {
            self.resolve_with(|key| env::var(key).ok()).await
        } else {
            self.resolve_with(|_| None).await
        }
    }

    pub async fn resolve_with<F>(&self, lookup: F) -> AppResult<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = CREDENTIAL_KEYS
            .iter()
            .filter_map(|key| lookup(key))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty());
        if let Some(key) = from_env {
            return Ok(key);
        }
        scan_env_file(&self.env_file).await.ok_or(AppError::CredentialMissing)
    }
}

async fn scan_env_file(path: &Path) -> Option<String> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!("credential file {} not readable: {}", path.display(), e);
            return None;
        }
    };
    content.lines().find_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        if !CREDENTIAL_KEYS.contains(&key.trim()) {
            return None;
        }
        let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[tokio::test]
    async fn gemini_key_from_environment() {
        let dir = tempfile::tempdir().unwrap();
        let loader = CredentialLoader::new(dir.path().join(".env"));
        assert_eq!(loader.resolve_with(env_of(&[("GEMINI_API_KEY", "X")])).await.unwrap(), "X");
    }

    #[tokio::test]
    async fn gemini_key_wins_over_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let loader = CredentialLoader::new(dir.path().join(".env"));
        let lookup = env_of(&[("API_KEY", "second"), ("GEMINI_API_KEY", "first")]);
        assert_eq!(loader.resolve_with(lookup).await.unwrap(), "first");
        let lookup = env_of(&[("API_KEY", "second"), ("GEMINI_API_KEY", "  ")]);
        assert_eq!(loader.resolve_with(lookup).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn quoted_value_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "# keys\n\nOTHER=1\nAPI_KEY=\"Y\"\n").unwrap();
        let loader = CredentialLoader::file_only(&path);
        assert_eq!(loader.resolve().await.unwrap(), "Y");
    }

    #[tokio::test]
    async fn file_line_splits_on_first_equals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "#GEMINI_API_KEY=commented\n GEMINI_API_KEY = 'abc=def' \n").unwrap();
        let loader = CredentialLoader::file_only(&path);
        assert_eq!(loader.resolve().await.unwrap(), "abc=def");
    }

    #[tokio::test]
    async fn nothing_configured_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let loader = CredentialLoader::file_only(dir.path().join(".env"));
        assert!(matches!(loader.resolve().await, Err(AppError::CredentialMissing)));
    }

    #[tokio::test]
    async fn later_file_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let loader = CredentialLoader::file_only(&path);
        assert!(loader.resolve().await.is_err());
        fs::write(&path, "GEMINI_API_KEY=late\n").unwrap();
        assert_eq!(loader.resolve().await.unwrap(), "late");
    }
}
