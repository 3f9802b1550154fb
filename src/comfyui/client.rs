//! Thin HTTP client for the ComfyUI endpoints used by sketch generation.
//!
//! - `system_stats` probes `/system_stats` to see whether the server is up.
//! - `upload_image` posts the sketch to `/upload/image`.
//! - `queue_prompt` posts a workflow to `/prompt`.
//! - `get_history` fetches `/history/{prompt_id}`.
//! - `get_image` downloads an output via `/view`.
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::comfyui::workflow::OutputImage;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct UploadedImage {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
}

impl UploadedImage {
    /// Name as a `LoadImage` node expects it.
    pub fn reference(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueuedPrompt {
    pub prompt_id: String,
}

#[derive(Clone)]
pub struct ComfyUIClient {
    client: Client,
    base_url: String,
}

impl ComfyUIClient {
    pub fn new(base_url: String) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        ComfyUIClient { client: Client::new(), base_url: base }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn system_stats(&self) -> AppResult<Value> {
        let url = format!("{}/system_stats", self.base_url);
        let response = self.client.get(&url).send().await.map_err(AppError::HttpClient)?;
        if response.status().is_success() {
            response.json().await.map_err(AppError::HttpClient)
        } else {
            Err(AppError::ComfyUI(format!("System stats unavailable: {:?}", response.status())))
        }
    }

    pub async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> AppResult<UploadedImage> {
        let url = format!("{}/upload/image", self.base_url);
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_for(file_name))
            .map_err(AppError::HttpClient)?;
        let form = Form::new().part("image", part).text("overwrite", "true");

        tracing::debug!("Uploading {} to ComfyUI at {}", file_name, url);
        let response = self.client.post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(AppError::HttpClient)?;

        if response.status().is_success() {
            response.json().await.map_err(AppError::HttpClient)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Unable to read error body".to_string());
            Err(AppError::ComfyUI(format!("Failed to upload image. Status: {}, Body: {}", status, body)))
        }
    }

    /// Queue a workflow with ComfyUI.
    ///
    /// Expects a JSON document compatible with ComfyUI's `/prompt` endpoint.
    pub async fn queue_prompt(&self, prompt: Value) -> AppResult<QueuedPrompt> {
        let url = format!("{}/prompt", self.base_url);
        tracing::info!("Sending prompt to ComfyUI at URL: {}", url);
        tracing::debug!("Prompt payload: {:?}", prompt);

        let response = self.client.post(&url)
            .json(&prompt)
            .send()
            .await
            .map_err(AppError::HttpClient)?;

        if response.status().is_success() {
            let queued: QueuedPrompt = response.json().await.map_err(AppError::HttpClient)?;
            tracing::info!("Successfully queued prompt {}", queued.prompt_id);
            Ok(queued)
        } else {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_else(|_| "Unable to read error body".to_string());
            let error_message = format!("Failed to queue prompt. Status: {}, Body: {}", status, error_body);
            tracing::error!("{}", error_message);
            Err(AppError::ComfyUI(error_message))
        }
    }

    /// Retrieve the execution history of one prompt as JSON.
    pub async fn get_history(&self, prompt_id: &str) -> AppResult<Value> {
        let url = format!("{}/history/{}", self.base_url, prompt_id);
        let response = self.client.get(&url)
            .send()
            .await
            .map_err(AppError::HttpClient)?;

        if response.status().is_success() {
            response.json().await.map_err(AppError::HttpClient)
        } else {
            Err(AppError::ComfyUI(format!("Failed to get history: {:?}", response.status())))
        }
    }

    /// Fetch output image bytes via ComfyUI's `/view` endpoint.
    pub async fn get_image(&self, image: &OutputImage) -> AppResult<Vec<u8>> {
        let url = format!("{}/view", self.base_url);
        let response = self.client.get(&url)
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .send()
            .await
            .map_err(AppError::HttpClient)?;

        if response.status().is_success() {
            response.bytes().await.map(|b| b.to_vec()).map_err(AppError::HttpClient)
        } else {
            Err(AppError::ComfyUI(format!("Failed to get image: {:?}", response.status())))
        }
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_reference_includes_subfolder() {
        let plain = UploadedImage { name: "sketch.png".into(), subfolder: String::new() };
        assert_eq!(plain.reference(), "sketch.png");
        let nested = UploadedImage { name: "sketch.png".into(), subfolder: "kansei".into() };
        assert_eq!(nested.reference(), "kansei/sketch.png");
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(mime_for("a.JPG"), "image/jpeg");
        assert_eq!(mime_for("a.webp"), "image/webp");
        assert_eq!(mime_for("noext"), "image/png");
    }

    #[test]
    fn base_url_is_normalized() {
        let client = ComfyUIClient::new("http://localhost:8188/".to_string());
        assert_eq!(client.base_url(), "http://localhost:8188");
    }
}
