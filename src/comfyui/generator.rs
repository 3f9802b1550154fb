//! Image generation gateway backed by a ComfyUI server.
//!
//! [`ImageBackend::detect`] runs once at startup. Requests receive the
//! resulting handle; an `Unavailable` backend makes every request fall back
//! to copying the sketch.
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::comfyui::client::ComfyUIClient;
use crate::comfyui::workflow::{run_state, RunState, SamplerParams, WorkflowTemplate};
use crate::config::Config;
use crate::error::{AppError, AppResult};

const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Turns a sketch plus prompt into encoded image bytes.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, sketch_name: &str, sketch: &[u8], prompt: &str) -> AppResult<Vec<u8>>;
}

#[derive(Clone)]
pub enum ImageBackend {
    Available(Arc<dyn ImageGenerator>),
    Unavailable(String),
}

impl ImageBackend {
    pub fn available(generator: impl ImageGenerator + 'static) -> Self {
        ImageBackend::Available(Arc::new(generator))
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        ImageBackend::Unavailable(reason.into())
    }

    /// Probe configuration, workflow template and server reachability.
    pub async fn detect(config: &Config) -> Self {
        match ComfyUIGenerator::connect(config).await {
            Ok(generator) => {
                tracing::info!("Image generation enabled via ComfyUI at {}", config.comfyui_url);
                ImageBackend::available(generator)
            }
            Err(e) => {
                tracing::warn!("Image generation disabled: {}", e);
                ImageBackend::unavailable(e.to_string())
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ImageBackend::Available(_))
    }
}

pub struct ComfyUIGenerator {
    client: ComfyUIClient,
    template: WorkflowTemplate,
    steps: u32,
    cfg: f64,
    strength: f64,
    ckpt_name: Option<String>,
    control_net_name: Option<String>,
    timeout: Duration,
}

impl ComfyUIGenerator {
    pub async fn connect(config: &Config) -> AppResult<Self> {
        if !config.image_generation {
            return Err(AppError::ImageGenerationUnavailable("disabled by IMAGE_GENERATION".to_string()));
        }
        let template = WorkflowTemplate::load(config.comfyui_workflow.as_deref())
            .await
            .map_err(|e| AppError::ImageGenerationUnavailable(e.to_string()))?;
        let client = ComfyUIClient::new(config.comfyui_url.clone());
        client
            .system_stats()
            .await
            .map_err(|e| AppError::ImageGenerationUnavailable(format!("ComfyUI at {} not reachable: {}", client.base_url(), e)))?;

        Ok(ComfyUIGenerator {
            client,
            template,
            steps: config.inference_steps,
            cfg: config.guidance_scale,
            strength: config.controlnet_scale,
            ckpt_name: config.comfyui_checkpoint.clone(),
            control_net_name: config.comfyui_controlnet.clone(),
            timeout: Duration::from_secs(config.generation_timeout_secs),
        })
    }

    fn sampler_params(&self) -> SamplerParams {
        SamplerParams {
            seed: random_seed(),
            steps: self.steps,
            cfg: self.cfg,
            strength: self.strength,
            ckpt_name: self.ckpt_name.clone(),
            control_net_name: self.control_net_name.clone(),
        }
    }
}

#[async_trait]
impl ImageGenerator for ComfyUIGenerator {
    async fn generate(&self, sketch_name: &str, sketch: &[u8], prompt: &str) -> AppResult<Vec<u8>> {
        let uploaded = self.client.upload_image(sketch_name, sketch.to_vec()).await?;
        let graph = self.template.render(&uploaded.reference(), prompt, &self.sampler_params())?;
        let queued = self
            .client
            .queue_prompt(json!({ "prompt": graph, "client_id": Uuid::new_v4().simple().to_string() }))
            .await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let history = self.client.get_history(&queued.prompt_id).await?;
            match run_state(&history, &queued.prompt_id) {
                RunState::Finished(images) => {
                    let image = &images[0];
                    tracing::info!(prompt_id = %queued.prompt_id, file = %image.filename, "ComfyUI run finished");
                    return self.client.get_image(image).await;
                }
                RunState::Failed(reason) => return Err(AppError::ImageGenerationFailure(reason)),
                RunState::Pending => {}
            }
            if Instant::now() >= deadline {
                return Err(AppError::ImageGenerationFailure(format!(
                    "no result for prompt {} after {}s",
                    queued.prompt_id,
                    self.timeout.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn random_seed() -> u64 {
    // 2^53 keeps the seed exact for JSON consumers that parse numbers as doubles.
    (Uuid::new_v4().as_u128() as u64) & ((1u64 << 53) - 1)
}
