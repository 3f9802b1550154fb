//! The sketch-to-design pipeline shared by the HTTP API and the CLI.
//!
//! Steps, strictly in order: persist the sketch, compose the prompt through
//! the language model, generate the design (or copy the sketch), describe the
//! result. Prompt and image failures degrade the outcome; storage failures
//! are returned as errors.
use std::path::Path;
use std::sync::Arc;

use crate::comfyui::generator::ImageBackend;
use crate::error::{AppError, AppResult};
use crate::llm::TextGenerator;
use crate::prompt::builder::{build_instruction, refine_for_target};
use crate::storage::{Artifact, MediaStore, StoredSketch};
use crate::vocabulary::{self, KANSEI_WORDS, TONES};

pub const NOTES: &str = "Generated using Stable Diffusion v1.5 + ControlNet with the Gemini-crafted prompt \
conditioned on your CAD sketch.";

/// Raw sketch bytes plus the client-side file name, if any.
#[derive(Debug, Clone)]
pub struct SketchUpload {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
}

impl SketchUpload {
    pub async fn from_path(path: &Path) -> AppResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path.file_name().and_then(|n| n.to_str()).map(str::to_string);
        Ok(SketchUpload { bytes, file_name })
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub sketch: SketchUpload,
    pub kansei_text: String,
    pub style_profile: Option<String>,
    pub tones: Vec<String>,
    pub kansei_words: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptStage {
    Ready(String),
    Degraded { kind: &'static str, diagnostic: String },
}

impl PromptStage {
    fn from_error(err: &AppError) -> Self {
        PromptStage::Degraded { kind: err.kind(), diagnostic: err.diagnostic() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Generated,
    SketchCopy { reason: String },
}

impl ImageSource {
    pub fn label(&self) -> &'static str {
        match self {
            ImageSource::Generated => "generated",
            ImageSource::SketchCopy { .. } => "sketch_copy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub sketch: StoredSketch,
    pub artifact: Artifact,
    pub prompt: PromptStage,
    pub image_source: ImageSource,
}

impl GenerationOutcome {
    /// The final prompt, or the diagnostic that replaced it.
    pub fn llm_prompt(&self) -> &str {
        match &self.prompt {
            PromptStage::Ready(text) => text,
            PromptStage::Degraded { diagnostic, .. } => diagnostic,
        }
    }

    pub fn final_prompt(&self) -> Option<&str> {
        match &self.prompt {
            PromptStage::Ready(text) => Some(text),
            PromptStage::Degraded { .. } => None,
        }
    }
}

pub struct DesignPipeline {
    text: Arc<dyn TextGenerator>,
    images: ImageBackend,
    store: MediaStore,
    model_id: String,
}

impl DesignPipeline {
    pub fn new(text: Arc<dyn TextGenerator>, images: ImageBackend, store: MediaStore, model_id: impl Into<String>) -> Self {
        DesignPipeline { text, images, store, model_id: model_id.into() }
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    pub fn images(&self) -> &ImageBackend {
        &self.images
    }

    /// Instruction -> language model -> final prompt. Never fails; errors
    /// become a degraded stage.
    pub async fn compose_prompt(&self, tones: &[String], kansei_words: &[String]) -> PromptStage {
        let instruction = build_instruction(tones, kansei_words);
        match self.text.generate_text(&instruction, &self.model_id).await {
            Ok(text) => PromptStage::Ready(refine_for_target(&text)),
            Err(e) => {
                tracing::warn!(kind = e.kind(), "prompt generation failed: {}", e);
                PromptStage::from_error(&e)
            }
        }
    }

    pub async fn run(&self, request: GenerationRequest) -> AppResult<GenerationOutcome> {
        log_unlisted(&request);
        let sketch = self.persist(&request).await?;
        let prompt = self.compose_prompt(&request.tones, &request.kansei_words).await;
        self.finish(&request, sketch, prompt).await
    }

    /// [`run`](Self::run) with a prompt already produced by
    /// [`compose_prompt`](Self::compose_prompt). Lets a caller stop before
    /// anything is written when the prompt degraded.
    pub async fn run_with_prompt(&self, request: GenerationRequest, prompt: PromptStage) -> AppResult<GenerationOutcome> {
        log_unlisted(&request);
        let sketch = self.persist(&request).await?;
        self.finish(&request, sketch, prompt).await
    }

    async fn persist(&self, request: &GenerationRequest) -> AppResult<StoredSketch> {
        let sketch = self
            .store
            .persist_sketch(request.sketch.file_name.as_deref(), &request.sketch.bytes)
            .await?;
        tracing::info!(
            sketch_id = sketch.id.as_str(),
            bytes = request.sketch.bytes.len(),
            style_profile = request.style_profile.as_deref().unwrap_or("-"),
            kansei_text = %request.kansei_text,
            "sketch stored"
        );
        Ok(sketch)
    }

    async fn finish(&self, request: &GenerationRequest, sketch: StoredSketch, prompt: PromptStage) -> AppResult<GenerationOutcome> {
        let artifact = self.store.artifact_for(&sketch.id);
        let image_source = self.render(&sketch, &request.sketch.bytes, &prompt, &artifact).await?;
        tracing::info!(
            sketch_id = sketch.id.as_str(),
            source = image_source.label(),
            artifact = %artifact.file_name,
            "design ready"
        );

        Ok(GenerationOutcome { sketch, artifact, prompt, image_source })
    }

    async fn render(
        &self,
        sketch: &StoredSketch,
        sketch_bytes: &[u8],
        prompt: &PromptStage,
        artifact: &Artifact,
    ) -> AppResult<ImageSource> {
        let reason = match (&self.images, prompt) {
            (ImageBackend::Unavailable(reason), _) => reason.clone(),
            (ImageBackend::Available(_), PromptStage::Degraded { kind, .. }) => format!("prompt unavailable ({})", kind),
            (ImageBackend::Available(generator), PromptStage::Ready(text)) => {
                match generator.generate(&sketch.file_name, sketch_bytes, text).await {
                    Ok(bytes) => {
                        self.store.write_artifact(artifact, &bytes).await?;
                        return Ok(ImageSource::Generated);
                    }
                    Err(e) => e.to_string(),
                }
            }
        };
        tracing::warn!(sketch_id = sketch.id.as_str(), "returning original sketch: {}", reason);
        self.store.copy_sketch(sketch, artifact).await?;
        Ok(ImageSource::SketchCopy { reason })
    }
}

fn log_unlisted(request: &GenerationRequest) {
    let tones = vocabulary::unlisted(&request.tones, TONES);
    let words = vocabulary::unlisted(&request.kansei_words, KANSEI_WORDS);
    if !tones.is_empty() || !words.is_empty() {
        tracing::debug!(?tones, ?words, "selections outside the offered vocabulary");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comfyui::generator::ImageGenerator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedText(&'static str);

    #[async_trait]
    impl TextGenerator for FixedText {
        async fn generate_text(&self, instruction: &str, model_id: &str) -> AppResult<String> {
            assert!(instruction.contains("Elegant"));
            assert_eq!(model_id, "test-model");
            Ok(self.0.to_string())
        }
    }

    struct FailingText;

    #[async_trait]
    impl TextGenerator for FailingText {
        async fn generate_text(&self, _: &str, _: &str) -> AppResult<String> {
            Err(AppError::PermissionDenied { leaked: true, message: "key leaked".into() })
        }
    }

    #[derive(Default)]
    struct CountingImages {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ImageGenerator for Arc<CountingImages> {
        async fn generate(&self, _: &str, _: &[u8], prompt: &str) -> AppResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(prompt.contains("--output_format"));
            if self.fail {
                Err(AppError::ImageGenerationFailure("sampler crashed".into()))
            } else {
                Ok(b"rendered".to_vec())
            }
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            sketch: SketchUpload { bytes: b"sketch".to_vec(), file_name: Some("coat.png".into()) },
            kansei_text: "light and calm".into(),
            style_profile: None,
            tones: vec!["Elegant".into()],
            kansei_words: vec!["Airy".into()],
        }
    }

    async fn pipeline(text: Arc<dyn TextGenerator>, images: ImageBackend) -> (tempfile::TempDir, DesignPipeline) {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path());
        store.ensure_dirs().await.unwrap();
        (dir, DesignPipeline::new(text, images, store, "test-model"))
    }

    #[tokio::test]
    async fn happy_path_writes_generated_bytes() {
        let images = Arc::new(CountingImages::default());
        let (_dir, pipeline) = pipeline(Arc::new(FixedText("  A coat. ")), ImageBackend::available(images.clone())).await;

        let outcome = pipeline.run(request()).await.unwrap();
        assert_eq!(outcome.image_source, ImageSource::Generated);
        assert!(outcome.llm_prompt().starts_with("A coat.\n"));
        assert_eq!(outcome.final_prompt(), Some(outcome.llm_prompt()));
        assert_eq!(std::fs::read(&outcome.artifact.path).unwrap(), b"rendered");
        assert_eq!(images.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generator_failure_copies_sketch() {
        let images = Arc::new(CountingImages { calls: AtomicUsize::new(0), fail: true });
        let (_dir, pipeline) = pipeline(Arc::new(FixedText("A coat.")), ImageBackend::available(images)).await;

        let outcome = pipeline.run(request()).await.unwrap();
        assert!(matches!(&outcome.image_source, ImageSource::SketchCopy { reason } if reason.contains("sampler crashed")));
        assert_eq!(std::fs::read(&outcome.artifact.path).unwrap(), b"sketch");
    }

    #[tokio::test]
    async fn degraded_prompt_skips_generation() {
        let images = Arc::new(CountingImages::default());
        let (_dir, pipeline) = pipeline(Arc::new(FailingText), ImageBackend::available(images.clone())).await;

        let outcome = pipeline.run(request()).await.unwrap();
        assert_eq!(images.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.final_prompt().is_none());
        assert!(outcome.llm_prompt().contains("leaked and disabled"));
        assert!(matches!(outcome.prompt, PromptStage::Degraded { kind: "credential_leaked", .. }));
        assert_eq!(outcome.image_source.label(), "sketch_copy");
        assert_eq!(std::fs::read(&outcome.artifact.path).unwrap(), b"sketch");
    }

    #[tokio::test]
    async fn composing_a_degraded_prompt_writes_nothing() {
        let images = Arc::new(CountingImages::default());
        let (dir, pipeline) = pipeline(Arc::new(FailingText), ImageBackend::available(images.clone())).await;

        let prompt = pipeline.compose_prompt(&request().tones, &request().kansei_words).await;
        assert!(matches!(prompt, PromptStage::Degraded { .. }));
        assert_eq!(std::fs::read_dir(dir.path().join("uploads")).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(dir.path().join("generated")).unwrap().count(), 0);
        assert_eq!(images.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_with_prompt_skips_the_language_model() {
        let images = Arc::new(CountingImages::default());
        let (_dir, pipeline) = pipeline(Arc::new(FailingText), ImageBackend::available(images.clone())).await;

        let prompt = PromptStage::Ready("A coat.\n --output_format".to_string());
        let outcome = pipeline.run_with_prompt(request(), prompt).await.unwrap();
        assert_eq!(outcome.image_source, ImageSource::Generated);
        assert_eq!(outcome.final_prompt(), Some("A coat.\n --output_format"));
        assert_eq!(images.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn storage_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().join("not-created"));
        let pipeline = DesignPipeline::new(Arc::new(FixedText("x")), ImageBackend::unavailable("off"), store, "test-model");
        assert!(matches!(pipeline.run(request()).await, Err(AppError::StorageWrite { .. })));
    }
}
