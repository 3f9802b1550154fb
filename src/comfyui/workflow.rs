//! ControlNet sketch workflow handling.
//!
//! A template is a ComfyUI API-format graph. Rendering substitutes whole-string
//! `{{placeholder}}` values, applies sampler parameters to matching node
//! inputs, routes the positive/negative prompt text to the encoders feeding
//! the sampler, and defaults the `SaveImage` filename prefix.
use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};

pub const DEFAULT_WORKFLOW: &str = include_str!("../../workflows/controlnet_sketch.json");

pub const NEGATIVE_PROMPT: &str =
    "photo, photorealistic, shading, blurry, lowres, watermark, text artifacts, jpeg artifacts, color noise";

pub const FILENAME_PREFIX: &str = "kansei";

/// Placeholder every template must contain; receives the uploaded sketch name.
const IMAGE_PLACEHOLDER: &str = "image";

const MAX_LINK_HOPS: usize = 8;

#[derive(Debug, Clone)]
pub struct SamplerParams {
    pub seed: u64,
    pub steps: u32,
    pub cfg: f64,
    pub strength: f64,
    pub ckpt_name: Option<String>,
    pub control_net_name: Option<String>,
}

impl SamplerParams {
    fn node_inputs(&self) -> Vec<(&'static str, Value)> {
        let mut kvs = vec![
            ("seed", json!(self.seed)),
            ("steps", json!(self.steps)),
            ("cfg", json!(self.cfg)),
            ("strength", json!(self.strength)),
        ];
        if let Some(name) = &self.ckpt_name {
            kvs.push(("ckpt_name", json!(name)));
        }
        if let Some(name) = &self.control_net_name {
            kvs.push(("control_net_name", json!(name)));
        }
        kvs
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    graph: Value,
}

impl WorkflowTemplate {
    pub fn embedded() -> AppResult<Self> {
        Self::parse(DEFAULT_WORKFLOW)
    }

    /// Load from `path`, or the embedded SD1.5 + ControlNet workflow when unset.
    pub async fn load(path: Option<&Path>) -> AppResult<Self> {
        match path {
            None => Self::embedded(),
            Some(path) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| AppError::Workflow(format!("Failed to read {}: {}", path.display(), e)))?;
                Self::parse(&raw)
            }
        }
    }

    /// Accepts either a bare graph or a `{"prompt": graph}` wrapper.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| AppError::Workflow(format!("Failed to parse workflow JSON: {}", e)))?;
        let graph = match value.get("prompt") {
            Some(inner) if is_graph(inner) => inner.clone(),
            _ => value,
        };
        if !is_graph(&graph) {
            return Err(AppError::Workflow("workflow has no nodes with a class_type".to_string()));
        }
        if !contains_placeholder(&graph, IMAGE_PLACEHOLDER) {
            return Err(AppError::Workflow(format!(
                "workflow must contain a {{{{{}}}}} placeholder for the sketch",
                IMAGE_PLACEHOLDER
            )));
        }
        Ok(WorkflowTemplate { graph })
    }

    pub fn render(&self, image_name: &str, positive: &str, params: &SamplerParams) -> AppResult<Value> {
        let mut inputs = Map::new();
        inputs.insert(IMAGE_PLACEHOLDER.to_string(), json!(image_name));
        inputs.insert("prompt".to_string(), json!(positive));
        inputs.insert("negative_prompt".to_string(), json!(NEGATIVE_PROMPT));
        for (key, value) in params.node_inputs() {
            inputs.insert(key.to_string(), value);
        }

        let mut graph = self.graph.clone();
        replace_placeholders(&mut graph, &inputs)?;
        apply_params(&mut graph, params);
        route_prompt_text(&mut graph, positive, NEGATIVE_PROMPT)?;
        ensure_filename_prefix(&mut graph, FILENAME_PREFIX);
        Ok(graph)
    }
}

fn is_graph(value: &Value) -> bool {
    value
        .as_object()
        .map(|nodes| nodes.values().any(|node| class_of(node).is_some()))
        .unwrap_or(false)
}

fn class_of(node: &Value) -> Option<&str> {
    node.get("class_type").and_then(Value::as_str)
}

fn placeholder_key(s: &str) -> Option<&str> {
    if s.starts_with("{{") && s.ends_with("}}") && s.len() >= 4 {
        Some(s[2..s.len() - 2].trim())
    } else {
        None
    }
}

fn contains_placeholder(value: &Value, key: &str) -> bool {
    match value {
        Value::Object(map) => map.values().any(|v| contains_placeholder(v, key)),
        Value::Array(arr) => arr.iter().any(|v| contains_placeholder(v, key)),
        Value::String(s) => placeholder_key(s) == Some(key),
        _ => false,
    }
}

/// Recursively replace `{{key}}` strings with `inputs[key]`.
fn replace_placeholders(value: &mut Value, inputs: &Map<String, Value>) -> AppResult<()> {
    match value {
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                replace_placeholders(v, inputs)?;
            }
        }
        Value::Array(arr) => {
            for v in arr.iter_mut() {
                replace_placeholders(v, inputs)?;
            }
        }
        Value::String(s) => {
            if let Some(key) = placeholder_key(s) {
                let replacement = inputs
                    .get(key)
                    .cloned()
                    .ok_or_else(|| AppError::Workflow(format!("Missing input for placeholder: {}", key)))?;
                *value = replacement;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Set sampler parameters on every node input of the same name. Linked
/// inputs (`[node_id, slot]`) are left alone.
fn apply_params(graph: &mut Value, params: &SamplerParams) {
    let kvs = params.node_inputs();
    let Some(nodes) = graph.as_object_mut() else { return };
    for (_id, node) in nodes.iter_mut() {
        if let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) {
            for (key, value) in kvs.iter() {
                if inputs.get(*key).map(|current| !current.is_array()).unwrap_or(false) {
                    inputs.insert((*key).to_string(), value.clone());
                }
            }
        }
    }
}

/// Write the prompt texts into the encoders behind the sampler's `positive`
/// and `negative` inputs, following conditioning links through ControlNet
/// apply nodes. Without a sampler, encoders are used in id order.
fn route_prompt_text(graph: &mut Value, positive: &str, negative: &str) -> AppResult<()> {
    let sampler = find_node_by_class(graph, "KSampler").or_else(|| find_node_by_class(graph, "KSamplerAdvanced"));
    let (traced_pos, traced_neg) = match sampler.as_deref() {
        Some(id) => (trace_text_encoder(graph, id, "positive"), trace_text_encoder(graph, id, "negative")),
        None => (None, None),
    };

    let encoders = text_encoder_ids(graph);
    let positive_id = traced_pos
        .or_else(|| encoders.first().cloned())
        .ok_or_else(|| AppError::Workflow("workflow has no CLIPTextEncode node".to_string()))?;
    let negative_id = traced_neg.or_else(|| encoders.iter().find(|id| **id != positive_id).cloned());

    set_node_text(graph, &positive_id, positive);
    if let Some(id) = negative_id.filter(|id| *id != positive_id) {
        set_node_text(graph, &id, negative);
    }
    Ok(())
}

fn find_node_by_class(graph: &Value, class_type: &str) -> Option<String> {
    graph
        .as_object()?
        .iter()
        .find(|(_, node)| class_of(node) == Some(class_type))
        .map(|(id, _)| id.clone())
}

fn trace_text_encoder(graph: &Value, sampler_id: &str, input_name: &str) -> Option<String> {
    let mut id = linked_node_id(graph.get(sampler_id)?.get("inputs")?.get(input_name)?)?;
    for _ in 0..MAX_LINK_HOPS {
        let node = graph.get(&id)?;
        if class_of(node) == Some("CLIPTextEncode") {
            return Some(id);
        }
        let inputs = node.get("inputs")?;
        let upstream = inputs.get("conditioning").or_else(|| inputs.get(input_name))?;
        id = linked_node_id(upstream)?;
    }
    None
}

fn linked_node_id(link: &Value) -> Option<String> {
    let first = link.as_array()?.first()?;
    first
        .as_str()
        .map(str::to_string)
        .or_else(|| first.as_i64().map(|n| n.to_string()))
}

fn text_encoder_ids(graph: &Value) -> Vec<String> {
    let mut ids: Vec<String> = graph
        .as_object()
        .into_iter()
        .flat_map(|o| o.iter())
        .filter(|(_, node)| class_of(node) == Some("CLIPTextEncode"))
        .map(|(id, _)| id.clone())
        .collect();
    ids.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    ids
}

fn set_node_text(graph: &mut Value, node_id: &str, text: &str) {
    if let Some(inputs) = graph
        .get_mut(node_id)
        .and_then(|node| node.get_mut("inputs"))
        .and_then(Value::as_object_mut)
    {
        inputs.insert("text".to_string(), json!(text));
    }
}

fn ensure_filename_prefix(graph: &mut Value, default_prefix: &str) {
    let Some(nodes) = graph.as_object_mut() else { return };
    for (_id, node) in nodes.iter_mut() {
        if class_of(node) != Some("SaveImage") {
            continue;
        }
        if let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) {
            inputs
                .entry("filename_prefix")
                .or_insert_with(|| Value::String(default_prefix.to_string()));
        }
    }
}

/// One image entry from a history record's `outputs`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_output_kind")]
    pub kind: String,
}

fn default_output_kind() -> String {
    "output".to_string()
}

#[derive(Debug, PartialEq)]
pub enum RunState {
    Pending,
    Failed(String),
    Finished(Vec<OutputImage>),
}

/// Interpret a `/history/{prompt_id}` document.
pub fn run_state(history: &Value, prompt_id: &str) -> RunState {
    let Some(entry) = history.get(prompt_id) else {
        return RunState::Pending;
    };
    let status = entry.pointer("/status/status_str").and_then(Value::as_str);
    if status == Some("error") {
        return RunState::Failed(execution_error(entry).unwrap_or_else(|| "execution error".to_string()));
    }

    let mut images: Vec<OutputImage> = entry
        .get("outputs")
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|outputs| outputs.values())
        .filter_map(|node_output| node_output.get("images").and_then(Value::as_array))
        .flatten()
        .filter_map(|image| serde_json::from_value(image.clone()).ok())
        .collect();
    // Saved outputs first; previews are only a fallback.
    images.sort_by_key(|image: &OutputImage| image.kind != "output");

    let completed = entry.pointer("/status/completed").and_then(Value::as_bool).unwrap_or(false);
    if !images.is_empty() {
        RunState::Finished(images)
    } else if completed {
        RunState::Failed("run completed without output images".to_string())
    } else {
        RunState::Pending
    }
}

fn execution_error(entry: &Value) -> Option<String> {
    entry
        .pointer("/status/messages")?
        .as_array()?
        .iter()
        .filter_map(Value::as_array)
        .find(|msg| msg.first().and_then(Value::as_str) == Some("execution_error"))
        .and_then(|msg| msg.get(1))
        .and_then(|detail| detail.get("exception_message"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SamplerParams {
        SamplerParams {
            seed: 42,
            steps: 20,
            cfg: 7.5,
            strength: 1.0,
            ckpt_name: None,
            control_net_name: Some("control_sd15_canny.pth".to_string()),
        }
    }

    #[test]
    fn embedded_workflow_renders() {
        let template = WorkflowTemplate::embedded().unwrap();
        let graph = template.render("sketch_abc.png", "A wrap dress.", &params()).unwrap();

        assert_eq!(graph["4"]["inputs"]["image"], "sketch_abc.png");
        assert_eq!(graph["8"]["inputs"]["seed"], 42);
        assert_eq!(graph["8"]["inputs"]["steps"], 20);
        assert_eq!(graph["8"]["inputs"]["cfg"], 7.5);
        assert_eq!(graph["6"]["inputs"]["strength"], 1.0);
        assert_eq!(graph["5"]["inputs"]["control_net_name"], "control_sd15_canny.pth");
        assert_eq!(graph["1"]["inputs"]["ckpt_name"], "v1-5-pruned-emaonly.safetensors");
        assert_eq!(graph["10"]["inputs"]["filename_prefix"], FILENAME_PREFIX);
    }

    #[test]
    fn positive_text_reaches_encoder_behind_controlnet() {
        let graph = WorkflowTemplate::embedded()
            .unwrap()
            .render("s.png", "A cropped bomber jacket.", &params())
            .unwrap();
        // KSampler.positive -> ControlNetApply(6).conditioning -> encoder 2
        assert_eq!(graph["2"]["inputs"]["text"], "A cropped bomber jacket.");
        assert_eq!(graph["3"]["inputs"]["text"], NEGATIVE_PROMPT);
        assert!(graph["6"]["inputs"].get("text").is_none());
        assert!(graph["8"]["inputs"]["positive"].is_array());
    }

    #[test]
    fn wrapped_template_without_sampler_uses_encoder_order() {
        let raw = r#"{"prompt": {
            "12": {"class_type": "CLIPTextEncode", "inputs": {"text": "x"}},
            "3": {"class_type": "CLIPTextEncode", "inputs": {"text": "y"}},
            "7": {"class_type": "LoadImage", "inputs": {"image": "{{ image }}"}},
            "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "mine"}}
        }}"#;
        let graph = WorkflowTemplate::parse(raw).unwrap().render("s.png", "pos", &params()).unwrap();
        assert_eq!(graph["3"]["inputs"]["text"], "pos");
        assert_eq!(graph["12"]["inputs"]["text"], NEGATIVE_PROMPT);
        assert_eq!(graph["7"]["inputs"]["image"], "s.png");
        assert_eq!(graph["9"]["inputs"]["filename_prefix"], "mine");
    }

    #[test]
    fn template_validation() {
        assert!(matches!(WorkflowTemplate::parse("not json"), Err(AppError::Workflow(_))));
        assert!(matches!(WorkflowTemplate::parse(r#"{"a": 1}"#), Err(AppError::Workflow(_))));
        let no_image = r#"{"1": {"class_type": "LoadImage", "inputs": {"image": "fixed.png"}}}"#;
        assert!(matches!(WorkflowTemplate::parse(no_image), Err(AppError::Workflow(msg)) if msg.contains("{{image}}")));
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let raw = r#"{"1": {"class_type": "LoadImage", "inputs": {"image": "{{image}}", "upload": "{{mask}}"}}}"#;
        let err = WorkflowTemplate::parse(raw).unwrap().render("s.png", "p", &params()).unwrap_err();
        assert!(err.to_string().contains("mask"));
    }

    #[test]
    fn history_states() {
        let pending = json!({});
        assert_eq!(run_state(&pending, "abc"), RunState::Pending);

        let done = json!({"abc": {
            "outputs": {"10": {"images": [
                {"filename": "preview.png", "subfolder": "", "type": "temp"},
                {"filename": "kansei_00001_.png", "subfolder": "", "type": "output"}
            ]}},
            "status": {"status_str": "success", "completed": true, "messages": []}
        }});
        match run_state(&done, "abc") {
            RunState::Finished(images) => assert_eq!(images[0].filename, "kansei_00001_.png"),
            other => panic!("unexpected {:?}", other),
        }

        let failed = json!({"abc": {
            "outputs": {},
            "status": {"status_str": "error", "completed": false, "messages": [
                ["execution_start", {"prompt_id": "abc"}],
                ["execution_error", {"exception_message": "CUDA out of memory\n"}]
            ]}
        }});
        assert_eq!(run_state(&failed, "abc"), RunState::Failed("CUDA out of memory".to_string()));

        let empty = json!({"abc": {"outputs": {}, "status": {"status_str": "success", "completed": true}}});
        assert!(matches!(run_state(&empty, "abc"), RunState::Failed(_)));
    }
}
