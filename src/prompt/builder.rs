//! Instruction and final-prompt text for the design pipeline.
//!
//! Both functions are pure. `build_instruction` produces the request sent to
//! the language model; `refine_for_target` turns the model's answer into the
//! prompt handed to the image backend.

/// Rendering directives appended to every final prompt.
pub const TARGET_SUFFIX: &str = " --output_format: CAD-style technical line drawing; monochrome or single-color palette; \
high-contrast line art; include front/side/back views; numbered annotations for seams and measurements; \
no photographic textures; focus on construction and pattern clarity.";

pub fn build_instruction<T, K>(tones: &[T], keywords: &[K]) -> String
where
    T: AsRef<str>,
    K: AsRef<str>,
{
    let tone_clause = join_clause(tones);
    let kansei_clause = join_clause(keywords);

    format!(
        "You are a prompt engineer for fashion CAD-style sketch generation. \
Given the following selected tones: {tone_clause}. \
And the following Kansei (sensory/feeling) keywords: {kansei_clause}. \
Produce a single, compact image-generation prompt (1-2 paragraphs, 2-4 sentences) \
that an image model can use to create a CAD-style technical sketch of a fashion garment. \
If given an image, use the image as a reference. \
Include: silhouette, garment type, material suggestions, notable construction details, \
stitching/topstitching, seam placement, recommended line weights, front/side/back views, \
a short palette, and any annotations/measurements that help a patternmaker. \
Prioritize clarity and technical cues; keep creative tone influenced by the selected tones."
    )
}

/// Trim the model text and append [`TARGET_SUFFIX`] on a new line.
///
/// Not idempotent: each call appends the suffix again.
pub fn refine_for_target(model_text: &str) -> String {
    format!("{}\n{}", model_text.trim(), TARGET_SUFFIX)
}

fn join_clause<S: AsRef<str>>(items: &[S]) -> String {
    items.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(", ")
}
