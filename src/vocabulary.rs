//! Fixed tone and Kansei vocabularies offered to users.
//!
//! The lists are advisory: the service accepts any string as a selection and
//! only uses membership for logging.

pub const TONES: &[&str] = &[
    "Elegant",
    "Minimalist",
    "Avant-garde",
    "Street",
    "Romantic",
    "Futuristic",
    "Technical",
    "Playful",
    "Luxurious",
    "Sustainable",
];

pub const KANSEI_WORDS: &[&str] = &[
    "Airy",
    "Structured",
    "Fluid",
    "Geometric",
    "Organic",
    "Textured",
    "Matte",
    "Sheer",
    "Layered",
    "Tailored",
    "Architectural",
    "Ergonomic",
    "Technical",
    "Deconstructed",
    "Streamlined",
    "Ornamental",
    "Monochrome",
    "Vibrant",
    "Contrast",
    "Soft",
];

/// Selections that are not part of `vocabulary`, in input order.
pub fn unlisted<'a>(selections: &'a [String], vocabulary: &[&str]) -> Vec<&'a str> {
    selections
        .iter()
        .map(String::as_str)
        .filter(|s| !vocabulary.contains(s))
        .collect()
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SelectionError {
    #[error("Invalid selection '{0}'. Use comma-separated numbers.")]
    Invalid(String),
    #[error("Too many selections! Maximum is {0}.")]
    TooMany(usize),
}

/// Parse a comma-separated list of 1-based indices into `options`.
///
/// Blank input selects nothing. Out-of-range indices are dropped; anything
/// that is not a number rejects the whole input.
pub fn parse_selection(raw: &str, options: &[&str], max: Option<usize>) -> Result<Vec<String>, SelectionError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let mut picked = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let index: usize = part.parse().map_err(|_| SelectionError::Invalid(part.to_string()))?;
        if (1..=options.len()).contains(&index) {
            picked.push(options[index - 1].to_string());
        }
    }
    if let Some(max) = max {
        if picked.len() > max {
            return Err(SelectionError::TooMany(max));
        }
    }
    Ok(picked)
}
