//! Typed extraction of JSON from model output.
//!
//! Models often wrap their answer in a Markdown code fence or add a sentence
//! before it. We strip one fence, locate the first value that `serde_json`
//! itself accepts as a complete object or array, decode it into the target
//! type and run its `garde` rules. Anything that does not fit is an error.

use garde::Validate;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("No JSON object or array found in model output")]
    NoJson,

    #[error("JSON does not match expected shape: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("JSON failed validation: {0}")]
    Invalid(String),
}

/// Decode and validate the first JSON object/array in `raw` as `T`.
pub fn extract<T>(raw: &str) -> Result<T, ExtractError>
where
    T: DeserializeOwned + Validate,
    T::Context: Default,
{
    let value = first_json_value(strip_code_fence(raw)).ok_or(ExtractError::NoJson)?;
    let typed: T = serde_json::from_value(value)?;
    typed
        .validate()
        .map_err(|report| ExtractError::Invalid(report.to_string()))?;
    Ok(typed)
}

/// Body of the first fenced block if there is one, else the input.
fn strip_code_fence(raw: &str) -> &str {
    let Some(open) = raw.find("```") else {
        return raw.trim();
    };
    let after_open = &raw[open + 3..];
    // Skip the info string ("json", "JSON", ...) up to the end of the fence line.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// The first complete JSON object or array, parsed by serde_json's streaming
/// deserializer from each candidate opening bracket in turn.
fn first_json_value(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .find_map(|(start, _)| {
            let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) if value.is_object() || value.is_array() => Some(value),
                _ => None,
            }
        })
}
