//! Structured-value recovery from generated text.
//!
//! Generated output is expected to be JSON but often arrives wrapped in a
//! code fence, prefixed with conversational text, or carrying trailing
//! commas. [`parse_structured`] is the single place those artifacts are
//! tolerated; every stage that expects structured output goes through it.

use std::sync::LazyLock;

use copilot_shared::{CopilotError, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)```").expect("valid regex"));

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

/// Body of the first fenced block, or the text unchanged when there is none.
fn strip_code_fence(text: &str) -> &str {
    match FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim(),
        None => text,
    }
}

/// Recover the first JSON value from `raw`.
///
/// Fallback chain: strip fence, drop trailing commas, parse directly, then
/// stream-parse from the earliest `{` or `[` (trying the other marker if that
/// fails), ignoring whatever follows the value.
pub fn parse_structured(raw: &str) -> Result<Value> {
    let unfenced = strip_code_fence(raw.trim());
    let cleaned = TRAILING_COMMA_RE.replace_all(unfenced, "$1");

    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return Ok(value);
    }

    let mut starts: Vec<usize> = ['{', '[']
        .iter()
        .filter_map(|marker| cleaned.find(*marker))
        .collect();
    starts.sort_unstable();

    for start in starts {
        let mut stream = serde_json::Deserializer::from_str(&cleaned[start..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            return Ok(value);
        }
    }

    Err(CopilotError::malformed(
        "no valid JSON found in generated output",
        cleaned.into_owned(),
    ))
}

/// Recover a value and deserialize it into a fixed-shape record.
/// A shape mismatch is also a [`CopilotError::MalformedOutput`].
pub fn parse_as<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let value = parse_structured(raw)?;
    serde_json::from_value(value.clone())
        .map_err(|e| CopilotError::malformed(format!("unexpected shape: {e}"), value.to_string()))
}
