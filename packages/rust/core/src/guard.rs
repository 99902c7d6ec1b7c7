//! Input guard: prompt-injection rejection and input sanitization.
//!
//! Runs before any stage. A rejected field fails the whole request with
//! [`CopilotError::InjectionDetected`]; accepted text is cleaned of control
//! characters, blank-line runs, and excess length.

use std::sync::LazyLock;

use copilot_shared::{CopilotError, Result};
use regex::{Regex, RegexBuilder};

/// Maximum characters kept from a single input field.
pub const MAX_INPUT_LENGTH: usize = 2000;

/// Appended to a field that was cut at [`MAX_INPUT_LENGTH`].
const TRUNCATION_MARKER: &str = "...";

/// Ordered rejection rules. The first matching pattern decides the reason.
const INJECTION_RULES: &[(&str, &str)] = &[
    // Instruction override
    (
        r"ignore\s+(all\s+)?(previous|above|prior)\s+(instructions?|prompts?|rules?)",
        "Attempted to override system instructions",
    ),
    (
        r"disregard\s+(all\s+)?(previous|above|prior)\s+(instructions?|prompts?|rules?)",
        "Attempted to disregard system instructions",
    ),
    (
        r"forget\s+(all\s+)?(previous|above|prior)\s+(instructions?|prompts?|rules?)",
        "Attempted to override system instructions",
    ),
    // Role hijacking
    (r"you\s+are\s+now\s+(a|an|the)\s+", "Attempted role hijacking"),
    (r"act\s+as\s+(a|an|the)\s+", "Attempted role hijacking"),
    (r"pretend\s+(you\s+are|to\s+be)\s+", "Attempted role impersonation"),
    // System prompt extraction
    (
        r"(show|reveal|print|display|output|repeat)\s+.{0,10}(your|the|system)\s+(prompt|instructions?|rules?)",
        "Attempted system prompt extraction",
    ),
    (
        r"what\s+(are|is)\s+your\s+(system\s+)?(prompt|instructions?|rules?)",
        "Attempted system prompt extraction",
    ),
    // Delimiter and tag injection
    (r"```\s*(system|assistant|user)\s*\n", "Attempted delimiter injection"),
    (r"<\s*/?\s*(system|prompt|instruction)", "Attempted XML/tag injection"),
    // Encoding evasion
    (r"base64\s*(encode|decode)", "Attempted encoding evasion"),
    // Data exfiltration
    (
        r"(send|post|fetch|curl|wget|http)\s+.*(api|endpoint|url|webhook)",
        "Attempted data exfiltration",
    ),
];

static INJECTION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    INJECTION_RULES
        .iter()
        .map(|(pattern, reason)| {
            let re = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("valid regex");
            (re, *reason)
        })
        .collect()
});

static CONTROL_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0b-\x1f\x7f]").expect("valid regex"));

static BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Return the reason for the first injection rule `text` matches.
/// Blank text always passes.
pub fn check_injection(text: &str) -> Option<&'static str> {
    if text.trim().is_empty() {
        return None;
    }
    INJECTION_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, reason)| *reason)
}

/// Strip control characters (keeping `\n` and `\t`), collapse 3+ newlines to 2,
/// cut to [`MAX_INPUT_LENGTH`] characters followed by `...`, and trim.
pub fn sanitize(text: &str) -> String {
    let text = CONTROL_CHARS_RE.replace_all(text, "");
    let text = BLANK_RUN_RE.replace_all(&text, "\n\n");

    let capped = match text.char_indices().nth(MAX_INPUT_LENGTH) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.into_owned(),
    };
    capped.trim().to_string()
}

/// Validate both fields, then sanitize them. Neither field is sanitized if
/// either is rejected.
pub fn validate_and_sanitize(task: &str, goal: &str) -> Result<(String, String)> {
    if let Some(reason) = check_injection(task) {
        tracing::warn!(field = "task", reason, "input rejected");
        return Err(CopilotError::injection("task", reason));
    }
    if let Some(reason) = check_injection(goal) {
        tracing::warn!(field = "goal", reason, "input rejected");
        return Err(CopilotError::injection("goal", reason));
    }
    Ok((sanitize(task), sanitize(goal)))
}
