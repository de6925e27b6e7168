//! Pulls structured pieces out of free-form assistant replies.
//!
//! The assistants are instructed to wrap their output in fixed markers
//! (`PROMPT_COMPLETE` / `IMPROVED_PROMPT` ... `END_PROMPT`) or to answer with a
//! bare JSON array. Everything here is a pure function returning an explicit
//! result so callers branch on "found" vs "not found".

use super::types::ImprovedPrompt;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

pub const IMPROVED_START: &str = "IMPROVED_PROMPT";
pub const PROMPT_END: &str = "END_PROMPT";

// First start marker, then the first end marker after it (or end of text).
static PROMPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)PROMPT_COMPLETE\n(.*?)(?:END_PROMPT|\z)").unwrap());

static IMPROVED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)IMPROVED_PROMPT\n(.*?)\nEND_PROMPT").unwrap());

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[^`]*```").unwrap());

// Greedy: first '[' through last ']'.
static ARRAY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\[.*\]").unwrap());

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("marker {0} not found in response")]
    MarkerNotFound(&'static str),

    #[error("{0} block is empty")]
    EmptyBlock(&'static str),

    #[error("No JSON array found in response")]
    NoArrayFound,
}

/// Returns the prompt between `PROMPT_COMPLETE\n` and `END_PROMPT` (or the end
/// of the text), trimmed. `None` when the marker is absent or the block is blank.
pub fn extract_prompt(text: &str) -> Option<String> {
    let caps = PROMPT_RE.captures(text)?;
    let prompt = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    if prompt.is_empty() {
        None
    } else {
        Some(prompt.to_string())
    }
}

/// Splits an evaluator reply into the improved prompt and the explanation that
/// follows `END_PROMPT`. Fenced code blocks are ignored when looking for the
/// prompt block.
pub fn extract_improved_prompt(text: &str) -> Result<ImprovedPrompt, ExtractError> {
    let cleaned = CODE_FENCE_RE.replace_all(text, "");
    let caps = IMPROVED_RE
        .captures(&cleaned)
        .ok_or(ExtractError::MarkerNotFound(IMPROVED_START))?;

    let improved_prompt = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    if improved_prompt.is_empty() {
        return Err(ExtractError::EmptyBlock(IMPROVED_START));
    }

    let block = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
    Ok(ImprovedPrompt {
        improved_prompt: improved_prompt.to_string(),
        explanation: explanation_after(text, block),
    })
}

/// Text of the original reply after the matched block. Falls back to the first
/// `END_PROMPT` when the block straddled a stripped code fence.
fn explanation_after(text: &str, block: &str) -> String {
    let end = match text.find(block) {
        Some(pos) => pos + block.len(),
        None => match text.find(PROMPT_END) {
            Some(pos) => pos + PROMPT_END.len(),
            None => return String::new(),
        },
    };
    text[end..].trim().to_string()
}

/// Returns the raw span from the first `[` to the last `]` for JSON parsing.
pub fn extract_test_case_array(text: &str) -> Result<&str, ExtractError> {
    ARRAY_RE
        .find(text)
        .map(|m| m.as_str())
        .ok_or(ExtractError::NoArrayFound)
}
