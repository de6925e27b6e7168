//! Word-level, index-aligned diff between two prompt versions.
//!
//! Tokens are compared by position, not by longest common subsequence, so an
//! insertion early in the text shows every later token as changed. That is the
//! display the prompt-refinement view has always produced.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Same,
    Removed,
    Added,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSegment {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
}

impl DiffSegment {
    fn new(text: &str, kind: SegmentKind) -> Self {
        Self { text: text.to_string(), kind }
    }
}

/// Splits into alternating word / whitespace-run tokens. Leading or trailing
/// whitespace yields an empty word token at that end, so positions line up
/// the same way for both inputs.
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for m in WHITESPACE_RE.find_iter(text) {
        tokens.push(&text[last..m.start()]);
        tokens.push(m.as_str());
        last = m.end();
    }
    tokens.push(&text[last..]);
    tokens
}

fn has_visible(token: &str) -> bool {
    token.chars().any(|c| !c.is_whitespace())
}

fn has_whitespace(token: &str) -> bool {
    token.chars().any(char::is_whitespace)
}

pub fn diff_prompts(original: &str, refined: &str) -> Vec<DiffSegment> {
    let left = tokenize(original);
    let right = tokenize(refined);
    let mut segments = Vec::with_capacity(left.len().max(right.len()) * 2);

    for i in 0..left.len().max(right.len()) {
        match (left.get(i), right.get(i)) {
            (Some(a), Some(b)) if a == b => segments.push(DiffSegment::new(a, SegmentKind::Same)),
            (Some(a), Some(b)) => {
                if has_visible(a) {
                    segments.push(DiffSegment::new(a, SegmentKind::Removed));
                }
                if has_visible(b) {
                    segments.push(DiffSegment::new(b, SegmentKind::Added));
                } else if has_whitespace(a) {
                    segments.push(DiffSegment::new(a, SegmentKind::Same));
                }
            }
            (Some(a), None) => segments.push(DiffSegment::new(a, SegmentKind::Removed)),
            (None, Some(b)) => segments.push(DiffSegment::new(b, SegmentKind::Added)),
            (None, None) => {}
        }
    }

    segments.retain(|s| !s.text.is_empty());
    segments
}

/// Inline plain-text rendering: removals as `[-text-]`, additions as `{+text+}`.
pub fn render_inline(segments: &[DiffSegment]) -> String {
    segments
        .iter()
        .map(|s| match s.kind {
            SegmentKind::Same => s.text.clone(),
            SegmentKind::Removed => format!("[-{}-]", s.text),
            SegmentKind::Added => format!("{{+{}+}}", s.text),
        })
        .collect()
}
