use super::types::TestCase;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

pub const MARKDOWN_FILE_NAME: &str = "prompt-engineering-results.md";
pub const JSON_FILE_NAME: &str = "prompt-engineering-results.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub question: String,
    pub expected_behavior: String,
    pub actual_response: String,
    pub rating: Option<u8>,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsBundle {
    pub final_prompt: String,
    pub test_results: Vec<TestResult>,
    pub timestamp: String,
}

impl ResultsBundle {
    pub fn new(prompt: &str, cases: &[TestCase], at: DateTime<Utc>) -> Self {
        Self {
            final_prompt: prompt.to_string(),
            test_results: cases
                .iter()
                .map(|t| TestResult {
                    question: t.question.clone(),
                    expected_behavior: t.expected_behavior.clone(),
                    actual_response: t.actual_response.clone(),
                    rating: t.rating,
                    comments: t.comments.clone(),
                })
                .collect(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Mean of the defined ratings rounded to one decimal; 0 when nothing is rated.
pub fn average_rating(cases: &[TestCase]) -> f64 {
    let ratings: Vec<f64> = cases.iter().filter_map(|t| t.rating.map(f64::from)).collect();
    if ratings.is_empty() {
        return 0.0;
    }
    let mean = ratings.iter().sum::<f64>() / ratings.len() as f64;
    (mean * 10.0).round() / 10.0
}

/// Distinct testing aspects in first-seen order.
pub fn aspect_coverage(cases: &[TestCase]) -> String {
    let mut aspects: Vec<&str> = Vec::new();
    for case in cases {
        if !aspects.contains(&case.testing_aspect.as_str()) {
            aspects.push(&case.testing_aspect);
        }
    }
    aspects.join(", ")
}

pub fn render_markdown(prompt: &str, cases: &[TestCase], at: DateTime<Utc>) -> String {
    let mut out = format!("# Prompt\n{prompt}\n\n# Test Cases\n");

    for case in cases {
        out.push_str(&format!("\n### Test Case: {}\n", case.question));
        out.push_str(&format!("- Testing Aspect: {}\n", case.testing_aspect));
        out.push_str(&format!("- Difficulty: {}\n", case.difficulty));
        out.push_str(&format!("- Expected Behavior: {}\n", case.expected_behavior));
        if !case.actual_response.is_empty() {
            out.push_str(&format!("- Actual Response: {}\n", case.actual_response));
        }
        if let Some(rating) = case.rating {
            out.push_str(&format!("- Rating: {rating}/10\n"));
        }
        if let Some(comments) = case.comments.as_deref().filter(|c| !c.is_empty()) {
            out.push_str(&format!("- Comments: {comments}\n"));
        }
    }

    out.push_str("\n# Summary\n");
    out.push_str(&format!("- Average Rating: {:.1}/10\n", average_rating(cases)));
    out.push_str(&format!("- Coverage: {}\n", aspect_coverage(cases)));
    out.push_str(&format!(
        "- Exported: {}\n",
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    out
}
