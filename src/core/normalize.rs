//! Repairs whatever the test generator produced into exactly five well-formed
//! test cases. Individual records never fail; only a non-array top level does.

use super::types::TestCase;
use crate::error::LabError;
use serde_json::{Map, Value};
use std::collections::HashSet;

pub const TEST_CASE_COUNT: usize = 5;
pub const DEFAULT_DIFFICULTY: u8 = 5;
pub const DEFAULT_ASPECT: &str = "General functionality";
pub const DEFAULT_EXPECTED: &str = "Expected behavior not specified";

pub fn normalize_test_cases(raw: &Value) -> Result<Vec<TestCase>, LabError> {
    let items = raw.as_array().ok_or_else(|| {
        LabError::InvalidTestCases(format!("expected a JSON array, got {}", kind_of(raw)))
    })?;

    if items.len() != TEST_CASE_COUNT {
        log::warn!("Expected {TEST_CASE_COUNT} test cases, got {}", items.len());
    }

    let empty = Map::new();
    let mut seen = HashSet::new();
    let mut cases: Vec<TestCase> = items
        .iter()
        .take(TEST_CASE_COUNT)
        .enumerate()
        .map(|(index, item)| {
            let record = item.as_object().unwrap_or(&empty);
            let position = index + 1;
            let id = text_field(record, "id")
                .filter(|id| !seen.contains(id))
                .unwrap_or_else(|| unique_id(&seen, position));
            seen.insert(id.clone());

            TestCase {
                id,
                question: text_field(record, "question")
                    .unwrap_or_else(|| format!("Test Case {position}")),
                difficulty: coerce_difficulty(record.get("difficulty")),
                testing_aspect: text_field(record, "testingAspect")
                    .unwrap_or_else(|| DEFAULT_ASPECT.to_string()),
                expected_behavior: text_field(record, "expectedBehavior")
                    .unwrap_or_else(|| DEFAULT_EXPECTED.to_string()),
                actual_response: String::new(),
                rating: None,
                comments: None,
            }
        })
        .collect();

    while cases.len() < TEST_CASE_COUNT {
        let position = cases.len() + 1;
        let id = unique_id(&seen, position);
        seen.insert(id.clone());
        cases.push(TestCase {
            id,
            question: format!("Additional Test Case {position}"),
            difficulty: DEFAULT_DIFFICULTY,
            testing_aspect: DEFAULT_ASPECT.to_string(),
            expected_behavior: DEFAULT_EXPECTED.to_string(),
            actual_response: String::new(),
            rating: None,
            comments: None,
        });
    }

    Ok(cases)
}

/// Rounds to the nearest integer and clamps into 1..=10; non-numbers get the default.
pub fn coerce_difficulty(value: Option<&Value>) -> u8 {
    match value.and_then(Value::as_f64) {
        Some(n) => n.round().clamp(1.0, 10.0) as u8,
        None => DEFAULT_DIFFICULTY,
    }
}

fn text_field(record: &Map<String, Value>, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn unique_id(seen: &HashSet<String>, position: usize) -> String {
    let base = format!("test-{position}");
    if !seen.contains(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !seen.contains(candidate))
        .unwrap_or(base)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(n: usize) -> Value {
        json!({
            "id": format!("case-{n}"),
            "question": format!("Question {n}?"),
            "difficulty": n,
            "testingAspect": "Tone",
            "expectedBehavior": "Stays polite",
            "actualResponse": "already answered"
        })
    }

    #[test]
    fn always_returns_five_cases() {
        for len in [0, 3, 5, 12] {
            let raw = Value::Array((1..=len).map(record).collect());
            let cases = normalize_test_cases(&raw).unwrap();
            assert_eq!(cases.len(), TEST_CASE_COUNT, "input length {len}");
        }
    }

    #[test]
    fn kept_prefix_preserves_order_and_padding_is_synthesized() {
        let raw = Value::Array((1..=3).map(record).collect());
        let cases = normalize_test_cases(&raw).unwrap();
        let ids: Vec<&str> = cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["case-1", "case-2", "case-3", "test-4", "test-5"]);
        assert_eq!(cases[3].question, "Additional Test Case 4");
        assert_eq!(cases[4].testing_aspect, DEFAULT_ASPECT);
    }

    #[test]
    fn actual_response_is_always_cleared() {
        let raw = Value::Array((1..=5).map(record).collect());
        let cases = normalize_test_cases(&raw).unwrap();
        assert!(cases.iter().all(|c| c.actual_response.is_empty()));
        assert!(cases.iter().all(|c| c.rating.is_none() && c.comments.is_none()));
    }

    #[test]
    fn normalizing_twice_is_stable() {
        let raw = json!([record(1), {"question": "only a question"}, 42, null]);
        let once = normalize_test_cases(&raw).unwrap();
        let twice = normalize_test_cases(&serde_json::to_value(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn difficulty_is_rounded_and_clamped() {
        let inputs = [json!(-5), json!(0), json!(1), json!(10), json!(11), json!(99), json!("abc")];
        let outputs: Vec<u8> = inputs.iter().map(|v| coerce_difficulty(Some(v))).collect();
        assert_eq!(outputs, [1, 1, 1, 10, 10, 10, 5]);
        assert_eq!(coerce_difficulty(Some(&json!(6.6))), 7);
        assert_eq!(coerce_difficulty(None), DEFAULT_DIFFICULTY);
    }

    #[test]
    fn malformed_elements_become_default_filled_cases() {
        let raw = json!(["just a string", {"id": "", "question": "   "}]);
        let cases = normalize_test_cases(&raw).unwrap();
        assert_eq!(cases[0].id, "test-1");
        assert_eq!(cases[0].question, "Test Case 1");
        assert_eq!(cases[1].id, "test-2");
        assert_eq!(cases[1].question, "Test Case 2");
        assert_eq!(cases[1].expected_behavior, DEFAULT_EXPECTED);
        assert_eq!(cases[1].difficulty, DEFAULT_DIFFICULTY);
    }

    #[test]
    fn duplicate_ids_are_made_unique() {
        let raw = json!([{"id": "test-2"}, {"id": "test-2"}, {"id": "x"}]);
        let cases = normalize_test_cases(&raw).unwrap();
        let ids: Vec<&str> = cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["test-2", "test-2-2", "x", "test-4", "test-5"]);
    }

    #[test]
    fn non_array_top_level_is_rejected() {
        let err = normalize_test_cases(&json!({"testCases": []})).unwrap_err();
        assert!(err.to_string().contains("an object"));
        assert!(normalize_test_cases(&json!("[]")).is_err());
    }
}
