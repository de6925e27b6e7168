use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub question: String,
    pub difficulty: u8,
    pub testing_aspect: String,
    pub expected_behavior: String,
    #[serde(default)]
    pub actual_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

impl TestCase {
    pub fn is_rated(&self) -> bool {
        self.rating.is_some()
    }
}

/// The record shape the test generator is asked to emit. Only used to
/// describe the expected output; parsing goes through the normalizer.
#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseDraft {
    #[schemars(description = "Unique id such as 'test-1'.")]
    pub id: String,
    #[schemars(description = "The message a user would send to the prompt under test.")]
    pub question: String,
    #[schemars(description = "Integer from 1 (trivial) to 10 (adversarial).")]
    pub difficulty: u8,
    #[schemars(description = "What aspect of the prompt this case exercises.")]
    pub testing_aspect: String,
    #[schemars(description = "What a good response should do.")]
    pub expected_behavior: String,
    #[schemars(description = "Always an empty string.")]
    pub actual_response: String,
}

/// An improved prompt split from the evaluator's explanation of the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovedPrompt {
    pub improved_prompt: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of a conversation thread, with its text parts concatenated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Unix seconds.
    pub created_at: i64,
}
