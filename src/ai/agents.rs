use super::client::{AssistantApi, RunRequest};
use super::poll::{CancelHandle, CancelToken, PollPolicy, wait_for_run};
use super::prompts;
use super::schema_utils;
use crate::config::AssistantIds;
use crate::core::extract;
use crate::core::normalize::normalize_test_cases;
use crate::core::types::{ChatMessage, ImprovedPrompt, Role, TestCase, TestCaseDraft};
use crate::error::LabError;
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssistantRole {
    PromptEngineer,
    TestGenerator,
    Evaluator,
    TestExecutor,
}

impl FromStr for AssistantRole {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROMPT_ENGINEER" => Ok(Self::PromptEngineer),
            "TEST_GENERATOR" => Ok(Self::TestGenerator),
            "EVALUATOR" => Ok(Self::Evaluator),
            "TEST_EXECUTOR" => Ok(Self::TestExecutor),
            other => Err(LabError::UnknownAssistant(other.to_string())),
        }
    }
}

impl fmt::Display for AssistantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PromptEngineer => "PROMPT_ENGINEER",
            Self::TestGenerator => "TEST_GENERATOR",
            Self::Evaluator => "EVALUATOR",
            Self::TestExecutor => "TEST_EXECUTOR",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub thread_id: String,
    /// Newest first.
    pub messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn latest_assistant_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTests {
    pub thread_id: String,
    pub test_cases: Vec<TestCase>,
}

/// A test case with its response, and the thread the executor answered on.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedTest {
    pub thread_id: String,
    pub test_case: TestCase,
}

/// The four hosted assistants, each behind one operation.
#[derive(Clone)]
pub struct AssistantSwarm {
    api: Arc<dyn AssistantApi>,
    ids: AssistantIds,
    poll: PollPolicy,
}

impl AssistantSwarm {
    pub fn new(api: Arc<dyn AssistantApi>, ids: AssistantIds, poll: PollPolicy) -> Self {
        Self { api, ids, poll }
    }

    pub fn assistant_id(&self, role: AssistantRole) -> &str {
        match role {
            AssistantRole::PromptEngineer => &self.ids.prompt_engineer,
            AssistantRole::TestGenerator => &self.ids.test_generator,
            AssistantRole::Evaluator => &self.ids.evaluator,
            AssistantRole::TestExecutor => &self.ids.test_executor,
        }
    }

    async fn open_thread(&self, thread_id: Option<&str>) -> Result<String, LabError> {
        match thread_id {
            Some(id) => self.api.retrieve_thread(id).await,
            None => self.api.create_thread().await,
        }
    }

    /// Starts a run on the thread, waits for it, and returns the thread's
    /// messages newest first.
    async fn run_to_completion(
        &self,
        thread_id: &str,
        request: RunRequest,
        cancel: &CancelToken,
    ) -> Result<Vec<ChatMessage>, LabError> {
        let run = self.api.create_run(thread_id, &request).await?;
        log::info!("   -> Run {} started on {}", run.id, thread_id);
        wait_for_run(self.api.as_ref(), thread_id, &run.id, &self.poll, cancel).await?;
        self.api.list_messages(thread_id).await
    }

    async fn newest_reply(
        &self,
        thread_id: &str,
        request: RunRequest,
        cancel: &CancelToken,
    ) -> Result<String, LabError> {
        let messages = self.run_to_completion(thread_id, request, cancel).await?;
        let text = messages
            .into_iter()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(LabError::EmptyResponse(format!("no text content on thread {thread_id}")));
        }
        Ok(text)
    }

    pub async fn converse(
        &self,
        thread_id: Option<&str>,
        message: &str,
        cancel: &CancelToken,
    ) -> Result<Conversation, LabError> {
        let thread_id = self.open_thread(thread_id).await?;
        log::info!("💬 Prompt engineer on thread {thread_id}");
        self.api.post_message(&thread_id, Role::User, message).await?;

        let request = RunRequest {
            assistant_id: self.ids.prompt_engineer.clone(),
            instructions: Some(prompts::ENGINEER_RUN_INSTRUCTIONS.to_string()),
            max_completion_tokens: None,
        };
        let messages = self.run_to_completion(&thread_id, request, cancel).await?;
        log::info!("   -> {} messages on thread", messages.len());
        Ok(Conversation { thread_id, messages })
    }

    pub async fn generate_tests(
        &self,
        prompt: &str,
        thread_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<GeneratedTests, LabError> {
        let thread_id = self.open_thread(thread_id).await?;
        log::info!("🧪 Generating test cases on thread {thread_id}");

        let schema = schema_utils::compact_schema(schema_for!(Vec<TestCaseDraft>))?;
        let request_text = format!(
            "{}\n\nREQUIRED SCHEMA:\n{}\n\nPrompt to test:\n{}",
            prompts::TEST_GENERATION_REQUEST,
            serde_json::to_string_pretty(&schema)?,
            prompt
        );
        self.api.post_message(&thread_id, Role::User, &request_text).await?;

        let request = RunRequest {
            assistant_id: self.ids.test_generator.clone(),
            instructions: Some(prompts::TEST_GENERATOR_RUN_INSTRUCTIONS.to_string()),
            max_completion_tokens: None,
        };
        let text = self.newest_reply(&thread_id, request, cancel).await?;
        log::debug!("Raw test generator reply: {text}");

        let array = extract::extract_test_case_array(&text)?;
        let raw: Value = serde_json::from_str(array).map_err(|e| {
            LabError::InvalidTestCases(format!("Failed to parse test cases JSON: {e}"))
        })?;
        let test_cases = normalize_test_cases(&raw)?;
        log::info!("   -> Generated {} test cases", test_cases.len());

        Ok(GeneratedTests { thread_id, test_cases })
    }

    /// Asks the executor the test question with the candidate prompt as its
    /// instructions, on a thread of its own.
    pub async fn execute_test(
        &self,
        prompt: &str,
        test_case: &TestCase,
        cancel: &CancelToken,
    ) -> Result<ExecutedTest, LabError> {
        let thread_id = self.api.create_thread().await?;
        log::info!("▶️  Executing {} on thread {thread_id}", test_case.id);
        self.api.post_message(&thread_id, Role::User, &test_case.question).await?;

        let instructions = if prompt.trim().is_empty() {
            prompts::EXECUTOR_CONCISENESS.to_string()
        } else {
            format!("{}\n\n{}", prompt.trim(), prompts::EXECUTOR_CONCISENESS)
        };
        let request = RunRequest {
            assistant_id: self.ids.test_executor.clone(),
            instructions: Some(instructions),
            max_completion_tokens: Some(prompts::EXECUTOR_MAX_TOKENS),
        };
        let response = self.newest_reply(&thread_id, request, cancel).await?;

        Ok(ExecutedTest {
            thread_id,
            test_case: TestCase { actual_response: response, ..test_case.clone() },
        })
    }

    /// Runs every case concurrently. The batch is all-or-nothing: the first
    /// failure cancels the remaining executions, and each of them cancels its
    /// upstream run before the batch returns.
    pub async fn run_all_tests(
        &self,
        prompt: &str,
        test_cases: &[TestCase],
        cancel: &CancelToken,
    ) -> Result<Vec<TestCase>, LabError> {
        log::info!("🧪 Running {} test cases", test_cases.len());
        let batch = CancelHandle::new();
        let mut join_set = JoinSet::new();

        for (index, case) in test_cases.iter().enumerate() {
            let swarm = self.clone();
            let prompt = prompt.to_string();
            let case = case.clone();
            let token = batch.token();
            join_set.spawn(async move {
                let result = swarm.execute_test(&prompt, &case, &token).await;
                (index, result)
            });
        }

        let mut parent = cancel.clone();
        let mut stopping = false;
        let mut failure: Option<LabError> = None;
        let mut results: Vec<Option<TestCase>> = vec![None; test_cases.len()];

        loop {
            let joined = tokio::select! {
                biased;
                joined = join_set.join_next() => joined,
                _ = parent.cancelled(), if !stopping => {
                    stopping = true;
                    batch.cancel();
                    continue;
                }
            };
            let Some(joined) = joined else { break };

            let outcome = match joined {
                Ok((index, Ok(done))) => {
                    results[index] = Some(done.test_case);
                    continue;
                }
                Ok((index, Err(e))) => {
                    log::error!("   ❌ Test '{}' failed: {e}", test_cases[index].id);
                    e
                }
                Err(e) => LabError::TaskFailed(format!("test execution task failed: {e}")),
            };
            if failure.is_none() {
                failure = Some(outcome);
            }
            if !stopping {
                stopping = true;
                batch.cancel();
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(results.into_iter().flatten().collect()),
        }
    }

    pub async fn improve_prompt(
        &self,
        current_prompt: &str,
        test_cases: &[TestCase],
        cancel: &CancelToken,
    ) -> Result<ImprovedPrompt, LabError> {
        let thread_id = self.api.create_thread().await?;
        log::info!("🔧 Evaluator improving prompt on thread {thread_id}");

        let request_text = format!(
            "You are a prompt engineering expert. Your task is to analyze test results and suggest improvements to the prompt.\n\n\
             Current prompt:\n{}\n\nTest Results:\n{}\n\n{}",
            current_prompt,
            format_rated_results(test_cases),
            prompts::EVALUATION_INSTRUCTIONS
        );
        self.api.post_message(&thread_id, Role::User, &request_text).await?;

        let request = RunRequest {
            assistant_id: self.ids.evaluator.clone(),
            ..Default::default()
        };
        let text = self.newest_reply(&thread_id, request, cancel).await?;
        extract::extract_improved_prompt(&text).map_err(|e| {
            log::error!("Failed to extract prompt. Full response: {text}");
            LabError::from(e)
        })
    }

    pub async fn refine_prompt(
        &self,
        original_prompt: &str,
        test_cases: &[TestCase],
        cancel: &CancelToken,
    ) -> Result<String, LabError> {
        let thread_id = self.api.create_thread().await?;
        log::info!("🔧 Refining prompt on thread {thread_id}");

        let request_text = format!(
            "Please analyze this prompt and its test results, then provide an improved version.\n\n\
             Original Prompt:\n{}\n\nTest Results:\n{}\n\n{}",
            original_prompt,
            serde_json::to_string_pretty(&evaluation_summary(test_cases))?,
            prompts::REFINEMENT_FOCUS
        );
        self.api.post_message(&thread_id, Role::User, &request_text).await?;

        let request = RunRequest {
            assistant_id: self.ids.test_generator.clone(),
            instructions: Some(prompts::REFINEMENT_RUN_INSTRUCTIONS.to_string()),
            max_completion_tokens: None,
        };
        let text = self.newest_reply(&thread_id, request, cancel).await?;
        Ok(text.trim().to_string())
    }

    pub async fn update_instructions(
        &self,
        role: AssistantRole,
        instructions: &str,
    ) -> Result<(), LabError> {
        let assistant_id = self.assistant_id(role);
        log::info!("📝 Updating instructions of {role} ({assistant_id})");
        self.api.update_assistant(assistant_id, instructions).await
    }
}

/// Only rated cases go to the evaluator.
fn format_rated_results(test_cases: &[TestCase]) -> String {
    test_cases
        .iter()
        .filter_map(|t| {
            let rating = t.rating?;
            Some(format!(
                "Test: {}\nRating: {}/10\nComments: {}\nTesting Aspect: {}\nExpected Behavior: {}\nActual Response: {}",
                t.question,
                rating,
                t.comments.as_deref().filter(|c| !c.is_empty()).unwrap_or("No comments"),
                t.testing_aspect,
                t.expected_behavior,
                t.actual_response
            ))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn evaluation_summary(test_cases: &[TestCase]) -> Value {
    Value::Array(
        test_cases
            .iter()
            .map(|t| {
                json!({
                    "question": t.question,
                    "rating": t.rating.unwrap_or(0),
                    "comments": t.comments.as_deref().filter(|c| !c.is_empty()).unwrap_or("No comments provided"),
                    "expectedBehavior": t.expected_behavior,
                    "actualResponse": t.actual_response,
                })
            })
            .collect(),
    )
}
