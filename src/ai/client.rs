use crate::config::ApiSettings;
use crate::core::types::{ChatMessage, Role};
use crate::error::LabError;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tokio::time::{Duration, sleep};

const MAX_READ_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Failed
                | RunStatus::Cancelled
                | RunStatus::Expired
                | RunStatus::Incomplete
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunState {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunRequest {
    pub assistant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantTool {
    CodeInterpreter,
}

/// Body of an assistant creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantDefinition {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: Vec<AssistantTool>,
}

/// The hosted assistant service: threads of messages, and runs of a named
/// assistant against a thread.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn create_thread(&self) -> Result<String, LabError>;
    async fn retrieve_thread(&self, thread_id: &str) -> Result<String, LabError>;
    async fn post_message(&self, thread_id: &str, role: Role, content: &str) -> Result<(), LabError>;
    async fn create_run(&self, thread_id: &str, request: &RunRequest) -> Result<RunState, LabError>;
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<RunState, LabError>;
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), LabError>;
    /// Newest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessage>, LabError>;
    async fn update_assistant(&self, assistant_id: &str, instructions: &str) -> Result<(), LabError>;
    /// Returns the id of the new assistant.
    async fn create_assistant(&self, definition: &AssistantDefinition) -> Result<String, LabError>;
}

// --- Wire types ------------------------------------------------------------

#[derive(Deserialize)]
struct ObjectId {
    id: String,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<MessageObject>,
}

#[derive(Deserialize)]
struct MessageObject {
    id: String,
    role: Role,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: TextValue },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct TextValue {
    value: String,
}

impl From<MessageObject> for ChatMessage {
    fn from(msg: MessageObject) -> Self {
        let content = msg
            .content
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.value),
                ContentPart::Other => None,
            })
            .collect::<String>();
        ChatMessage {
            id: msg.id,
            role: msg.role,
            content,
            created_at: msg.created_at,
        }
    }
}

// --- HTTP client -----------------------------------------------------------

pub struct AssistantsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    org_id: Option<String>,
}

impl AssistantsClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, LabError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(settings.http_timeout).build()?,
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
            org_id: settings.org_id.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2");
        match &self.org_id {
            Some(org) => builder.header("OpenAI-Organization", org),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, LabError> {
        let res = builder.send().await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            log::error!("Assistant API error {status}: {body}");
            return Err(LabError::Upstream { status: status.as_u16(), body });
        }

        Ok(res.json().await?)
    }

    /// Reads are idempotent, so transient failures are retried with backoff.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, LabError> {
        let mut attempt = 1;
        loop {
            match self.send(self.request(Method::GET, path)).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < MAX_READ_ATTEMPTS && is_transient(&e) => {
                    log::warn!("GET {path} attempt {attempt}/{MAX_READ_ATTEMPTS} failed: {e}");
                    sleep(Duration::from_secs(2u64.pow(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_transient(err: &LabError) -> bool {
    match err {
        LabError::ApiError(e) => e.is_timeout() || e.is_connect(),
        LabError::Upstream { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

#[async_trait]
impl AssistantApi for AssistantsClient {
    async fn create_thread(&self) -> Result<String, LabError> {
        let thread: ObjectId = self
            .send(self.request(Method::POST, "/threads").json(&json!({})))
            .await?;
        Ok(thread.id)
    }

    async fn retrieve_thread(&self, thread_id: &str) -> Result<String, LabError> {
        let thread: ObjectId = self.get(&format!("/threads/{thread_id}")).await?;
        Ok(thread.id)
    }

    async fn post_message(&self, thread_id: &str, role: Role, content: &str) -> Result<(), LabError> {
        let payload = json!({ "role": role.as_str(), "content": content });
        let _: ObjectId = self
            .send(self.request(Method::POST, &format!("/threads/{thread_id}/messages")).json(&payload))
            .await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, request: &RunRequest) -> Result<RunState, LabError> {
        self.send(self.request(Method::POST, &format!("/threads/{thread_id}/runs")).json(request))
            .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<RunState, LabError> {
        self.get(&format!("/threads/{thread_id}/runs/{run_id}")).await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), LabError> {
        let _: RunState = self
            .send(self.request(Method::POST, &format!("/threads/{thread_id}/runs/{run_id}/cancel")))
            .await?;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessage>, LabError> {
        let list: MessageList = self
            .get(&format!("/threads/{thread_id}/messages?order=desc&limit=100"))
            .await?;
        Ok(list.data.into_iter().map(ChatMessage::from).collect())
    }

    async fn update_assistant(&self, assistant_id: &str, instructions: &str) -> Result<(), LabError> {
        let payload = json!({ "instructions": instructions });
        let _: ObjectId = self
            .send(self.request(Method::POST, &format!("/assistants/{assistant_id}")).json(&payload))
            .await?;
        Ok(())
    }

    async fn create_assistant(&self, definition: &AssistantDefinition) -> Result<String, LabError> {
        let assistant: ObjectId = self
            .send(self.request(Method::POST, "/assistants").json(definition))
            .await?;
        Ok(assistant.id)
    }
}
