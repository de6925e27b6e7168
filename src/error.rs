use crate::core::extract::ExtractError;
use crate::core::workflow::WorkflowError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LabError {
    #[error("API Error: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Assistant API returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Run {run_id} ended as '{status}': {message}")]
    RunFailed {
        run_id: String,
        status: String,
        message: String,
    },

    #[error("Run {0} did not finish before the deadline")]
    RunTimedOut(String),

    #[error("Run {0} was cancelled")]
    Cancelled(String),

    #[error("Extraction Failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("Invalid test cases: {0}")]
    InvalidTestCases(String),

    #[error("No response received: {0}")]
    EmptyResponse(String),

    #[error("Workflow Error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("{0} not configured")]
    UnknownAssistant(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("No '{0}' section in the instructions file")]
    MissingInstructions(String),
}
