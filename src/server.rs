//! HTTP surface: stateless pass-through endpoints for each assistant
//! capability, plus server-held sessions that run the whole workflow.

use crate::ai::agents::AssistantRole;
use crate::ai::poll::CancelToken;
use crate::core::diff::diff_prompts;
use crate::core::export::{JSON_FILE_NAME, MARKDOWN_FILE_NAME, ResultsBundle, render_markdown};
use crate::core::types::TestCase;
use crate::core::workflow::WorkflowError;
use crate::error::LabError;
use crate::orchestrator::{Orchestrator, SessionSnapshot};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator, start_time: Instant::now() }
    }
}

type AppStateArc = Arc<AppState>;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl From<LabError> for ApiError {
    fn from(err: LabError) -> Self {
        let status = match &err {
            LabError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            LabError::Workflow(WorkflowError::UnknownTestCase(_)) => StatusCode::NOT_FOUND,
            LabError::Workflow(WorkflowError::InvalidRating(_)) => StatusCode::BAD_REQUEST,
            LabError::Workflow(_) => StatusCode::CONFLICT,
            LabError::UnknownAssistant(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("Request failed: {err}");
        }
        Self { status, message: err.to_string() }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    Ok(payload?.0)
}

fn required<T>(value: Option<T>, message: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::bad_request(message))
}

fn required_text(value: Option<String>, message: &str) -> ApiResult<String> {
    required(value.filter(|v| !v.trim().is_empty()), message)
}

fn attachment(content_type: &'static str, file_name: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        body,
    )
        .into_response()
}

fn json_attachment(bundle: &ResultsBundle) -> ApiResult<Response> {
    let text = bundle.to_json().map_err(LabError::from)?;
    Ok(attachment("application/json", JSON_FILE_NAME, text))
}

fn markdown_attachment(document: String) -> Response {
    attachment("text/markdown; charset=utf-8", MARKDOWN_FILE_NAME, document)
}

pub fn router(state: AppStateArc) -> Router {
    Router::new()
        .merge(assistant_routes())
        .merge(artifact_routes())
        .merge(session_routes())
        .route("/api/health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
}

pub async fn run(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let app = router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("🌐 Listening on http://{addr}");
    axum::serve(listener, app).await
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();
    let res = next.run(req).await;
    log::info!("{method} {path} -> {} ({} ms)", res.status().as_u16(), started.elapsed().as_millis());
    res
}

async fn health(State(state): State<AppStateArc>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.orchestrator.session_count().await,
        "uptimeSecs": state.start_time.elapsed().as_secs(),
    }))
}

// ============================================================================
// Assistant Routes
// ============================================================================

fn assistant_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/generate-tests", post(generate_tests))
        .route("/api/execute-test", post(execute_test))
        .route("/api/run-tests", post(run_tests))
        .route("/api/improve-prompt", post(improve_prompt))
        .route("/api/refine-prompt", post(refine_prompt))
        .route("/api/update-assistant", post(update_assistant))
        .route("/api/store-evaluation", post(store_evaluation))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    message: Option<String>,
    thread_id: Option<String>,
}

async fn chat(
    State(state): State<AppStateArc>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    let message = required_text(req.message, "Message is required")?;
    let conversation = state
        .orchestrator
        .swarm()
        .converse(req.thread_id.as_deref(), &message, &CancelToken::never())
        .await?;
    Ok(Json(json!(conversation)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateTestsRequest {
    prompt: Option<String>,
    thread_id: Option<String>,
}

async fn generate_tests(
    State(state): State<AppStateArc>,
    payload: Result<Json<GenerateTestsRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    let prompt = required_text(req.prompt, "Prompt is required")?;
    let generated = state
        .orchestrator
        .swarm()
        .generate_tests(&prompt, req.thread_id.as_deref(), &CancelToken::never())
        .await?;
    Ok(Json(json!(generated)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteTestRequest {
    prompt: Option<String>,
    test_case: Option<TestCase>,
}

async fn execute_test(
    State(state): State<AppStateArc>,
    payload: Result<Json<ExecuteTestRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    let (Some(prompt), Some(test_case)) = (req.prompt, req.test_case) else {
        return Err(ApiError::bad_request("Prompt and test case are required"));
    };
    let done = state
        .orchestrator
        .swarm()
        .execute_test(&prompt, &test_case, &CancelToken::never())
        .await?;
    Ok(Json(json!({ "success": true, "testCase": done.test_case, "threadId": done.thread_id })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunTestsRequest {
    prompt: Option<String>,
    test_cases: Option<Vec<TestCase>>,
}

async fn run_tests(
    State(state): State<AppStateArc>,
    payload: Result<Json<RunTestsRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    let (Some(prompt), Some(test_cases)) = (req.prompt, req.test_cases) else {
        return Err(ApiError::bad_request("Prompt and test cases are required"));
    };
    let done = state
        .orchestrator
        .swarm()
        .run_all_tests(&prompt, &test_cases, &CancelToken::never())
        .await?;
    Ok(Json(json!({ "success": true, "testCases": done })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImprovePromptRequest {
    prompt: Option<String>,
    current_prompt: Option<String>,
    test_cases: Option<Vec<TestCase>>,
    test_results: Option<Vec<TestCase>>,
}

async fn improve_prompt(
    State(state): State<AppStateArc>,
    payload: Result<Json<ImprovePromptRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    let prompt = required_text(
        req.current_prompt.or(req.prompt),
        "Current prompt and test results are required",
    )?;
    let test_cases = required(
        req.test_results.or(req.test_cases),
        "Current prompt and test results are required",
    )?;
    let improved = state
        .orchestrator
        .swarm()
        .improve_prompt(&prompt, &test_cases, &CancelToken::never())
        .await?;
    Ok(Json(json!(improved)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefinePromptRequest {
    original_prompt: Option<String>,
    test_cases: Option<Vec<TestCase>>,
}

async fn refine_prompt(
    State(state): State<AppStateArc>,
    payload: Result<Json<RefinePromptRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    let (Some(original_prompt), Some(test_cases)) = (req.original_prompt, req.test_cases) else {
        return Err(ApiError::bad_request("Original prompt and test cases are required"));
    };
    let refined = state
        .orchestrator
        .swarm()
        .refine_prompt(&original_prompt, &test_cases, &CancelToken::never())
        .await?;
    Ok(Json(json!({
        "success": true,
        "refinedPrompt": refined,
        "originalPrompt": original_prompt,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateAssistantRequest {
    assistant_id: Option<String>,
    instructions: Option<String>,
}

async fn update_assistant(
    State(state): State<AppStateArc>,
    payload: Result<Json<UpdateAssistantRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    let (Some(key), Some(instructions)) = (req.assistant_id, req.instructions) else {
        return Err(ApiError::bad_request("Assistant ID and instructions are required"));
    };
    let role: AssistantRole = key.parse()?;
    state.orchestrator.swarm().update_instructions(role, &instructions).await?;
    Ok(Json(json!({ "success": true, "message": "Assistant updated successfully" })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreEvaluationRequest {
    thread_id: Option<String>,
    test_case: Option<Value>,
}

/// Accepts an evaluation without persisting it anywhere.
async fn store_evaluation(payload: Result<Json<StoreEvaluationRequest>, JsonRejection>) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    let (Some(thread_id), Some(test_case)) = (req.thread_id, req.test_case) else {
        return Err(ApiError::bad_request("Thread ID and test case are required"));
    };
    log::debug!("Evaluation for thread {thread_id} acknowledged");
    Ok(Json(json!({ "success": true, "testCase": test_case })))
}

// ============================================================================
// Artifact Routes
// ============================================================================

fn artifact_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/diff", post(diff))
        .route("/api/export/json", post(export_json))
        .route("/api/export/markdown", post(export_markdown))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiffRequest {
    #[serde(default)]
    original_prompt: String,
    #[serde(default)]
    refined_prompt: String,
}

async fn diff(payload: Result<Json<DiffRequest>, JsonRejection>) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    Ok(Json(json!({ "segments": diff_prompts(&req.original_prompt, &req.refined_prompt) })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportRequest {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    test_cases: Vec<TestCase>,
}

async fn export_json(payload: Result<Json<ExportRequest>, JsonRejection>) -> ApiResult<Response> {
    let req = body(payload)?;
    json_attachment(&ResultsBundle::new(&req.prompt, &req.test_cases, Utc::now()))
}

async fn export_markdown(payload: Result<Json<ExportRequest>, JsonRejection>) -> ApiResult<Response> {
    let req = body(payload)?;
    Ok(markdown_attachment(render_markdown(&req.prompt, &req.test_cases, Utc::now())))
}

// ============================================================================
// Session Routes
// ============================================================================

fn session_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/messages", post(send_message))
        .route("/api/sessions/:id/tests/run", post(run_session_tests))
        .route("/api/sessions/:id/tests/:test_id/execute", post(execute_session_test))
        .route("/api/sessions/:id/tests/:test_id/rating", post(rate_test))
        .route("/api/sessions/:id/refinement/retry", post(retry_refinement))
        .route("/api/sessions/:id/refinement/accept", post(accept_refinement))
        .route("/api/sessions/:id/refinement/reject", post(reject_refinement))
        .route("/api/sessions/:id/cancel", post(cancel_session))
        .route("/api/sessions/:id/diff", get(session_diff))
        .route("/api/sessions/:id/export/json", get(session_export_json))
        .route("/api/sessions/:id/export/markdown", get(session_export_markdown))
}

async fn create_session(State(state): State<AppStateArc>) -> (StatusCode, Json<SessionSnapshot>) {
    (StatusCode::CREATED, Json(state.orchestrator.create_session().await))
}

async fn get_session(
    State(state): State<AppStateArc>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.orchestrator.snapshot(id).await?))
}

#[derive(Deserialize)]
struct MessageRequest {
    message: Option<String>,
}

async fn send_message(
    State(state): State<AppStateArc>,
    Path(id): Path<Uuid>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> ApiResult<Json<SessionSnapshot>> {
    let req = body(payload)?;
    let message = required_text(req.message, "Message is required")?;
    Ok(Json(state.orchestrator.send_message(id, &message).await?))
}

async fn run_session_tests(
    State(state): State<AppStateArc>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.orchestrator.run_all_tests(id).await?))
}

async fn execute_session_test(
    State(state): State<AppStateArc>,
    Path((id, test_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.orchestrator.execute_test(id, &test_id).await?))
}

#[derive(Deserialize)]
struct RatingRequest {
    rating: Option<i64>,
    comments: Option<String>,
}

async fn rate_test(
    State(state): State<AppStateArc>,
    Path((id, test_id)): Path<(Uuid, String)>,
    payload: Result<Json<RatingRequest>, JsonRejection>,
) -> ApiResult<Json<SessionSnapshot>> {
    let req = body(payload)?;
    let rating = required(req.rating, "Rating is required")?;
    Ok(Json(state.orchestrator.rate(id, &test_id, rating, req.comments).await?))
}

async fn retry_refinement(
    State(state): State<AppStateArc>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.orchestrator.retry_refinement(id).await?))
}

async fn accept_refinement(
    State(state): State<AppStateArc>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.orchestrator.accept_refinement(id).await?))
}

async fn reject_refinement(
    State(state): State<AppStateArc>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.orchestrator.reject_refinement(id).await?))
}

async fn cancel_session(
    State(state): State<AppStateArc>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.orchestrator.cancel(id).await?))
}

async fn session_diff(State(state): State<AppStateArc>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    Ok(Json(json!({ "segments": state.orchestrator.diff(id).await? })))
}

async fn session_export_json(State(state): State<AppStateArc>, Path(id): Path<Uuid>) -> ApiResult<Response> {
    json_attachment(&state.orchestrator.export_json(id).await?)
}

async fn session_export_markdown(
    State(state): State<AppStateArc>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    Ok(markdown_attachment(state.orchestrator.export_markdown(id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::agents::tests::{FIVE_CASES, swarm};
    use crate::ai::client::scripted::ScriptedAssistant;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Arc<ScriptedAssistant>, Router) {
        let api = Arc::new(ScriptedAssistant::new());
        let state = AppState::new(Orchestrator::new(swarm(&api)));
        (api, router(Arc::new(state)))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Response) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, response) = call(app, method, uri, body).await;
        (status, json_body(response).await)
    }

    fn rated_case(id: &str) -> Value {
        json!({
            "id": id,
            "question": "Summarize a tweet",
            "difficulty": 2,
            "testingAspect": "Short input",
            "expectedBehavior": "One line",
            "actualResponse": "A line.",
            "rating": 4,
            "comments": "too long"
        })
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (_api, app) = app();
        let (status, body) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn chat_requires_a_message() {
        let (_api, app) = app();
        let (status, body) = send(&app, "POST", "/api/chat", Some(json!({ "message": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message is required");
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let (_api, app) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn chat_returns_thread_and_messages() {
        let (api, app) = app();
        api.reply("asst_engineer", "Who is the audience?");
        let (status, body) = send(&app, "POST", "/api/chat", Some(json!({ "message": "Help" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["threadId"].as_str().unwrap().starts_with("thread_"));
        assert_eq!(body["messages"][0]["role"], "assistant");
        assert_eq!(body["messages"][0]["content"], "Who is the audience?");
        assert_eq!(body["messages"][1]["content"], "Help");
    }

    #[tokio::test]
    async fn downstream_failures_are_server_errors() {
        let (_api, app) = app();
        // nothing scripted: the run fails
        let (status, body) = send(&app, "POST", "/api/generate-tests", Some(json!({ "prompt": "p" }))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("no script"));
    }

    #[tokio::test]
    async fn generate_tests_returns_five_cases() {
        let (api, app) = app();
        api.reply("asst_generator", FIVE_CASES);
        let (status, body) = send(&app, "POST", "/api/generate-tests", Some(json!({ "prompt": "p" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["testCases"].as_array().unwrap().len(), 5);
        assert_eq!(body["testCases"][1]["testingAspect"], "Long input");
    }

    #[tokio::test]
    async fn execute_test_fills_the_response() {
        let (api, app) = app();
        api.reply("asst_executor", "Done.");
        let (status, body) = send(
            &app,
            "POST",
            "/api/execute-test",
            Some(json!({ "prompt": "Be brief.", "testCase": rated_case("test-1") })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["testCase"]["actualResponse"], "Done.");
        let thread_id = body["threadId"].as_str().unwrap();
        assert_eq!(api.thread_messages(thread_id)[0].content, "Summarize a tweet");

        let (status, _) = send(&app, "POST", "/api/execute-test", Some(json!({ "prompt": "p" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn improve_prompt_accepts_either_field_names() {
        let (api, app) = app();
        api.reply("asst_evaluator", "IMPROVED_PROMPT\nBe concise.\nEND_PROMPT\nChanged tone.");
        let (status, body) = send(
            &app,
            "POST",
            "/api/improve-prompt",
            Some(json!({ "currentPrompt": "Be wordy.", "testResults": [rated_case("test-1")] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "improvedPrompt": "Be concise.", "explanation": "Changed tone." }));

        let (status, _) = send(&app, "POST", "/api/improve-prompt", Some(json!({ "prompt": "p" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refine_prompt_echoes_the_original() {
        let (api, app) = app();
        api.reply("asst_generator", "Be brief and friendly.");
        let (status, body) = send(
            &app,
            "POST",
            "/api/refine-prompt",
            Some(json!({ "originalPrompt": "Be brief.", "testCases": [rated_case("test-1")] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["refinedPrompt"], "Be brief and friendly.");
        assert_eq!(body["originalPrompt"], "Be brief.");
    }

    #[tokio::test]
    async fn update_assistant_checks_the_role_key() {
        let (api, app) = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/update-assistant",
            Some(json!({ "assistantId": "JUDGE", "instructions": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "JUDGE not configured");

        let (status, body) = send(
            &app,
            "POST",
            "/api/update-assistant",
            Some(json!({ "assistantId": "TEST_EXECUTOR", "instructions": "Be a pirate." })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(api.instructions_for("asst_executor").as_deref(), Some("Be a pirate."));
    }

    #[tokio::test]
    async fn store_evaluation_is_acknowledged_only() {
        let (_api, app) = app();
        let (status, _) = send(&app, "POST", "/api/store-evaluation", Some(json!({ "threadId": "t" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let case = rated_case("test-1");
        let (status, body) = send(
            &app,
            "POST",
            "/api/store-evaluation",
            Some(json!({ "threadId": "t", "testCase": case })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["testCase"], case);
    }

    #[tokio::test]
    async fn diff_tags_segments() {
        let (_api, app) = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/diff",
            Some(json!({ "originalPrompt": "be kind", "refinedPrompt": "be brief" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["segments"],
            json!([
                { "text": "be", "type": "same" },
                { "text": " ", "type": "same" },
                { "text": "kind", "type": "removed" },
                { "text": "brief", "type": "added" }
            ])
        );
    }

    #[tokio::test]
    async fn markdown_export_is_an_attachment() {
        let (_api, app) = app();
        let (status, response) = call(
            &app,
            "POST",
            "/api/export/markdown",
            Some(json!({ "prompt": "Be brief.", "testCases": [rated_case("test-1")] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains(MARKDOWN_FILE_NAME));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("# Prompt\nBe brief.\n"));
        assert!(text.contains("- Rating: 4/10"));
    }

    #[tokio::test]
    async fn json_export_bundles_results() {
        let (_api, app) = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/export/json",
            Some(json!({ "prompt": "Be brief.", "testCases": [rated_case("test-1")] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["finalPrompt"], "Be brief.");
        assert_eq!(body["testResults"][0]["rating"], 4);
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn session_lifecycle_over_http() {
        let (api, app) = app();
        let (status, created) = send(&app, "POST", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["phase"], "engineering");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/sessions/{id}/tests/test-1/rating"),
            Some(json!({ "rating": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("testing"));

        api.reply("asst_engineer", "PROMPT_COMPLETE\nSummarize the text.\nEND_PROMPT")
            .reply("asst_generator", FIVE_CASES);
        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/sessions/{id}/messages"),
            Some(json!({ "message": "Summarize things" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "testing");
        assert_eq!(body["currentPrompt"], "Summarize the text.");
        assert_eq!(body["testCases"].as_array().unwrap().len(), 5);
        assert_eq!(body["allRated"], false);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/sessions/{id}/tests/test-1/rating"),
            Some(json!({ "rating": 42 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "POST", &format!("/api/sessions/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "testing");
    }

    #[tokio::test]
    async fn unknown_sessions_are_not_found() {
        let (_api, app) = app();
        let ghost = Uuid::new_v4();
        let (status, body) = send(&app, "GET", &format!("/api/sessions/{ghost}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains(&ghost.to_string()));
    }

    #[test]
    fn stale_results_conflict_and_task_failures_are_server_errors() {
        let stale = ApiError::from(LabError::Workflow(WorkflowError::Stale { started: 2, current: 4 }));
        assert_eq!(stale.status, StatusCode::CONFLICT);
        assert!(stale.message.contains("while the request was running"));

        let failed = ApiError::from(LabError::TaskFailed("panicked".into()));
        assert_eq!(failed.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
