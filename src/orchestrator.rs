use crate::ai::agents::AssistantSwarm;
use crate::ai::poll::{CancelHandle, CancelToken};
use crate::core::diff::{DiffSegment, diff_prompts, render_inline};
use crate::core::export::{ResultsBundle, render_markdown};
use crate::core::types::TestCase;
use crate::core::workflow::{PromptSession, RatingOutcome};
use crate::error::LabError;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    #[serde(flatten)]
    pub session: PromptSession,
    pub all_rated: bool,
}

struct SessionEntry {
    session: PromptSession,
    cancel: CancelHandle,
}

/// Inputs for work that runs outside the session lock, tagged with the
/// revision they were read at.
struct WorkOrder {
    prompt: String,
    cases: Vec<TestCase>,
    token: CancelToken,
    revision: u64,
}

impl SessionEntry {
    fn snapshot(&self, id: Uuid) -> SessionSnapshot {
        SessionSnapshot {
            id,
            session: self.session.clone(),
            all_rated: self.session.all_rated(),
        }
    }
}

/// Server-held prompt sessions driven through the workflow. The session map
/// is only locked to read or apply state, never while an assistant call is
/// outstanding.
pub struct Orchestrator {
    swarm: AssistantSwarm,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl Orchestrator {
    pub fn new(swarm: AssistantSwarm) -> Self {
        Self { swarm, sessions: RwLock::new(HashMap::new()) }
    }

    pub fn swarm(&self) -> &AssistantSwarm {
        &self.swarm
    }

    async fn with_session<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut SessionEntry) -> Result<R, LabError>,
    ) -> Result<R, LabError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(LabError::SessionNotFound(id))?;
        f(entry)
    }

    pub async fn create_session(&self) -> SessionSnapshot {
        let id = Uuid::new_v4();
        let entry = SessionEntry { session: PromptSession::new(), cancel: CancelHandle::new() };
        let snapshot = entry.snapshot(id);
        self.sessions.write().await.insert(id, entry);
        log::info!("🆕 Session {id} created");
        snapshot
    }

    pub async fn snapshot(&self, id: Uuid) -> Result<SessionSnapshot, LabError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .map(|entry| entry.snapshot(id))
            .ok_or(LabError::SessionNotFound(id))
    }

    pub async fn send_message(&self, id: Uuid, message: &str) -> Result<SessionSnapshot, LabError> {
        let (thread_id, token, revision) = self
            .with_session(id, |entry| {
                entry.session.ensure_accepting_input()?;
                Ok((entry.session.thread_id.clone(), entry.cancel.token(), entry.session.revision))
            })
            .await?;

        log::info!("🏗️  Session {id}: engineering");
        let conversation = self.swarm.converse(thread_id.as_deref(), message, &token).await?;

        let next_prompt = self
            .with_session(id, |entry| {
                let session = &mut entry.session;
                session.ensure_revision(revision)?;
                session.adopt_thread(&conversation.thread_id);
                session.messages = conversation.messages.iter().rev().cloned().collect();
                Ok(conversation
                    .latest_assistant_reply()
                    .and_then(|reply| session.assistant_replied(reply))
                    .map(|prompt| (prompt, session.thread_id.clone(), session.revision)))
            })
            .await?;

        if let Some((prompt, thread_id, revision)) = next_prompt {
            log::info!("🏗️  Session {id}: prompt extracted, generating tests");
            self.generate_tests(id, &prompt, thread_id.as_deref(), &token, revision).await?;
        }
        self.snapshot(id).await
    }

    /// Runs test generation for a session already marked as generating, and
    /// rolls it back to engineering when generation fails. Results arriving
    /// after the session moved on are dropped.
    async fn generate_tests(
        &self,
        id: Uuid,
        prompt: &str,
        thread_id: Option<&str>,
        token: &CancelToken,
        revision: u64,
    ) -> Result<(), LabError> {
        let result = self.swarm.generate_tests(prompt, thread_id, token).await;
        self.with_session(id, |entry| {
            let current = entry.session.ensure_revision(revision);
            match result {
                Ok(generated) => {
                    current?;
                    entry.session.tests_generated(generated.test_cases)?;
                    Ok(())
                }
                Err(e) => {
                    log::error!("❌ Session {id}: test generation failed: {e}");
                    if current.is_ok() {
                        entry.session.test_generation_failed();
                    }
                    Err(e)
                }
            }
        })
        .await
    }

    fn work_order(entry: &SessionEntry) -> WorkOrder {
        WorkOrder {
            prompt: entry.session.current_prompt.clone(),
            cases: entry.session.test_cases.clone(),
            token: entry.cancel.token(),
            revision: entry.session.revision,
        }
    }

    /// Writes executor responses back, unless the prompt or the case set was
    /// replaced while they ran.
    async fn record_responses(
        &self,
        id: Uuid,
        revision: u64,
        done: &[TestCase],
    ) -> Result<SessionSnapshot, LabError> {
        self.with_session(id, |entry| {
            if let Err(stale) = entry.session.ensure_revision(revision) {
                log::warn!("⏭️  Session {id}: dropping {} stale test responses", done.len());
                return Err(stale.into());
            }
            for case in done {
                entry.session.record_response(&case.id, &case.actual_response)?;
            }
            Ok(entry.snapshot(id))
        })
        .await
    }

    pub async fn execute_test(&self, id: Uuid, test_id: &str) -> Result<SessionSnapshot, LabError> {
        let (order, case) = self
            .with_session(id, |entry| {
                entry.session.ensure_testing()?;
                let case = entry.session.test_case(test_id)?.clone();
                Ok((Self::work_order(entry), case))
            })
            .await?;

        let done = self.swarm.execute_test(&order.prompt, &case, &order.token).await?;
        log::info!("   -> {} answered on thread {}", case.id, done.thread_id);
        self.record_responses(id, order.revision, &[done.test_case]).await
    }

    pub async fn run_all_tests(&self, id: Uuid) -> Result<SessionSnapshot, LabError> {
        let order = self
            .with_session(id, |entry| {
                entry.session.ensure_testing()?;
                Ok(Self::work_order(entry))
            })
            .await?;
        let done = self.swarm.run_all_tests(&order.prompt, &order.cases, &order.token).await?;
        self.record_responses(id, order.revision, &done).await
    }

    pub async fn rate(
        &self,
        id: Uuid,
        test_id: &str,
        rating: i64,
        comments: Option<String>,
    ) -> Result<SessionSnapshot, LabError> {
        let refinement = self
            .with_session(id, |entry| {
                let outcome = entry.session.rate(test_id, rating, comments)?;
                log::info!("⭐ Session {id}: {test_id} rated {rating}/10");
                Ok(match outcome {
                    RatingOutcome::ReadyForRefinement => Some(Self::work_order(entry)),
                    RatingOutcome::Pending { .. } => None,
                })
            })
            .await?;

        if let Some(order) = refinement {
            self.refine(id, order).await?;
        }
        self.snapshot(id).await
    }

    /// Asks the evaluator for an improved prompt. On failure the session stays
    /// in refining with nothing to accept.
    async fn refine(&self, id: Uuid, order: WorkOrder) -> Result<(), LabError> {
        log::info!("🔧 Session {id}: all cases rated, improving prompt");
        let result = self.swarm.improve_prompt(&order.prompt, &order.cases, &order.token).await;
        self.with_session(id, |entry| {
            let current = entry.session.ensure_revision(order.revision);
            match result {
                Ok(improved) => {
                    current?;
                    entry.session.refinement_ready(improved)?;
                    let session = &entry.session;
                    log::debug!(
                        "Session {id} refinement: {}",
                        render_inline(&diff_prompts(&session.current_prompt, &session.improved_prompt))
                    );
                    Ok(())
                }
                Err(e) => {
                    log::error!("❌ Session {id}: refinement failed: {e}");
                    if current.is_ok() {
                        entry.session.refinement_failed();
                    }
                    Err(e)
                }
            }
        })
        .await
    }

    pub async fn retry_refinement(&self, id: Uuid) -> Result<SessionSnapshot, LabError> {
        let order = self
            .with_session(id, |entry| {
                entry.session.retry_refinement()?;
                Ok(Self::work_order(entry))
            })
            .await?;
        self.refine(id, order).await?;
        self.snapshot(id).await
    }

    pub async fn accept_refinement(&self, id: Uuid) -> Result<SessionSnapshot, LabError> {
        let (prompt, thread_id, token, revision) = self
            .with_session(id, |entry| {
                let prompt = entry.session.accept_refinement()?;
                Ok((
                    prompt,
                    entry.session.thread_id.clone(),
                    entry.cancel.token(),
                    entry.session.revision,
                ))
            })
            .await?;

        log::info!("🔁 Session {id}: refinement accepted, generating tests");
        self.generate_tests(id, &prompt, thread_id.as_deref(), &token, revision).await?;
        self.snapshot(id).await
    }

    pub async fn reject_refinement(&self, id: Uuid) -> Result<SessionSnapshot, LabError> {
        self.with_session(id, |entry| {
            entry.session.reject_refinement()?;
            log::info!("↩️  Session {id}: refinement rejected");
            Ok(entry.snapshot(id))
        })
        .await
    }

    /// Aborts every poll started from this session and clears its busy flags.
    pub async fn cancel(&self, id: Uuid) -> Result<SessionSnapshot, LabError> {
        self.with_session(id, |entry| {
            entry.cancel.cancel();
            entry.cancel = CancelHandle::new();
            entry.session.abandon_in_flight();
            log::warn!("🛑 Session {id}: in-flight work cancelled");
            Ok(entry.snapshot(id))
        })
        .await
    }

    pub async fn diff(&self, id: Uuid) -> Result<Vec<DiffSegment>, LabError> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(&id).ok_or(LabError::SessionNotFound(id))?;
        Ok(diff_prompts(&entry.session.current_prompt, &entry.session.improved_prompt))
    }

    pub async fn export_json(&self, id: Uuid) -> Result<ResultsBundle, LabError> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(&id).ok_or(LabError::SessionNotFound(id))?;
        Ok(ResultsBundle::new(&entry.session.current_prompt, &entry.session.test_cases, Utc::now()))
    }

    pub async fn export_markdown(&self, id: Uuid) -> Result<String, LabError> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(&id).ok_or(LabError::SessionNotFound(id))?;
        Ok(render_markdown(&entry.session.current_prompt, &entry.session.test_cases, Utc::now()))
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
