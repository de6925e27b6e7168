use super::client::{AssistantApi, RunState, RunStatus};
use crate::error::LabError;
use tokio::sync::watch;
use tokio::time::{Duration, sleep, timeout};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Upper bound for the whole wait, not a single tick.
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(8),
            deadline: Duration::from_secs(300),
        }
    }
}

impl PollPolicy {
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max)
    }
}

/// Owner side of a cancellation signal. Every token handed out observes the
/// same `cancel()`.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken { rx: self.tx.subscribe() }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token nobody can cancel.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Resolves once cancelled; pends forever if the handle went away first.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Polls a run until it completes, backing off between checks. Failure
/// statuses, the deadline, and cancellation all end the wait with an error;
/// the latter two also ask the service to cancel the run.
pub async fn wait_for_run(
    api: &dyn AssistantApi,
    thread_id: &str,
    run_id: &str,
    policy: &PollPolicy,
    cancel: &CancelToken,
) -> Result<RunState, LabError> {
    let mut cancel = cancel.clone();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LabError::Cancelled(run_id.to_string())),
        res = timeout(policy.deadline, poll_until_terminal(api, thread_id, run_id, policy)) => {
            res.unwrap_or_else(|_| Err(LabError::RunTimedOut(run_id.to_string())))
        }
    };

    if matches!(outcome, Err(LabError::Cancelled(_) | LabError::RunTimedOut(_))) {
        log::warn!("Abandoning run {run_id}; asking the service to cancel it");
        if let Err(e) = api.cancel_run(thread_id, run_id).await {
            log::warn!("Cancelling run {run_id} failed: {e}");
        }
    }

    let run = outcome?;
    match run.status {
        RunStatus::Completed => Ok(run),
        status => {
            let message = run
                .last_error
                .as_ref()
                .map(|e| match &e.code {
                    Some(code) => format!("{code}: {}", e.message),
                    None => e.message.clone(),
                })
                .unwrap_or_else(|| "Unknown error".to_string());
            Err(LabError::RunFailed { run_id: run.id, status: status.to_string(), message })
        }
    }
}

async fn poll_until_terminal(
    api: &dyn AssistantApi,
    thread_id: &str,
    run_id: &str,
    policy: &PollPolicy,
) -> Result<RunState, LabError> {
    let mut delay = policy.initial;
    loop {
        let run = api.retrieve_run(thread_id, run_id).await?;
        log::debug!("Run {run_id} status: {}", run.status);
        if run.status.is_terminal() {
            return Ok(run);
        }
        sleep(delay).await;
        delay = policy.next_delay(delay);
    }
}
