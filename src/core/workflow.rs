//! Phase state machine for one prompt-engineering session.
//!
//! `engineering -> testing -> refining`, with `refining` looping back to
//! `testing` when a refinement is accepted or rejected. The busy flags mirror
//! the UI's disabled controls: while either is set, new chat input and ratings
//! are refused.

use super::extract::extract_prompt;
use super::types::{ChatMessage, ImprovedPrompt, TestCase};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Engineering,
    Testing,
    Refining,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Engineering => "engineering",
            Phase::Testing => "testing",
            Phase::Refining => "refining",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("expected phase '{expected}' but session is in '{actual}'")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("another request is still generating tests or improving the prompt")]
    Busy,

    #[error("unknown test case '{0}'")]
    UnknownTestCase(String),

    #[error("rating {0} is outside 1-10")]
    InvalidRating(i64),

    #[error("No test cases were generated")]
    NoTestCases,

    #[error("there is no improved prompt to accept")]
    NoImprovedPrompt,

    #[error("the refinement already produced an improved prompt")]
    RefinementPresent,

    #[error("no {0} is running")]
    NotRunning(&'static str),

    #[error("session moved from revision {started} to {current} while the request was running")]
    Stale { started: u64, current: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatingOutcome {
    Pending { unrated: usize },
    /// Every case is rated; the session moved to `refining` and the caller
    /// must now request a refinement.
    ReadyForRefinement,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSession {
    pub current_prompt: String,
    pub improved_prompt: String,
    pub explanation: String,
    pub phase: Phase,
    pub thread_id: Option<String>,
    pub test_cases: Vec<TestCase>,
    pub messages: Vec<ChatMessage>,
    pub is_generating_tests: bool,
    pub is_improving_prompt: bool,
    /// Bumped whenever the prompt or test set is replaced, or in-flight work
    /// is abandoned. Results computed against an older revision are dropped.
    pub revision: u64,
}

impl PromptSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn controls_disabled(&self) -> bool {
        self.is_generating_tests || self.is_improving_prompt
    }

    pub fn all_rated(&self) -> bool {
        !self.test_cases.is_empty() && self.test_cases.iter().all(TestCase::is_rated)
    }

    fn expect_phase(&self, expected: Phase) -> Result<(), WorkflowError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(WorkflowError::WrongPhase { expected, actual: self.phase })
        }
    }

    fn advance(&mut self) {
        self.revision += 1;
    }

    pub fn ensure_revision(&self, started: u64) -> Result<(), WorkflowError> {
        if self.revision == started {
            Ok(())
        } else {
            Err(WorkflowError::Stale { started, current: self.revision })
        }
    }

    fn expect_idle(&self) -> Result<(), WorkflowError> {
        if self.controls_disabled() { Err(WorkflowError::Busy) } else { Ok(()) }
    }

    /// Checked before sending a chat message to the prompt engineer.
    pub fn ensure_accepting_input(&self) -> Result<(), WorkflowError> {
        self.expect_phase(Phase::Engineering)?;
        self.expect_idle()
    }

    /// Checked before running test cases against the current prompt.
    pub fn ensure_testing(&self) -> Result<(), WorkflowError> {
        self.expect_phase(Phase::Testing)?;
        self.expect_idle()
    }

    /// The first thread handle sticks for the rest of the cycle.
    pub fn adopt_thread(&mut self, thread_id: &str) {
        if self.thread_id.is_none() {
            self.thread_id = Some(thread_id.to_string());
        }
    }

    /// Feeds the newest assistant reply. When it carries a prompt the session
    /// moves to `testing`, marks test generation as running, and returns the
    /// prompt to generate tests for.
    pub fn assistant_replied(&mut self, reply: &str) -> Option<String> {
        if self.phase != Phase::Engineering {
            return None;
        }
        let prompt = extract_prompt(reply)?;
        self.current_prompt = prompt.clone();
        self.phase = Phase::Testing;
        self.is_generating_tests = true;
        self.advance();
        Some(prompt)
    }

    pub fn tests_generated(&mut self, cases: Vec<TestCase>) -> Result<(), WorkflowError> {
        self.expect_phase(Phase::Testing)?;
        if !self.is_generating_tests {
            return Err(WorkflowError::NotRunning("test generation"));
        }
        if cases.is_empty() {
            self.test_generation_failed();
            return Err(WorkflowError::NoTestCases);
        }
        self.test_cases = cases;
        self.is_generating_tests = false;
        self.advance();
        Ok(())
    }

    pub fn test_generation_failed(&mut self) {
        self.is_generating_tests = false;
        self.phase = Phase::Engineering;
        self.advance();
    }

    pub fn test_case(&self, test_id: &str) -> Result<&TestCase, WorkflowError> {
        self.test_cases
            .iter()
            .find(|t| t.id == test_id)
            .ok_or_else(|| WorkflowError::UnknownTestCase(test_id.to_string()))
    }

    fn test_case_mut(&mut self, test_id: &str) -> Result<&mut TestCase, WorkflowError> {
        self.test_cases
            .iter_mut()
            .find(|t| t.id == test_id)
            .ok_or_else(|| WorkflowError::UnknownTestCase(test_id.to_string()))
    }

    pub fn record_response(&mut self, test_id: &str, response: &str) -> Result<(), WorkflowError> {
        self.test_case_mut(test_id)?.actual_response = response.to_string();
        Ok(())
    }

    pub fn rate(
        &mut self,
        test_id: &str,
        rating: i64,
        comments: Option<String>,
    ) -> Result<RatingOutcome, WorkflowError> {
        self.expect_phase(Phase::Testing)?;
        self.expect_idle()?;
        if !(i64::from(MIN_RATING)..=i64::from(MAX_RATING)).contains(&rating) {
            return Err(WorkflowError::InvalidRating(rating));
        }

        let case = self.test_case_mut(test_id)?;
        case.rating = Some(rating as u8);
        case.comments = comments.filter(|c| !c.trim().is_empty());

        if self.all_rated() {
            self.phase = Phase::Refining;
            self.is_improving_prompt = true;
            Ok(RatingOutcome::ReadyForRefinement)
        } else {
            let unrated = self.test_cases.iter().filter(|t| !t.is_rated()).count();
            Ok(RatingOutcome::Pending { unrated })
        }
    }

    pub fn refinement_ready(&mut self, improved: ImprovedPrompt) -> Result<(), WorkflowError> {
        self.expect_phase(Phase::Refining)?;
        if !self.is_improving_prompt {
            return Err(WorkflowError::NotRunning("refinement"));
        }
        self.improved_prompt = improved.improved_prompt;
        self.explanation = improved.explanation;
        self.is_improving_prompt = false;
        Ok(())
    }

    /// Stays in `refining` with nothing to accept; `retry_refinement` re-arms it.
    pub fn refinement_failed(&mut self) {
        self.is_improving_prompt = false;
    }

    pub fn retry_refinement(&mut self) -> Result<(), WorkflowError> {
        self.expect_phase(Phase::Refining)?;
        self.expect_idle()?;
        if !self.improved_prompt.is_empty() {
            return Err(WorkflowError::RefinementPresent);
        }
        self.is_improving_prompt = true;
        Ok(())
    }

    /// Promotes the improved prompt and returns it; test generation for it is
    /// now running and the previous set is discarded.
    pub fn accept_refinement(&mut self) -> Result<String, WorkflowError> {
        self.expect_phase(Phase::Refining)?;
        self.expect_idle()?;
        if self.improved_prompt.is_empty() {
            return Err(WorkflowError::NoImprovedPrompt);
        }
        self.current_prompt = std::mem::take(&mut self.improved_prompt);
        self.explanation.clear();
        self.test_cases.clear();
        self.phase = Phase::Testing;
        self.is_generating_tests = true;
        self.advance();
        Ok(self.current_prompt.clone())
    }

    /// Discards the refinement, keeping the current prompt and its rated cases.
    pub fn reject_refinement(&mut self) -> Result<(), WorkflowError> {
        self.expect_phase(Phase::Refining)?;
        self.expect_idle()?;
        self.improved_prompt.clear();
        self.explanation.clear();
        self.phase = Phase::Testing;
        Ok(())
    }

    /// Clears busy flags after in-flight work was cancelled, rolling back to
    /// the last stable phase. Results still in flight become stale.
    pub fn abandon_in_flight(&mut self) {
        if self.is_generating_tests {
            self.test_generation_failed();
        }
        if self.is_improving_prompt {
            self.refinement_failed();
        }
        self.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            question: format!("question {id}"),
            difficulty: 5,
            testing_aspect: "Clarity".to_string(),
            expected_behavior: "Answers clearly".to_string(),
            actual_response: String::new(),
            rating: None,
            comments: None,
        }
    }

    fn testing_session(n: usize) -> PromptSession {
        let mut session = PromptSession::new();
        session.assistant_replied("PROMPT_COMPLETE\nBe helpful.\nEND_PROMPT").unwrap();
        session
            .tests_generated((1..=n).map(|i| case(&format!("test-{i}"))).collect())
            .unwrap();
        session
    }

    #[test]
    fn prompt_reply_moves_engineering_to_testing() {
        let mut session = PromptSession::new();
        assert_eq!(session.phase, Phase::Engineering);
        assert_eq!(session.assistant_replied("What audience is this for?"), None);
        assert_eq!(session.phase, Phase::Engineering);

        let prompt = session.assistant_replied("Sure!\nPROMPT_COMPLETE\nSummarize the text.\nEND_PROMPT");
        assert_eq!(prompt.as_deref(), Some("Summarize the text."));
        assert_eq!(session.phase, Phase::Testing);
        assert_eq!(session.current_prompt, "Summarize the text.");
        assert!(session.is_generating_tests);
        assert!(session.ensure_accepting_input().is_err());
    }

    #[test]
    fn failed_generation_reverts_to_engineering() {
        let mut session = PromptSession::new();
        session.assistant_replied("PROMPT_COMPLETE\nX\nEND_PROMPT").unwrap();
        assert_eq!(session.tests_generated(Vec::new()), Err(WorkflowError::NoTestCases));
        assert_eq!(session.phase, Phase::Engineering);
        assert!(!session.is_generating_tests);
        assert!(session.ensure_accepting_input().is_ok());
    }

    #[test]
    fn rating_the_last_case_moves_to_refining() {
        let mut session = testing_session(5);
        for i in 1..=4 {
            let outcome = session.rate(&format!("test-{i}"), 7, None).unwrap();
            assert_eq!(outcome, RatingOutcome::Pending { unrated: 5 - i });
        }
        assert_eq!(session.phase, Phase::Testing);

        let outcome = session.rate("test-5", 3, Some("too long".into())).unwrap();
        assert_eq!(outcome, RatingOutcome::ReadyForRefinement);
        assert_eq!(session.phase, Phase::Refining);
        assert!(session.is_improving_prompt);
        assert_eq!(session.test_cases[4].comments.as_deref(), Some("too long"));
    }

    #[test]
    fn ratings_are_validated() {
        let mut session = testing_session(2);
        assert_eq!(session.rate("test-1", 0, None), Err(WorkflowError::InvalidRating(0)));
        assert_eq!(session.rate("test-1", 11, None), Err(WorkflowError::InvalidRating(11)));
        assert_eq!(
            session.rate("missing", 5, None),
            Err(WorkflowError::UnknownTestCase("missing".into()))
        );
        assert!(session.test_cases.iter().all(|t| t.rating.is_none()));
    }

    #[test]
    fn ratings_are_refused_while_busy_or_outside_testing() {
        let mut session = testing_session(1);
        session.is_generating_tests = true;
        assert_eq!(session.rate("test-1", 5, None), Err(WorkflowError::Busy));

        let mut fresh = PromptSession::new();
        assert!(matches!(fresh.rate("test-1", 5, None), Err(WorkflowError::WrongPhase { .. })));
    }

    #[test]
    fn accepting_a_refinement_restarts_testing_with_new_prompt() {
        let mut session = testing_session(1);
        session.rate("test-1", 4, None).unwrap();
        assert_eq!(session.accept_refinement(), Err(WorkflowError::Busy));

        session.refinement_ready(ImprovedPrompt {
            improved_prompt: "Be concise.".into(),
            explanation: "Shorter.".into(),
        })
        .unwrap();
        let next = session.accept_refinement().unwrap();
        assert_eq!(next, "Be concise.");
        assert_eq!(session.current_prompt, "Be concise.");
        assert!(session.improved_prompt.is_empty());
        assert!(session.explanation.is_empty());
        assert!(session.test_cases.is_empty());
        assert_eq!(session.phase, Phase::Testing);
        assert!(session.is_generating_tests);
    }

    #[test]
    fn rejecting_a_refinement_keeps_prompt_and_cases() {
        let mut session = testing_session(2);
        session.rate("test-1", 9, None).unwrap();
        session.rate("test-2", 8, None).unwrap();
        session.refinement_ready(ImprovedPrompt {
            improved_prompt: "Other".into(),
            explanation: String::new(),
        })
        .unwrap();
        session.reject_refinement().unwrap();
        assert_eq!(session.phase, Phase::Testing);
        assert_eq!(session.current_prompt, "Be helpful.");
        assert_eq!(session.test_cases.len(), 2);
        assert!(session.all_rated());
        assert!(session.improved_prompt.is_empty());
    }

    #[test]
    fn failed_refinement_can_be_retried() {
        let mut session = testing_session(1);
        session.rate("test-1", 2, None).unwrap();
        session.refinement_failed();
        assert_eq!(session.phase, Phase::Refining);
        assert_eq!(session.accept_refinement(), Err(WorkflowError::NoImprovedPrompt));

        session.retry_refinement().unwrap();
        assert!(session.is_improving_prompt);
        assert_eq!(session.retry_refinement(), Err(WorkflowError::Busy));
    }

    #[test]
    fn execution_needs_an_idle_testing_session() {
        let mut session = PromptSession::new();
        assert!(matches!(session.ensure_testing(), Err(WorkflowError::WrongPhase { .. })));
        session.assistant_replied("PROMPT_COMPLETE\nX\nEND_PROMPT").unwrap();
        assert_eq!(session.ensure_testing(), Err(WorkflowError::Busy));
        session.tests_generated(vec![case("test-1")]).unwrap();
        assert_eq!(session.ensure_testing(), Ok(()));
    }

    #[test]
    fn thread_id_is_assigned_once() {
        let mut session = PromptSession::new();
        session.adopt_thread("thread_a");
        session.adopt_thread("thread_b");
        assert_eq!(session.thread_id.as_deref(), Some("thread_a"));
    }

    #[test]
    fn abandoning_in_flight_work_rolls_back() {
        let mut session = PromptSession::new();
        session.assistant_replied("PROMPT_COMPLETE\nX").unwrap();
        session.abandon_in_flight();
        assert_eq!(session.phase, Phase::Engineering);
        assert!(!session.controls_disabled());
    }

    #[test]
    fn generated_tests_need_a_running_generation() {
        let mut fresh = PromptSession::new();
        assert!(matches!(
            fresh.tests_generated(vec![case("test-1")]),
            Err(WorkflowError::WrongPhase { .. })
        ));

        let mut session = testing_session(1);
        assert_eq!(
            session.tests_generated(vec![case("late")]),
            Err(WorkflowError::NotRunning("test generation"))
        );
        assert_eq!(session.test_cases[0].id, "test-1");
    }

    #[test]
    fn improved_prompt_needs_a_running_refinement() {
        let mut session = testing_session(1);
        let improved = || ImprovedPrompt {
            improved_prompt: "Late".into(),
            explanation: String::new(),
        };
        assert!(matches!(session.refinement_ready(improved()), Err(WorkflowError::WrongPhase { .. })));

        session.rate("test-1", 5, None).unwrap();
        session.refinement_failed();
        assert_eq!(session.refinement_ready(improved()), Err(WorkflowError::NotRunning("refinement")));
        assert!(session.improved_prompt.is_empty());
    }

    #[test]
    fn replacing_the_prompt_or_cancelling_invalidates_the_revision() {
        let mut session = testing_session(1);
        let started = session.revision;
        session.rate("test-1", 6, None).unwrap();
        assert_eq!(session.ensure_revision(started), Ok(()));

        session.refinement_ready(ImprovedPrompt {
            improved_prompt: "Newer".into(),
            explanation: String::new(),
        })
        .unwrap();
        session.accept_refinement().unwrap();
        assert!(matches!(session.ensure_revision(started), Err(WorkflowError::Stale { .. })));

        let after_accept = session.revision;
        session.abandon_in_flight();
        assert_eq!(
            session.ensure_revision(after_accept),
            Err(WorkflowError::Stale { started: after_accept, current: after_accept + 2 })
        );
    }
}
