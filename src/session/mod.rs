//! Session coordination
//!
//! Sequences parse → solve → verify → persist for one problem-solving
//! session, owning the clarification-escalation loop. Parsing and solving
//! are external collaborators behind traits; the only suspension point is a
//! parser-flagged ambiguity.

use crate::models::{ParsedProblem, SessionIds, Solution, VerificationResult};
use crate::store::RecordStore;
use crate::verification::ConfidenceEngine;
use crate::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

//
// ================= Collaborator traits =================
//

/// External Parser: turns raw input into a problem record.
#[async_trait]
pub trait ProblemParser: Send + Sync {
    async fn parse(&self, input: &str) -> Result<ParsedProblem>;
}

/// External Solver: produces a candidate solution for a parsed problem.
#[async_trait]
pub trait Solver: Send + Sync {
    async fn solve(&self, problem: &ParsedProblem, context: &[String]) -> Result<Solution>;
}

/// Optional context source used to enrich the solver's input.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, problem: &ParsedProblem) -> Result<Vec<String>>;
}

//
// ================= Session types =================
//

/// A session paused on the clarification gate.
#[derive(Debug, Clone)]
pub struct PendingSession {
    pub session_id: Uuid,
    pub problem: ParsedProblem,
    pub prompt: String,
}

/// Result of driving one session as far as it can go.
pub enum SessionOutcome {
    Completed(SessionReport),
    NeedsClarification(PendingSession),
}

/// Everything one session produced.
///
/// `storage_error` is populated instead of failing the session: a storage
/// failure never invalidates the in-memory verification result.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub problem: ParsedProblem,
    pub solution: Solution,
    pub verification: VerificationResult,
    pub stored: Option<SessionIds>,
    pub storage_error: Option<String>,
}

//
// ================= Coordinator =================
//

/// Drives the pipeline for one problem at a time.
///
/// All collaborators are injected; the coordinator holds no hidden state.
pub struct SessionCoordinator {
    parser: Box<dyn ProblemParser>,
    solver: Box<dyn Solver>,
    retriever: Option<Box<dyn ContextRetriever>>,
    engine: ConfidenceEngine,
    store: RecordStore,
}

impl SessionCoordinator {
    pub fn new(
        parser: Box<dyn ProblemParser>,
        solver: Box<dyn Solver>,
        engine: ConfidenceEngine,
        store: RecordStore,
    ) -> Self {
        Self {
            parser,
            solver,
            retriever: None,
            engine,
            store,
        }
    }

    pub fn with_retriever(mut self, retriever: Box<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Run a session from raw input.
    ///
    /// Pauses at the clarification gate when the parser flags ambiguity;
    /// otherwise drives the pipeline to completion.
    pub async fn run(&self, raw_input: &str) -> Result<SessionOutcome> {
        let session_id = Uuid::new_v4();
        info!(session_id = %session_id, "Session started");

        let problem = self.parser.parse(raw_input).await?;
        debug!(topic = %problem.topic, "Problem parsed");

        if problem.needs_clarification {
            let prompt = problem
                .clarification_prompt
                .clone()
                .unwrap_or_else(|| "Please clarify the question".to_string());

            info!(session_id = %session_id, "Session paused for clarification");
            return Ok(SessionOutcome::NeedsClarification(PendingSession {
                session_id,
                problem,
                prompt,
            }));
        }

        let report = self.complete(session_id, problem).await?;
        Ok(SessionOutcome::Completed(report))
    }

    /// Resume a paused session with the user's clarification answer.
    pub async fn resume(
        &self,
        pending: PendingSession,
        clarification: &str,
    ) -> Result<SessionReport> {
        let mut problem = pending.problem;
        problem.text = format!("{} ({})", problem.text, clarification);
        problem.needs_clarification = false;
        problem.clarification_prompt = None;

        info!(session_id = %pending.session_id, "Session resumed with clarification");
        self.complete(pending.session_id, problem).await
    }

    /// Append user feedback against the latest solution for a problem.
    pub async fn add_feedback(
        &self,
        problem_id: i64,
        is_correct: bool,
        feedback_text: &str,
    ) -> Result<i64> {
        self.store
            .add_feedback(problem_id, is_correct, feedback_text)
            .await
    }

    async fn complete(&self, session_id: Uuid, problem: ParsedProblem) -> Result<SessionReport> {
        // Retrieval failures degrade to an empty context; the session goes on
        let context = match &self.retriever {
            Some(retriever) => match retriever.retrieve(&problem).await {
                Ok(context) => context,
                Err(error) => {
                    warn!(session_id = %session_id, %error, "Context retrieval failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let solution = self.solver.solve(&problem, &context).await?;
        debug!(
            session_id = %session_id,
            step_count = solution.steps.len(),
            method = %solution.method,
            "Solution received"
        );

        let verification = self.engine.verify(&problem, &solution);

        // Persist the causal chain; a failure here is reported, not fatal
        let (stored, storage_error) = match self
            .store
            .store_session(&problem, &solution, &verification)
            .await
        {
            Ok(ids) => (Some(ids), None),
            Err(error) => {
                warn!(session_id = %session_id, %error, "Session persistence failed");
                (None, Some(error.to_string()))
            }
        };

        info!(
            session_id = %session_id,
            confidence = verification.confidence,
            persisted = stored.is_some(),
            "Session completed"
        );

        Ok(SessionReport {
            session_id,
            problem,
            solution,
            verification,
            stored,
            storage_error,
        })
    }
}

//
// ================= Mock collaborators =================
//

use crate::models::{FinalAnswer, SolutionStep};
use chrono::Utc;

/// Phrases that mark an under-specified question
const AMBIGUOUS_PHRASES: &[&str] = &["solve this", "find it", "the answer", "this problem"];

/// Deterministic parser for development & testing.
/// Keeps the pipeline functional without a live parsing collaborator.
pub struct MockParser;

#[async_trait]
impl ProblemParser for MockParser {
    async fn parse(&self, input: &str) -> Result<ParsedProblem> {
        let text = input.split_whitespace().collect::<Vec<_>>().join(" ");
        let lowered = text.to_lowercase();

        let topic = if lowered.contains("derivative") || lowered.contains("integral") {
            "calculus"
        } else if lowered.contains("probability") {
            "probability"
        } else {
            "algebra"
        };

        let has_content = lowered.chars().any(|c| c.is_ascii_digit()) || lowered.contains('=');
        let needs_clarification =
            AMBIGUOUS_PHRASES.iter().any(|p| lowered.contains(p)) && !has_content;

        let clarification_prompt = needs_clarification.then(|| {
            format!(
                "The question '{}' seems incomplete. What exactly needs to be found?",
                text
            )
        });

        Ok(ParsedProblem {
            original_input: input.to_string(),
            text,
            topic: topic.to_string(),
            variables: vec!["x".to_string()],
            constraints: vec![],
            needs_clarification,
            clarification_prompt,
            parsed_at: Utc::now(),
        })
    }
}

/// Deterministic solver for development & testing.
pub struct MockSolver;

#[async_trait]
impl Solver for MockSolver {
    async fn solve(&self, problem: &ParsedProblem, context: &[String]) -> Result<Solution> {
        let lowered = problem.text.to_lowercase();

        if lowered.contains("2x + 5 = 13") || lowered.contains("2x+5=13") {
            return Ok(Solution {
                steps: vec![
                    SolutionStep::Worked {
                        expression: "2x + 5 = 13".to_string(),
                        result: "2x = 8".to_string(),
                    },
                    SolutionStep::Worked {
                        expression: "2x = 8".to_string(),
                        result: "x = 4".to_string(),
                    },
                ],
                final_answer: Some(FinalAnswer::Number(4.0)),
                formulas_used: context.to_vec(),
                method: "algebraic manipulation".to_string(),
                solved_at: Utc::now(),
            });
        }

        Ok(Solution {
            steps: vec![SolutionStep::Note("no applicable rule".to_string())],
            final_answer: None,
            formulas_used: context.to_vec(),
            method: "unsolved".to_string(),
            solved_at: Utc::now(),
        })
    }
}

/// Canned formula retriever for development & testing.
pub struct MockRetriever;

#[async_trait]
impl ContextRetriever for MockRetriever {
    async fn retrieve(&self, problem: &ParsedProblem) -> Result<Vec<String>> {
        Ok(match problem.topic.as_str() {
            "algebra" => vec!["linear equation solving".to_string()],
            "calculus" => vec!["power rule: d/dx x^n = n*x^(n-1)".to_string()],
            _ => Vec::new(),
        })
    }
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MentorError;

    async fn coordinator() -> SessionCoordinator {
        let store = RecordStore::in_memory().await.unwrap();
        SessionCoordinator::new(
            Box::new(MockParser),
            Box::new(MockSolver),
            ConfidenceEngine::new(),
            store,
        )
        .with_retriever(Box::new(MockRetriever))
    }

    #[tokio::test]
    async fn test_full_session_persists_causal_chain() {
        let coordinator = coordinator().await;

        let outcome = coordinator.run("Solve 2x + 5 = 13").await.unwrap();
        let report = match outcome {
            SessionOutcome::Completed(report) => report,
            SessionOutcome::NeedsClarification(_) => panic!("unexpected clarification"),
        };

        assert!(report.verification.is_correct);
        assert!((report.verification.confidence - 0.95).abs() < f64::EPSILON);
        assert!(report.storage_error.is_none());

        let ids = report.stored.expect("session should persist");
        let store = coordinator.store();

        let problem = store.problem(ids.problem_id).await.unwrap().unwrap();
        assert_eq!(problem.text, "Solve 2x + 5 = 13");

        let solution = store.solution(ids.solution_id).await.unwrap().unwrap();
        assert_eq!(solution.problem_id, ids.problem_id);
        // Retrieved context flowed into the stored solution
        assert_eq!(solution.formulas_used, vec!["linear equation solving"]);

        let verification = store
            .latest_verification(ids.solution_id)
            .await
            .unwrap()
            .unwrap();
        assert!(verification.is_correct);
    }

    #[tokio::test]
    async fn test_clarification_gate_pauses_and_resumes() {
        let coordinator = coordinator().await;

        let outcome = coordinator.run("solve this").await.unwrap();
        let pending = match outcome {
            SessionOutcome::NeedsClarification(pending) => pending,
            SessionOutcome::Completed(_) => panic!("expected clarification pause"),
        };
        assert!(pending.prompt.contains("seems incomplete"));

        let session_id = pending.session_id;
        let report = coordinator
            .resume(pending, "the equation is 2x + 5 = 13")
            .await
            .unwrap();

        assert_eq!(report.session_id, session_id);
        assert!(!report.problem.needs_clarification);
        assert!(report.problem.text.contains("2x + 5 = 13"));
        assert!(report.verification.is_correct);
    }

    #[tokio::test]
    async fn test_unsolved_problem_still_completes_and_flags_review() {
        let coordinator = coordinator().await;

        let outcome = coordinator.run("Solve 7y - 2 = 12").await.unwrap();
        let report = match outcome {
            SessionOutcome::Completed(report) => report,
            SessionOutcome::NeedsClarification(_) => panic!("unexpected clarification"),
        };

        // No answer from the solver: low confidence, flagged, still delivered
        assert!(!report.verification.is_correct);
        assert!(report.verification.requires_human_review);
        assert!(report
            .verification
            .issues
            .iter()
            .any(|i| i == "no answer provided"));
        assert!(report.stored.is_some());
    }

    #[tokio::test]
    async fn test_storage_failure_reported_not_fatal() {
        let coordinator = coordinator().await;

        // Break the store out from under the session
        sqlx::query("DROP TABLE verifications")
            .execute(coordinator.store().pool())
            .await
            .unwrap();

        let outcome = coordinator.run("Solve 2x + 5 = 13").await.unwrap();
        let report = match outcome {
            SessionOutcome::Completed(report) => report,
            SessionOutcome::NeedsClarification(_) => panic!("unexpected clarification"),
        };

        // The in-memory verification survives the persistence failure
        assert!(report.verification.is_correct);
        assert!(report.stored.is_none());
        assert!(report.storage_error.is_some());
    }

    #[tokio::test]
    async fn test_solver_failure_propagates() {
        struct FailingSolver;

        #[async_trait]
        impl Solver for FailingSolver {
            async fn solve(&self, _: &ParsedProblem, _: &[String]) -> Result<Solution> {
                Err(MentorError::SolverError("backend unavailable".to_string()))
            }
        }

        let store = RecordStore::in_memory().await.unwrap();
        let coordinator = SessionCoordinator::new(
            Box::new(MockParser),
            Box::new(FailingSolver),
            ConfidenceEngine::new(),
            store,
        );

        let result = coordinator.run("Solve 2x + 5 = 13").await;
        assert!(matches!(result, Err(MentorError::SolverError(_))));
    }

    #[tokio::test]
    async fn test_retriever_failure_degrades_to_empty_context() {
        struct FailingRetriever;

        #[async_trait]
        impl ContextRetriever for FailingRetriever {
            async fn retrieve(&self, _: &ParsedProblem) -> Result<Vec<String>> {
                Err(MentorError::RetrievalError("index offline".to_string()))
            }
        }

        let store = RecordStore::in_memory().await.unwrap();
        let coordinator = SessionCoordinator::new(
            Box::new(MockParser),
            Box::new(MockSolver),
            ConfidenceEngine::new(),
            store,
        )
        .with_retriever(Box::new(FailingRetriever));

        let outcome = coordinator.run("Solve 2x + 5 = 13").await.unwrap();
        let report = match outcome {
            SessionOutcome::Completed(report) => report,
            SessionOutcome::NeedsClarification(_) => panic!("unexpected clarification"),
        };

        assert!(report.verification.is_correct);
        assert!(report.solution.formulas_used.is_empty());
    }

    #[tokio::test]
    async fn test_feedback_through_coordinator() {
        let coordinator = coordinator().await;

        let outcome = coordinator.run("Solve 2x + 5 = 13").await.unwrap();
        let report = match outcome {
            SessionOutcome::Completed(report) => report,
            SessionOutcome::NeedsClarification(_) => panic!("unexpected clarification"),
        };
        let ids = report.stored.unwrap();

        coordinator
            .add_feedback(ids.problem_id, true, "correct, thanks")
            .await
            .unwrap();

        let entries = coordinator
            .store()
            .feedback_for_solution(ids.solution_id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].feedback_text, "correct, thanks");
    }
}
