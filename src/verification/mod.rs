//! Confidence engine for rule-based solution verification
//!
//! Deterministic, multiplicative scoring over heuristic correctness checks.
//! Stateless and side-effect free; never raises to its caller.

pub mod canonical;
pub mod checks;

pub use canonical::CanonicalCase;

use crate::models::{FinalAnswer, ParsedProblem, Solution, VerificationResult};
use checks::{penalty, Finding};
use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{info, warn};

/// Heuristic evaluator: scores a candidate solution against a problem.
///
/// Checks run in a fixed order and each one may append issues and multiply
/// the running confidence by its paired penalty factor. Later checks operate
/// on the already-degraded value, so the order is part of the contract.
pub struct ConfidenceEngine {
    cases: Vec<CanonicalCase>,
}

impl ConfidenceEngine {
    /// Engine with the default canonical-case table
    pub fn new() -> Self {
        Self {
            cases: canonical::default_cases(),
        }
    }

    /// Append a canonical case without touching engine logic
    pub fn with_case(mut self, case: CanonicalCase) -> Self {
        self.cases.push(case);
        self
    }

    /// Verify a solution against its problem.
    ///
    /// Any internal scoring failure degrades to a low-confidence result
    /// flagged for human review; this method never returns an error.
    pub fn verify(&self, problem: &ParsedProblem, solution: &Solution) -> VerificationResult {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.score(problem, solution)));

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(topic = %problem.topic, "Scoring panicked, returning fallback result");
                Self::fallback("internal scoring failure")
            }
        };

        info!(
            confidence = result.confidence,
            issue_count = result.issues.len(),
            is_correct = result.is_correct,
            requires_human_review = result.requires_human_review,
            "Verification completed"
        );

        result
    }

    fn score(&self, problem: &ParsedProblem, solution: &Solution) -> VerificationResult {
        let mut confidence: f64 = 1.0;
        let mut issues: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        // Verdict hint from a canonical-case comparison, if one applied
        let mut canonical_verdict: Option<bool> = None;

        let problem_lower = problem.text.to_lowercase();

        match &solution.final_answer {
            // 1. Answer presence: missing answer short-circuits all
            //    remaining answer-level checks
            None => {
                issues.push("no answer provided".to_string());
                confidence *= penalty::MISSING_ANSWER;
            }

            // 2. Structured answer where a terminal value was expected
            Some(answer) if answer.is_stepwise() => {
                issues.push("stepwise approach provided, not a final answer".to_string());
                confidence *= penalty::STEPWISE_ANSWER;
            }

            Some(answer) => {
                // 3. Canonical-case comparison
                let signature = canonical::normalize(&problem.text);
                if let Some(case) = self.cases.iter().find(|c| c.matches(&signature)) {
                    match answer.as_number() {
                        Some(value) if case.accepts(value) => {
                            confidence = penalty::CANONICAL_MATCH_CONFIDENCE;
                            canonical_verdict = Some(true);
                        }
                        Some(value) => {
                            issues.push(format!(
                                "expected answer {} for {}, got {}",
                                case.expected, case.label, value
                            ));
                            confidence *= penalty::CANONICAL_MISMATCH;
                            canonical_verdict = Some(false);
                        }
                        None => {
                            issues.push(format!(
                                "cannot verify non-numeric answer against expected {} for {}",
                                case.expected, case.label
                            ));
                            confidence *= penalty::CANONICAL_MISMATCH;
                            canonical_verdict = Some(false);
                        }
                    }
                }

                // 4. Pattern checks on the answer string
                if let FinalAnswer::Text(text) = answer {
                    apply(
                        checks::answer_pattern_findings(text),
                        &mut issues,
                        &mut confidence,
                    );
                }

                // 5. Step-level checks; an absent working is itself a flag
                if solution.steps.is_empty() {
                    apply(
                        vec![checks::missing_steps_finding()],
                        &mut issues,
                        &mut confidence,
                    );
                }
                for (index, step) in solution.steps.iter().enumerate() {
                    apply(
                        checks::step_findings(index, step.text()),
                        &mut issues,
                        &mut confidence,
                    );
                }

                // 6-7. Domain constraints and range sanity, numeric answers only
                if let Some(value) = answer.as_number().filter(|v| v.is_finite()) {
                    apply(
                        checks::constraint_findings(&problem.constraints, value),
                        &mut issues,
                        &mut confidence,
                    );
                    apply(
                        checks::range_findings(&problem_lower, value),
                        &mut issues,
                        &mut confidence,
                    );
                }

                // 8. Edge cases: infinities, complex values, magnitude outliers
                apply(
                    checks::edge_case_findings(&problem_lower, answer),
                    &mut issues,
                    &mut confidence,
                );

                warnings.extend(checks::format_warnings(&problem_lower, answer));
            }
        }

        // 9. Aggregate decay, compounding with the per-check penalties
        if !issues.is_empty() {
            confidence =
                (confidence * penalty::PER_ISSUE_DECAY.powi(issues.len() as i32))
                    .max(penalty::ISSUE_FLOOR);
        }
        confidence = confidence.clamp(0.0, 1.0);

        // 10. Verdict synthesis
        let requires_human_review = confidence < 0.5 || issues.len() > 2;
        if confidence < 0.5 {
            warnings.push("low confidence - human review recommended".to_string());
        }

        let is_correct = if confidence > 0.7 && issues.is_empty() {
            true
        } else if confidence < 0.3 {
            false
        } else {
            // Indeterminate band: trust only an explicit canonical verdict
            canonical_verdict.unwrap_or(false)
        };

        VerificationResult {
            is_correct,
            confidence,
            issues,
            warnings,
            requires_human_review,
            verified_at: Utc::now(),
        }
    }

    fn fallback(reason: &str) -> VerificationResult {
        VerificationResult {
            is_correct: false,
            confidence: penalty::SCORING_FAILURE,
            issues: vec![format!("verification failed: {}", reason)],
            warnings: vec!["low confidence - human review recommended".to_string()],
            requires_human_review: true,
            verified_at: Utc::now(),
        }
    }
}

impl Default for ConfidenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(findings: Vec<Finding>, issues: &mut Vec<String>, confidence: &mut f64) {
    for finding in findings {
        issues.push(finding.issue);
        *confidence *= finding.factor;
    }
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SolutionStep;

    fn problem(text: &str) -> ParsedProblem {
        ParsedProblem {
            original_input: text.to_string(),
            text: text.to_string(),
            topic: "algebra".to_string(),
            variables: vec!["x".to_string()],
            constraints: vec![],
            needs_clarification: false,
            clarification_prompt: None,
            parsed_at: Utc::now(),
        }
    }

    fn solution(answer: Option<FinalAnswer>) -> Solution {
        Solution {
            steps: vec![SolutionStep::Note("2x = 8".to_string())],
            final_answer: answer,
            formulas_used: vec![],
            method: "algebraic manipulation".to_string(),
            solved_at: Utc::now(),
        }
    }

    #[test]
    fn test_canonical_case_match() {
        let engine = ConfidenceEngine::new();
        let result = engine.verify(
            &problem("Solve 2x + 5 = 13"),
            &solution(Some(FinalAnswer::Number(4.0))),
        );

        assert!((result.confidence - 0.95).abs() < f64::EPSILON);
        assert!(result.is_correct);
        assert!(result.issues.is_empty());
        assert!(!result.requires_human_review);
    }

    #[test]
    fn test_canonical_case_matches_text_answer() {
        let engine = ConfidenceEngine::new();
        let result = engine.verify(
            &problem("Solve 2x + 5 = 13"),
            &solution(Some(FinalAnswer::Text("4".to_string()))),
        );

        assert!((result.confidence - 0.95).abs() < f64::EPSILON);
        assert!(result.is_correct);
    }

    #[test]
    fn test_canonical_case_mismatch() {
        let engine = ConfidenceEngine::new();
        let result = engine.verify(
            &problem("Solve 2x + 5 = 13"),
            &solution(Some(FinalAnswer::Number(5.0))),
        );

        assert!(!result.is_correct);
        assert!(result.confidence < 0.3);
        assert!(result.issues.iter().any(|i| i.contains("expected answer 4")));
    }

    #[test]
    fn test_missing_answer() {
        let engine = ConfidenceEngine::new();
        let result = engine.verify(&problem("Solve x + 1 = 2"), &solution(None));

        assert!(result.confidence <= 0.3);
        assert!(result.issues.iter().any(|i| i == "no answer provided"));
        assert!(result.requires_human_review);
        assert!(!result.is_correct);
    }

    #[test]
    fn test_stepwise_answer_is_informational() {
        let engine = ConfidenceEngine::new();
        let steps = vec![SolutionStep::Note("2x = 8".to_string())];
        let result = engine.verify(
            &problem("Solve x + 1 = 2"),
            &solution(Some(FinalAnswer::Stepwise(steps))),
        );

        // 0.7 then one-issue decay: 0.63
        assert!((result.confidence - 0.63).abs() < 1e-9);
        assert!(result
            .issues
            .iter()
            .any(|i| i.contains("stepwise approach")));
    }

    #[test]
    fn test_probability_out_of_range() {
        let engine = ConfidenceEngine::new();
        let result = engine.verify(
            &problem("What is the probability of the event?"),
            &solution(Some(FinalAnswer::Number(1.5))),
        );

        assert!(result.confidence <= 0.2);
        assert!(!result.is_correct);
        assert!(result.requires_human_review);
    }

    #[test]
    fn test_human_review_tracks_low_confidence() {
        let engine = ConfidenceEngine::new();

        let candidates = vec![
            (problem("probability of rain"), solution(Some(FinalAnswer::Number(2.0)))),
            (problem("Solve x"), solution(None)),
            (
                problem("Solve 2x + 5 = 13"),
                solution(Some(FinalAnswer::Number(7.0))),
            ),
        ];

        for (p, s) in candidates {
            let result = engine.verify(&p, &s);
            if result.confidence < 0.5 {
                assert!(result.requires_human_review);
                assert!(result
                    .warnings
                    .iter()
                    .any(|w| w.contains("human review")));
            }
        }
    }

    #[test]
    fn test_confidence_always_in_unit_interval() {
        let engine = ConfidenceEngine::new();

        let answers = vec![
            None,
            Some(FinalAnswer::Number(4.0)),
            Some(FinalAnswer::Number(-1e15)),
            Some(FinalAnswer::Number(f64::INFINITY)),
            Some(FinalAnswer::Number(f64::NAN)),
            Some(FinalAnswer::Text("5/0 + sqrt(-4) + log(0)".to_string())),
            Some(FinalAnswer::Stepwise(vec![])),
        ];

        let steps = vec![
            SolutionStep::Note("((".to_string()),
            SolutionStep::Note("x = +-4".to_string()),
            SolutionStep::Note("ok".to_string()),
        ];

        for answer in answers {
            let mut s = solution(answer);
            s.steps = steps.clone();
            let result = engine.verify(&problem("probability of length -1"), &s);
            assert!(
                (0.0..=1.0).contains(&result.confidence),
                "confidence {} out of range",
                result.confidence
            );
        }
    }

    #[test]
    fn test_step_defects_compound() {
        let engine = ConfidenceEngine::new();
        let mut s = solution(Some(FinalAnswer::Number(3.0)));
        s.steps = vec![
            SolutionStep::Worked {
                expression: "2x + 5 = 13".to_string(),
                result: "2x = 8 + -1".to_string(),
            },
            SolutionStep::Note("(x = 4".to_string()),
        ];

        let result = engine.verify(&problem("Solve for x in 3x = 9"), &s);

        assert_eq!(result.issues.len(), 2);
        // 0.8 * 0.7 = 0.56, then 0.9^2 decay
        let expected = 0.56 * 0.9f64.powi(2);
        assert!((result.confidence - expected).abs() < 1e-9);
        assert!(!result.is_correct);
    }

    #[test]
    fn test_issue_floor() {
        let engine = ConfidenceEngine::new();
        let mut s = solution(Some(FinalAnswer::Text("5/0 + sqrt(-1) + log(-2)".to_string())));
        s.steps = vec![
            SolutionStep::Note("--".to_string()),
            SolutionStep::Note("((((".to_string()),
        ];

        let result = engine.verify(&problem("Solve something"), &s);
        assert!(result.confidence >= 0.1);
        assert!(result.issues.len() > 2);
        assert!(result.requires_human_review);
    }

    #[test]
    fn test_empty_step_list_flagged() {
        let engine = ConfidenceEngine::new();
        let mut s = solution(Some(FinalAnswer::Number(2.0)));
        s.steps = vec![];

        let result = engine.verify(&problem("Solve 4x = 8"), &s);

        assert!(result
            .issues
            .iter()
            .any(|i| i == "no solution steps provided"));
        // Flag-only: aggregate decay is the only effect
        assert!((result.confidence - 0.9).abs() < 1e-9);
        assert!(!result.is_correct);
    }

    #[test]
    fn test_indeterminate_band_defaults_to_incorrect() {
        let engine = ConfidenceEngine::new();
        // One flag-only edge-case issue: 1.0 * 0.9 = 0.9, issues nonempty
        let result = engine.verify(
            &problem("Solve for x"),
            &solution(Some(FinalAnswer::Text("infinity".to_string()))),
        );

        assert_eq!(result.issues.len(), 1);
        assert!(!result.is_correct);
    }

    #[test]
    fn test_extensible_canonical_table() {
        let engine = ConfidenceEngine::new().with_case(CanonicalCase::new(
            "derivative of x^2 at 3",
            &["derivative of x^2 at x = 3"],
            6.0,
            0.001,
        ));

        let result = engine.verify(
            &problem("Find the derivative of x^2 at x = 3"),
            &solution(Some(FinalAnswer::Number(6.0))),
        );

        assert!((result.confidence - 0.95).abs() < f64::EPSILON);
        assert!(result.is_correct);
    }

    #[test]
    fn test_integer_constraint_violation() {
        let engine = ConfidenceEngine::new();
        let mut p = problem("Find the number of people");
        p.constraints = vec!["answer must be integer".to_string()];

        let result = engine.verify(&p, &solution(Some(FinalAnswer::Number(2.5))));
        assert!(result
            .issues
            .iter()
            .any(|i| i.contains("integer constraint")));
        assert!(result.confidence < 0.7);
    }

    #[test]
    fn test_deterministic_for_identical_inputs() {
        let engine = ConfidenceEngine::new();
        let p = problem("Solve 2x + 5 = 13");
        let s = solution(Some(FinalAnswer::Number(4.0)));

        let first = engine.verify(&p, &s);
        let second = engine.verify(&p, &s);

        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.issues, second.issues);
        assert_eq!(first.is_correct, second.is_correct);
    }
}
