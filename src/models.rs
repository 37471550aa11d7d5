//! Core data models for the math mentor pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

//
// ================= Problem =================
//

/// A problem record as produced by the external Parser collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedProblem {
    /// Raw input exactly as the user supplied it
    pub original_input: String,
    /// Normalized problem text
    pub text: String,
    pub topic: String,
    #[serde(default)]
    pub variables: Vec<String>,
    /// Ordered constraint expressions, e.g. "x > 0" or "integer"
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarification_prompt: Option<String>,
    pub parsed_at: DateTime<Utc>,
}

/// A problem as persisted, with its store-assigned identity. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredProblem {
    pub id: i64,
    pub original_input: String,
    pub text: String,
    pub topic: String,
    pub variables: Vec<String>,
    pub constraints: Vec<String>,
    pub created_at: DateTime<Utc>,
}

//
// ================= Solution =================
//

/// One step of a worked solution: an expression/result pair or plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SolutionStep {
    Worked { expression: String, result: String },
    Note(String),
}

impl SolutionStep {
    /// Text the verifier inspects for this step
    pub fn text(&self) -> &str {
        match self {
            SolutionStep::Worked { result, .. } => result,
            SolutionStep::Note(text) => text,
        }
    }
}

/// Final answer of a solution: a scalar, free text, or a structured step list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FinalAnswer {
    Number(f64),
    Stepwise(Vec<SolutionStep>),
    Text(String),
}

impl FinalAnswer {
    /// Numeric view of the answer, parsing text when possible
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FinalAnswer::Number(n) => Some(*n),
            FinalAnswer::Text(s) => s.trim().parse::<f64>().ok(),
            FinalAnswer::Stepwise(_) => None,
        }
    }

    pub fn is_stepwise(&self) -> bool {
        matches!(self, FinalAnswer::Stepwise(_))
    }
}

impl fmt::Display for FinalAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalAnswer::Number(n) => write!(f, "{}", n),
            FinalAnswer::Text(s) => write!(f, "{}", s),
            FinalAnswer::Stepwise(steps) => {
                let rendered = serde_json::to_string(steps).unwrap_or_default();
                write!(f, "{}", rendered)
            }
        }
    }
}

/// A candidate solution as produced by the external Solver collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    #[serde(default)]
    pub steps: Vec<SolutionStep>,
    pub final_answer: Option<FinalAnswer>,
    #[serde(default)]
    pub formulas_used: Vec<String>,
    pub method: String,
    pub solved_at: DateTime<Utc>,
}

/// A solution as persisted, keyed by its owning problem. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSolution {
    pub id: i64,
    pub problem_id: i64,
    pub steps: Vec<SolutionStep>,
    /// Final answer in its stored (stringified) form
    pub final_answer: Option<String>,
    pub formulas_used: Vec<String>,
    pub method: String,
    pub solved_at: DateTime<Utc>,
}

//
// ================= Verification =================
//

/// Outcome of a verification pass over one solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_correct: bool,
    /// Estimated likelihood the solution is correct, always in [0, 1]
    pub confidence: f64,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub requires_human_review: bool,
    pub verified_at: DateTime<Utc>,
}

/// Loosely-shaped verification input from an external source.
///
/// Fields may be absent or malformed upstream; `normalized` coerces each to
/// its declared type before the record is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationDraft {
    #[serde(default, deserialize_with = "lenient")]
    pub is_correct: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub issues: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub warnings: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub requires_human_review: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub verified_at: Option<DateTime<Utc>>,
}

/// Treat a field of the wrong JSON shape as absent; `normalized` supplies
/// the default.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

impl VerificationDraft {
    /// Coerce to a complete record: booleans default to false, confidence
    /// defaults to 0.5 and is clamped to [0, 1], lists default to empty.
    pub fn normalized(self) -> VerificationResult {
        VerificationResult {
            is_correct: self.is_correct.unwrap_or(false),
            confidence: self.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            issues: self.issues.unwrap_or_default(),
            warnings: self.warnings.unwrap_or_default(),
            requires_human_review: self.requires_human_review.unwrap_or(false),
            verified_at: self.verified_at.unwrap_or_else(Utc::now),
        }
    }
}

impl From<VerificationResult> for VerificationDraft {
    fn from(result: VerificationResult) -> Self {
        Self {
            is_correct: Some(result.is_correct),
            confidence: Some(result.confidence),
            issues: Some(result.issues),
            warnings: Some(result.warnings),
            requires_human_review: Some(result.requires_human_review),
            verified_at: Some(result.verified_at),
        }
    }
}

/// A verification as persisted, keyed by its owning solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredVerification {
    pub id: i64,
    pub solution_id: i64,
    pub is_correct: bool,
    pub confidence: f64,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub requires_human_review: bool,
    pub verified_at: DateTime<Utc>,
}

//
// ================= Feedback =================
//

/// User reaction to a delivered solution. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub is_correct: bool,
    pub feedback_text: String,
    pub corrected_answer: Option<String>,
    pub given_by: String,
    pub given_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFeedback {
    pub id: i64,
    pub solution_id: i64,
    pub is_correct: bool,
    pub feedback_text: String,
    pub corrected_answer: Option<String>,
    pub given_by: String,
    pub given_at: DateTime<Utc>,
}

//
// ================= Store views =================
//

/// Identities assigned when one session's causal chain is persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionIds {
    pub problem_id: i64,
    pub solution_id: i64,
    pub verification_id: i64,
}

/// One row of the recent-history view: a problem with its latest answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemSummary {
    pub id: i64,
    pub text: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub final_answer: Option<String>,
}

/// Aggregate statistics across the whole store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_problems: i64,
    pub correct_verifications: i64,
    pub topics: HashMap<String, i64>,
    pub average_confidence: f64,
    pub positive_feedback: i64,
    pub negative_feedback: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_answer_as_number() {
        assert_eq!(FinalAnswer::Number(4.0).as_number(), Some(4.0));
        assert_eq!(FinalAnswer::Text(" 4 ".to_string()).as_number(), Some(4.0));
        assert_eq!(FinalAnswer::Text("x = 4".to_string()).as_number(), None);
        assert_eq!(FinalAnswer::Stepwise(vec![]).as_number(), None);
    }

    #[test]
    fn test_draft_coercion_defaults() {
        let record = VerificationDraft::default().normalized();
        assert!(!record.is_correct);
        assert!((record.confidence - 0.5).abs() < f64::EPSILON);
        assert!(record.issues.is_empty());
        assert!(record.warnings.is_empty());
        assert!(!record.requires_human_review);
    }

    #[test]
    fn test_draft_clamps_confidence() {
        let record = VerificationDraft {
            confidence: Some(3.2),
            ..Default::default()
        }
        .normalized();
        assert!((record.confidence - 1.0).abs() < f64::EPSILON);

        let record = VerificationDraft {
            confidence: Some(-0.4),
            ..Default::default()
        }
        .normalized();
        assert!(record.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_draft_tolerates_wrong_shaped_fields() {
        let draft: VerificationDraft = serde_json::from_str(
            r#"{"is_correct": "yes", "confidence": "high", "issues": "none",
                "warnings": 5, "requires_human_review": true}"#,
        )
        .unwrap();

        // Malformed fields coerce to absent; well-shaped ones survive
        assert!(draft.requires_human_review.unwrap());
        let record = draft.normalized();
        assert!(!record.is_correct);
        assert!((record.confidence - 0.5).abs() < f64::EPSILON);
        assert!(record.issues.is_empty());
        assert!(record.warnings.is_empty());
    }

    #[test]
    fn test_final_answer_untagged_deserialization() {
        let n: FinalAnswer = serde_json::from_str("4.5").unwrap();
        assert!(matches!(n, FinalAnswer::Number(_)));

        let t: FinalAnswer = serde_json::from_str("\"x = 4\"").unwrap();
        assert!(matches!(t, FinalAnswer::Text(_)));

        let s: FinalAnswer =
            serde_json::from_str(r#"[{"expression": "2x = 8", "result": "x = 4"}]"#).unwrap();
        assert!(s.is_stepwise());
    }
}
