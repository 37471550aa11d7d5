//! Heuristic checks and their penalty table
//!
//! Each detector reports findings; the engine applies them in a fixed order.
//! A finding carries the multiplicative penalty paired with its check, so the
//! scoring policy is auditable check-by-check. Flag-only findings use a
//! factor of 1.0 and rely on the aggregate per-issue decay.

use crate::models::FinalAnswer;

/// Penalty factors, applied multiplicatively to the running confidence.
pub mod penalty {
    /// Missing final answer
    pub const MISSING_ANSWER: f64 = 0.3;
    /// Structured (stepwise) answer where a terminal value was expected
    pub const STEPWISE_ANSWER: f64 = 0.7;
    /// Numeric answer disagrees with a canonical case
    pub const CANONICAL_MISMATCH: f64 = 0.3;
    /// Division by a literal zero in the answer
    pub const DIVISION_BY_ZERO: f64 = 0.4;
    /// Negative radicand under a root operator
    pub const NEGATIVE_RADICAND: f64 = 0.6;
    /// Non-positive argument to a logarithm
    pub const LOG_NON_POSITIVE: f64 = 0.6;
    /// Adjacent +/- operators in a solution step
    pub const DOUBLED_SIGN: f64 = 0.8;
    /// Unbalanced parentheses in a solution step
    pub const UNBALANCED_PARENS: f64 = 0.7;
    /// Integer constraint violated
    pub const INTEGER_CONSTRAINT: f64 = 0.6;
    /// Positivity or inequality constraint violated
    pub const POSITIVITY_CONSTRAINT: f64 = 0.5;
    /// Probability answer outside [0, 1]
    pub const PROBABILITY_RANGE: f64 = 0.2;
    /// Negative value for a physical quantity
    pub const NEGATIVE_PHYSICAL: f64 = 0.4;
    /// Flag-only finding, no direct penalty
    pub const NONE: f64 = 1.0;

    /// Confidence assigned outright on a canonical-case match
    pub const CANONICAL_MATCH_CONFIDENCE: f64 = 0.95;
    /// Per-issue decay applied once after all checks
    pub const PER_ISSUE_DECAY: f64 = 0.9;
    /// Confidence floor once any issue was recorded
    pub const ISSUE_FLOOR: f64 = 0.1;
    /// Confidence of the fallback result when scoring itself fails
    pub const SCORING_FAILURE: f64 = 0.3;
}

/// One detected defect: the issue text and its paired penalty factor.
#[derive(Debug, Clone)]
pub struct Finding {
    pub issue: String,
    pub factor: f64,
}

impl Finding {
    fn new(issue: impl Into<String>, factor: f64) -> Self {
        Self {
            issue: issue.into(),
            factor,
        }
    }
}

const PHYSICAL_QUANTITY_WORDS: &[&str] =
    &["length", "distance", "area", "volume", "mass", "height", "speed"];

//
// ================= Answer pattern checks =================
//

/// Scan a textual answer for domain-error patterns: division by a literal
/// zero, negative radicand, non-positive logarithm argument.
pub fn answer_pattern_findings(answer: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    let lowered = answer.to_lowercase();

    if let Some((_, denominator)) = split_single_division(&lowered) {
        if denominator.trim() == "0" {
            findings.push(Finding::new(
                "possible division by zero",
                penalty::DIVISION_BY_ZERO,
            ));
        }
    }

    for radicand in call_arguments(&lowered, "sqrt(")
        .into_iter()
        .chain(call_arguments(&lowered, "√("))
    {
        if radicand.contains('-') {
            findings.push(Finding::new(
                format!("possible negative under square root: sqrt({})", radicand),
                penalty::NEGATIVE_RADICAND,
            ));
        }
    }

    for argument in call_arguments(&lowered, "log(") {
        if log_argument_non_positive(&argument) {
            findings.push(Finding::new(
                format!("possible log of non-positive value: log({})", argument),
                penalty::LOG_NON_POSITIVE,
            ));
        }
    }

    findings
}

fn split_single_division(text: &str) -> Option<(&str, &str)> {
    let mut parts = text.split('/');
    let numerator = parts.next()?;
    let denominator = parts.next()?;
    // More than one slash is not a simple quotient
    if parts.next().is_some() {
        return None;
    }
    Some((numerator, denominator))
}

/// Arguments of every `prefix(...)` occurrence, shallow (up to first `)`)
fn call_arguments(text: &str, prefix: &str) -> Vec<String> {
    let mut arguments = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(prefix) {
        let after = &rest[start + prefix.len()..];
        match after.find(')') {
            Some(end) => {
                arguments.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    arguments
}

fn log_argument_non_positive(argument: &str) -> bool {
    let trimmed = argument.trim();
    if let Ok(value) = trimmed.parse::<f64>() {
        return value <= 0.0;
    }
    trimmed.starts_with('-') || trimmed == "0"
}

//
// ================= Step-level checks =================
//

/// Flag a solution that arrived with no working at all.
pub fn missing_steps_finding() -> Finding {
    Finding::new("no solution steps provided", penalty::NONE)
}

/// Inspect one solution step for doubled signs, unbalanced parentheses, and
/// steps too brief to carry any working.
pub fn step_findings(index: usize, step_text: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    let lowered = step_text.to_lowercase();

    if has_doubled_sign(&lowered) {
        findings.push(Finding::new(
            format!("step {}: possible sign error", index + 1),
            penalty::DOUBLED_SIGN,
        ));
    }

    let opens = lowered.matches('(').count();
    let closes = lowered.matches(')').count();
    if opens != closes {
        findings.push(Finding::new(
            format!("step {}: mismatched brackets", index + 1),
            penalty::UNBALANCED_PARENS,
        ));
    }

    if lowered.trim().len() < 5 {
        findings.push(Finding::new(
            format!("step {}: too brief or unclear", index + 1),
            penalty::NONE,
        ));
    }

    findings
}

/// Adjacent +/- operators, ignoring intervening whitespace
fn has_doubled_sign(text: &str) -> bool {
    let mut previous_sign = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            continue;
        }
        let is_sign = ch == '+' || ch == '-';
        if is_sign && previous_sign {
            return true;
        }
        previous_sign = is_sign;
    }
    false
}

//
// ================= Domain constraint checks =================
//

/// Check a numeric answer against the problem's declared constraints.
pub fn constraint_findings(constraints: &[String], answer: f64) -> Vec<Finding> {
    let mut findings = Vec::new();

    for constraint in constraints {
        let lowered = constraint.to_lowercase();

        if lowered.contains("integer") && answer.fract() != 0.0 {
            findings.push(Finding::new(
                format!("answer {} violates integer constraint", answer),
                penalty::INTEGER_CONSTRAINT,
            ));
        }

        // Inequality constraints are approximated as positivity
        if (lowered.contains("positive") || lowered.contains('>')) && answer <= 0.0 {
            findings.push(Finding::new(
                format!("answer {} should be positive ({})", answer, constraint),
                penalty::POSITIVITY_CONSTRAINT,
            ));
        }
    }

    findings
}

//
// ================= Range sanity checks =================
//

/// Probability answers must lie in [0, 1]; physical quantities must be
/// non-negative. `problem_lower` is the lowercased problem text.
pub fn range_findings(problem_lower: &str, answer: f64) -> Vec<Finding> {
    let mut findings = Vec::new();

    if problem_lower.contains("probability") && !(0.0..=1.0).contains(&answer) {
        findings.push(Finding::new(
            format!("probability {} not in range [0, 1]", answer),
            penalty::PROBABILITY_RANGE,
        ));
    }

    if PHYSICAL_QUANTITY_WORDS
        .iter()
        .any(|word| problem_lower.contains(word))
        && answer < 0.0
    {
        findings.push(Finding::new(
            format!("negative value for physical quantity: {}", answer),
            penalty::NEGATIVE_PHYSICAL,
        ));
    }

    findings
}

//
// ================= Edge-case checks =================
//

/// Flag infinite/undefined answers (unless the problem is about limits),
/// complex-looking answers (unless expected), and magnitude outliers.
/// These never apply a direct penalty; aggregate decay covers them.
pub fn edge_case_findings(problem_lower: &str, answer: &FinalAnswer) -> Vec<Finding> {
    let mut findings = Vec::new();
    let answer_text = answer.to_string().to_lowercase();

    let looks_infinite = answer_text.contains("infinity")
        || answer_text.contains('∞')
        || answer_text.contains("undefined")
        || answer.as_number().is_some_and(|n| n.is_infinite() || n.is_nan());

    if looks_infinite && !problem_lower.contains("limit") {
        findings.push(Finding::new(
            "answer is infinite/undefined - check if appropriate",
            penalty::NONE,
        ));
    }

    if !looks_infinite
        && looks_complex(&answer_text)
        && !problem_lower.contains("complex")
    {
        findings.push(Finding::new(
            "answer contains a complex number - check if expected",
            penalty::NONE,
        ));
    }

    if let Some(value) = answer.as_number().filter(|v| v.is_finite()) {
        if value.abs() > 1e10 {
            findings.push(Finding::new(
                "answer is very large - check calculation",
                penalty::NONE,
            ));
        } else if value != 0.0 && value.abs() < 1e-10 {
            findings.push(Finding::new(
                "answer is very close to zero - check precision",
                penalty::NONE,
            ));
        }
    }

    findings
}

/// An `a+bi`-shaped token: trailing imaginary unit preceded by a digit
fn looks_complex(answer: &str) -> bool {
    answer.split_whitespace().any(|token| {
        let token = token.trim_end_matches(',');
        (token.ends_with('i') || token.ends_with('j'))
            && token[..token.len() - 1]
                .chars()
                .last()
                .is_some_and(|c| c.is_ascii_digit())
    })
}

//
// ================= Format warnings =================
//

/// Soft mismatches between the requested and delivered answer format.
/// Warnings only, never issues.
pub fn format_warnings(problem_lower: &str, answer: &FinalAnswer) -> Vec<String> {
    let mut warnings = Vec::new();

    if problem_lower.contains("decimal") || problem_lower.contains("rounded") {
        if let FinalAnswer::Text(text) = answer {
            if !text.chars().any(|c| c.is_ascii_digit()) {
                warnings.push("answer should be in decimal format".to_string());
            }
        }
    }

    if problem_lower.contains("fraction") || problem_lower.contains("rational") {
        if let FinalAnswer::Number(n) = answer {
            if n.fract() != 0.0 {
                warnings.push("answer might be expected as a fraction".to_string());
            }
        }
    }

    warnings
}
