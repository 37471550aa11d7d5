//! Canonical-case table
//!
//! Known reference problems with expected roots. Matching one of these is a
//! high-confidence shortcut; new cases are data, not engine logic.

/// A known problem instance with a hard-coded expected answer.
#[derive(Debug, Clone)]
pub struct CanonicalCase {
    /// Short label used in issue messages
    pub label: String,
    /// Text fragments identifying the instance; any containment match
    /// against the normalized problem text selects this case
    pub patterns: Vec<String>,
    pub expected: f64,
    /// Absolute tolerance for the numeric comparison
    pub tolerance: f64,
}

impl CanonicalCase {
    pub fn new(
        label: impl Into<String>,
        patterns: &[&str],
        expected: f64,
        tolerance: f64,
    ) -> Self {
        Self {
            label: label.into(),
            patterns: patterns.iter().map(|p| normalize(p)).collect(),
            expected,
            tolerance,
        }
    }

    pub fn matches(&self, normalized_problem: &str) -> bool {
        self.patterns.iter().any(|p| normalized_problem.contains(p.as_str()))
    }

    pub fn accepts(&self, answer: f64) -> bool {
        (answer - self.expected).abs() < self.tolerance
    }
}

/// Problem-text signature used for canonical matching: lowercase with
/// whitespace runs collapsed, so "2x + 5 = 13" and "2x+5 = 13" line up.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.extend(ch.to_lowercase());
            last_was_space = false;
        }
    }
    out
}

/// Reference instances shipped with the engine.
pub fn default_cases() -> Vec<CanonicalCase> {
    vec![CanonicalCase::new(
        "linear equation 2x + 5 = 13",
        &["2x + 5 = 13", "2x+5=13", "2x+5 = 13"],
        4.0,
        0.001,
    )]
}
