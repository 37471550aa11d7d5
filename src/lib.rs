//! Math Mentor Core
//!
//! Verification and durable record store for a tutoring pipeline:
//! - Scores candidate solutions with deterministic, rule-based heuristics
//! - Persists problem / solution / verification / feedback as linked records
//! - Coordinates parse → clarify? → solve → verify → persist per session
//!
//! Raw input extraction, solution generation, and presentation are external
//! collaborators; this crate only scores given solutions and records the
//! results.

pub mod error;
pub mod models;
pub mod session;
pub mod store;
pub mod verification;

pub use error::{MentorError, Result};

// Re-export common types
pub use models::*;
pub use session::{SessionCoordinator, SessionOutcome};
pub use store::RecordStore;
pub use verification::{CanonicalCase, ConfidenceEngine};
