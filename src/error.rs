//! Error types for the math mentor pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, MentorError>;

#[derive(Error, Debug)]
pub enum MentorError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Solver error: {0}")]
    SolverError(String),

    #[error("Retrieval error: {0}")]
    RetrievalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
