//! Error types for HAKES index operations.
//!
//! Every failure crossing the public [`Collection`](crate::Collection)
//! contract is reported through [`Error`]. Error codes follow the pattern
//! `HAKES-XXX` so that log lines from different workers can be grepped
//! together.

use thiserror::Error;

use crate::Label;

/// Result type alias for HAKES operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in HAKES operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Dimension mismatch (HAKES-001).
    #[error("[HAKES-001] Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Malformed batch: empty, oversized, or parallel arrays of unequal length (HAKES-002).
    #[error("[HAKES-002] Invalid batch: {0}")]
    InvalidBatch(String),

    /// Id already present in the index or repeated inside one batch (HAKES-003).
    #[error("[HAKES-003] Duplicate id {0}")]
    DuplicateId(Label),

    /// Operation invoked before a successful initialize or build (HAKES-004).
    #[error("[HAKES-004] Index is not initialized")]
    NotInitialized,

    /// Operation not available in the current state or load mode (HAKES-005).
    #[error("[HAKES-005] Invalid state: {0}")]
    InvalidState(String),

    /// Rerank candidate has no full-precision vector (HAKES-006).
    #[error("[HAKES-006] Candidate label {0} has no entry in the refine index")]
    MissingRefineLabel(Label),

    /// Malformed or incompatible parameter document (HAKES-007).
    #[error("[HAKES-007] Invalid parameters: {0}")]
    InvalidParams(String),

    /// Checkpoint missing, incomplete or of an unsupported version (HAKES-008).
    #[error("[HAKES-008] Checkpoint error: {0}")]
    Checkpoint(String),

    /// Persisted artifact failed checksum or structural validation (HAKES-009).
    #[error("[HAKES-009] Corrupted artifact: {0}")]
    CorruptedArtifact(String),

    /// IO error (HAKES-010).
    #[error("[HAKES-010] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (HAKES-011).
    #[error("[HAKES-011] Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (HAKES-012).
    #[error("[HAKES-012] Configuration error: {0}")]
    Config(String),

    /// Internal error (HAKES-013).
    ///
    /// Indicates a broken internal invariant. Please report if encountered.
    #[error("[HAKES-013] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code (e.g., "HAKES-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "HAKES-001",
            Self::InvalidBatch(_) => "HAKES-002",
            Self::DuplicateId(_) => "HAKES-003",
            Self::NotInitialized => "HAKES-004",
            Self::InvalidState(_) => "HAKES-005",
            Self::MissingRefineLabel(_) => "HAKES-006",
            Self::InvalidParams(_) => "HAKES-007",
            Self::Checkpoint(_) => "HAKES-008",
            Self::CorruptedArtifact(_) => "HAKES-009",
            Self::Io(_) => "HAKES-010",
            Self::Serialization(_) => "HAKES-011",
            Self::Config(_) => "HAKES-012",
            Self::Internal(_) => "HAKES-013",
        }
    }

    /// Returns true if retrying the same call can succeed once the
    /// triggering condition is resolved.
    ///
    /// Corrupted artifacts and internal errors are not recoverable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::CorruptedArtifact(_) | Self::Internal(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
