//! Error types for the engine

use thiserror::Error;
use trellis_sandbox::SandboxError;

use crate::store::StoreError;
use crate::validation::ValidationReport;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine's components. The HTTP layer is the only
/// place these are translated to status codes.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed definition document
    #[error("Parse error: {0}")]
    Parse(String),

    /// Publish or execute validation failed
    #[error("Validation failed: {}", .0.errors.join("; "))]
    Validation(ValidationReport),

    /// The request cannot be honored as made
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Entity lookup failed
    #[error("{0} not found")]
    NotFound(String),

    /// Precondition or uniqueness violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Template or condition sandbox failure
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Parameter or output schema violation
    #[error("Schema validation failed: {0:?}")]
    Schema(Vec<String>),

    /// Remote connector call failed
    #[error("Remote call failed: {0}")]
    Remote(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}
