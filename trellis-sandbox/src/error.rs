//! Error types for the expression sandbox

use thiserror::Error;

/// Result type for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Errors raised while parsing or evaluating sandboxed expressions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    /// Syntax error or disallowed construct (function call, template block)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Evaluation error (missing name in strict mode, bad operand types)
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Wall-clock deadline exceeded
    #[error("Evaluation timed out")]
    Timeout,

    /// A sandbox limit was exceeded (steps, depth, allocation)
    #[error("Sandbox limit exceeded: {0}")]
    Limit(String),
}
