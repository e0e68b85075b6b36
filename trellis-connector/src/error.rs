//! Error types for the connector runtime

use thiserror::Error;

/// Result type for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors raised by the connector runtime
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// The engine rejected a registration payload
    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    /// The engine could not be reached within the retry budget
    #[error("Engine unreachable: {0}")]
    EngineUnreachable(String),

    /// Action execution failed in a way the action did not handle
    #[error("Action failed: {0}")]
    ActionFailed(String),

    /// HTTP plumbing failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Payload (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}
