use thiserror::Error;

/// Errors that can occur during RPC operations
///
/// Transport failures never reach application code raw; they are translated
/// into one of the variants below.
#[derive(Error, Debug)]
pub enum Error {
    /// Synchronous call timed out waiting for its response
    #[error("request timed out")]
    Timeout,

    /// Connection attempt did not complete in time
    #[error("timed out after {0:?} waiting for connection")]
    ConnectTimeout(std::time::Duration),

    /// Connection attempt failed outright
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection was torn down while a call was outstanding,
    /// or a send was attempted on a closed connection
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport-level send failure
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No synchronous handler registered for the request's payload kind.
    /// Raised server-side, surfaced as the call's failure in the client.
    #[error("no handler registered for request of type [{0}]")]
    UnknownRequestType(String),

    /// A remote handler failed; carries the structured fault description
    /// since the original error cannot cross the wire
    #[error("remote handler failed: [{kind}] {message}")]
    Remote { kind: String, message: String },

    /// Operation is invalid for the current start/stop state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, Error>;
