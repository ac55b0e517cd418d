//! Error types for the logical-replication ingester
//!
//! Every fallible operation in this crate returns `ReplicationResult<T>`. The
//! variants mirror the error kinds the session manager distinguishes:
//! transient I/O, protocol desync (message parsing), and configuration or
//! initialization failure.

use thiserror::Error;

/// Main error type for the replication ingester.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Database connection related errors.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Configuration related errors.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Message parsing errors: truncated buffers, bad markers, unknown tags.
    #[error("message parsing error: {message}")]
    MessageParsing { message: String },

    /// Protocol errors: query/slot/publication checks against the server.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Buffer operation errors (reader/writer ran out of bytes or space).
    #[error("buffer operation error: {message}")]
    BufferOperation { message: String },

    /// A configured event publisher rejected or failed to accept an event.
    #[error("publish error: {message}")]
    Publish { message: String },

    /// Network/IO related errors.
    #[error("network IO error")]
    NetworkIO(#[from] std::io::Error),

    /// String conversion errors.
    #[error("string conversion error")]
    StringConversion(#[from] std::string::FromUtf8Error),

    /// C string conversion errors, from building libpq C strings.
    #[error("C string conversion error")]
    CStringConversion(#[from] std::ffi::NulError),

    /// Task execution errors for async operations.
    #[error("task execution error")]
    TaskExecution(#[from] tokio::task::JoinError),

    /// Generic error for compatibility with `anyhow`-returning collaborators.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for convenience.
pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;

impl ReplicationError {
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::MessageParsing { message: message.into() }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    pub fn buffer<S: Into<String>>(message: S) -> Self {
        Self::BufferOperation { message: message.into() }
    }

    pub fn publish<S: Into<String>>(message: S) -> Self {
        Self::Publish { message: message.into() }
    }
}
