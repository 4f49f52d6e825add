//! Handler-boundary error taxonomy.
//!
//! Every failure that reaches a client is one of these classes, rendered
//! into the response `message` as `<ACTION>: <Kind>="<detail>"`. Nothing
//! here terminates a worker; the dispatch wrapper converts errors into
//! `success=false` responses.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AsyncMessageError {
    /// Missing or invalid context fields, unsupported schemes or endpoint
    /// arguments.
    #[error("{0}")]
    Configuration(String),

    /// Backend refused the connection, or an operation ran against a
    /// handler that is not connected.
    #[error("{0}")]
    Connection(String),

    /// Transient remote disconnect; retried during GET, fatal elsewhere.
    #[error("{0}")]
    Transport(String),

    /// `message_wait` exceeded.
    #[error("{0}")]
    Timeout(String),

    /// Expression does not parse, or the payload cannot be transformed.
    #[error("{0}")]
    Transform(String),

    /// Action not present in the handler's dispatch table.
    #[error("no implementation for {0}")]
    NoImplementation(String),
}

impl AsyncMessageError {
    /// Taxonomy tag used on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Connection(_) => "ConnectionError",
            Self::Transport(_) => "TransportError",
            Self::Timeout(_) => "TimeoutError",
            Self::Transform(_) => "TransformError",
            Self::NoImplementation(_) => "NoImplementation",
        }
    }

    /// The `message` rendering used in failure responses.
    #[must_use]
    pub fn wire_message(&self, action: &str) -> String {
        format!("{action}: {}=\"{self}\"", self.kind())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform(msg.into())
    }
}

/// Result alias for handler operations.
pub type HandlerResult<T> = Result<T, AsyncMessageError>;
