//! The closed failure taxonomy shared by both sides of the bridge.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Kind of failure. This set is closed: every error that reaches a caller or
/// the wire is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No active link, or the link was lost mid-request.
    Connection,
    /// No response within the configured deadline.
    Timeout,
    /// Bad envelope, unknown method, or parameters rejected by the schema.
    Validation,
    /// A tool handler ran and reported failure.
    ToolExecution,
    /// A resource handler ran and reported failure.
    ResourceFetch,
    /// Anything unanticipated. Unknown kinds read off the wire land here too.
    #[serde(other)]
    Internal,
}

impl ErrorKind {
    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::ToolExecution => "tool_execution",
            Self::ResourceFetch => "resource_fetch",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bridge failure: a kind, a human-readable message and optional
/// structured details.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} error: {message}")]
pub struct BridgeError {
    /// Failure kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details (e.g. the original error text of an
    /// internal failure, or the list of validation problems).
    pub details: Option<Value>,
}

impl BridgeError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, msg)
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }

    /// Create a tool execution error.
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ToolExecution, msg)
    }

    /// Create a resource fetch error.
    pub fn resource_fetch(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceFetch, msg)
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    /// Wrap an unanticipated error as `internal`, keeping its text in
    /// `details`.
    pub fn wrap_internal(context: impl Into<String>, source: impl fmt::Display) -> Self {
        Self::internal(context).with_details(Value::String(source.to_string()))
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Check the kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("malformed message: {}", err))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::connection(format!("I/O error: {}", err))
    }
}
