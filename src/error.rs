//! Error types for the data-access layer.

use serde_json::Value;
use std::fmt;

/// Result type returned by every data-access operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of failure kinds a data-access operation can report.
///
/// The surrounding CRUD layer maps each kind to a user-facing message, so
/// new kinds should only be added together with that mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad pagination or id parameters.
    ///
    /// Raised before any query runs. Pagination parameters are usually
    /// clamped instead of rejected; empty batches are rejected.
    Validation,

    /// The addressed record does not exist.
    ///
    /// Surfaced to the caller, never retried.
    NotFound,

    /// A store constraint rejected the write (e.g. duplicate enrollment).
    ConstraintViolation,

    /// The underlying store failed.
    ///
    /// Transaction scopes roll back and the cache never stores the result.
    Database,

    /// A member of an atomic batch failed.
    ///
    /// Rollback has already been applied when this is returned; the
    /// `details` of the error name the failing member and its cause.
    TransactionAborted,
}

impl ErrorKind {
    /// Stable name used in logs and serialized error details.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::ConstraintViolation => "ConstraintViolation",
            ErrorKind::Database => "DatabaseError",
            ErrorKind::TransactionAborted => "TransactionAborted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure half of every data-access [`Result`].
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    details: Option<Value>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConstraintViolation, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransactionAborted, message)
    }

    /// Attach structured details (replaces any existing details).
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::database(format!("JSON error: {}", e))
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::validation(format!("Invalid key pattern: {}", e))
    }
}
