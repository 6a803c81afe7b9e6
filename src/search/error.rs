//! Search error types with failure classification.
//!
//! Distinguishes cancellation (an abort the caller asked for) from genuine
//! failures (recognizer not ready, transport, remote service, local bugs).

use crate::search::task::TaskId;

/// Error latched on a search task when it does not complete normally.
///
/// A task that finds nothing is *not* an error: it completes with neither an
/// error nor a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    /// The recognizer was not opened before the task ran.
    #[error("Recognizer is not open")]
    NotReady,

    /// The task was cancelled.
    #[error("Search aborted")]
    Aborted,

    /// Transport failure (connection refused, timeout, DNS, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// The remote service rejected the request or answered with a malformed exchange.
    #[error("Service error: {message}")]
    Service {
        /// Status reported by the service, if any
        status: Option<u16>,
        message: String,
    },

    /// Unexpected local failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a service error without a status.
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            status: None,
            message: message.into(),
        }
    }

    /// Create a service error carrying the status the service answered with.
    pub fn service_status(status: u16, message: impl Into<String>) -> Self {
        Self::Service {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::NotReady => ErrorKind::NotReady,
            SearchError::Aborted => ErrorKind::Aborted,
            SearchError::Network(_) => ErrorKind::Network,
            SearchError::Service { .. } => ErrorKind::Service,
            SearchError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error only records a cancellation.
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Aborted
    }
}

/// Classification of search errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Recognizer not opened
    NotReady,
    /// Cancellation requested by the caller or the queue
    Aborted,
    /// Transport fault
    Network,
    /// Remote service rejected the query or the exchange was malformed
    Service,
    /// Unexpected local failure
    Internal,
}

impl ErrorKind {
    /// Check if this kind is a genuine failure (anything but an abort).
    pub fn is_failure(&self) -> bool {
        !matches!(self, ErrorKind::Aborted)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotReady => write!(f, "Not ready"),
            ErrorKind::Aborted => write!(f, "Aborted"),
            ErrorKind::Network => write!(f, "Network error"),
            ErrorKind::Service => write!(f, "Service error"),
            ErrorKind::Internal => write!(f, "Internal error"),
        }
    }
}

/// Errors from misusing the task API (as opposed to search failures).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Task {0} has already started")]
    AlreadyStarted(TaskId),

    #[error("Task {0} is already scheduled")]
    AlreadyScheduled(TaskId),
}
