//! Terminal outcome of a search task.

use serde::Serialize;

use super::error::SearchError;
use super::task::TaskState;
use crate::recognizer::MatchResult;

/// Error reported by `SearchOutcome::error` for cancelled tasks.
static ABORTED: SearchError = SearchError::Aborted;

/// How a search task ended.
///
/// Cancellation is its own variant rather than an error kind, so matching on
/// an outcome never confuses an abort with a failure. `error()` still reports
/// `SearchError::Aborted` for cancelled tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The query was matched (`Some`) or nothing matched (`None`).
    Completed(Option<MatchResult>),
    /// The search failed.
    Failed(SearchError),
    /// The task was cancelled before it could complete.
    Cancelled,
}

impl SearchOutcome {
    /// Map the return value of a recognizer call to an outcome.
    ///
    /// A recognizer that honours cancellation itself and reports
    /// `SearchError::Aborted` yields `Cancelled`.
    pub fn from_search(result: Result<Option<MatchResult>, SearchError>) -> Self {
        match result {
            Ok(found) => SearchOutcome::Completed(found),
            Err(SearchError::Aborted) => SearchOutcome::Cancelled,
            Err(e) => SearchOutcome::Failed(e),
        }
    }

    /// Terminal state this outcome corresponds to.
    pub fn state(&self) -> TaskState {
        match self {
            SearchOutcome::Completed(_) => TaskState::Completed,
            SearchOutcome::Failed(_) => TaskState::Failed,
            SearchOutcome::Cancelled => TaskState::Cancelled,
        }
    }

    /// The latched error; `None` means success (match or no match).
    pub fn error(&self) -> Option<&SearchError> {
        match self {
            SearchOutcome::Completed(_) => None,
            SearchOutcome::Failed(e) => Some(e),
            SearchOutcome::Cancelled => Some(&ABORTED),
        }
    }

    /// The match, present only for a completed search that found one.
    pub fn result(&self) -> Option<&MatchResult> {
        match self {
            SearchOutcome::Completed(found) => found.as_ref(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchOutcome::Cancelled)
    }

    /// Summary suitable for printing or logging as JSON.
    pub fn report(&self) -> OutcomeReport<'_> {
        OutcomeReport {
            state: self.state(),
            error_kind: self.error().map(|e| e.kind().to_string()),
            error: self.error().map(|e| e.to_string()),
            result: self.result(),
        }
    }
}

/// Serializable view of an outcome.
#[derive(Debug, Serialize)]
pub struct OutcomeReport<'a> {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'a MatchResult>,
}
