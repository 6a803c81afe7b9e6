//! Search module - the cancellable server-side search task and its outcome.
//!
//! A `SearchTask` runs exactly once, reaches exactly one terminal state and
//! fires exactly one of its cancel / completed handlers. Its outcome is a
//! typed value (`SearchOutcome`) that can also be awaited.

mod error;
mod outcome;
mod progress;
pub mod task;

pub use error::{ErrorKind, SearchError, TaskError};
pub use outcome::{OutcomeReport, SearchOutcome};
pub use progress::{ProgressHandler, ProgressReporter};
pub use task::{CancelHandler, CompletedHandler, SearchTask, TaskId, TaskState};
