//! Progress reporting from a recognizer back to its task.
//!
//! # Ordering
//! Every report is delivered under the same lock the task takes for its
//! terminal transition. A report either reaches the progress handler before
//! the terminal callback fires, or it is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::task::TaskId;

/// Handler invoked with a completion percentage in `[0, 100]`.
pub type ProgressHandler = Box<dyn Fn(u8) + Send + Sync>;

/// Progress channel state shared between a task and its reporters.
#[derive(Default)]
pub(crate) struct Dispatch {
    /// Set once the task has reached a terminal state
    closed: bool,
    handler: Option<ProgressHandler>,
}

pub(crate) type SharedDispatch = Arc<Mutex<Dispatch>>;

pub(crate) fn lock(dispatch: &Mutex<Dispatch>) -> MutexGuard<'_, Dispatch> {
    dispatch.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Dispatch {
    /// Install the handler for a run that is starting.
    pub(crate) fn open(&mut self, handler: Option<ProgressHandler>) {
        self.handler = handler;
    }

    /// Refuse all further reports.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.handler = None;
    }
}

/// Handle a recognizer uses to report fractional progress.
///
/// Cheap to clone; clones may be moved to other threads (e.g. a blocking
/// worker). Handlers run synchronously on the reporting thread and must not
/// report progress themselves.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: Option<TaskId>,
    dispatch: SharedDispatch,
}

impl ProgressReporter {
    pub(crate) fn new(task_id: TaskId, dispatch: SharedDispatch) -> Self {
        Self {
            task_id: Some(task_id),
            dispatch,
        }
    }

    /// A reporter attached to no task. Reports are discarded.
    pub fn detached() -> Self {
        Self {
            task_id: None,
            dispatch: Arc::new(Mutex::new(Dispatch::default())),
        }
    }

    /// Report progress. Values outside `[0, 100]` are clamped.
    ///
    /// No ordering between reports is enforced; handlers must tolerate
    /// values going backwards.
    pub fn report(&self, percent: i64) {
        let percent = percent.clamp(0, 100) as u8;
        let dispatch = lock(&self.dispatch);
        if dispatch.closed {
            if let Some(id) = self.task_id {
                tracing::debug!(task_id = %id, percent, "Dropping progress reported after task finished");
            }
            return;
        }
        if let Some(handler) = dispatch.handler.as_ref() {
            handler(percent);
        }
    }

    /// Check if reports can still reach the task.
    pub fn is_closed(&self) -> bool {
        lock(&self.dispatch).closed
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("task_id", &self.task_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (SharedDispatch, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let dispatch: SharedDispatch = Arc::new(Mutex::new(Dispatch::default()));
        lock(&dispatch).open(Some(Box::new(move |p| sink.lock().unwrap().push(p))));
        (dispatch, seen)
    }

    #[test]
    fn test_reports_are_clamped() {
        let (dispatch, seen) = recording();
        let reporter = ProgressReporter::new(TaskId::new(), dispatch);
        reporter.report(-5);
        reporter.report(40);
        reporter.report(250);
        assert_eq!(*seen.lock().unwrap(), vec![0, 40, 100]);
    }

    #[test]
    fn test_reports_after_close_are_dropped() {
        let (dispatch, seen) = recording();
        let reporter = ProgressReporter::new(TaskId::new(), Arc::clone(&dispatch));
        reporter.report(10);
        lock(&dispatch).close();
        reporter.report(90);
        assert!(reporter.is_closed());
        assert_eq!(*seen.lock().unwrap(), vec![10]);
    }

    #[test]
    fn test_non_monotonic_values_pass_through() {
        let (dispatch, seen) = recording();
        let reporter = ProgressReporter::new(TaskId::new(), dispatch);
        reporter.report(70);
        reporter.report(30);
        assert_eq!(*seen.lock().unwrap(), vec![70, 30]);
    }

    #[test]
    fn test_detached_reporter_discards() {
        let reporter = ProgressReporter::detached();
        reporter.report(50);
        assert!(!reporter.is_closed());
    }
}
