//! Core SearchTask type: one cancellable server-side matching request.
//!
//! # State Machine
//! ```text
//! Created -> Scheduled -> Running -> Completed
//!    |                          \-> Failed
//!    |                          \-> Cancelled
//!    \-> Failed (recognizer not open at construction)
//! ```
//!
//! # Invariants
//! - Exactly one of the cancel / completed handlers fires, exactly once.
//! - Progress reports reach the progress handler strictly before that
//!   terminal handler, never after.
//! - The outcome is latched before the terminal state is published, so any
//!   observer of the terminal state (handler, `wait`, `subscribe`) can read
//!   `error()` / `result()`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{SearchError, TaskError};
use super::outcome::SearchOutcome;
use super::progress::{self, Dispatch, ProgressHandler, ProgressReporter, SharedDispatch};
use crate::recognizer::{MatchResult, Query, Recognizer};

/// Unique identifier for a search task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run state of a search task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Constructed, not yet handed to an executor
    Created,
    /// Handed to an executor, waiting to run
    Scheduled,
    /// The recognizer call is in flight
    Running,
    /// Finished with a match or with no match
    Completed,
    /// Finished with an error
    Failed,
    /// Finished because cancellation was requested
    Cancelled,
}

impl TaskState {
    /// Check if the task is in a terminal state.
    ///
    /// # Property
    /// `is_terminal() => !is_active()`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Check if the task can still make progress.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// Handler fired once when the task ends because it was cancelled.
pub type CancelHandler = Box<dyn FnOnce(&SearchTask) + Send>;

/// Handler fired once when the task completes or fails.
///
/// The error is `None` on success, whether or not something matched.
pub type CompletedHandler = Box<dyn FnOnce(&SearchTask, Option<&SearchError>) + Send>;

#[derive(Default)]
struct Handlers {
    progress: Option<ProgressHandler>,
    cancel: Option<CancelHandler>,
    completed: Option<CompletedHandler>,
}

struct TerminalHandlers {
    cancel: Option<CancelHandler>,
    completed: Option<CompletedHandler>,
}

/// A server-side visual search, run once by an executor.
///
/// Share it as `Arc<SearchTask>`: the executor runs it, the caller registers
/// handlers, cancels it, or waits for it. All methods take `&self`.
pub struct SearchTask {
    id: TaskId,
    recognizer: Arc<dyn Recognizer>,
    query: Query,
    handlers: Mutex<Handlers>,
    dispatch: SharedDispatch,
    cancel: CancellationToken,
    started: AtomicBool,
    outcome: OnceLock<SearchOutcome>,
    state: watch::Sender<TaskState>,
}

impl SearchTask {
    /// Create a search task for `query` against an opened recognizer.
    ///
    /// If the recognizer is not open the task is created already `Failed`
    /// with `SearchError::NotReady`; the recognizer is never invoked and the
    /// completed handler fires with that error when the task is run.
    pub fn new(recognizer: Arc<dyn Recognizer>, query: Query) -> Self {
        let id = TaskId::new();
        let outcome = OnceLock::new();
        let dispatch: SharedDispatch = Arc::new(Mutex::new(Dispatch::default()));

        let initial = if recognizer.is_open() {
            TaskState::Created
        } else {
            tracing::warn!(task_id = %id, "Search task created against a recognizer that is not open");
            let _ = outcome.set(SearchOutcome::Failed(SearchError::NotReady));
            progress::lock(&dispatch).close();
            TaskState::Failed
        };
        let (state, _) = watch::channel(initial);

        Self {
            id,
            recognizer,
            query,
            handlers: Mutex::new(Handlers::default()),
            dispatch,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            outcome,
            state,
        }
    }

    /// Identifier used in logs and for queue lookup.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The query this task searches for. Fixed at construction.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Current run state.
    ///
    /// # Property
    /// Once terminal, `outcome()` is `Some` and the state never changes again.
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Check if `run` has been called.
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    // Handler registration.
    //
    // Handlers are taken when the task starts running. Registering after
    // that point races with the run: the new handler is not observed by it.

    /// Register the progress handler, replacing any previous one.
    pub fn set_progress<F>(&self, handler: F)
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        self.lock_handlers().progress = Some(Box::new(handler));
    }

    /// Register the cancel handler, replacing any previous one.
    pub fn set_cancel<F>(&self, handler: F)
    where
        F: FnOnce(&SearchTask) + Send + 'static,
    {
        self.lock_handlers().cancel = Some(Box::new(handler));
    }

    /// Register the completed handler, replacing any previous one.
    ///
    /// Fires for both successful and failed searches. Check the error first;
    /// with no error, a missing `result()` means nothing matched.
    pub fn set_completed<F>(&self, handler: F)
    where
        F: FnOnce(&SearchTask, Option<&SearchError>) + Send + 'static,
    {
        self.lock_handlers().completed = Some(Box::new(handler));
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Terminal values. `None` until the task reaches a terminal state.

    /// The latched outcome.
    ///
    /// # Postcondition
    /// Set exactly once, before the terminal state is published and before
    /// the terminal handler fires.
    pub fn outcome(&self) -> Option<&SearchOutcome> {
        self.outcome.get()
    }

    /// The latched error. `SearchError::Aborted` for cancelled tasks.
    pub fn error(&self) -> Option<&SearchError> {
        self.outcome.get().and_then(|o| o.error())
    }

    /// The match, if the task completed and something matched.
    /// Always `None` when `error()` is set.
    pub fn result(&self) -> Option<&MatchResult> {
        self.outcome.get().and_then(|o| o.result())
    }

    /// Wait until the task reaches a terminal state.
    pub async fn wait(&self) -> &SearchOutcome {
        let mut rx = self.state.subscribe();
        loop {
            if let Some(outcome) = self.outcome.get() {
                return outcome;
            }
            // The sender lives in `self`, so `changed` cannot fail while we
            // hold a borrow of it.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Mark the task as handed to an executor.
    ///
    /// A task that already failed at construction stays `Failed`; it must
    /// still be run for its completed handler to fire.
    pub fn schedule(&self) -> Result<(), TaskError> {
        if self.has_started() {
            return Err(TaskError::AlreadyStarted(self.id));
        }
        let mut already_scheduled = false;
        self.state.send_if_modified(|state| match state {
            TaskState::Created => {
                *state = TaskState::Scheduled;
                true
            }
            TaskState::Scheduled => {
                already_scheduled = true;
                false
            }
            _ => false,
        });
        if already_scheduled {
            return Err(TaskError::AlreadyScheduled(self.id));
        }
        tracing::debug!(task_id = %self.id, "Search task scheduled");
        Ok(())
    }

    /// Request cancellation.
    ///
    /// Cooperative: the task checks before calling the recognizer and drops
    /// the in-flight call as soon as the token fires. If the recognizer call
    /// never yields, cancellation takes effect when it returns and its result
    /// is discarded. Idempotent; no effect once the task has finished.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        if !self.cancel.is_cancelled() {
            tracing::debug!(task_id = %self.id, "Search task cancellation requested");
        }
        self.cancel.cancel();
    }

    /// Check if cancellation was requested, whether or not it took effect.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The task's cancellation token. Cancelling it cancels the task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the search. Called by the executor, once.
    ///
    /// Returns the outcome the terminal handler was fired with, or
    /// `TaskError::AlreadyStarted` (and fires nothing) on a second call.
    pub async fn run(&self) -> Result<SearchOutcome, TaskError> {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!(task_id = %self.id, "Search task run more than once");
            return Err(TaskError::AlreadyStarted(self.id));
        }

        let Handlers {
            progress,
            cancel,
            completed,
        } = std::mem::take(&mut *self.lock_handlers());
        let terminal = TerminalHandlers { cancel, completed };

        // Failed at construction
        if let Some(outcome) = self.outcome.get() {
            return Ok(self.finish(outcome.clone(), terminal));
        }

        self.state.send_replace(TaskState::Running);
        tracing::debug!(task_id = %self.id, query_len = self.query.len(), "Search task running");

        if self.cancel.is_cancelled() {
            return Ok(self.finish(SearchOutcome::Cancelled, terminal));
        }
        if !self.recognizer.is_open() {
            return Ok(self.finish(SearchOutcome::Failed(SearchError::NotReady), terminal));
        }

        progress::lock(&self.dispatch).open(progress);
        let reporter = ProgressReporter::new(self.id, Arc::clone(&self.dispatch));

        let search =
            AssertUnwindSafe(self.recognizer.search(&self.query, &reporter, &self.cancel))
                .catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => SearchOutcome::Cancelled,
            result = search => {
                if self.cancel.is_cancelled() {
                    tracing::debug!(task_id = %self.id, "Discarding recognizer result of a cancelled task");
                    SearchOutcome::Cancelled
                } else {
                    match result {
                        Ok(result) => SearchOutcome::from_search(result),
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            tracing::error!(task_id = %self.id, "Recognizer panicked: {}", message);
                            SearchOutcome::Failed(SearchError::internal(format!(
                                "Recognizer panicked: {}",
                                message
                            )))
                        }
                    }
                }
            }
        };

        Ok(self.finish(outcome, terminal))
    }

    fn finish(&self, outcome: SearchOutcome, handlers: TerminalHandlers) -> SearchOutcome {
        progress::lock(&self.dispatch).close();
        let outcome = self.outcome.get_or_init(|| outcome).clone();
        let state = outcome.state();
        self.state.send_replace(state);

        match outcome.error() {
            Some(e) if e.kind().is_failure() => {
                tracing::info!(task_id = %self.id, state = ?state, kind = %e.kind(), error = %e, "Search task finished")
            }
            _ => tracing::info!(
                task_id = %self.id,
                state = ?state,
                matched = outcome.result().is_some(),
                "Search task finished"
            ),
        }

        match &outcome {
            SearchOutcome::Cancelled => {
                if let Some(handler) = handlers.cancel {
                    handler(self);
                }
            }
            _ => {
                if let Some(handler) = handlers.completed {
                    handler(self, outcome.error());
                }
            }
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

impl std::fmt::Debug for SearchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("query_len", &self.query.len())
            .field("outcome", &self.outcome.get())
            .finish()
    }
}
