//! Bounded-concurrency queue that schedules search tasks on the tokio runtime.
//!
//! Each submitted task gets its own tokio task, which waits for a permit and
//! then runs the search. A task cancelled while still waiting for a permit
//! runs immediately so that its cancel handler fires without delay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, Semaphore};

use crate::config::QueueConfig;
use crate::recognizer::{Query, Recognizer};
use crate::search::{SearchOutcome, SearchTask, TaskError, TaskId};

type TaskMap = Arc<Mutex<HashMap<TaskId, Arc<SearchTask>>>>;

/// Executor for search tasks sharing one recognizer.
pub struct SearchQueue {
    recognizer: Arc<dyn Recognizer>,
    permits: Arc<Semaphore>,
    tasks: TaskMap,
    in_flight: Arc<watch::Sender<usize>>,
    config: QueueConfig,
}

impl SearchQueue {
    pub fn new(recognizer: Arc<dyn Recognizer>, config: QueueConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let (in_flight, _) = watch::channel(0);
        Self {
            recognizer,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(in_flight),
            config,
        }
    }

    /// Configuration the queue was built with.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create a task for `query` against this queue's recognizer.
    pub fn task(&self, query: Query) -> Arc<SearchTask> {
        Arc::new(SearchTask::new(Arc::clone(&self.recognizer), query))
    }

    /// Schedule `task` for execution.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, task: Arc<SearchTask>) -> Result<TaskId, TaskError> {
        let id = task.id();
        {
            let mut tasks = lock(&self.tasks);
            if tasks.contains_key(&id) {
                return Err(TaskError::AlreadyScheduled(id));
            }
            task.schedule()?;
            tasks.insert(id, Arc::clone(&task));
        }
        self.in_flight.send_modify(|n| *n += 1);

        let permits = Arc::clone(&self.permits);
        let guard = Finished {
            id,
            tasks: Arc::clone(&self.tasks),
            in_flight: Arc::clone(&self.in_flight),
        };
        tokio::spawn(async move {
            let _guard = guard;
            let cancel = task.cancellation_token();
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };
            if let Err(e) = task.run().await {
                tracing::warn!(task_id = %id, error = %e, "Queued search task did not run");
            }
        });

        tracing::debug!(task_id = %id, "Search task submitted");
        Ok(id)
    }

    /// Create, register and submit a task, calling `on_done` with its outcome.
    ///
    /// `on_done` fires exactly once, from the task's cancel or completed
    /// handler, on the thread that ran the task.
    pub fn search_in_background<F>(
        &self,
        query: Query,
        on_done: F,
    ) -> Result<Arc<SearchTask>, TaskError>
    where
        F: FnOnce(SearchOutcome) + Send + 'static,
    {
        let task = self.task(query);
        let slot = Arc::new(Mutex::new(Some(on_done)));

        let on_cancel = Arc::clone(&slot);
        task.set_cancel(move |_| {
            if let Some(done) = take(&on_cancel) {
                done(SearchOutcome::Cancelled);
            }
        });
        task.set_completed(move |task, _| {
            if let (Some(done), Some(outcome)) = (take(&slot), task.outcome()) {
                done(outcome.clone());
            }
        });

        self.submit(Arc::clone(&task))?;
        Ok(task)
    }

    /// Request cancellation of one task. Returns `false` if it is not queued
    /// or already finished (including a task that failed at construction
    /// and has not been pruned yet).
    pub fn cancel(&self, id: TaskId) -> bool {
        let task = lock(&self.tasks).get(&id).cloned();
        match task {
            Some(task) if task.state().is_active() => {
                task.cancel();
                true
            }
            _ => false,
        }
    }

    /// Request cancellation of every queued or running task.
    pub fn cancel_all(&self) {
        let tasks: Vec<_> = lock(&self.tasks).values().cloned().collect();
        if !tasks.is_empty() {
            tracing::info!(count = tasks.len(), "Cancelling all search tasks");
        }
        for task in tasks {
            task.cancel();
        }
    }

    /// Look up a task that has not finished yet.
    pub fn get(&self, id: TaskId) -> Option<Arc<SearchTask>> {
        lock(&self.tasks).get(&id).cloned()
    }

    /// Number of submitted tasks that have not finished yet.
    pub fn operation_count(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until every submitted task has finished.
    pub async fn wait_until_all_finished(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender is owned by `self`; this cannot fail while we borrow it.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Removes a task from the queue when its tokio task ends, even by panic.
struct Finished {
    id: TaskId,
    tasks: TaskMap,
    in_flight: Arc<watch::Sender<usize>>,
}

impl Drop for Finished {
    fn drop(&mut self) {
        lock(&self.tasks).remove(&self.id);
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take<F>(slot: &Mutex<Option<F>>) -> Option<F> {
    lock(slot).take()
}
