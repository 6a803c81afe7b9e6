//! Adapter for synchronous matchers.
//!
//! The matcher runs on tokio's blocking pool and cannot be interrupted. When
//! the owning task is cancelled it stops waiting for the call right away and
//! reports `Cancelled`; the blocking job keeps running until it returns, and
//! its result and any progress it reports afterwards are discarded.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{MatchResult, Query, Recognizer};
use crate::search::{ProgressReporter, SearchError};

/// A matcher whose search call blocks the calling thread.
pub trait BlockingMatcher: Send + Sync + 'static {
    fn is_open(&self) -> bool;

    fn search_blocking(
        &self,
        query: &Query,
        progress: &ProgressReporter,
    ) -> Result<Option<MatchResult>, SearchError>;
}

pub struct BlockingRecognizer<M> {
    matcher: Arc<M>,
}

impl<M: BlockingMatcher> BlockingRecognizer<M> {
    pub fn new(matcher: M) -> Self {
        Self {
            matcher: Arc::new(matcher),
        }
    }

    pub fn matcher(&self) -> &M {
        &self.matcher
    }
}

#[async_trait]
impl<M: BlockingMatcher> Recognizer for BlockingRecognizer<M> {
    fn is_open(&self) -> bool {
        self.matcher.is_open()
    }

    async fn search(
        &self,
        query: &Query,
        progress: &ProgressReporter,
        _cancel: &CancellationToken,
    ) -> Result<Option<MatchResult>, SearchError> {
        let matcher = Arc::clone(&self.matcher);
        let query = query.clone();
        let progress = progress.clone();

        tokio::task::spawn_blocking(move || matcher.search_blocking(&query, &progress))
            .await
            .map_err(|e| SearchError::internal(format!("Blocking search did not complete: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchTask, TaskState};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Matcher that blocks until the test releases it.
    struct Gated {
        release: Mutex<mpsc::Receiver<()>>,
        done: Mutex<mpsc::Sender<()>>,
    }

    impl BlockingMatcher for Gated {
        fn is_open(&self) -> bool {
            true
        }

        fn search_blocking(
            &self,
            _query: &Query,
            progress: &ProgressReporter,
        ) -> Result<Option<MatchResult>, SearchError> {
            progress.report(10);
            let _ = self.release.lock().unwrap().recv();
            progress.report(90);
            let _ = self.done.lock().unwrap().send(());
            Ok(Some(MatchResult::new("late")))
        }
    }

    struct Panicking;

    impl BlockingMatcher for Panicking {
        fn is_open(&self) -> bool {
            true
        }

        fn search_blocking(
            &self,
            _query: &Query,
            _progress: &ProgressReporter,
        ) -> Result<Option<MatchResult>, SearchError> {
            panic!("matcher bug");
        }
    }

    #[tokio::test]
    async fn test_blocking_match_completes() {
        let (release_tx, release_rx) = mpsc::channel();
        let (done_tx, _done_rx) = mpsc::channel();
        release_tx.send(()).unwrap();
        let recognizer = Arc::new(BlockingRecognizer::new(Gated {
            release: Mutex::new(release_rx),
            done: Mutex::new(done_tx),
        }));
        let task = SearchTask::new(recognizer, Query::new(b"q".to_vec()));

        let outcome = task.run().await.unwrap();
        assert_eq!(outcome.result().map(|m| m.id()), Some("late"));
    }

    #[tokio::test]
    async fn test_cancel_abandons_blocking_call_and_discards_its_result() {
        let (release_tx, release_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let recognizer = Arc::new(BlockingRecognizer::new(Gated {
            release: Mutex::new(release_rx),
            done: Mutex::new(done_tx),
        }));
        let task = Arc::new(SearchTask::new(recognizer, Query::new(b"q".to_vec())));
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&progress);
        task.set_progress(move |p| sink.lock().unwrap().push(p));

        let runner = Arc::clone(&task);
        let handle = tokio::spawn(async move { runner.run().await });
        task.subscribe()
            .wait_for(|s| *s == TaskState::Running)
            .await
            .unwrap();
        task.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task should not wait for the blocking call")
            .unwrap()
            .unwrap();
        assert!(outcome.is_cancelled());

        // Let the blocking job finish; whatever it reports now is dropped.
        release_tx.send(()).unwrap();
        tokio::task::spawn_blocking(move || done_rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();

        assert!(task.result().is_none());
        assert!(!progress.lock().unwrap().contains(&90));
    }

    #[tokio::test]
    async fn test_panicking_matcher_fails_internal() {
        let task = SearchTask::new(
            Arc::new(BlockingRecognizer::new(Panicking)),
            Query::new(b"q".to_vec()),
        );

        task.run().await.unwrap();

        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(
            task.error().map(|e| e.kind()),
            Some(crate::search::ErrorKind::Internal)
        );
    }
}
