//! In-memory recognizer (non-persistent).
//!
//! References are indexed by the SHA-256 digest of their bytes, so a query
//! matches only a byte-identical reference.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::{MatchResult, Query, Recognizer};
use crate::search::{ProgressReporter, SearchError};

/// Recognizer backed by an in-process reference index.
///
/// Internally synchronized, so one instance can serve concurrent tasks.
/// `fail_next` and `set_latency` inject faults and delays for tests.
#[derive(Default)]
pub struct MemoryRecognizer {
    open: AtomicBool,
    references: RwLock<HashMap<String, MatchResult>>,
    faults: Mutex<VecDeque<SearchError>>,
    latency: Mutex<Option<Duration>>,
    searches: AtomicUsize,
}

impl MemoryRecognizer {
    /// Create an empty recognizer. It starts closed.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Index `reference` so that a byte-identical query matches `result`.
    pub fn insert(&self, reference: impl Into<Bytes>, result: MatchResult) {
        let digest = Query::new(reference).digest();
        tracing::debug!(digest = %digest, id = %result.id(), "Indexed reference");
        self.references
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(digest, result);
    }

    /// Index every regular file in `dir`, using the file name as the result id.
    ///
    /// Returns the number of references indexed. Subdirectories are skipped.
    pub async fn index_dir(&self, dir: &Path) -> std::io::Result<usize> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut indexed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let bytes = tokio::fs::read(entry.path()).await?;
            self.insert(bytes, MatchResult::new(name));
            indexed += 1;
        }
        Ok(indexed)
    }

    pub fn len(&self) -> usize {
        self.references
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next search fail with `error`. Faults queue up in order.
    pub fn fail_next(&self, error: SearchError) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Delay every search by `latency`. The delay honours cancellation.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Number of times `search` has been called.
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    fn next_fault(&self) -> Option<SearchError> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn latency(&self) -> Option<Duration> {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, query: &Query) -> Option<MatchResult> {
        self.references
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&query.digest())
            .cloned()
    }
}

#[async_trait]
impl Recognizer for MemoryRecognizer {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn search(
        &self,
        query: &Query,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Option<MatchResult>, SearchError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if !self.is_open() {
            return Err(SearchError::NotReady);
        }
        progress.report(0);

        if let Some(latency) = self.latency() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SearchError::Aborted),
                _ = tokio::time::sleep(latency) => {}
            }
        }

        if let Some(fault) = self.next_fault() {
            return Err(fault);
        }
        if cancel.is_cancelled() {
            return Err(SearchError::Aborted);
        }

        let found = self.lookup(query);
        progress.report(100);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognizer() -> MemoryRecognizer {
        let recognizer = MemoryRecognizer::new();
        recognizer.insert(b"cover-a".to_vec(), MatchResult::new("a"));
        recognizer.insert(b"cover-b".to_vec(), MatchResult::new("b").with_data("second"));
        recognizer
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let recognizer = recognizer();
        assert!(!recognizer.is_open());
        let result = recognizer
            .search(
                &Query::new(b"cover-a".to_vec()),
                &ProgressReporter::detached(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result, Err(SearchError::NotReady));
        assert_eq!(recognizer.len(), 2);
    }

    #[tokio::test]
    async fn test_lookup_by_content() {
        let recognizer = recognizer();
        recognizer.open();
        let progress = ProgressReporter::detached();
        let cancel = CancellationToken::new();

        let hit = recognizer
            .search(&Query::new(b"cover-b".to_vec()), &progress, &cancel)
            .await
            .unwrap();
        assert_eq!(hit.as_ref().and_then(|m| m.data()), Some("second"));

        let miss = recognizer
            .search(&Query::new(b"cover-c".to_vec()), &progress, &cancel)
            .await
            .unwrap();
        assert!(miss.is_none());
        assert_eq!(recognizer.search_count(), 2);
    }

    #[tokio::test]
    async fn test_faults_are_consumed_in_order() {
        let recognizer = recognizer();
        recognizer.open();
        recognizer.fail_next(SearchError::network("timeout"));
        recognizer.fail_next(SearchError::service_status(500, "boom"));
        let progress = ProgressReporter::detached();
        let cancel = CancellationToken::new();
        let query = Query::new(b"cover-a".to_vec());

        assert_eq!(
            recognizer.search(&query, &progress, &cancel).await,
            Err(SearchError::network("timeout"))
        );
        assert_eq!(
            recognizer.search(&query, &progress, &cancel).await,
            Err(SearchError::service_status(500, "boom"))
        );
        assert!(recognizer.search(&query, &progress, &cancel).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_index_dir_uses_file_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(temp.path().join("mona-lisa.jpg"), b"mona lisa pixels")
            .await
            .unwrap();
        tokio::fs::write(temp.path().join("starry-night.jpg"), b"starry night pixels")
            .await
            .unwrap();
        tokio::fs::create_dir(temp.path().join("nested")).await.unwrap();

        let recognizer = MemoryRecognizer::new();
        let indexed = recognizer.index_dir(temp.path()).await.unwrap();
        recognizer.open();

        assert_eq!(indexed, 2);
        let hit = recognizer
            .search(
                &Query::new(b"starry night pixels".to_vec()),
                &ProgressReporter::detached(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(hit.map(|m| m.id().to_string()), Some("starry-night.jpg".to_string()));
    }

    #[tokio::test]
    async fn test_latency_honours_cancellation() {
        let recognizer = recognizer();
        recognizer.open();
        recognizer.set_latency(Some(Duration::from_secs(30)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = recognizer
            .search(
                &Query::new(b"cover-a".to_vec()),
                &ProgressReporter::detached(),
                &cancel,
            )
            .await;
        assert_eq!(result, Err(SearchError::Aborted));
    }
}
