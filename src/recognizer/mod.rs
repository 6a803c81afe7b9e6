//! Recognizer contract and the values exchanged with it.
//!
//! A recognizer is the pre-opened context that performs the match (usually
//! a client of a remote matching service). Implementations:
//! - `memory`: in-memory reference index (non-persistent, for testing and demos)
//! - `blocking`: adapter for synchronous, non-cancellable matchers

mod blocking;
mod memory;

pub use blocking::{BlockingMatcher, BlockingRecognizer};
pub use memory::MemoryRecognizer;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::search::{ProgressReporter, SearchError};

/// Immutable visual query submitted for matching.
///
/// The bytes are opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    data: Bytes,
}

impl Query {
    /// Wrap encoded query bytes (e.g. `Vec<u8>` or `Bytes`) without copying.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Raw query bytes, as handed to the recognizer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Hex-encoded SHA-256 of the query bytes.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }
}

/// Successful match. Not interpreted by the search task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Identifier of the matched reference
    id: String,
    /// Payload attached to the reference, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

impl MatchResult {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: None,
        }
    }

    /// Attach a payload to the result.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Identifier of the matched reference.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }
}

/// A previously opened matching context.
///
/// # Concurrency
/// Whether one recognizer may serve several tasks at once is up to the
/// implementation. Nothing in this crate serializes calls into it.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Check if the recognizer has been opened and can accept queries.
    fn is_open(&self) -> bool;

    /// Match `query`, returning `Ok(None)` when nothing matches.
    ///
    /// Implementations may report progress through `progress` and should
    /// check `cancel` at their own suspension points, returning
    /// `SearchError::Aborted` when they stop early. The task drops this
    /// future as soon as `cancel` fires, so a cancel-aware implementation is
    /// a courtesy rather than a requirement.
    async fn search(
        &self,
        query: &Query,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Option<MatchResult>, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_digest_is_content_addressed() {
        let a = Query::new(b"same bytes".to_vec());
        let b = Query::new(Bytes::from_static(b"same bytes"));
        let c = Query::new(b"other bytes".to_vec());
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_match_result_serialization_skips_missing_data() {
        let plain = serde_json::to_value(MatchResult::new("ref-1")).unwrap();
        assert_eq!(plain, serde_json::json!({ "id": "ref-1" }));

        let with_data = MatchResult::new("ref-2").with_data("https://example.com/ref-2");
        let json = serde_json::to_string(&with_data).unwrap();
        let back: MatchResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data(), Some("https://example.com/ref-2"));
    }
}
