//! # Visual Search
//!
//! Cancellable server-side visual search tasks.
//!
//! This library provides:
//! - `SearchTask`: one matching request with progress, cancel and completed
//!   handlers and a typed, awaitable outcome
//! - `SearchQueue`: a bounded-concurrency executor with bulk cancellation
//! - The `Recognizer` contract plus an in-memory recognizer and an adapter
//!   for blocking matchers
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │           SearchQueue            │
//!        │  (permits, cancel_all, wait)     │
//!        └────────────────┬─────────────────┘
//!                         │ run()
//!                         ▼
//!                ┌─────────────────┐   progress   ┌──────────┐
//!                │   SearchTask    │ ───────────▶ │ handlers │
//!                └────────┬────────┘   terminal   └──────────┘
//!                         │ search()
//!                         ▼
//!                ┌─────────────────┐
//!                │   Recognizer    │
//!                └─────────────────┘
//! ```
//!
//! ## Task Flow
//! 1. Create a task against an opened recognizer
//! 2. Register handlers, then submit it to a queue
//! 3. The recognizer reports progress while the search is in flight
//! 4. Exactly one of the cancel / completed handlers fires; the outcome is latched
//!
//! ## Modules
//! - `search`: SearchTask, its outcome and error types
//! - `recognizer`: Recognizer contract, Query and MatchResult
//! - `queue`: SearchQueue executor
//! - `config`: environment configuration

pub mod config;
pub mod queue;
pub mod recognizer;
pub mod search;

pub use config::QueueConfig;
pub use queue::SearchQueue;
pub use recognizer::{MatchResult, Query, Recognizer};
pub use search::{ErrorKind, SearchError, SearchOutcome, SearchTask, TaskId, TaskState};
