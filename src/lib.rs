#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # batchline
//!
//! Batching event sinks and retrying transactions for small request-handling services.
//!
//! ## Features
//!
//! - **Batching sinks**: non-blocking `submit`, a bounded queue that sheds when full, and a
//!   single worker that flushes by size, by interval and on close
//! - **Pluggable write targets** behind `tower::Service<Batch>`
//! - **Structured event records** for diagnostics and user-action notifications
//! - **Transactional executor** that retries serialization failures, deadlocks and lock
//!   timeouts with exponential backoff, and keeps "not found" apart from store failures
//! - **Cancellation and deadlines** checked between attempts
//!
//! ## Quick Start
//!
//! ```rust
//! use batchline::{BatchingSink, EventRecord, MemoryWriter, SinkConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let writer = MemoryWriter::new();
//!     let sink = BatchingSink::spawn(SinkConfig::new(100, Duration::from_secs(5)), writer.clone())
//!         .unwrap();
//!
//!     sink.submit(EventRecord::info("tasks", "startup", "listening on :8080"));
//!     sink.close().await;
//!
//!     assert_eq!(writer.record_count(), 1);
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod jitter;
pub mod record;
pub mod sink;
pub mod sleeper;
pub mod transaction;

// Re-exports
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use config::{ConfigError, CoreConfig, RetryConfig, SinkConfig};
pub use error::{Stage, TxError, WorkError};
pub use jitter::Jitter;
pub use record::{ActionContext, EncodeError, EventRecord, Record, Severity};
pub use sink::{
    Batch, BatchWriter, BatchingSink, EncodedRecord, FallbackWriter, LogWriter, MemoryWriter,
    NullWriter, SinkError, SinkStats, Submit,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use transaction::{
    expect_affected, CallContext, Statement, StoreError, Transaction, TransactionExecutor,
    TransactionExecutorBuilder, TransactionStore, UnitOfWork,
};
