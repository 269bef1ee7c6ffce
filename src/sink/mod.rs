//! Batching sinks.
//!
//! A [`BatchingSink`] decouples many producers (request handlers, storage methods) from one
//! slow write target. Producers hand records to [`BatchingSink::submit`], which never blocks:
//! a full queue sheds the record and logs a diagnostic. A single worker task buffers records
//! and flushes them to the target when the buffer reaches `max_batch_size`, when the
//! `flush_interval` ticker fires, or when the sink is closed.
//!
//! # Write targets
//!
//! A target is any [`BatchWriter`]: a `tower::Service<Batch, Response = ()>`. The crate ships
//! [`NullWriter`], [`LogWriter`], [`MemoryWriter`] and [`FallbackWriter`]; file and Kafka
//! targets live in the companion crates.
//!
//! Delivery is at-most-once. A failed write is logged and counted, the batch is discarded and
//! the worker keeps running.

mod batch;
mod batching;
mod writers;

pub use batch::{Batch, EncodedRecord};
pub use batching::{BatchingSink, SinkError, SinkStats, Submit};
pub use writers::{FallbackError, FallbackWriter, LogWriter, MemoryWriter, NullWriter};

/// A write target for flushed batches.
pub trait BatchWriter:
    tower::Service<Batch, Response = (), Error = Self::WriteError> + Send + 'static
{
    /// The error type for this target.
    type WriteError: std::error::Error + Send + Sync + 'static;
}
