use super::{Batch, BatchWriter};
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tower::Service;

type WriteFuture<E> = BoxFuture<'static, Result<(), E>>;

/// Discards every batch.
#[derive(Clone, Debug, Default)]
pub struct NullWriter;

impl Service<Batch> for NullWriter {
    type Response = ();
    type Error = Infallible;
    type Future = WriteFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _batch: Batch) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl BatchWriter for NullWriter {
    type WriteError = Infallible;
}

/// Emits every record through `tracing` at info level.
#[derive(Clone, Debug, Default)]
pub struct LogWriter;

impl Service<Batch> for LogWriter {
    type Response = ();
    type Error = Infallible;
    type Future = WriteFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: Batch) -> Self::Future {
        for record in &batch {
            let key = record.key().map(String::from_utf8_lossy);
            tracing::info!(
                key = key.as_deref().unwrap_or(""),
                payload = %String::from_utf8_lossy(record.payload()),
                "batch_record"
            );
        }
        Box::pin(async { Ok(()) })
    }
}

impl BatchWriter for LogWriter {
    type WriteError = Infallible;
}

/// Keeps every written batch in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryWriter {
    batches: Arc<Mutex<Vec<Batch>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.lock().clone()
    }

    /// Length of each written batch, in write order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().iter().map(Batch::len).collect()
    }

    /// Payloads of all written records, flattened in write order.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.lock()
            .iter()
            .flat_map(|batch| batch.iter().map(|r| r.payload().to_vec()))
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.lock().iter().map(Batch::len).sum()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Batch>> {
        self.batches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Service<Batch> for MemoryWriter {
    type Response = ();
    type Error = Infallible;
    type Future = WriteFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: Batch) -> Self::Future {
        self.lock().push(batch);
        Box::pin(async { Ok(()) })
    }
}

impl BatchWriter for MemoryWriter {
    type WriteError = Infallible;
}

/// Both targets of a [`FallbackWriter`] rejected the batch.
#[derive(Debug, thiserror::Error)]
#[error("fallback write failed after primary error ({primary}): {fallback}")]
pub struct FallbackError {
    primary: String,
    #[source]
    fallback: Box<dyn std::error::Error + Send + Sync>,
}

/// Writes to `primary`; a batch the primary rejects goes to `fallback` instead.
#[derive(Clone, Debug)]
pub struct FallbackWriter<A, B> {
    primary: A,
    fallback: B,
}

impl<A, B> FallbackWriter<A, B> {
    pub fn new(primary: A, fallback: B) -> Self {
        Self { primary, fallback }
    }
}

impl<A, B> Service<Batch> for FallbackWriter<A, B>
where
    A: BatchWriter + Clone,
    A::Future: Send + 'static,
    B: BatchWriter + Clone,
    B::Future: Send + 'static,
{
    type Response = ();
    type Error = FallbackError;
    type Future = WriteFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: Batch) -> Self::Future {
        use tower::ServiceExt;

        let primary = self.primary.clone();
        let fallback = self.fallback.clone();
        Box::pin(async move {
            let copy = batch.clone();
            let primary_err = match primary.oneshot(batch).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            tracing::warn!(error = %primary_err, records = copy.len(), "primary write failed, using fallback");
            fallback.oneshot(copy).await.map_err(|e| FallbackError {
                primary: primary_err.to_string(),
                fallback: Box::new(e),
            })
        })
    }
}

impl<A, B> BatchWriter for FallbackWriter<A, B>
where
    A: BatchWriter + Clone,
    A::Future: Send + 'static,
    B: BatchWriter + Clone,
    B::Future: Send + 'static,
{
    type WriteError = FallbackError;
}
