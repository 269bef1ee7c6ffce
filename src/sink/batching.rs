use super::{Batch, BatchWriter};
use crate::config::{ConfigError, SinkConfig};
use crate::record::Record;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tower::ServiceExt;

/// Outcome of [`BatchingSink::submit`]. Producers are free to ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    /// Queued for the next flush.
    Accepted,
    /// The queue was full; the record was shed.
    Dropped,
    /// The sink was already closed.
    Rejected,
}

impl Submit {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submit::Accepted)
    }
}

/// Errors surfaced by the sink's lifecycle operations. `submit` never returns one.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("invalid sink configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("no tokio runtime available to run the sink worker")]
    NoRuntime,
    #[error("sink is closed")]
    Closed,
}

/// Point-in-time counters of a sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub accepted: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub batches_flushed: u64,
    pub records_flushed: u64,
    pub batches_failed: u64,
    /// Records lost to failed writes or encoding errors.
    pub records_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    batches_flushed: AtomicU64,
    records_flushed: AtomicU64,
    batches_failed: AtomicU64,
    records_failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SinkStats {
        SinkStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
        }
    }
}

enum Control {
    Flush(oneshot::Sender<()>),
    Shutdown,
}

struct Shared {
    name: String,
    closed: AtomicBool,
    counters: Arc<Counters>,
    control: mpsc::UnboundedSender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Producer handle to a batching sink. Clones share one queue and one worker.
pub struct BatchingSink<R> {
    tx: mpsc::Sender<R>,
    shared: Arc<Shared>,
}

impl<R> Clone for BatchingSink<R> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), shared: self.shared.clone() }
    }
}

impl<R> fmt::Debug for BatchingSink<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchingSink")
            .field("name", &self.shared.name)
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .field("stats", &self.shared.counters.snapshot())
            .finish()
    }
}

impl<R: Record> BatchingSink<R> {
    /// Validate `config` and start the worker on the current tokio runtime.
    pub fn spawn<W>(config: SinkConfig, writer: W) -> Result<Self, SinkError>
    where
        W: BatchWriter,
        W::Future: Send + 'static,
    {
        Self::spawn_named("sink", config, writer)
    }

    /// Like [`spawn`](Self::spawn); `name` labels this sink's diagnostics.
    pub fn spawn_named<W>(
        name: impl Into<String>,
        config: SinkConfig,
        writer: W,
    ) -> Result<Self, SinkError>
    where
        W: BatchWriter,
        W::Future: Send + 'static,
    {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SinkError::NoRuntime)?;
        let name = name.into();
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            name: name.clone(),
            rx,
            control: control_rx,
            buffer: Vec::with_capacity(config.max_batch_size.min(4096)),
            max_batch_size: config.max_batch_size,
            flush_interval: config.flush_interval,
            writer,
            counters: counters.clone(),
        };
        let handle = runtime.spawn(worker.run());

        Ok(Self {
            tx,
            shared: Arc::new(Shared {
                name,
                closed: AtomicBool::new(false),
                counters,
                control: control_tx,
                worker: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Enqueue `record` without waiting.
    pub fn submit(&self, record: R) -> Submit {
        let counters = &self.shared.counters;
        if self.is_closed() {
            Counters::bump(&counters.rejected, 1);
            tracing::warn!(sink = %self.shared.name, "sink closed, rejecting record");
            return Submit::Rejected;
        }
        match self.tx.try_send(record) {
            Ok(()) => {
                Counters::bump(&counters.accepted, 1);
                Submit::Accepted
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                Counters::bump(&counters.dropped, 1);
                tracing::warn!(sink = %self.shared.name, "queue full, dropping record");
                Submit::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Counters::bump(&counters.rejected, 1);
                tracing::warn!(sink = %self.shared.name, "sink worker gone, rejecting record");
                Submit::Rejected
            }
        }
    }

    /// Ask the worker to flush now and wait until it has.
    ///
    /// Records already queued are buffered before the request is served, unless producers
    /// keep the queue from ever draining.
    pub async fn flush(&self) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        let (ack, done) = oneshot::channel();
        self.shared.control.send(Control::Flush(ack)).map_err(|_| SinkError::Closed)?;
        done.await.map_err(|_| SinkError::Closed)
    }

    /// Stop accepting records, flush everything accepted so far and wait for the worker to exit.
    ///
    /// Calling it again, from this handle or a clone, waits for the first close and returns.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let mut worker = self.shared.worker.lock().await;
        let Some(handle) = worker.take() else {
            return;
        };
        let _ = self.shared.control.send(Control::Shutdown);
        if let Err(e) = handle.await {
            tracing::error!(sink = %self.shared.name, error = %e, "sink worker terminated abnormally");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SinkStats {
        self.shared.counters.snapshot()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

#[derive(Debug, Clone, Copy)]
enum FlushTrigger {
    Size,
    Interval,
    Requested,
    Shutdown,
}

impl FlushTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Requested => "requested",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

/// Sole owner of the buffer and the write target.
struct Worker<R, W> {
    name: String,
    rx: mpsc::Receiver<R>,
    control: mpsc::UnboundedReceiver<Control>,
    buffer: Vec<R>,
    max_batch_size: usize,
    flush_interval: Duration,
    writer: W,
    counters: Arc<Counters>,
}

impl<R, W> Worker<R, W>
where
    R: Record,
    W: BatchWriter,
    W::Future: Send + 'static,
{
    async fn run(mut self) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                received = self.rx.recv() => match received {
                    Some(record) => {
                        self.buffer.push(record);
                        if self.buffer.len() >= self.max_batch_size {
                            self.flush(FlushTrigger::Size).await;
                        }
                    }
                    // every producer handle is gone
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.buffer.is_empty() {
                        self.flush(FlushTrigger::Interval).await;
                    }
                }
                control = self.control.recv() => match control {
                    Some(Control::Flush(ack)) => {
                        self.flush(FlushTrigger::Requested).await;
                        let _ = ack.send(());
                    }
                    Some(Control::Shutdown) | None => break,
                },
            }
        }

        self.drain().await;
    }

    async fn drain(&mut self) {
        self.rx.close();
        while let Ok(record) = self.rx.try_recv() {
            self.buffer.push(record);
            if self.buffer.len() >= self.max_batch_size {
                self.flush(FlushTrigger::Shutdown).await;
            }
        }
        self.flush(FlushTrigger::Shutdown).await;

        self.control.close();
        while let Ok(control) = self.control.try_recv() {
            if let Control::Flush(ack) = control {
                let _ = ack.send(());
            }
        }
        tracing::debug!(sink = %self.name, "sink worker stopped");
    }

    async fn flush(&mut self, trigger: FlushTrigger) {
        if self.buffer.is_empty() {
            return;
        }

        let mut batch = Batch::with_capacity(self.buffer.len());
        for record in self.buffer.drain(..) {
            match record.encode() {
                Ok(encoded) => batch.push(encoded),
                Err(e) => {
                    Counters::bump(&self.counters.records_failed, 1);
                    tracing::warn!(sink = %self.name, error = %e, "dropping record that failed to encode");
                }
            }
        }
        if batch.is_empty() {
            return;
        }

        let records = batch.len() as u64;
        let result = match self.writer.ready().await {
            Ok(writer) => writer.call(batch).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                Counters::bump(&self.counters.batches_flushed, 1);
                Counters::bump(&self.counters.records_flushed, records);
                tracing::debug!(sink = %self.name, records, trigger = trigger.as_str(), "flushed batch");
            }
            Err(e) => {
                Counters::bump(&self.counters.batches_failed, 1);
                Counters::bump(&self.counters.records_failed, records);
                tracing::error!(
                    sink = %self.name,
                    records,
                    trigger = trigger.as_str(),
                    error = %e,
                    "batch write failed, discarding batch"
                );
            }
        }
    }
}
