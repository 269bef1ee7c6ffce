use batchline::{Batch, BatchWriter, BatchingSink, EventRecord, SinkConfig, Submit};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl SharedWriter {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap().lines().map(str::to_string).collect()
    }

    fn count(&self, level: &str, message: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(level) && l.contains(message)).count()
    }
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

struct SharedGuard(Arc<Mutex<Vec<u8>>>);
impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn capture() -> (SharedWriter, tracing::subscriber::DefaultGuard) {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(writer.clone()))
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .without_time()
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (writer, guard)
}

/// Refuses every batch.
struct Unreachable;

impl Service<Batch> for Unreachable {
    type Response = ();
    type Error = std::io::Error;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _batch: Batch) -> Self::Future {
        Box::pin(async {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "broker unavailable"))
        })
    }
}

impl BatchWriter for Unreachable {
    type WriteError = std::io::Error;
}

fn record(i: i64) -> EventRecord {
    EventRecord::info("handler", "request", format!("request {i}")).with_subject(i)
}

// current-thread runtime: the worker runs on this thread, so the scoped subscriber sees it
#[tokio::test]
async fn every_dropped_record_warns_once() {
    let (logs, _guard) = capture();
    let config = SinkConfig::new(10, Duration::from_secs(60)).with_queue_capacity(2);
    let sink = BatchingSink::spawn_named("events", config, Unreachable).unwrap();

    // nothing yields in between, so the worker cannot drain the queue
    let outcomes: Vec<Submit> = (0..7).map(|i| sink.submit(record(i))).collect();
    assert_eq!(outcomes.iter().filter(|s| **s == Submit::Accepted).count(), 2);
    assert_eq!(outcomes.iter().filter(|s| **s == Submit::Dropped).count(), 5);

    assert_eq!(logs.count("WARN", "queue full, dropping record"), 5);
    assert_eq!(sink.stats().dropped, 5);
    assert!(logs.lines().iter().any(|l| l.contains("sink=events")));
    sink.close().await;
}

#[tokio::test]
async fn failed_write_and_late_submit_are_reported() {
    let (logs, _guard) = capture();
    let config = SinkConfig::new(10, Duration::from_secs(60));
    let sink = BatchingSink::spawn(config, Unreachable).unwrap();

    for i in 0..3 {
        assert_eq!(sink.submit(record(i)), Submit::Accepted);
    }
    sink.close().await;
    assert_eq!(sink.submit(record(99)), Submit::Rejected);

    assert_eq!(logs.count("ERROR", "batch write failed, discarding batch"), 1);
    assert_eq!(logs.count("WARN", "sink closed, rejecting record"), 1);
    assert_eq!(logs.count("WARN", "queue full"), 0);
    let stats = sink.stats();
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.records_failed, 3);
}
