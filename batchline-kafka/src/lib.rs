//! Kafka write target for `batchline` (companion crate).
//! Each record of a batch becomes one message on the topic, keyed by the record key.
//! The broker client lives behind the `client` feature; bring your own `FutureProducer` or
//! build one from a [`KafkaTopic`].

use serde::Deserialize;
use std::time::Duration;

/// Where notifications go. Brokers are a comma-separated `host:port` list.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct KafkaTopic {
    pub brokers: String,
    pub topic: String,
    /// How long a message may wait in the producer queue.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
}

fn default_queue_timeout_ms() -> u64 {
    5_000
}

impl KafkaTopic {
    pub fn new(brokers: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            topic: topic.into(),
            queue_timeout_ms: default_queue_timeout_ms(),
        }
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

#[cfg(feature = "client")]
pub use client::{KafkaWriter, KafkaWriterError};

#[cfg(feature = "client")]
mod client {
    use super::KafkaTopic;
    use batchline::{Batch, BatchWriter};
    use futures::future::{join_all, BoxFuture};
    use rdkafka::error::KafkaError;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::ClientConfig;
    use std::task::{Context, Poll};
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    pub enum KafkaWriterError {
        #[error("failed to create Kafka producer: {0}")]
        Producer(#[source] KafkaError),
        #[error("failed to deliver {failed} of {total} records to {topic}: {source}")]
        Delivery {
            topic: String,
            failed: usize,
            total: usize,
            #[source]
            source: KafkaError,
        },
    }

    #[derive(Clone)]
    pub struct KafkaWriter {
        topic: String,
        producer: FutureProducer,
        queue_timeout: Duration,
    }

    impl std::fmt::Debug for KafkaWriter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("KafkaWriter")
                .field("topic", &self.topic)
                .field("queue_timeout", &self.queue_timeout)
                .finish()
        }
    }

    impl KafkaWriter {
        /// Create a writer with an existing Kafka producer.
        pub fn new(producer: FutureProducer, topic: impl Into<String>) -> Self {
            Self { topic: topic.into(), producer, queue_timeout: Duration::from_secs(5) }
        }

        /// Build a producer for `target.brokers` and write to `target.topic`.
        pub fn connect(target: &KafkaTopic) -> Result<Self, KafkaWriterError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", &target.brokers)
                .set("message.timeout.ms", "10000")
                .create()
                .map_err(KafkaWriterError::Producer)?;
            Ok(Self::new(producer, target.topic.clone()).with_queue_timeout(target.queue_timeout()))
        }

        pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
            self.queue_timeout = timeout;
            self
        }

        pub fn topic(&self) -> &str {
            &self.topic
        }
    }

    impl tower_service::Service<Batch> for KafkaWriter {
        type Response = ();
        type Error = KafkaWriterError;
        type Future = BoxFuture<'static, Result<(), Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, batch: Batch) -> Self::Future {
            let topic = self.topic.clone();
            let producer = self.producer.clone();
            let queue_timeout = self.queue_timeout;
            Box::pin(async move {
                let sends = batch.iter().map(|record| {
                    let message = FutureRecord::<[u8], [u8]>::to(&topic).payload(record.payload());
                    let message = match record.key() {
                        Some(key) => message.key(key),
                        None => message,
                    };
                    producer.send(message, queue_timeout)
                });
                let results = join_all(sends).await;

                let total = results.len();
                let mut failed = 0;
                let mut first = None;
                for result in results {
                    if let Err((e, _)) = result {
                        failed += 1;
                        first.get_or_insert(e);
                    }
                }
                match first {
                    None => Ok(()),
                    Some(source) => {
                        tracing::warn!(topic = %topic, failed, total, error = %source, "kafka delivery failed");
                        Err(KafkaWriterError::Delivery { topic, failed, total, source })
                    }
                }
            })
        }
    }

    impl BatchWriter for KafkaWriter {
        type WriteError = KafkaWriterError;
    }
}
