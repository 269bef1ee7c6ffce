//! JSONL write target for `batchline`. Appends one record payload per line.
//! Opens the file per flush; bring your own path or let it pick a timestamped one.

use batchline::{Batch, BatchWriter};
use futures::future::BoxFuture;
use std::io;
use std::path::{Path, PathBuf};
use std::task::{Context, Poll};

#[derive(Clone, Debug)]
pub struct JsonlWriter {
    path: PathBuf,
}

impl JsonlWriter {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Create `dir` if needed and write to `<dir>/<UTC timestamp>.log`.
    pub fn timestamped(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let name = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ").to_string();
        Ok(Self::new(dir.join(format!("{name}.log"))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl tower_service::Service<Batch> for JsonlWriter {
    type Response = ();
    type Error = io::Error;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: Batch) -> Self::Future {
        let path = self.path.clone();
        let mut lines = Vec::new();
        for record in &batch {
            lines.extend_from_slice(record.payload());
            lines.push(b'\n');
        }
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let mut file =
                tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
            file.write_all(&lines).await?;
            file.flush().await?;
            tracing::trace!(path = %path.display(), records = batch.len(), "appended batch");
            Ok(())
        })
    }
}

impl BatchWriter for JsonlWriter {
    type WriteError = io::Error;
}
