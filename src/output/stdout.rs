use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::message::Batch;
use crate::registry::{FieldSpec, TypeSpec};
use crate::shared::StageError;
use crate::stage::{Closable, Lifecycle, Output, Response, StageKind};
use crate::stats::{Counter, Stats};

use super::OutputConfig;

pub(super) const TYPE_NAME: &str = "stdout";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdoutConfig {
    /// Written after every message.
    pub delimiter: String,
}

impl Default for StdoutConfig {
    fn default() -> Self {
        Self {
            delimiter: "\n".to_string(),
        }
    }
}

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// Writes each message followed by a delimiter.
pub struct Stdout {
    writer: Mutex<Sink>,
    delimiter: Vec<u8>,
    lifecycle: Lifecycle,
    sent: Counter,
    batch_sent: Counter,
    error: Counter,
}

impl StageError for Stdout {
    fn stage_kind() -> StageKind {
        StageKind::Output
    }
}

impl Stdout {
    pub fn new(conf: &StdoutConfig, stats: Stats) -> Self {
        Self::with_writer(conf, stats, tokio::io::stdout())
    }

    /// Writes to `writer` instead of the process's standard output.
    pub fn with_writer<W>(conf: &StdoutConfig, stats: Stats, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Mutex::new(Box::new(writer)),
            delimiter: conf.delimiter.clone().into_bytes(),
            lifecycle: Lifecycle::new(),
            sent: stats.counter("sent"),
            batch_sent: stats.counter("batch.sent"),
            error: stats.counter("error"),
        }
    }

    async fn write_batch(&self, batch: &Batch) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        for part in batch.iter() {
            writer.write_all(part.payload()).await?;
            writer.write_all(&self.delimiter).await?;
        }
        writer.flush().await
    }
}

fn construct(conf: &OutputConfig, stats: Stats) -> Result<Box<dyn Output>> {
    Ok(Box::new(Stdout::new(&conf.stdout, stats)))
}

pub(super) fn spec() -> TypeSpec<OutputConfig, dyn Output> {
    TypeSpec::new(
        TYPE_NAME,
        "Prints messages to stdout as a continuous stream of data.",
        construct,
    )
    .field(FieldSpec::new("delimiter", "A custom delimiter written after each message."))
    .defaults(&StdoutConfig::default())
}

#[async_trait]
impl Closable for Stdout {
    fn request_close(&self) {
        self.lifecycle.request_close();
    }

    async fn await_close(&self, timeout: Duration) -> Result<()> {
        self.lifecycle
            .close_within(timeout, async {
                self.writer
                    .lock()
                    .await
                    .flush()
                    .await
                    .map_err(|e| Self::internal_error(format!("flushing stdout: {e}")))
            })
            .await
    }
}

#[async_trait]
impl Output for Stdout {
    async fn write(&self, batch: Batch) -> Response {
        self.lifecycle.mark_running();
        match self.write_batch(&batch).await {
            Ok(()) => {
                self.sent.incr(batch.len() as u64);
                self.batch_sent.incr(1);
                Response::Ack
            }
            Err(e) => {
                warn!(error = %e, "Failed to write batch");
                self.error.incr(1);
                Response::Error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_writes_delimited_parts() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let conf = StdoutConfig {
            delimiter: "|".to_string(),
        };
        let stats = Stats::new();
        let output = Stdout::with_writer(&conf, stats.clone(), writer);

        assert!(output.write(Batch::new(vec!["4", "0"])).await.is_ack());
        output.request_close();
        output.await_close(Duration::from_secs(1)).await.unwrap();
        drop(output);

        let mut written = String::new();
        reader.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "4|0|");
        assert_eq!(stats.get("sent"), Some(2));
        assert_eq!(stats.get("batch.sent"), Some(1));
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let (writer, reader) = tokio::io::duplex(8);
        drop(reader);
        let stats = Stats::new();
        let output = Stdout::with_writer(&StdoutConfig::default(), stats.clone(), writer);

        let response = output.write(Batch::new(vec!["lost"])).await;
        assert!(matches!(response, Response::Error(_)));
        assert_eq!(stats.get("error"), Some(1));
    }
}
