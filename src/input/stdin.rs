use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::message::{Batch, Part};
use crate::registry::{FieldSpec, TypeSpec};
use crate::shared::StageError;
use crate::stage::{Closable, Input, Lifecycle, StageKind};
use crate::stats::{Counter, Stats};

use super::InputConfig;

pub(super) const TYPE_NAME: &str = "stdin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdinConfig {
    /// Number of lines per batch.
    pub batch_size: usize,
}

impl Default for StdinConfig {
    fn default() -> Self {
        Self { batch_size: 1 }
    }
}

type LineSource = Lines<Box<dyn AsyncBufRead + Send + Unpin>>;

/// Reads one message per line until end of input. Empty lines are skipped.
pub struct Stdin {
    lines: Mutex<LineSource>,
    batch_size: usize,
    lifecycle: Lifecycle,
    received: Counter,
}

impl StageError for Stdin {
    fn stage_kind() -> StageKind {
        StageKind::Input
    }
}

impl Stdin {
    pub fn new(conf: &StdinConfig, stats: Stats) -> Result<Self> {
        Self::with_reader(conf, stats, BufReader::new(tokio::io::stdin()))
    }

    /// Reads lines from `reader` instead of the process's standard input.
    pub fn with_reader<R>(conf: &StdinConfig, stats: Stats, reader: R) -> Result<Self>
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        if conf.batch_size == 0 {
            return Err(Self::config_error("batch_size must be at least 1"));
        }
        let reader: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(reader);
        Ok(Self {
            lines: Mutex::new(reader.lines()),
            batch_size: conf.batch_size,
            lifecycle: Lifecycle::new(),
            received: stats.counter("received"),
        })
    }
}

fn construct(conf: &InputConfig, stats: Stats) -> Result<Box<dyn Input>> {
    Ok(Box::new(Stdin::new(&conf.stdin, stats)?))
}

pub(super) fn spec() -> TypeSpec<InputConfig, dyn Input> {
    TypeSpec::new(
        TYPE_NAME,
        "Consumes data piped to stdin as line delimited messages.",
        construct,
    )
    .field(FieldSpec::new(
        "batch_size",
        "The number of lines per batch. A short final batch is emitted at end of input.",
    ))
    .defaults(&StdinConfig::default())
}

#[async_trait]
impl Closable for Stdin {
    fn request_close(&self) {
        self.lifecycle.request_close();
    }

    async fn await_close(&self, timeout: Duration) -> Result<()> {
        self.lifecycle.close_within(timeout, async { Ok(()) }).await
    }
}

#[async_trait]
impl Input for Stdin {
    async fn read(&self) -> Result<Option<Batch>> {
        self.lifecycle.mark_running();
        let close = self.lifecycle.close_token();
        let mut lines = self.lines.lock().await;
        let mut batch = Batch::default();

        while batch.len() < self.batch_size {
            let line = tokio::select! {
                biased;
                _ = close.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line.map_err(|e| Self::internal_error(format!("reading stdin: {e}")))? {
                Some(line) if line.is_empty() => continue,
                Some(line) => batch.push(Part::new(line)),
                None => {
                    info!("Reached end of stdin");
                    break;
                }
            }
        }

        if batch.is_empty() {
            return Ok(None);
        }
        self.received.incr(batch.len() as u64);
        Ok(Some(batch))
    }
}
