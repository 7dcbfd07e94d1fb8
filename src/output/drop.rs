use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Batch;
use crate::registry::TypeSpec;
use crate::stage::{Closable, Lifecycle, Output, Response};
use crate::stats::{Counter, Stats};

use super::OutputConfig;

pub(super) const TYPE_NAME: &str = "drop";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropConfig {}

/// Acknowledges and discards every batch.
#[derive(Debug)]
pub struct DropOutput {
    lifecycle: Lifecycle,
    dropped: Counter,
}

impl DropOutput {
    pub fn new(stats: Stats) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            dropped: stats.counter("dropped"),
        }
    }
}

fn construct(_conf: &OutputConfig, stats: Stats) -> Result<Box<dyn Output>> {
    Ok(Box::new(DropOutput::new(stats)))
}

pub(super) fn spec() -> TypeSpec<OutputConfig, dyn Output> {
    TypeSpec::new(TYPE_NAME, "Drops all messages.", construct).defaults(&DropConfig::default())
}

#[async_trait]
impl Closable for DropOutput {
    fn request_close(&self) {
        self.lifecycle.request_close();
    }

    async fn await_close(&self, timeout: Duration) -> Result<()> {
        self.lifecycle.close_within(timeout, async { Ok(()) }).await
    }
}

#[async_trait]
impl Output for DropOutput {
    async fn write(&self, batch: Batch) -> Response {
        self.lifecycle.mark_running();
        self.dropped.incr(batch.len() as u64);
        Response::Ack
    }
}
