use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Batch;
use crate::registry::{Constructor, TypeSpec};
use crate::stage::{Closable, Lifecycle, ProcessOutcome, Processor};

use super::ProcessorConfig;

pub(super) const TYPE_NAME: &str = "noop";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoopConfig {}

/// Forwards every batch unchanged.
#[derive(Debug, Default)]
pub struct Noop {
    lifecycle: Lifecycle,
}

impl Noop {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(super) fn spec() -> TypeSpec<ProcessorConfig, dyn Processor> {
    let constructor: Constructor<ProcessorConfig, dyn Processor> =
        |_, _| Ok(Box::new(Noop::new()));
    TypeSpec::new(TYPE_NAME, "Forwards batches without touching them.", constructor)
        .defaults(&NoopConfig::default())
}

#[async_trait]
impl Closable for Noop {
    fn request_close(&self) {
        self.lifecycle.request_close();
    }

    async fn await_close(&self, timeout: Duration) -> Result<()> {
        self.lifecycle.close_within(timeout, async { Ok(()) }).await
    }
}

#[async_trait]
impl Processor for Noop {
    async fn process(&self, batch: Batch) -> ProcessOutcome {
        self.lifecycle.mark_running();
        ProcessOutcome::single(batch)
    }
}
