use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Batch, Part};
use crate::registry::{FieldSpec, TypeSpec};
use crate::shared::StageError;
use crate::stage::{Closable, Input, Lifecycle, StageKind};
use crate::stats::{Counter, Stats};

use super::InputConfig;

pub(super) const TYPE_NAME: &str = "memory";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Payloads to emit, in order.
    pub payloads: Vec<String>,
    /// Metadata attached to every part.
    pub metadata: HashMap<String, String>,
    /// Number of parts per batch.
    pub batch_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            payloads: Vec::new(),
            metadata: HashMap::new(),
            batch_size: 1,
        }
    }
}

/// Emits a fixed list of payloads and then ends.
#[derive(Debug)]
pub struct Memory {
    pending: Mutex<VecDeque<Batch>>,
    lifecycle: Lifecycle,
    received: Counter,
}

impl StageError for Memory {
    fn stage_kind() -> StageKind {
        StageKind::Input
    }
}

impl Memory {
    pub fn new(conf: &MemoryConfig, stats: Stats) -> Result<Self> {
        if conf.batch_size == 0 {
            return Err(Self::config_error("batch_size must be at least 1"));
        }
        let pending = conf
            .payloads
            .chunks(conf.batch_size)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|payload| {
                        conf.metadata
                            .iter()
                            .fold(Part::new(payload.as_str()), |part, (k, v)| {
                                part.with_metadata(k, v)
                            })
                    })
                    .collect::<Batch>()
            })
            .collect();

        Ok(Self {
            pending: Mutex::new(pending),
            lifecycle: Lifecycle::new(),
            received: stats.counter("received"),
        })
    }
}

fn construct(conf: &InputConfig, stats: Stats) -> Result<Box<dyn Input>> {
    Ok(Box::new(Memory::new(&conf.memory, stats)?))
}

pub(super) fn spec() -> TypeSpec<InputConfig, dyn Input> {
    TypeSpec::new(TYPE_NAME, "Emits a fixed list of messages and then ends.", construct)
        .field(FieldSpec::new("payloads", "The message payloads to emit, in order."))
        .field(FieldSpec::new("metadata", "Metadata to set on every message.").advanced())
        .field(FieldSpec::new("batch_size", "The number of messages per batch."))
        .defaults(&MemoryConfig::default())
}

#[async_trait]
impl Closable for Memory {
    fn request_close(&self) {
        self.lifecycle.request_close();
    }

    async fn await_close(&self, timeout: Duration) -> Result<()> {
        self.lifecycle.close_within(timeout, async { Ok(()) }).await
    }
}

#[async_trait]
impl Input for Memory {
    async fn read(&self) -> Result<Option<Batch>> {
        if self.lifecycle.is_close_requested() {
            return Ok(None);
        }
        self.lifecycle.mark_running();
        let next = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        if let Some(batch) = &next {
            self.received.incr(batch.len() as u64);
        }
        Ok(next)
    }
}
