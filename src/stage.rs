//! The contract every input, processor and output implements.
//!
//! Stages move through `Constructed → Running → CloseRequested → Closed`. A close is two-phase:
//! [`Closable::request_close`] is non-blocking and may be called from any task, after which
//! [`Closable::await_close`] waits (bounded by a timeout) until the stage has released its
//! resources. The orchestrator only calls `await_close` after the stage's last processing call
//! has completed.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::message::Batch;

/// The kinds of stage a registry can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Input,
    Processor,
    Output,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageKind::Input => "input",
            StageKind::Processor => "processor",
            StageKind::Output => "output",
        })
    }
}

impl std::str::FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "input" => Ok(StageKind::Input),
            "processor" => Ok(StageKind::Processor),
            "output" => Ok(StageKind::Output),
            other => Err(format!("unknown stage kind: {other}")),
        }
    }
}

/// Acknowledgement sent back towards the source of a batch instead of forwarding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The batch was handled and needs no further delivery.
    Ack,
    /// The batch could not be handled.
    Error(String),
}

impl Response {
    pub fn is_ack(&self) -> bool {
        matches!(self, Response::Ack)
    }
}

/// Result of handing a batch to a [`Processor`].
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Zero or more batches to forward downstream, in order. An empty list filters the batch.
    Forward(Vec<Batch>),
    /// Do not forward anything; respond to the source instead.
    Respond(Response),
}

impl ProcessOutcome {
    pub fn single(batch: Batch) -> Self {
        ProcessOutcome::Forward(vec![batch])
    }
}

/// Lifecycle shared by every stage kind.
#[async_trait]
pub trait Closable: Send + Sync {
    /// Signals the stage to stop accepting new work. Never blocks.
    fn request_close(&self);

    /// Blocks until the stage has released its resources, or fails with
    /// [`Error::CloseTimeout`] once `timeout` elapses.
    async fn await_close(&self, timeout: Duration) -> Result<()>;
}

/// A stage that transforms batches.
#[async_trait]
pub trait Processor: Closable {
    /// Applies the processor to a batch, either creating zero or more resulting batches or a
    /// response to be sent back to the batch source.
    async fn process(&self, batch: Batch) -> ProcessOutcome;
}

/// A stage that produces batches.
#[async_trait]
pub trait Input: Closable {
    /// Reads the next batch. `Ok(None)` means the input is exhausted.
    async fn read(&self) -> Result<Option<Batch>>;
}

/// A stage that delivers batches to a sink.
#[async_trait]
pub trait Output: Closable {
    /// Writes a batch and responds with the outcome.
    async fn write(&self, batch: Batch) -> Response;
}

/// Lifecycle states of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Constructed,
    Running,
    CloseRequested,
    Closed,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Constructed,
            1 => StageState::Running,
            2 => StageState::CloseRequested,
            _ => StageState::Closed,
        }
    }
}

/// Tracks a stage's lifecycle state and carries the close signal observed by in-flight work
/// such as retry waits.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    close_token: CancellationToken,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(StageState::Constructed as u8),
            close_token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Records that the stage has started handling work. No-op once a close was requested.
    pub fn mark_running(&self) {
        let _ = self.state.compare_exchange(
            StageState::Constructed as u8,
            StageState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn request_close(&self) {
        self.state
            .fetch_max(StageState::CloseRequested as u8, Ordering::AcqRel);
        self.close_token.cancel();
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_token.is_cancelled()
    }

    /// Token cancelled as soon as a close is requested.
    pub fn close_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    /// Runs `release` with a deadline of `timeout` and moves to [`StageState::Closed`] when it
    /// completes. A timeout leaves the state untouched so a later call can wait again.
    pub async fn close_within<F>(&self, timeout: Duration, release: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        if self.state() == StageState::Closed {
            return Ok(());
        }
        self.request_close();
        let result = tokio::time::timeout(timeout, release)
            .await
            .map_err(|_| Error::CloseTimeout(timeout))?;
        self.state.store(StageState::Closed as u8, Ordering::Release);
        result
    }
}
