//! Wires an input, a chain of processors and an output together and runs them.
//!
//! Every stage runs in its own task. Stages are connected by bounded channels, so a slow stage
//! applies backpressure upstream instead of letting batches pile up. Each stage handles one
//! batch at a time, in arrival order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::message::Batch;
use crate::registry::Registries;
use crate::stage::{Closable, Input, Output, ProcessOutcome, Processor, Response};
use crate::stats::{Counter, Stats};
use crate::{input, output, processor};

/// A fully constructed pipeline, ready to run.
pub struct Pipeline {
    input: Arc<dyn Input>,
    processors: Vec<Arc<dyn Processor>>,
    output: Arc<dyn Output>,
    channel_size: usize,
    shutdown_timeout: Duration,
    stats: Stats,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("processors", &self.processors.len())
            .field("channel_size", &self.channel_size)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

fn pipeline_error(message: String) -> Error {
    Error::PipelineError(ErrorKind::InternalError(message))
}

impl Pipeline {
    /// Builds every stage named by `config`. The first construction error aborts the build, so
    /// a pipeline never starts with a stage missing.
    pub fn build(config: &Config, registries: &Registries, stats: Stats) -> Result<Self> {
        let shutdown_timeout = config.shutdown_timeout()?;
        if config.channel_size == 0 {
            return Err(Error::PipelineError(ErrorKind::ConfigError(
                "channel_size must be at least 1".to_string(),
            )));
        }

        let input = input::construct(&config.input, registries, &stats)?;
        let processors = config
            .pipeline
            .processors
            .iter()
            .map(|conf| processor::construct(conf, registries, &stats).map(Arc::from))
            .collect::<Result<Vec<Arc<dyn Processor>>>>()?;
        let output = output::construct(&config.output, registries, &stats)?;

        info!(
            input = %config.input.type_name,
            processors = processors.len(),
            output = %config.output.type_name,
            "Pipeline built"
        );
        Ok(Self {
            input: Arc::from(input),
            processors,
            output: Arc::from(output),
            channel_size: config.channel_size,
            shutdown_timeout,
            stats,
        })
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Runs until the input is exhausted or `shutdown` is cancelled, then closes every stage.
    ///
    /// Cancelling `shutdown` asks every stage to close at once, which cuts pending retry waits
    /// short. Batches already read are still carried through to the output, with parts that
    /// could no longer be processed flagged. The first task failure or close timeout is
    /// returned.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let token = shutdown.child_token();
        let stats = self.stats.scoped("pipeline");
        let mut handles: Vec<JoinHandle<Result<()>>> = Vec::new();

        // a shutdown reaches every stage right away, so retry waits in flight end early
        let closer = tokio::spawn({
            let token = token.clone();
            let input = Arc::clone(&self.input);
            let processors = self.processors.clone();
            let output = Arc::clone(&self.output);
            async move {
                token.cancelled().await;
                info!("Shutdown requested, closing stages");
                request_close(&input, &processors, &output);
            }
        });

        let (tx, mut rx) = mpsc::channel(self.channel_size);
        handles.push(tokio::spawn(read_input(
            Arc::clone(&self.input),
            tx,
            token.clone(),
            stats.counter("input.batches"),
        )));

        for processor in &self.processors {
            let (next_tx, next_rx) = mpsc::channel(self.channel_size);
            handles.push(tokio::spawn(run_processor(
                Arc::clone(processor),
                rx,
                next_tx,
                stats.counter("processor.errors"),
            )));
            rx = next_rx;
        }

        handles.push(tokio::spawn(write_output(
            Arc::clone(&self.output),
            rx,
            stats.counter("output.errors"),
        )));

        let mut result = Ok(());
        for handle in handles {
            let outcome = handle
                .await
                .map_err(|e| pipeline_error(format!("stage task failed: {e}")))
                .and_then(|r| r);
            if let Err(e) = outcome {
                error!(error = %e, "Pipeline stage failed");
                // stop reading so the remaining stages drain and finish
                token.cancel();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        closer.abort();
        let close_result = self.close().await;
        info!("Pipeline stopped");
        result.and(close_result)
    }

    async fn close(&self) -> Result<()> {
        request_close(&self.input, &self.processors, &self.output);

        let timeout = self.shutdown_timeout;
        let mut results = vec![self.input.await_close(timeout).await];
        for processor in &self.processors {
            results.push(processor.await_close(timeout).await);
        }
        results.push(self.output.await_close(timeout).await);

        let mut result = Ok(());
        for e in results.into_iter().filter_map(Result::err) {
            warn!(error = %e, "Stage did not close cleanly");
            if result.is_ok() {
                result = Err(e);
            }
        }
        result
    }
}

fn request_close(
    input: &Arc<dyn Input>,
    processors: &[Arc<dyn Processor>],
    output: &Arc<dyn Output>,
) {
    input.request_close();
    for processor in processors {
        processor.request_close();
    }
    output.request_close();
}

async fn read_input(
    input: Arc<dyn Input>,
    tx: mpsc::Sender<Batch>,
    token: CancellationToken,
    batches: Counter,
) -> Result<()> {
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Shutdown requested, no longer reading input");
                return Ok(());
            }
            next = input.read() => next?,
        };
        let Some(batch) = next else {
            info!("Input exhausted");
            return Ok(());
        };
        batches.incr(1);
        if tx.send(batch).await.is_err() {
            return Err(pipeline_error("downstream closed before input".to_string()));
        }
    }
}

async fn run_processor(
    processor: Arc<dyn Processor>,
    mut rx: mpsc::Receiver<Batch>,
    tx: mpsc::Sender<Batch>,
    errors: Counter,
) -> Result<()> {
    while let Some(batch) = rx.recv().await {
        match processor.process(batch).await {
            ProcessOutcome::Forward(batches) => {
                for batch in batches {
                    if tx.send(batch).await.is_err() {
                        return Err(pipeline_error("downstream closed before processor".to_string()));
                    }
                }
            }
            ProcessOutcome::Respond(Response::Ack) => {}
            ProcessOutcome::Respond(Response::Error(e)) => {
                errors.incr(1);
                error!(error = %e, "Processor rejected batch");
            }
        }
    }
    Ok(())
}

async fn write_output(
    output: Arc<dyn Output>,
    mut rx: mpsc::Receiver<Batch>,
    errors: Counter,
) -> Result<()> {
    while let Some(batch) = rx.recv().await {
        if let Response::Error(e) = output.write(batch).await {
            errors.incr(1);
            error!(error = %e, "Output failed to write batch");
        }
    }
    Ok(())
}
