//! Building blocks for configuration driven stream processing pipelines.
//!
//! A pipeline moves [batches](message::Batch) of messages from an [input](stage::Input) through
//! a chain of [processors](stage::Processor) to an [output](stage::Output). Every stage is
//! selected by a type name in the configuration and built through a [registry](registry).
//!
//! Stages that call out to flaky remote systems apply their work to each part of a batch with
//! [`iterate::iterate_parts_with_span`], wrapping every remote call in a [`retry::Retrier`].
//! A failing part is flagged and the rest of the batch carries on.
//!
//! ```no_run
//! use flowstage::config::Config;
//! use flowstage::pipeline::Pipeline;
//! use flowstage::registry::Registries;
//! use flowstage::stats::Stats;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> flowstage::error::Result<()> {
//! let config = Config::from_file("pipeline.json")?;
//! let pipeline = Pipeline::build(&config, Registries::builtin(), Stats::new())?;
//! pipeline.run(CancellationToken::new()).await
//! # }
//! ```

/// constants, duration parsing and signal handling
mod shared;

pub use shared::{parse_duration, shutdown_signal, FAILED_FLAG_KEY};

pub mod error;

/// batches and the parts they are made of
pub mod message;

/// the stage contract and lifecycle
pub mod stage;

pub mod stats;

pub mod iterate;

pub mod retry;

/// interpolated configuration fields
pub mod expression;

/// remote set-store clients
pub mod client;

pub mod registry;

/// built-in inputs
pub mod input;

/// built-in processors
pub mod processor;

/// built-in outputs
pub mod output;

pub mod config;

pub mod pipeline;
