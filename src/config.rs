//! Top-level pipeline configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::input::InputConfig;
use crate::output::OutputConfig;
use crate::processor::ProcessorConfig;
use crate::shared::{parse_duration, DEFAULT_CHANNEL_SIZE, DEFAULT_SHUTDOWN_TIMEOUT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    /// How long each stage is given to close down.
    pub shutdown_timeout: String,
    /// Capacity of the channels between stages.
    pub channel_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Applied in order to every batch.
    pub processors: Vec<ProcessorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            pipeline: PipelineConfig::default(),
            output: OutputConfig::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT.to_string(),
            channel_size: DEFAULT_CHANNEL_SIZE,
        }
    }
}

fn config_error(message: String) -> Error {
    Error::PipelineError(ErrorKind::ConfigError(message))
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| config_error(format!("invalid config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| config_error(format!("reading {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn shutdown_timeout(&self) -> Result<Duration> {
        parse_duration(&self.shutdown_timeout)
            .map_err(|e| config_error(format!("failed to parse shutdown timeout: {e}")))
    }
}
