//! Processors transform batches on their way from the input to the output.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::{Registries, TypeSpec};
use crate::stage::Processor;
use crate::stats::Stats;

mod noop;
mod redis;

pub use self::noop::{Noop, NoopConfig};
pub use self::redis::{Redis, RedisConfig, SetOperator};

/// Configuration of a single processor. `type` selects which of the nested records is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    #[serde(rename = "type")]
    pub type_name: String,
    pub redis: RedisConfig,
    pub noop: NoopConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            type_name: noop::TYPE_NAME.to_string(),
            redis: RedisConfig::default(),
            noop: NoopConfig::default(),
        }
    }
}

pub(crate) fn builtin_specs() -> Vec<TypeSpec<ProcessorConfig, dyn Processor>> {
    vec![noop::spec(), redis::spec()]
}

/// Builds the processor selected by `conf` from `registries`.
pub fn construct(
    conf: &ProcessorConfig,
    registries: &Registries,
    stats: &Stats,
) -> Result<Box<dyn Processor>> {
    registries
        .processors
        .construct(&conf.type_name, conf, stats)
}
