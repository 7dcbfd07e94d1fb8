//! Inputs produce the batches that flow through a pipeline.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::{Registries, TypeSpec};
use crate::stage::Input;
use crate::stats::Stats;

mod memory;
mod stdin;

pub use self::memory::{Memory, MemoryConfig};
pub use self::stdin::{Stdin, StdinConfig};

/// Configuration of the pipeline's input. `type` selects which of the nested records is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    #[serde(rename = "type")]
    pub type_name: String,
    pub memory: MemoryConfig,
    pub stdin: StdinConfig,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            type_name: stdin::TYPE_NAME.to_string(),
            memory: MemoryConfig::default(),
            stdin: StdinConfig::default(),
        }
    }
}

pub(crate) fn builtin_specs() -> Vec<TypeSpec<InputConfig, dyn Input>> {
    vec![memory::spec(), stdin::spec()]
}

/// Builds the input selected by `conf` from `registries`.
pub fn construct(conf: &InputConfig, registries: &Registries, stats: &Stats) -> Result<Box<dyn Input>> {
    registries.inputs.construct(&conf.type_name, conf, stats)
}
