//! Outputs deliver the batches that reach the end of a pipeline.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::{Registries, TypeSpec};
use crate::stage::Output;
use crate::stats::Stats;

mod drop;
mod stdout;

pub use self::drop::{DropConfig, DropOutput};
pub use self::stdout::{Stdout, StdoutConfig};

/// Configuration of the pipeline's output. `type` selects which of the nested records is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    #[serde(rename = "type")]
    pub type_name: String,
    pub stdout: StdoutConfig,
    pub drop: DropConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            type_name: stdout::TYPE_NAME.to_string(),
            stdout: StdoutConfig::default(),
            drop: DropConfig::default(),
        }
    }
}

pub(crate) fn builtin_specs() -> Vec<TypeSpec<OutputConfig, dyn Output>> {
    vec![drop::spec(), stdout::spec()]
}

/// Builds the output selected by `conf` from `registries`.
pub fn construct(
    conf: &OutputConfig,
    registries: &Registries,
    stats: &Stats,
) -> Result<Box<dyn Output>> {
    registries.outputs.construct(&conf.type_name, conf, stats)
}
