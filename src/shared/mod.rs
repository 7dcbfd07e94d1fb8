//! Shared utilities and common functionality
//!
//! This module contains utilities, constants and traits that are shared across the stage
//! kinds and the pipeline runtime.

mod signal;
mod traits;
mod types;
mod utils;

pub use signal::shutdown_signal;
pub(crate) use traits::*;
pub use types::*;
pub use utils::*;
