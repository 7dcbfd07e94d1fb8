//! Constants used across flowstage.

/// Default capacity of the bounded channels connecting pipeline stages.
pub const DEFAULT_CHANNEL_SIZE: usize = 1000;

/// Default time a stage is given to release its resources on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: &str = "20s";

/// Metadata key set on a part whose processing failed. The value is the error message.
pub const FAILED_FLAG_KEY: &str = "flowstage_processing_failed";

/// Default retry count of stages that call out to a remote system.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default wait between consecutive retry attempts.
pub const DEFAULT_RETRY_PERIOD: &str = "500ms";
