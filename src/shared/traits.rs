//! Shared stage traits for consistent error construction across all stage kinds.

use crate::error::{Error, ErrorKind};
use crate::stage::StageKind;

/// Trait for consistent error construction across all stage implementations.
///
/// Stage implementations name their kind once and get kind-tagged errors for free.
pub(crate) trait StageError {
    /// Get the stage kind for error context
    fn stage_kind() -> StageKind;

    /// Create a configuration error
    fn config_error(message: impl Into<String>) -> Error {
        Self::wrap(ErrorKind::ConfigError(message.into()))
    }

    /// Create a remote client error
    fn client_error(message: impl Into<String>) -> Error {
        Self::wrap(ErrorKind::ClientError(message.into()))
    }

    /// Create an internal error
    fn internal_error(message: impl Into<String>) -> Error {
        Self::wrap(ErrorKind::InternalError(message.into()))
    }

    fn wrap(kind: ErrorKind) -> Error {
        match Self::stage_kind() {
            StageKind::Input => Error::InputError(kind),
            StageKind::Processor => Error::ProcessorError(kind),
            StageKind::Output => Error::OutputError(kind),
        }
    }
}
