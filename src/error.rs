use std::time::Duration;

use thiserror::Error;

use crate::stage::StageKind;

/// The main Result type used throughout flowstage
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or inconsistent configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Failures talking to a remote system
    #[error("Client error: {0}")]
    ClientError(String),

    /// Internal runtime errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Input - {0}")]
    InputError(ErrorKind),

    #[error("Processor - {0}")]
    ProcessorError(ErrorKind),

    #[error("Output - {0}")]
    OutputError(ErrorKind),

    #[error("Pipeline - {0}")]
    PipelineError(ErrorKind),

    #[error("Invalid {kind} type: {name}")]
    UnknownType { kind: StageKind, name: String },

    #[error("{kind} type {name} is already registered")]
    DuplicateType { kind: StageKind, name: String },

    #[error("Timed out after {0:?} waiting for stage to close")]
    CloseTimeout(Duration),
}

impl Error {
    /// Whether the error prevents a stage from being built, as opposed to one raised while
    /// the pipeline is running.
    pub fn is_construction(&self) -> bool {
        match self {
            Error::UnknownType { .. } | Error::DuplicateType { .. } => true,
            Error::InputError(kind)
            | Error::ProcessorError(kind)
            | Error::OutputError(kind)
            | Error::PipelineError(kind) => matches!(kind, ErrorKind::ConfigError(_)),
            Error::CloseTimeout(_) => false,
        }
    }
}
