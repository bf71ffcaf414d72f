use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The request was refused before any resource was allocated for it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestRejected {
    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),
    #[error("Source code exceeds maximum size of {limit} bytes")]
    SourceTooLarge { limit: usize },
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Could not create workspace file in {}: {source}", dir.display())]
    Create {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Could not write workspace file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The isolated process could not be provisioned or observed.
///
/// Always distinct from a failure produced by the user's own code.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("Failed to prepare image '{image}': {reason}")]
    Image { image: String, reason: String },
    #[error("Failed to create sandbox: {0}")]
    Create(String),
    #[error("Failed to start sandbox: {0}")]
    Start(String),
    #[error("Container runtime refused resource limits: {0}")]
    LimitsRefused(String),
    #[error("Lost track of sandbox: {0}")]
    Wait(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read language table {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse language table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("No languages configured")]
    Empty,
    #[error("Language '{0}' is configured more than once")]
    Duplicate(String),
    #[error("Language '{id}' is invalid: {reason}")]
    InvalidProfile { id: String, reason: String },
}
