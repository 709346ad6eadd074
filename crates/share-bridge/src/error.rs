//! Error taxonomy of the bridging layer.

use share_interop::{DirectoryError, InteropError};

/// Failures of the sharing protocol's name table, as seen by the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("sender name {0:?} is already published")]
    DuplicateName(String),

    #[error("no sender named {0:?} is published")]
    NotFound(String),

    #[error("sharing protocol error: {0}")]
    Protocol(#[source] DirectoryError),
}

impl From<DirectoryError> for RegistryError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::AlreadyExists(name) => Self::DuplicateName(name),
            DirectoryError::Missing(name) => Self::NotFound(name),
            other => Self::Protocol(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to initialise GPU device: {0}")]
    DeviceInit(#[source] InteropError),

    #[error("no GPU device available: {0}")]
    NoDevice(#[source] InteropError),

    #[error("invalid sender name {0:?}")]
    InvalidName(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("GPU operation failed: {0}")]
    Gpu(#[from] InteropError),
}
