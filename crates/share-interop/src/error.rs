//! Errors raised by GPU backends.

use crate::format::{SharedHandle, TextureDesc};

#[derive(Debug, thiserror::Error)]
pub enum InteropError {
    #[error("GPU device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("failed to create {desc} texture: {reason}")]
    TextureCreation { desc: TextureDesc, reason: String },

    #[error("shared handle {0} cannot be opened")]
    InvalidHandle(SharedHandle),

    #[error("DXGI format {0} is not supported here")]
    UnsupportedFormat(u32),

    #[error("texture geometry mismatch: {dst} <- {src}")]
    Mismatch { dst: TextureDesc, src: TextureDesc },

    #[error("failed to map staging surface: {0}")]
    Map(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
