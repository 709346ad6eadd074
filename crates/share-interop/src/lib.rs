//! GPU-side plumbing for the shared-texture bridge.
//!
//! This crate defines the [`GpuDevice`] trait, the seam between the bridging
//! core and a concrete graphics API, together with the pixel formats and
//! texture descriptors that travel through it. The production backend is
//! Direct3D 11 with legacy shared handles; a software backend with the same
//! semantics drives the tests.
//!
//! The sharing protocol's name table is consumed through [`SenderDirectory`].

pub mod device;
pub mod directory;
pub mod error;
pub mod format;
pub mod rows;
pub mod soft;

pub use device::{GpuDevice, TextureUsage};
pub use directory::{
    validate_name, DirectoryError, MemoryDirectory, SenderDirectory, SenderInfo, MAX_NAME_LEN,
    MAX_SENDERS,
};
pub use error::InteropError;
pub use format::{PixelFormat, SharedHandle, TextureDesc};
pub use rows::{copy_row_prefix, copy_rows};

// Platform-specific implementations.

#[cfg(target_os = "windows")]
pub mod dx11;
