//! The GPU seam.

use crate::error::InteropError;
use crate::format::{SharedHandle, TextureDesc};

/// How a texture will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsage {
    /// Render target and shader resource, local to this device.
    Render,
    /// Like `Render`, and exportable through [`GpuDevice::shared_handle`].
    Shared,
}

/// A GPU device able to create, share, copy and stage 2D textures.
///
/// Implementations exist for Direct3D 11 (Windows, legacy shared handles) and
/// for a software adapter used in tests. Every texture and staging surface is
/// an owned value; dropping it releases the GPU resource.
///
/// All methods take `&self`: implementations serialize access to their
/// immediate context internally, so a device can be shared between the
/// render and delivery threads.
pub trait GpuDevice: Send + Sync + 'static {
    type Texture: Send + Sync + 'static;
    type Staging: Send + Sync + 'static;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    fn create_texture(
        &self,
        desc: TextureDesc,
        usage: TextureUsage,
    ) -> Result<Self::Texture, InteropError>;

    fn texture_desc(&self, texture: &Self::Texture) -> TextureDesc;

    /// Export a cross-process handle. Only textures created with
    /// [`TextureUsage::Shared`] can be exported.
    fn shared_handle(&self, texture: &Self::Texture) -> Result<SharedHandle, InteropError>;

    /// Open a texture another device exported. Fails once the owner has
    /// released it.
    fn open_shared(&self, handle: SharedHandle) -> Result<Self::Texture, InteropError>;

    /// Copy texels between textures of identical size and format.
    fn copy_texture(&self, dst: &Self::Texture, src: &Self::Texture) -> Result<(), InteropError>;

    /// Draw `src` over the whole of `dst`, scaling and converting format.
    fn blit_texture(&self, dst: &Self::Texture, src: &Self::Texture) -> Result<(), InteropError>;

    fn create_staging(&self, desc: TextureDesc) -> Result<Self::Staging, InteropError>;

    fn staging_desc(&self, staging: &Self::Staging) -> TextureDesc;

    /// GPU texture into a CPU-visible staging surface (same geometry).
    fn copy_to_staging(
        &self,
        dst: &Self::Staging,
        src: &Self::Texture,
    ) -> Result<(), InteropError>;

    /// CPU-visible staging surface onto a GPU texture (same geometry).
    fn copy_from_staging(
        &self,
        dst: &Self::Texture,
        src: &Self::Staging,
    ) -> Result<(), InteropError>;

    /// Map a staging surface for reading. The callback receives the mapped
    /// bytes and their row pitch, which may exceed the tight row length.
    fn read_staging(
        &self,
        staging: &Self::Staging,
        read: &mut dyn FnMut(&[u8], usize),
    ) -> Result<(), InteropError>;

    /// Map a staging surface for writing.
    fn write_staging(
        &self,
        staging: &Self::Staging,
        write: &mut dyn FnMut(&mut [u8], usize),
    ) -> Result<(), InteropError>;

    /// Submit queued work so other processes see the latest texels.
    fn flush(&self) {}
}
