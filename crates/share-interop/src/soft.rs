//! Software GPU adapter.
//!
//! Mirrors the Direct3D 11 semantics the bridge depends on without touching
//! a graphics API: exported handles resolve only while the exporting texture
//! is alive, opened textures alias the exporter's texels, and staging
//! surfaces carry a padded row pitch. The adapter counts live resources so
//! tests can assert that every create/destroy cycle releases everything.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::device::{GpuDevice, TextureUsage};
use crate::error::InteropError;
use crate::format::{SharedHandle, TextureDesc};
use crate::rows::copy_rows;

/// Staging row pitch alignment, matching what D3D11 drivers typically report.
const STAGING_PITCH_ALIGN: usize = 256;

// ---------------------------------------------------------------------------
// SoftAdapter
// ---------------------------------------------------------------------------

/// One "machine": the namespace exported handles live in.
///
/// Devices created from the same adapter can open each other's shared
/// textures, like two processes on one GPU.
#[derive(Clone, Default)]
pub struct SoftAdapter {
    shared: Arc<AdapterShared>,
}

#[derive(Default)]
struct AdapterShared {
    exported: Mutex<HashMap<u64, Weak<Surface>>>,
    next_handle: AtomicU64,
    live_textures: AtomicUsize,
    live_staging: AtomicUsize,
    live_devices: AtomicUsize,
    devices_created: AtomicUsize,
    unavailable: AtomicBool,
    failing_copies: AtomicU32,
}

impl SoftAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_device(&self) -> Result<SoftDevice, InteropError> {
        if self.shared.unavailable.load(Ordering::Acquire) {
            return Err(InteropError::DeviceUnavailable(
                "software adapter disabled".into(),
            ));
        }
        self.shared.live_devices.fetch_add(1, Ordering::AcqRel);
        let ordinal = self.shared.devices_created.fetch_add(1, Ordering::AcqRel);
        debug!(ordinal, "software device created");
        Ok(SoftDevice {
            adapter: Arc::clone(&self.shared),
        })
    }

    /// Make subsequent [`create_device`](Self::create_device) calls fail.
    pub fn set_available(&self, available: bool) {
        self.shared.unavailable.store(!available, Ordering::Release);
    }

    /// Make the next `count` texture copies fail.
    pub fn fail_next_copies(&self, count: u32) {
        self.shared.failing_copies.store(count, Ordering::Release);
    }

    /// Textures whose texels are still allocated.
    pub fn live_textures(&self) -> usize {
        self.shared.live_textures.load(Ordering::Acquire)
    }

    pub fn live_staging(&self) -> usize {
        self.shared.live_staging.load(Ordering::Acquire)
    }

    pub fn live_devices(&self) -> usize {
        self.shared.live_devices.load(Ordering::Acquire)
    }

    pub fn devices_created(&self) -> usize {
        self.shared.devices_created.load(Ordering::Acquire)
    }

    /// Handles that can currently be opened.
    pub fn exported_handles(&self) -> usize {
        self.shared
            .exported
            .lock()
            .values()
            .filter(|surface| surface.strong_count() > 0)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Surfaces
// ---------------------------------------------------------------------------

struct Surface {
    desc: TextureDesc,
    texels: Mutex<Vec<u8>>,
    adapter: Arc<AdapterShared>,
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.adapter.live_textures.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A texture on a [`SoftDevice`]. Textures opened from a shared handle alias
/// the exporter's texels.
pub struct SoftTexture {
    surface: Arc<Surface>,
    export: Option<u64>,
}

impl SoftTexture {
    /// Tightly packed copy of the texels.
    pub fn texels(&self) -> Vec<u8> {
        self.surface.texels.lock().clone()
    }

    /// Overwrite the texels from a tightly packed buffer.
    pub fn write_texels(&self, data: &[u8]) {
        let mut texels = self.surface.texels.lock();
        let len = texels.len().min(data.len());
        texels[..len].copy_from_slice(&data[..len]);
    }

    /// Fill every texel with the same four bytes.
    pub fn fill(&self, texel: [u8; 4]) {
        let mut texels = self.surface.texels.lock();
        for chunk in texels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&texel);
        }
    }
}

impl Drop for SoftTexture {
    fn drop(&mut self) {
        if let Some(handle) = self.export.take() {
            self.surface.adapter.exported.lock().remove(&handle);
            debug!(handle, "software shared handle revoked");
        }
    }
}

pub struct SoftStaging {
    desc: TextureDesc,
    pitch: usize,
    bytes: Mutex<Vec<u8>>,
    adapter: Arc<AdapterShared>,
}

impl SoftStaging {
    pub fn pitch(&self) -> usize {
        self.pitch
    }
}

impl Drop for SoftStaging {
    fn drop(&mut self) {
        self.adapter.live_staging.fetch_sub(1, Ordering::AcqRel);
    }
}

// ---------------------------------------------------------------------------
// SoftDevice
// ---------------------------------------------------------------------------

pub struct SoftDevice {
    adapter: Arc<AdapterShared>,
}

impl SoftDevice {
    fn take_copy_failure(&self) -> Result<(), InteropError> {
        let failing = &self.adapter.failing_copies;
        let mut current = failing.load(Ordering::Acquire);
        while current > 0 {
            match failing.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Err(InteropError::Backend(anyhow::anyhow!(
                        "injected copy failure"
                    )))
                }
                Err(actual) => current = actual,
            }
        }
        Ok(())
    }
}

impl Drop for SoftDevice {
    fn drop(&mut self) {
        self.adapter.live_devices.fetch_sub(1, Ordering::AcqRel);
        debug!("software device released");
    }
}

impl GpuDevice for SoftDevice {
    type Texture = SoftTexture;
    type Staging = SoftStaging;

    fn backend_name(&self) -> &'static str {
        "software"
    }

    fn create_texture(
        &self,
        desc: TextureDesc,
        usage: TextureUsage,
    ) -> Result<SoftTexture, InteropError> {
        if desc.is_empty() {
            return Err(InteropError::TextureCreation {
                desc,
                reason: "zero-sized texture".into(),
            });
        }
        self.adapter.live_textures.fetch_add(1, Ordering::AcqRel);
        let surface = Arc::new(Surface {
            desc,
            texels: Mutex::new(vec![0; desc.row_bytes() * desc.height as usize]),
            adapter: Arc::clone(&self.adapter),
        });

        let export = match usage {
            TextureUsage::Render => None,
            TextureUsage::Shared => {
                let handle = self.adapter.next_handle.fetch_add(1, Ordering::AcqRel) + 1;
                self.adapter
                    .exported
                    .lock()
                    .insert(handle, Arc::downgrade(&surface));
                Some(handle)
            }
        };
        debug!(%desc, ?usage, "software texture created");
        Ok(SoftTexture { surface, export })
    }

    fn texture_desc(&self, texture: &SoftTexture) -> TextureDesc {
        texture.surface.desc
    }

    fn shared_handle(&self, texture: &SoftTexture) -> Result<SharedHandle, InteropError> {
        texture.export.map(SharedHandle).ok_or_else(|| {
            InteropError::Backend(anyhow::anyhow!("texture was not created shareable"))
        })
    }

    fn open_shared(&self, handle: SharedHandle) -> Result<SoftTexture, InteropError> {
        let surface = self
            .adapter
            .exported
            .lock()
            .get(&handle.0)
            .and_then(Weak::upgrade)
            .ok_or(InteropError::InvalidHandle(handle))?;
        Ok(SoftTexture {
            surface,
            export: None,
        })
    }

    fn copy_texture(&self, dst: &SoftTexture, src: &SoftTexture) -> Result<(), InteropError> {
        self.take_copy_failure()?;
        if dst.surface.desc != src.surface.desc {
            return Err(InteropError::Mismatch {
                dst: dst.surface.desc,
                src: src.surface.desc,
            });
        }
        if Arc::ptr_eq(&dst.surface, &src.surface) {
            return Ok(());
        }
        let texels = src.texels();
        dst.surface.texels.lock().copy_from_slice(&texels);
        Ok(())
    }

    fn blit_texture(&self, dst: &SoftTexture, src: &SoftTexture) -> Result<(), InteropError> {
        self.take_copy_failure()?;
        let converted = convert(&src.texels(), src.surface.desc, dst.surface.desc);
        dst.surface.texels.lock().copy_from_slice(&converted);
        Ok(())
    }

    fn create_staging(&self, desc: TextureDesc) -> Result<SoftStaging, InteropError> {
        if desc.is_empty() {
            return Err(InteropError::TextureCreation {
                desc,
                reason: "zero-sized staging surface".into(),
            });
        }
        let pitch = desc.row_bytes().div_ceil(STAGING_PITCH_ALIGN) * STAGING_PITCH_ALIGN;
        self.adapter.live_staging.fetch_add(1, Ordering::AcqRel);
        Ok(SoftStaging {
            desc,
            pitch,
            bytes: Mutex::new(vec![0; pitch * desc.height as usize]),
            adapter: Arc::clone(&self.adapter),
        })
    }

    fn staging_desc(&self, staging: &SoftStaging) -> TextureDesc {
        staging.desc
    }

    fn copy_to_staging(&self, dst: &SoftStaging, src: &SoftTexture) -> Result<(), InteropError> {
        if dst.desc != src.surface.desc {
            return Err(InteropError::Mismatch {
                dst: dst.desc,
                src: src.surface.desc,
            });
        }
        let texels = src.surface.texels.lock();
        let mut bytes = dst.bytes.lock();
        copy_rows(
            &texels,
            dst.desc.row_bytes(),
            &mut bytes,
            dst.pitch,
            dst.desc.height as usize,
        );
        Ok(())
    }

    fn copy_from_staging(
        &self,
        dst: &SoftTexture,
        src: &SoftStaging,
    ) -> Result<(), InteropError> {
        if dst.surface.desc != src.desc {
            return Err(InteropError::Mismatch {
                dst: dst.surface.desc,
                src: src.desc,
            });
        }
        let bytes = src.bytes.lock();
        let mut texels = dst.surface.texels.lock();
        copy_rows(
            &bytes,
            src.pitch,
            &mut texels,
            src.desc.row_bytes(),
            src.desc.height as usize,
        );
        Ok(())
    }

    fn read_staging(
        &self,
        staging: &SoftStaging,
        read: &mut dyn FnMut(&[u8], usize),
    ) -> Result<(), InteropError> {
        let bytes = staging.bytes.lock();
        read(&bytes, staging.pitch);
        Ok(())
    }

    fn write_staging(
        &self,
        staging: &SoftStaging,
        write: &mut dyn FnMut(&mut [u8], usize),
    ) -> Result<(), InteropError> {
        let mut bytes = staging.bytes.lock();
        write(&mut bytes, staging.pitch);
        Ok(())
    }
}

/// Nearest-neighbour scale with channel reordering, the software stand-in
/// for the D3D11 fullscreen blit.
fn convert(src: &[u8], src_desc: TextureDesc, dst_desc: TextureDesc) -> Vec<u8> {
    let (sw, sh) = (src_desc.width as usize, src_desc.height as usize);
    let (dw, dh) = (dst_desc.width as usize, dst_desc.height as usize);
    let src_row = src_desc.row_bytes();
    let dst_row = dst_desc.row_bytes();
    let from = src_desc.format.channel_offsets();
    let to = dst_desc.format.channel_offsets();
    let src_alpha = src_desc.format.has_alpha();

    let mut out = vec![0; dst_row * dh];
    for y in 0..dh {
        let sy = y * sh / dh;
        for x in 0..dw {
            let sx = x * sw / dw;
            let s = sy * src_row + sx * 4;
            let d = y * dst_row + x * 4;
            for channel in 0..3 {
                out[d + to[channel]] = src[s + from[channel]];
            }
            out[d + to[3]] = if src_alpha { src[s + from[3]] } else { u8::MAX };
        }
    }
    out
}
