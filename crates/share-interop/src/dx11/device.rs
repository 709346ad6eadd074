//! D3D11 device implementing [`GpuDevice`].
//!
//! Shared textures use the legacy `D3D11_RESOURCE_MISC_SHARED` mechanism: the
//! handle from `IDXGIResource::GetSharedHandle` is what the sharing protocol
//! publishes, and receivers open it with `OpenSharedResource`.

use anyhow::anyhow;
use parking_lot::Mutex;
use tracing::{debug, error};
use windows::core::Interface;
use windows::Win32::Foundation::{HANDLE, HMODULE};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::IDXGIResource;

use super::blit::BlitPipeline;
use crate::device::{GpuDevice, TextureUsage};
use crate::error::InteropError;
use crate::format::{PixelFormat, SharedHandle, TextureDesc};

/// A D3D11 device and its immediate context.
///
/// Created via [`Dx11Device::new()`] which tries hardware acceleration first
/// and falls back to WARP, or wrapped around a device the host already owns
/// with [`Dx11Device::from_device()`].
pub struct Dx11Device {
    device: ID3D11Device,
    context: Mutex<ID3D11DeviceContext>,
    /// Compiled on first blit.
    blit: Mutex<Option<BlitPipeline>>,
}

// SAFETY: the device is created without D3D11_CREATE_DEVICE_SINGLETHREADED,
// which makes ID3D11Device free-threaded. The immediate context is not, and
// is only touched while holding `context`.
unsafe impl Send for Dx11Device {}
unsafe impl Sync for Dx11Device {}

impl Dx11Device {
    pub fn new() -> Result<Self, InteropError> {
        let mut device = None;
        let mut context = None;

        // Try HARDWARE first, fall back to WARP for headless machines
        let driver_types = [D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP];
        let mut created = false;

        for &driver_type in &driver_types {
            let hr = unsafe {
                D3D11CreateDevice(
                    None,
                    driver_type,
                    HMODULE::default(),
                    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                    Some(&[D3D_FEATURE_LEVEL_11_0]),
                    D3D11_SDK_VERSION,
                    Some(&mut device as *mut _),
                    None,
                    Some(&mut context as *mut _),
                )
            };
            if hr.is_ok() {
                debug!("D3D11 device created with driver type {:?}", driver_type);
                created = true;
                break;
            }
        }

        if !created {
            error!("Failed to create D3D11 device with any driver type");
            return Err(InteropError::DeviceUnavailable(
                "D3D11CreateDevice failed for hardware and WARP".into(),
            ));
        }

        let device = device
            .ok_or_else(|| InteropError::DeviceUnavailable("D3D11 returned no device".into()))?;
        let context = context
            .ok_or_else(|| InteropError::DeviceUnavailable("D3D11 returned no context".into()))?;

        Ok(Self {
            device,
            context: Mutex::new(context),
            blit: Mutex::new(None),
        })
    }

    /// Wrap a device owned by the host compositor.
    pub fn from_device(device: ID3D11Device) -> Result<Self, InteropError> {
        let context = unsafe { device.GetImmediateContext() }
            .map_err(|e| InteropError::DeviceUnavailable(e.to_string()))?;
        Ok(Self {
            device,
            context: Mutex::new(context),
            blit: Mutex::new(None),
        })
    }

    /// Borrow the underlying `ID3D11Device`.
    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }
}

pub struct Dx11Texture {
    texture: ID3D11Texture2D,
    desc: TextureDesc,
    shared: Option<SharedHandle>,
}

// SAFETY: D3D11 resources are free-threaded objects; all context work on them
// goes through the owning device's context lock.
unsafe impl Send for Dx11Texture {}
unsafe impl Sync for Dx11Texture {}

impl Dx11Texture {
    pub fn raw(&self) -> &ID3D11Texture2D {
        &self.texture
    }
}

pub struct Dx11Staging {
    texture: ID3D11Texture2D,
    desc: TextureDesc,
}

// SAFETY: see Dx11Texture.
unsafe impl Send for Dx11Staging {}
unsafe impl Sync for Dx11Staging {}

fn dxgi_format(format: PixelFormat) -> DXGI_FORMAT {
    DXGI_FORMAT(format.dxgi() as i32)
}

fn texture_desc_of(texture: &ID3D11Texture2D) -> Result<TextureDesc, InteropError> {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.GetDesc(&mut desc) };
    let code = desc.Format.0 as u32;
    let format = PixelFormat::from_dxgi(code).ok_or(InteropError::UnsupportedFormat(code))?;
    Ok(TextureDesc::new(desc.Width, desc.Height, format))
}

fn export_handle(texture: &ID3D11Texture2D) -> Result<SharedHandle, InteropError> {
    let resource: IDXGIResource = texture
        .cast()
        .map_err(|e| anyhow!("texture is not a DXGI resource: {e}"))?;
    let handle = unsafe { resource.GetSharedHandle() }
        .map_err(|e| anyhow!("GetSharedHandle failed: {e}"))?;
    Ok(SharedHandle(handle.0 as usize as u64))
}

fn ensure_same(dst: TextureDesc, src: TextureDesc) -> Result<(), InteropError> {
    if dst != src {
        return Err(InteropError::Mismatch { dst, src });
    }
    Ok(())
}

impl GpuDevice for Dx11Device {
    type Texture = Dx11Texture;
    type Staging = Dx11Staging;

    fn backend_name(&self) -> &'static str {
        "d3d11"
    }

    fn create_texture(
        &self,
        desc: TextureDesc,
        usage: TextureUsage,
    ) -> Result<Dx11Texture, InteropError> {
        let misc = match usage {
            TextureUsage::Render => 0,
            TextureUsage::Shared => D3D11_RESOURCE_MISC_SHARED.0 as u32,
        };
        let d3d_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_RENDER_TARGET.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: misc,
        };

        let mut texture = None;
        unsafe {
            self.device
                .CreateTexture2D(&d3d_desc, None, Some(&mut texture as *mut _))
        }
        .map_err(|e| InteropError::TextureCreation {
            desc,
            reason: e.to_string(),
        })?;
        let texture: ID3D11Texture2D = texture.ok_or_else(|| InteropError::TextureCreation {
            desc,
            reason: "CreateTexture2D returned null".into(),
        })?;

        let shared = match usage {
            TextureUsage::Render => None,
            TextureUsage::Shared => Some(export_handle(&texture)?),
        };
        debug!(%desc, ?usage, "D3D11 texture created");

        Ok(Dx11Texture {
            texture,
            desc,
            shared,
        })
    }

    fn texture_desc(&self, texture: &Dx11Texture) -> TextureDesc {
        texture.desc
    }

    fn shared_handle(&self, texture: &Dx11Texture) -> Result<SharedHandle, InteropError> {
        texture
            .shared
            .ok_or_else(|| anyhow!("texture was not created shareable").into())
    }

    fn open_shared(&self, handle: SharedHandle) -> Result<Dx11Texture, InteropError> {
        let mut opened: Option<ID3D11Texture2D> = None;
        unsafe {
            self.device
                .OpenSharedResource(HANDLE(handle.0 as usize as *mut _), &mut opened)
        }
        .map_err(|e| {
            debug!(%handle, "OpenSharedResource failed: {e}");
            InteropError::InvalidHandle(handle)
        })?;
        let texture = opened.ok_or(InteropError::InvalidHandle(handle))?;
        let desc = texture_desc_of(&texture)?;

        Ok(Dx11Texture {
            texture,
            desc,
            shared: None,
        })
    }

    fn copy_texture(&self, dst: &Dx11Texture, src: &Dx11Texture) -> Result<(), InteropError> {
        ensure_same(dst.desc, src.desc)?;
        let ctx = self.context.lock();
        unsafe { ctx.CopyResource(&dst.texture, &src.texture) };
        Ok(())
    }

    fn blit_texture(&self, dst: &Dx11Texture, src: &Dx11Texture) -> Result<(), InteropError> {
        let mut blit = self.blit.lock();
        if blit.is_none() {
            *blit = Some(BlitPipeline::new(&self.device)?);
        }
        let pipeline = blit
            .as_ref()
            .ok_or_else(|| anyhow!("blit pipeline unavailable"))?;
        let ctx = self.context.lock();
        pipeline.draw(&self.device, &ctx, &dst.texture, dst.desc, &src.texture)?;
        Ok(())
    }

    fn create_staging(&self, desc: TextureDesc) -> Result<Dx11Staging, InteropError> {
        let d3d_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: (D3D11_CPU_ACCESS_READ.0 | D3D11_CPU_ACCESS_WRITE.0) as u32,
            MiscFlags: 0,
        };

        let mut texture = None;
        unsafe {
            self.device
                .CreateTexture2D(&d3d_desc, None, Some(&mut texture as *mut _))
        }
        .map_err(|e| InteropError::TextureCreation {
            desc,
            reason: e.to_string(),
        })?;
        let texture = texture.ok_or_else(|| InteropError::TextureCreation {
            desc,
            reason: "CreateTexture2D(staging) returned null".into(),
        })?;

        Ok(Dx11Staging { texture, desc })
    }

    fn staging_desc(&self, staging: &Dx11Staging) -> TextureDesc {
        staging.desc
    }

    fn copy_to_staging(&self, dst: &Dx11Staging, src: &Dx11Texture) -> Result<(), InteropError> {
        ensure_same(dst.desc, src.desc)?;
        let ctx = self.context.lock();
        unsafe { ctx.CopyResource(&dst.texture, &src.texture) };
        Ok(())
    }

    fn copy_from_staging(
        &self,
        dst: &Dx11Texture,
        src: &Dx11Staging,
    ) -> Result<(), InteropError> {
        ensure_same(dst.desc, src.desc)?;
        let ctx = self.context.lock();
        unsafe { ctx.CopyResource(&dst.texture, &src.texture) };
        Ok(())
    }

    fn read_staging(
        &self,
        staging: &Dx11Staging,
        read: &mut dyn FnMut(&[u8], usize),
    ) -> Result<(), InteropError> {
        let ctx = self.context.lock();
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { ctx.Map(&staging.texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
            .map_err(|e| InteropError::Map(e.to_string()))?;

        let pitch = mapped.RowPitch as usize;
        let len = pitch * staging.desc.height as usize;
        // SAFETY: a successful Map exposes RowPitch * height readable bytes
        // until the matching Unmap below.
        let bytes = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, len) };
        read(bytes, pitch);

        unsafe { ctx.Unmap(&staging.texture, 0) };
        Ok(())
    }

    fn write_staging(
        &self,
        staging: &Dx11Staging,
        write: &mut dyn FnMut(&mut [u8], usize),
    ) -> Result<(), InteropError> {
        let ctx = self.context.lock();
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { ctx.Map(&staging.texture, 0, D3D11_MAP_WRITE, 0, Some(&mut mapped)) }
            .map_err(|e| InteropError::Map(e.to_string()))?;

        let pitch = mapped.RowPitch as usize;
        let len = pitch * staging.desc.height as usize;
        // SAFETY: as in read_staging, with write access.
        let bytes = unsafe { std::slice::from_raw_parts_mut(mapped.pData as *mut u8, len) };
        write(bytes, pitch);

        unsafe { ctx.Unmap(&staging.texture, 0) };
        Ok(())
    }

    fn flush(&self) {
        let ctx = self.context.lock();
        unsafe { ctx.Flush() };
    }
}
