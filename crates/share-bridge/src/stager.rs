//! Frame staging between host textures, CPU buffers and shared textures.
//!
//! Two render textures alternate as "current" (written this frame) and
//! "previous" (handed to the protocol). The texture being written is never
//! the one being sent, which costs one frame of latency. A freshly created
//! pair yields nothing on its first frame.

use share_host::{RawFrame, VideoFormat};
use share_interop::{
    copy_row_prefix, GpuDevice, InteropError, PixelFormat, SenderInfo, TextureDesc, TextureUsage,
};
use tracing::debug;

use crate::context::DeviceLease;

/// A staged texture ready for the protocol.
pub struct StagedTexture<'a, D: GpuDevice> {
    pub texture: &'a D::Texture,
    pub desc: TextureDesc,
}

pub struct FrameStager<D: GpuDevice> {
    // Textures before the lease, so they are released first.
    slots: [Option<D::Texture>; 2],
    filled: [bool; 2],
    current: usize,
    staging: Option<D::Staging>,
    desc: Option<TextureDesc>,
    format: PixelFormat,
    device: DeviceLease<D>,
}

impl<D: GpuDevice> FrameStager<D> {
    /// A stager producing textures in `format`.
    pub fn new(device: DeviceLease<D>, format: PixelFormat) -> Self {
        Self {
            slots: [None, None],
            filled: [false; 2],
            current: 0,
            staging: None,
            desc: None,
            format,
            device,
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Geometry of the current pair, if any.
    pub fn dimensions(&self) -> Option<TextureDesc> {
        self.desc
    }

    /// Recreate the texture pair if the geometry changed.
    pub fn ensure_dimensions(&mut self, width: u32, height: u32) -> Result<(), InteropError> {
        let desc = TextureDesc::new(width, height, self.format);
        if self.desc == Some(desc) && self.slots.iter().all(Option::is_some) {
            return Ok(());
        }

        self.destroy_slots();
        debug!(%desc, "creating staging pair");
        for slot in &mut self.slots {
            match self.device.create_texture(desc, TextureUsage::Render) {
                Ok(texture) => *slot = Some(texture),
                Err(e) => {
                    self.destroy_slots();
                    return Err(e);
                }
            }
        }
        self.desc = Some(desc);
        Ok(())
    }

    fn destroy_slots(&mut self) {
        self.slots = [None, None];
        self.filled = [false; 2];
        self.current = 0;
        self.staging = None;
        self.desc = None;
    }

    /// Release every texture. The next frame recreates them.
    pub fn cleanup(&mut self) {
        if self.desc.is_some() {
            debug!("releasing staging pair");
        }
        self.destroy_slots();
    }

    /// Mark the current slot written and swap. Returns the slot to send, if
    /// it holds a frame.
    fn swap(&mut self) -> Option<usize> {
        let written = self.current;
        self.filled[written] = true;
        let previous = 1 - written;
        self.current = previous;
        self.filled[previous].then_some(previous)
    }

    fn staged(&self, index: Option<usize>) -> Option<StagedTexture<'_, D>> {
        let index = index?;
        let texture = self.slots[index].as_ref()?;
        let desc = self.desc?;
        Some(StagedTexture { texture, desc })
    }

    /// The texture the last stage call handed out, until the next one.
    pub fn ready_texture(&self) -> Option<StagedTexture<'_, D>> {
        let previous = self.current;
        self.filled[previous]
            .then_some(previous)
            .and_then(|index| self.staged(Some(index)))
    }

    /// Make sure the staging surface is exactly `desc`, reusing it when
    /// possible.
    fn prepare_staging(&mut self, desc: TextureDesc) -> Result<(), InteropError> {
        let reusable = self
            .staging
            .as_ref()
            .is_some_and(|s| self.device.staging_desc(s) == desc);
        if !reusable {
            self.staging = Some(self.device.create_staging(desc)?);
        }
        Ok(())
    }

    fn staging_surface(&self) -> Result<&D::Staging, InteropError> {
        self.staging
            .as_ref()
            .ok_or_else(|| InteropError::Map("staging surface missing".into()))
    }

    fn write_slot(&self) -> Result<&D::Texture, InteropError> {
        self.slots[self.current]
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("staging pair not allocated").into())
    }

    /// Stage a rendered frame for sending.
    ///
    /// Same size and format copies directly; anything else goes through the
    /// device's blit. A zero dimension does nothing and returns `None`.
    pub fn stage_for_send(
        &mut self,
        source: &D::Texture,
        width: u32,
        height: u32,
    ) -> Result<Option<StagedTexture<'_, D>>, InteropError> {
        if width == 0 || height == 0 {
            return Ok(None);
        }
        self.ensure_dimensions(width, height)?;

        let target = self.write_slot()?;
        let target_desc = self.device.texture_desc(target);
        if self.device.texture_desc(source) == target_desc {
            self.device.copy_texture(target, source)?;
        } else {
            self.device.blit_texture(target, source)?;
        }

        let index = self.swap();
        Ok(self.staged(index))
    }

    /// Stage a CPU frame from the host's raw video path.
    pub fn stage_raw_upload(
        &mut self,
        frame: &RawFrame<'_>,
    ) -> Result<Option<StagedTexture<'_, D>>, InteropError> {
        if frame.is_empty() {
            return Ok(None);
        }
        let format = match frame.format {
            VideoFormat::Bgra => PixelFormat::Bgra8Unorm,
            VideoFormat::Bgrx => PixelFormat::Bgrx8Unorm,
            VideoFormat::Rgba => PixelFormat::Rgba8Unorm,
            VideoFormat::Other => return Err(InteropError::UnsupportedFormat(0)),
        };
        if format != self.format {
            return Err(InteropError::UnsupportedFormat(format.dxgi()));
        }
        self.ensure_dimensions(frame.width, frame.height)?;

        self.prepare_staging(TextureDesc::new(frame.width, frame.height, self.format))?;
        let staging = self.staging_surface()?;

        let height = frame.height as usize;
        let row_bytes = frame.width as usize * self.format.bytes_per_pixel();
        self.device.write_staging(staging, &mut |dst, pitch| {
            copy_row_prefix(frame.data, frame.linesize, dst, pitch, row_bytes, height);
        })?;
        let target = self.write_slot()?;
        self.device.copy_from_staging(target, staging)?;

        let index = self.swap();
        Ok(self.staged(index))
    }

    /// Read a GPU texture back into `dst`, a buffer of `dst_linesize` bytes
    /// per row. Copies at most one texture row (never the staging pitch's
    /// padding) into every row that fits in `dst` and returns the bytes
    /// copied.
    pub fn stage_raw_copy(
        &mut self,
        source: &D::Texture,
        dst: &mut [u8],
        dst_linesize: usize,
    ) -> Result<usize, InteropError> {
        let desc = self.device.texture_desc(source);
        self.prepare_staging(desc)?;
        let staging = self.staging_surface()?;
        self.device.copy_to_staging(staging, source)?;

        let height = desc.height as usize;
        let row_bytes = desc.row_bytes();
        let mut copied = 0;
        self.device.read_staging(staging, &mut |src, pitch| {
            copied = copy_row_prefix(src, pitch, dst, dst_linesize, row_bytes, height);
        })?;
        Ok(copied)
    }
}

/// Open a published sender's texture on `device`. Zero-copy: the result
/// aliases the sender's texels.
///
/// Fails if the handle no longer resolves or the opened texture's geometry
/// does not match what the protocol advertised.
pub fn stage_for_receive<D: GpuDevice>(
    device: &D,
    info: &SenderInfo,
) -> Result<D::Texture, InteropError> {
    let texture = device.open_shared(info.handle)?;
    let desc = device.texture_desc(&texture);
    if desc.width != info.width || desc.height != info.height || desc.format.dxgi() != info.format
    {
        let advertised = PixelFormat::from_dxgi(info.format)
            .ok_or(InteropError::UnsupportedFormat(info.format))?;
        return Err(InteropError::Mismatch {
            dst: TextureDesc::new(info.width, info.height, advertised),
            src: desc,
        });
    }
    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceContext;
    use share_interop::soft::{SoftAdapter, SoftDevice, SoftTexture};
    use share_interop::SharedHandle;

    fn stager(adapter: &SoftAdapter) -> FrameStager<SoftDevice> {
        let adapter = adapter.clone();
        let ctx = DeviceContext::new(move || adapter.create_device());
        FrameStager::new(ctx.acquire().unwrap(), PixelFormat::Bgra8Unorm)
    }

    fn source(stager: &FrameStager<SoftDevice>, desc: TextureDesc, texel: [u8; 4]) -> SoftTexture {
        let texture = stager
            .device
            .create_texture(desc, TextureUsage::Render)
            .unwrap();
        texture.fill(texel);
        texture
    }

    #[test]
    fn first_frame_after_creation_yields_nothing() {
        let adapter = SoftAdapter::new();
        let mut stager = stager(&adapter);
        let desc = TextureDesc::new(4, 2, PixelFormat::Bgra8Unorm);
        let first = source(&stager, desc, [1, 1, 1, 1]);
        let second = source(&stager, desc, [2, 2, 2, 2]);

        assert!(stager.stage_for_send(&first, 4, 2).unwrap().is_none());
        let staged = stager.stage_for_send(&second, 4, 2).unwrap().unwrap();
        assert_eq!(staged.desc, desc);
        assert!(staged.texture.texels().iter().all(|&b| b == 1));

        let ready = stager.ready_texture().unwrap();
        assert!(ready.texture.texels().iter().all(|&b| b == 1));
    }

    #[test]
    fn zero_dimension_is_a_no_op() {
        let adapter = SoftAdapter::new();
        let mut stager = stager(&adapter);
        let src = source(
            &stager,
            TextureDesc::new(4, 4, PixelFormat::Bgra8Unorm),
            [0; 4],
        );
        assert!(stager.stage_for_send(&src, 0, 4).unwrap().is_none());
        assert!(stager.stage_for_send(&src, 4, 0).unwrap().is_none());
        assert_eq!(stager.dimensions(), None);
        assert_eq!(adapter.live_textures(), 1);
    }

    #[test]
    fn resize_recreates_pair_and_restarts_latency() {
        let adapter = SoftAdapter::new();
        let mut stager = stager(&adapter);
        let small = source(&stager, TextureDesc::new(2, 2, PixelFormat::Bgra8Unorm), [0; 4]);
        let large = source(&stager, TextureDesc::new(8, 8, PixelFormat::Bgra8Unorm), [0; 4]);

        stager.stage_for_send(&small, 2, 2).unwrap();
        assert!(stager.stage_for_send(&small, 2, 2).unwrap().is_some());
        assert!(stager.stage_for_send(&large, 8, 8).unwrap().is_none());
        assert_eq!(stager.dimensions().map(|d| d.width), Some(8));
        // Two sources plus the new pair.
        assert_eq!(adapter.live_textures(), 4);
    }

    #[test]
    fn mismatched_source_is_converted() {
        let adapter = SoftAdapter::new();
        let mut stager = stager(&adapter);
        let rgba = source(
            &stager,
            TextureDesc::new(2, 2, PixelFormat::Rgba8Unorm),
            [10, 20, 30, 40],
        );
        stager.stage_for_send(&rgba, 4, 4).unwrap();
        let staged = stager.stage_for_send(&rgba, 4, 4).unwrap().unwrap();
        assert_eq!(staged.desc.width, 4);
        assert!(staged
            .texture
            .texels()
            .chunks_exact(4)
            .all(|t| t == [30, 20, 10, 40]));
    }

    #[test]
    fn raw_upload_honours_linesize() {
        let adapter = SoftAdapter::new();
        let mut stager = stager(&adapter);
        // 2x2 frame with 4 bytes of row padding.
        let data = [
            1, 2, 3, 4, 5, 6, 7, 8, 0xEE, 0xEE, 0xEE, 0xEE, //
            9, 10, 11, 12, 13, 14, 15, 16, 0xEE, 0xEE, 0xEE, 0xEE,
        ];
        let frame = RawFrame::new(&data, 12, 2, 2);
        assert!(stager.stage_raw_upload(&frame).unwrap().is_none());
        let staged = stager.stage_raw_upload(&frame).unwrap().unwrap();
        assert_eq!(staged.texture.texels(), (1..=16).collect::<Vec<u8>>());
    }

    #[test]
    fn raw_upload_rejects_foreign_layouts() {
        let adapter = SoftAdapter::new();
        let mut stager = stager(&adapter);
        let data = [0u8; 16];
        let frame = RawFrame::new(&data, 8, 2, 2).with_format(VideoFormat::Rgba);
        assert!(matches!(
            stager.stage_raw_upload(&frame),
            Err(InteropError::UnsupportedFormat(28))
        ));
    }

    #[test]
    fn raw_copy_is_bounded_by_both_linesizes() {
        let adapter = SoftAdapter::new();
        let mut stager = stager(&adapter);
        let desc = TextureDesc::new(3, 2, PixelFormat::Bgra8Unorm);
        let src = source(&stager, desc, [0; 4]);
        src.write_texels(&(0..24).collect::<Vec<u8>>());

        // Narrower than a row: 8 bytes of each row.
        let mut narrow = vec![0xAA; 8 * 2];
        assert_eq!(stager.stage_raw_copy(&src, &mut narrow, 8).unwrap(), 16);
        assert_eq!(&narrow[..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(&narrow[8..], &[12, 13, 14, 15, 16, 17, 18, 19]);

        // Exactly one row.
        let mut exact = vec![0; 12 * 2];
        assert_eq!(stager.stage_raw_copy(&src, &mut exact, 12).unwrap(), 24);
        assert_eq!(exact, (0..24).collect::<Vec<u8>>());
    }

    #[test]
    fn cleanup_releases_everything() {
        let adapter = SoftAdapter::new();
        let mut stager = stager(&adapter);
        let data = [0u8; 16];
        stager.stage_raw_upload(&RawFrame::new(&data, 8, 2, 2)).unwrap();
        assert_eq!(adapter.live_textures(), 2);
        assert_eq!(adapter.live_staging(), 1);
        stager.cleanup();
        assert_eq!(adapter.live_textures(), 0);
        assert_eq!(adapter.live_staging(), 0);
        drop(stager);
        assert_eq!(adapter.live_devices(), 0);
    }

    #[test]
    fn receive_checks_advertised_geometry() {
        let adapter = SoftAdapter::new();
        let device = adapter.create_device().unwrap();
        let desc = TextureDesc::new(8, 6, PixelFormat::Bgra8Unorm);
        let shared = device.create_texture(desc, TextureUsage::Shared).unwrap();
        let handle = device.shared_handle(&shared).unwrap();

        let info = SenderInfo {
            width: 8,
            height: 6,
            handle,
            format: 87,
        };
        assert!(stage_for_receive(&device, &info).is_ok());

        let stale = SenderInfo { width: 16, ..info };
        assert!(matches!(
            stage_for_receive(&device, &stale),
            Err(InteropError::Mismatch { .. })
        ));

        let gone = SenderInfo {
            handle: SharedHandle(9999),
            ..info
        };
        assert!(matches!(
            stage_for_receive(&device, &gone),
            Err(InteropError::InvalidHandle(_))
        ));
    }
}
