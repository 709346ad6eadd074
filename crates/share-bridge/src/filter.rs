//! Publishing the output of a filter's parent source.
//!
//! The host draws the filter as part of a scene (`mark_active`), and later,
//! in its offscreen pass, the filter renders the parent into an intermediate
//! texture and hands it to a [`SenderBridge`]. Only filters drawn since the
//! previous offscreen pass send anything, so hidden scenes cost nothing.

use std::sync::atomic::{AtomicBool, Ordering};

use share_interop::{GpuDevice, PixelFormat, TextureDesc, TextureUsage};
use tracing::{debug, info, warn};

use crate::context::{DeviceContext, DeviceLease};
use crate::error::BridgeError;
use crate::lifecycle::HostGraphics;
use crate::registry::SharedRegistry;
use crate::sender::{FrameOutcome, SenderBridge};

pub struct FilterBridge<D: GpuDevice> {
    // Intermediate before the lease, so it is released first.
    intermediate: Option<D::Texture>,
    device: Option<DeviceLease<D>>,
    sender: SenderBridge<D>,
    intermediate_format: PixelFormat,
    active: AtomicBool,
    /// Name to publish under; `None` once stopped.
    name: Option<String>,
    start_failing: bool,
}

impl<D: GpuDevice> FilterBridge<D> {
    pub fn new(devices: DeviceContext<D>, registry: SharedRegistry) -> Self {
        Self {
            intermediate: None,
            device: None,
            sender: SenderBridge::new(devices, registry),
            intermediate_format: PixelFormat::Bgra8Unorm,
            active: AtomicBool::new(false),
            name: None,
            start_failing: false,
        }
    }

    /// Format the host renders the parent in. Anything other than the sender
    /// format goes through a blit.
    pub fn with_intermediate_format(mut self, format: PixelFormat) -> Self {
        self.intermediate_format = format;
        self
    }

    /// Start publishing under `name`. If no device is available yet, the
    /// name is kept and every drawn offscreen pass tries again.
    pub fn start(&mut self, name: &str) -> Result<(), BridgeError> {
        let result = self.sender.start(name);
        match &result {
            Err(BridgeError::InvalidName(_)) => {}
            Err(_) => {
                self.name = Some(name.to_owned());
                self.start_failing = true;
            }
            Ok(()) => {
                self.name = Some(name.to_owned());
                self.start_failing = false;
            }
        }
        result
    }

    pub fn stop(&mut self) {
        self.name = None;
        self.start_failing = false;
        self.sender.stop();
        self.intermediate = None;
        self.device = None;
        self.active.store(false, Ordering::Release);
    }

    pub fn rename(&mut self, name: &str) -> Result<(), BridgeError> {
        self.sender.rename(name)?;
        if self.name.is_some() {
            self.name = Some(name.to_owned());
        }
        Ok(())
    }

    /// The host drew this filter in a visible scene.
    pub fn mark_active(&self) {
        self.active.store(true, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Offscreen pass: render the parent and publish it, if the filter was
    /// drawn since the last pass.
    pub fn render(&mut self, host: &mut dyn HostGraphics<D>) -> FrameOutcome {
        if !self.active.swap(false, Ordering::AcqRel) || !self.ensure_started() {
            return FrameOutcome::Skipped;
        }
        let (width, height) = host.parent_size();
        if width == 0 || height == 0 {
            return FrameOutcome::Skipped;
        }

        if let Err(err) = self.ensure_intermediate(width, height) {
            warn!(error = %err, "filter could not prepare its render target");
            return FrameOutcome::Dropped;
        }
        let Some(target) = self.intermediate.as_ref() else {
            return FrameOutcome::Dropped;
        };

        // Host rendering happens outside the sender's lock.
        if !host.render_parent(target) {
            return FrameOutcome::Skipped;
        }
        self.sender.on_frame(target, width, height)
    }

    /// Retry a start that failed earlier. Logs only when the outcome changes.
    fn ensure_started(&mut self) -> bool {
        if self.sender.is_running() {
            return true;
        }
        let Some(name) = self.name.as_deref() else {
            return false;
        };
        match self.sender.start(name) {
            Ok(()) => {
                if self.start_failing {
                    info!(name, "filter sender started after earlier failure");
                }
                self.start_failing = false;
                true
            }
            Err(err) => {
                if !self.start_failing {
                    warn!(name, error = %err, "filter sender cannot start, retrying each pass");
                }
                self.start_failing = true;
                false
            }
        }
    }

    fn ensure_intermediate(&mut self, width: u32, height: u32) -> Result<(), BridgeError> {
        if self.device.is_none() {
            self.device = Some(self.sender.devices().acquire()?);
        }
        let Some(device) = self.device.as_ref() else {
            return Ok(());
        };

        let desc = TextureDesc::new(width, height, self.intermediate_format);
        let current = self.intermediate.as_ref().map(|t| device.texture_desc(t));
        if current != Some(desc) {
            self.intermediate = None;
            self.intermediate = Some(device.create_texture(desc, TextureUsage::Render)?);
            debug!(%desc, "filter render target created");
        }
        Ok(())
    }

    pub fn sender(&self) -> &SenderBridge<D> {
        &self.sender
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use share_host::CompositeMode;
    use share_interop::soft::{SoftAdapter, SoftDevice, SoftTexture};
    use share_interop::{MemoryDirectory, SenderDirectory};

    struct Parent {
        size: (u32, u32),
        texel: [u8; 4],
    }

    impl HostGraphics<SoftDevice> for Parent {
        fn is_active(&self) -> bool {
            true
        }

        fn parent_size(&self) -> (u32, u32) {
            self.size
        }

        fn render_parent(&mut self, target: &SoftTexture) -> bool {
            target.fill(self.texel);
            true
        }

        fn draw_texture(&mut self, _: &SoftTexture, _: u32, _: u32, _: CompositeMode) {}
    }

    fn filter(adapter: &SoftAdapter, directory: &Arc<MemoryDirectory>) -> FilterBridge<SoftDevice> {
        let factory = adapter.clone();
        FilterBridge::new(
            DeviceContext::new(move || factory.create_device()),
            SharedRegistry::new(directory.clone()),
        )
    }

    fn pass(filter: &mut FilterBridge<SoftDevice>, parent: &mut Parent) -> FrameOutcome {
        filter.mark_active();
        filter.render(parent)
    }

    #[test]
    fn start_is_retried_once_a_device_appears() {
        let adapter = SoftAdapter::new();
        let directory = Arc::new(MemoryDirectory::new());
        let mut filter = filter(&adapter, &directory);
        let mut parent = Parent {
            size: (8, 8),
            texel: [0; 4],
        };

        adapter.set_available(false);
        assert!(matches!(filter.start("F"), Err(BridgeError::NoDevice(_))));
        assert_eq!(pass(&mut filter, &mut parent), FrameOutcome::Skipped);
        assert!(!filter.sender().is_running());

        adapter.set_available(true);
        assert_eq!(pass(&mut filter, &mut parent), FrameOutcome::Primed);
        assert_eq!(pass(&mut filter, &mut parent), FrameOutcome::Sent);
        assert!(directory.sender_info("F").is_some());
    }

    #[test]
    fn stopped_filter_does_not_restart() {
        let adapter = SoftAdapter::new();
        let directory = Arc::new(MemoryDirectory::new());
        let mut filter = filter(&adapter, &directory);
        let mut parent = Parent {
            size: (8, 8),
            texel: [0; 4],
        };

        filter.start("F").unwrap();
        filter.stop();
        assert_eq!(pass(&mut filter, &mut parent), FrameOutcome::Skipped);
        assert!(!filter.sender().is_running());
        assert!(!filter.is_active());
    }

    #[test]
    fn intermediate_in_another_format_is_converted() {
        let adapter = SoftAdapter::new();
        let directory = Arc::new(MemoryDirectory::new());
        let mut filter =
            filter(&adapter, &directory).with_intermediate_format(PixelFormat::Rgba8Unorm);
        let mut parent = Parent {
            size: (4, 4),
            texel: [10, 20, 30, 40],
        };

        filter.start("F").unwrap();
        pass(&mut filter, &mut parent);
        assert_eq!(pass(&mut filter, &mut parent), FrameOutcome::Sent);

        let info = directory.sender_info("F").unwrap();
        assert_eq!(info.format, PixelFormat::Bgra8Unorm.dxgi());
        let device = adapter.create_device().unwrap();
        let shared = device.open_shared(info.handle).unwrap();
        assert_eq!(&shared.texels()[..4], &[30, 20, 10, 40]);
    }
}
