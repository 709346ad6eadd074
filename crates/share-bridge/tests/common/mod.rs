#![allow(dead_code)]

use std::sync::Arc;

use share_bridge::{DeviceContext, HostGraphics, ManualClock, SharedRegistry};
use share_host::CompositeMode;
use share_interop::soft::{SoftAdapter, SoftDevice, SoftTexture};
use share_interop::{GpuDevice, MemoryDirectory, PixelFormat, TextureDesc, TextureUsage};

/// One simulated machine: a software GPU, a sender table and a clock.
pub struct Machine {
    pub adapter: SoftAdapter,
    pub directory: Arc<MemoryDirectory>,
    pub registry: SharedRegistry,
    pub devices: DeviceContext<SoftDevice>,
    pub clock: Arc<ManualClock>,
}

impl Machine {
    pub fn new() -> Self {
        let adapter = SoftAdapter::new();
        let factory = adapter.clone();
        let directory = Arc::new(MemoryDirectory::new());
        Self {
            registry: SharedRegistry::new(directory.clone()),
            devices: DeviceContext::new(move || factory.create_device()),
            clock: Arc::new(ManualClock::new(0)),
            adapter,
            directory,
        }
    }

    /// A host-owned render texture filled with `texel`.
    pub fn host_texture(
        &self,
        width: u32,
        height: u32,
        texel: [u8; 4],
    ) -> (SoftDevice, SoftTexture) {
        let device = self.adapter.create_device().unwrap();
        let texture = device
            .create_texture(
                TextureDesc::new(width, height, PixelFormat::Bgra8Unorm),
                TextureUsage::Render,
            )
            .unwrap();
        texture.fill(texel);
        (device, texture)
    }
}

/// Records what the host was asked to draw.
#[derive(Default)]
pub struct RecordingHost {
    pub active: bool,
    pub parent: (u32, u32),
    pub parent_texel: [u8; 4],
    pub parent_renders: usize,
    pub draws: Vec<(u32, u32, CompositeMode, Vec<u8>)>,
}

impl RecordingHost {
    pub fn active() -> Self {
        Self {
            active: true,
            ..Default::default()
        }
    }
}

impl HostGraphics<SoftDevice> for RecordingHost {
    fn is_active(&self) -> bool {
        self.active
    }

    fn parent_size(&self) -> (u32, u32) {
        self.parent
    }

    fn render_parent(&mut self, target: &SoftTexture) -> bool {
        target.fill(self.parent_texel);
        self.parent_renders += 1;
        true
    }

    fn draw_texture(&mut self, texture: &SoftTexture, width: u32, height: u32, mode: CompositeMode) {
        self.draws.push((width, height, mode, texture.texels()));
    }
}
