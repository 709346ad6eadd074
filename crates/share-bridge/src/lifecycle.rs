//! Host lifecycle contract.
//!
//! The host drives every bridge through the same small set of callbacks:
//! construction, `update`, `tick`, `video_render`, `raw_video`, the
//! offscreen pass, `start`/`stop` and destruction. [`BridgeLifecycle`] is
//! that callback table; [`Bridge`] dispatches it over the three roles.

use share_host::{CompositeMode, RawFrame, SettingsData};
use share_interop::GpuDevice;

use crate::adapters::{FilterAdapter, OutputAdapter, SourceAdapter};
use crate::error::BridgeError;

/// Graphics services the host provides during render callbacks.
pub trait HostGraphics<D: GpuDevice> {
    /// Whether the surface owning the bridge is shown on an active output.
    fn is_active(&self) -> bool;

    /// Size of the filter's parent source; `(0, 0)` when unknown.
    fn parent_size(&self) -> (u32, u32) {
        (0, 0)
    }

    /// Render the filter's parent source into `target`. Returns `false` if
    /// the host skipped rendering this frame.
    fn render_parent(&mut self, _target: &D::Texture) -> bool {
        false
    }

    /// Draw `texture` at `width` x `height` with the given composite mode.
    fn draw_texture(&mut self, texture: &D::Texture, width: u32, height: u32, mode: CompositeMode);
}

pub trait BridgeLifecycle<D: GpuDevice> {
    fn update(&mut self, settings: &SettingsData);

    fn tick(&mut self, _delta_seconds: f32) {}

    fn video_render(&mut self, host: &mut dyn HostGraphics<D>);

    /// Main-loop offscreen pass, after all scenes were drawn.
    fn offscreen_render(&mut self, _host: &mut dyn HostGraphics<D>) {}

    fn raw_video(&mut self, _frame: &RawFrame<'_>) {}

    fn start(&mut self) -> Result<(), BridgeError>;

    fn stop(&mut self);
}

/// The three bridge roles.
pub enum Bridge<D: GpuDevice> {
    Sender(OutputAdapter<D>),
    Receiver(SourceAdapter<D>),
    Filter(FilterAdapter<D>),
}

impl<D: GpuDevice> Bridge<D> {
    fn as_lifecycle(&mut self) -> &mut dyn BridgeLifecycle<D> {
        match self {
            Self::Sender(output) => output as &mut dyn BridgeLifecycle<D>,
            Self::Receiver(source) => source as &mut dyn BridgeLifecycle<D>,
            Self::Filter(filter) => filter as &mut dyn BridgeLifecycle<D>,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::Sender(_) => "sender",
            Self::Receiver(_) => "receiver",
            Self::Filter(_) => "filter",
        }
    }
}

impl<D: GpuDevice> BridgeLifecycle<D> for Bridge<D> {
    fn update(&mut self, settings: &SettingsData) {
        self.as_lifecycle().update(settings)
    }

    fn tick(&mut self, delta_seconds: f32) {
        self.as_lifecycle().tick(delta_seconds)
    }

    fn video_render(&mut self, host: &mut dyn HostGraphics<D>) {
        self.as_lifecycle().video_render(host)
    }

    fn offscreen_render(&mut self, host: &mut dyn HostGraphics<D>) {
        self.as_lifecycle().offscreen_render(host)
    }

    fn raw_video(&mut self, frame: &RawFrame<'_>) {
        self.as_lifecycle().raw_video(frame)
    }

    fn start(&mut self) -> Result<(), BridgeError> {
        self.as_lifecycle().start()
    }

    fn stop(&mut self) {
        self.as_lifecycle().stop()
    }
}
