//! Glue between host callbacks and the bridges.

use std::sync::Arc;

use share_host::keys::{USE_FIRST_AVAILABLE, USE_FIRST_AVAILABLE_LABEL};
use share_host::{
    FilterSettings, OutputSettings, RawFrame, ReceiverSettings, SettingsData,
};
use share_interop::GpuDevice;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::context::DeviceContext;
use crate::error::BridgeError;
use crate::filter::FilterBridge;
use crate::lifecycle::{BridgeLifecycle, HostGraphics};
use crate::receiver::ReceiverBridge;
use crate::registry::SharedRegistry;
use crate::sender::SenderBridge;

/// One entry of the receiver's sender drop-down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderChoice {
    pub label: String,
    pub value: String,
}

/// Choices for the receiver's sender list: "use first available" first,
/// then every published name.
pub fn sender_choices(registry: &SharedRegistry) -> Vec<SenderChoice> {
    let first = SenderChoice {
        label: USE_FIRST_AVAILABLE_LABEL.to_owned(),
        value: USE_FIRST_AVAILABLE.to_owned(),
    };
    std::iter::once(first)
        .chain(registry.enumerate_senders().map(|name| SenderChoice {
            label: name.clone(),
            value: name,
        }))
        .collect()
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Publishes the host's program output from its raw video path.
pub struct OutputAdapter<D: GpuDevice> {
    sender: Arc<SenderBridge<D>>,
    settings: OutputSettings,
}

impl<D: GpuDevice> OutputAdapter<D> {
    pub fn create(
        settings: &SettingsData,
        devices: DeviceContext<D>,
        registry: SharedRegistry,
    ) -> Self {
        share_host::logging::init();
        let mut output = Self {
            sender: Arc::new(SenderBridge::new(devices, registry)),
            settings: OutputSettings::from_settings(settings),
        };
        if output.settings.auto_start {
            if let Err(err) = output.start() {
                error!(error = %err, "output auto-start failed");
            }
        }
        output
    }

    /// The sender, for delivering frames from the host's capture thread.
    pub fn sender(&self) -> Arc<SenderBridge<D>> {
        Arc::clone(&self.sender)
    }

    pub fn settings(&self) -> &OutputSettings {
        &self.settings
    }

    /// Persist name and auto-start for the next session.
    pub fn save(&self, settings: &mut SettingsData) {
        self.settings.save(settings);
    }
}

impl<D: GpuDevice> BridgeLifecycle<D> for OutputAdapter<D> {
    fn update(&mut self, settings: &SettingsData) {
        let next = OutputSettings::from_settings(settings);
        if next.sender_name != self.settings.sender_name && self.sender.is_running() {
            if let Err(err) = self.sender.rename(&next.sender_name) {
                warn!(error = %err, "output rename rejected");
                return;
            }
        }
        self.settings = next;
    }

    /// Frames arrive on the raw video path; nothing to do per render.
    fn video_render(&mut self, _host: &mut dyn HostGraphics<D>) {}

    fn raw_video(&mut self, frame: &RawFrame<'_>) {
        self.sender.on_raw_frame(frame);
    }

    fn start(&mut self) -> Result<(), BridgeError> {
        self.sender.start(&self.settings.sender_name)?;
        info!(name = %self.settings.sender_name, "output started");
        Ok(())
    }

    fn stop(&mut self) {
        self.sender.stop();
    }
}

impl<D: GpuDevice> Drop for OutputAdapter<D> {
    fn drop(&mut self) {
        self.sender.stop();
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Shows a received texture as a host source.
pub struct SourceAdapter<D: GpuDevice> {
    receiver: ReceiverBridge<D>,
}

impl<D: GpuDevice> SourceAdapter<D> {
    pub fn create(
        settings: &SettingsData,
        devices: DeviceContext<D>,
        registry: SharedRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        share_host::logging::init();
        let receiver = ReceiverBridge::new(
            devices,
            registry,
            &ReceiverSettings::from_settings(settings),
            clock,
        );
        Self { receiver }
    }

    pub fn properties(&self) -> Vec<SenderChoice> {
        sender_choices(self.receiver.registry())
    }

    pub fn width(&self) -> u32 {
        self.receiver.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.receiver.dimensions().1
    }

    pub fn show(&mut self) {
        self.receiver.show();
    }

    pub fn hide(&mut self) {
        self.receiver.hide();
    }

    pub fn receiver(&self) -> &ReceiverBridge<D> {
        &self.receiver
    }
}

impl<D: GpuDevice> BridgeLifecycle<D> for SourceAdapter<D> {
    fn update(&mut self, settings: &SettingsData) {
        self.receiver
            .update(&ReceiverSettings::from_settings(settings));
    }

    fn tick(&mut self, _delta_seconds: f32) {
        self.receiver.tick();
    }

    fn video_render(&mut self, host: &mut dyn HostGraphics<D>) {
        self.receiver.draw(host);
    }

    fn start(&mut self) -> Result<(), BridgeError> {
        self.receiver.show();
        Ok(())
    }

    fn stop(&mut self) {
        self.receiver.hide();
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Publishes a filter's parent source. Starts sending as soon as it exists.
pub struct FilterAdapter<D: GpuDevice> {
    filter: FilterBridge<D>,
    settings: FilterSettings,
}

impl<D: GpuDevice> FilterAdapter<D> {
    pub fn create(
        settings: &SettingsData,
        devices: DeviceContext<D>,
        registry: SharedRegistry,
    ) -> Self {
        share_host::logging::init();
        let mut adapter = Self {
            filter: FilterBridge::new(devices, registry),
            settings: FilterSettings::from_settings(settings),
        };
        if let Err(err) = adapter.start() {
            error!(error = %err, name = %adapter.settings.sender_name, "filter failed to start");
        }
        adapter
    }

    pub fn filter(&self) -> &FilterBridge<D> {
        &self.filter
    }
}

impl<D: GpuDevice> BridgeLifecycle<D> for FilterAdapter<D> {
    fn update(&mut self, settings: &SettingsData) {
        let next = FilterSettings::from_settings(settings);
        if next.sender_name != self.settings.sender_name {
            if let Err(err) = self.filter.rename(&next.sender_name) {
                warn!(error = %err, "filter rename rejected");
                return;
            }
        }
        self.settings = next;
    }

    fn video_render(&mut self, _host: &mut dyn HostGraphics<D>) {
        self.filter.mark_active();
    }

    fn offscreen_render(&mut self, host: &mut dyn HostGraphics<D>) {
        self.filter.render(host);
    }

    fn start(&mut self) -> Result<(), BridgeError> {
        self.filter.start(&self.settings.sender_name)
    }

    fn stop(&mut self) {
        self.filter.stop();
    }
}
