//! Consuming a shared texture published by another process.
//!
//! State machine: `Uninitialized -> Resolved -> Uninitialized`. While
//! unresolved, attempts are throttled to one per poll interval unless forced.
//! Every failure category is a state, and a log line fires only on entering
//! a state, never on each poll.

use std::fmt;
use std::sync::Arc;

use share_host::keys::{DEFAULT_SOURCE_HEIGHT, DEFAULT_SOURCE_WIDTH};
use share_host::{CompositeMode, ReceiverSettings};
use share_interop::{GpuDevice, SenderInfo};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::context::{DeviceContext, DeviceLease};
use crate::lifecycle::HostGraphics;
use crate::registry::SharedRegistry;
use crate::stager::stage_for_receive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderSelection {
    FirstAvailable,
    Named(String),
}

impl From<&ReceiverSettings> for SenderSelection {
    fn from(settings: &ReceiverSettings) -> Self {
        match &settings.sender {
            Some(name) => Self::Named(name.clone()),
            None => Self::FirstAvailable,
        }
    }
}

impl fmt::Display for SenderSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstAvailable => f.write_str("<first available>"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Why a receiver has no texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// Not attempted since creation or the last release.
    Pending,
    DeviceAbsent,
    NoSenders,
    /// The sender was listed but could not be read or opened.
    StaleName,
    CannotSetActive,
    NameNotFound,
    /// The resolved sender changed geometry or went away.
    SenderChanged,
}

impl Unresolved {
    /// Numeric status code, stable across releases for diagnostics.
    pub fn code(self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::DeviceAbsent => -1,
            Self::NoSenders => -2,
            Self::StaleName => -3,
            Self::CannotSetActive => -4,
            Self::NameNotFound => -5,
            Self::SenderChanged => -6,
        }
    }
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "waiting to resolve",
            Self::DeviceAbsent => "no GPU device",
            Self::NoSenders => "no senders available",
            Self::StaleName => "sender could not be opened",
            Self::CannotSetActive => "could not make sender active",
            Self::NameNotFound => "selected sender not found",
            Self::SenderChanged => "sender changed or stopped",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Uninitialized(Unresolved),
    Resolved,
}

/// Outcome of the last draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawState {
    NotDrawn,
    Inactive,
    Uninitialized,
    Drawing,
}

struct Resolved<D: GpuDevice> {
    name: String,
    info: SenderInfo,
    texture: D::Texture,
}

pub struct ReceiverBridge<D: GpuDevice> {
    // Texture before the lease, so it is released first.
    resolved: Option<Resolved<D>>,
    device: Option<DeviceLease<D>>,
    devices: DeviceContext<D>,
    registry: SharedRegistry,
    clock: Arc<dyn Clock>,
    selection: SenderSelection,
    poll_interval_ms: u64,
    composite: CompositeMode,
    last_attempt: Option<u64>,
    state: ReceiverState,
    draw_state: DrawState,
    size: (u32, u32),
    status_changes: u64,
    /// Cleared by `hide`; a hidden receiver does not poll.
    visible: bool,
}

impl<D: GpuDevice> ReceiverBridge<D> {
    pub fn new(
        devices: DeviceContext<D>,
        registry: SharedRegistry,
        settings: &ReceiverSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolved: None,
            device: None,
            devices,
            registry,
            clock,
            selection: SenderSelection::from(settings),
            poll_interval_ms: settings.poll.millis(),
            composite: settings.composite,
            last_attempt: None,
            state: ReceiverState::Uninitialized(Unresolved::Pending),
            draw_state: DrawState::NotDrawn,
            size: (DEFAULT_SOURCE_WIDTH, DEFAULT_SOURCE_HEIGHT),
            status_changes: 0,
            visible: true,
        }
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Try to open the selected sender. Returns whether the receiver is
    /// initialized afterwards.
    ///
    /// Unforced calls inside the poll interval of the previous attempt do
    /// nothing, not even a registry query.
    pub fn resolve(&mut self, forced: bool) -> bool {
        if self.resolved.is_some() {
            return true;
        }
        let now = self.clock.now_ms();
        if !forced {
            if let Some(last) = self.last_attempt {
                if now.saturating_sub(last) < self.poll_interval_ms {
                    return false;
                }
            }
        }
        self.last_attempt = Some(now);

        match self.try_resolve() {
            Ok(resolved) => {
                self.size = (resolved.info.width, resolved.info.height);
                self.resolved = Some(resolved);
                self.enter(ReceiverState::Resolved);
                true
            }
            Err(reason) => {
                self.enter(ReceiverState::Uninitialized(reason));
                false
            }
        }
    }

    fn try_resolve(&mut self) -> Result<Resolved<D>, Unresolved> {
        if self.device.is_none() {
            let lease = self.devices.acquire().map_err(|e| {
                debug!(error = %e, "receiver could not acquire a device");
                Unresolved::DeviceAbsent
            })?;
            self.device = Some(lease);
        }

        let mut names = self.registry.enumerate_senders();
        let name = match &self.selection {
            SenderSelection::FirstAvailable => {
                if names.len() == 0 {
                    return Err(Unresolved::NoSenders);
                }
                let first = self
                    .registry
                    .get_first_sender_name()
                    .ok_or(Unresolved::StaleName)?;
                if !self.registry.set_active_sender(&first) {
                    return Err(Unresolved::CannotSetActive);
                }
                first
            }
            SenderSelection::Named(wanted) => {
                if names.len() == 0 {
                    return Err(Unresolved::NoSenders);
                }
                if !names.any(|name| name == *wanted) {
                    return Err(Unresolved::NameNotFound);
                }
                wanted.clone()
            }
        };

        let info = self
            .registry
            .get_sender_info(&name)
            .map_err(|_| Unresolved::StaleName)?;
        let device = self.device.as_ref().ok_or(Unresolved::DeviceAbsent)?;
        let texture = stage_for_receive(&**device, &info).map_err(|e| {
            debug!(sender = %name, error = %e, "could not open shared texture");
            Unresolved::StaleName
        })?;

        Ok(Resolved {
            name,
            info,
            texture,
        })
    }

    /// Whether the resolved sender changed geometry or format, or vanished.
    /// Does not modify the receiver.
    pub fn check_liveness(&self) -> bool {
        let Some(resolved) = &self.resolved else {
            return false;
        };
        match self.registry.get_sender_info(&resolved.name) {
            Ok(info) => {
                info.width != resolved.info.width
                    || info.height != resolved.info.height
                    || info.format != resolved.info.format
                    || info.handle != resolved.info.handle
            }
            Err(_) => true,
        }
    }

    fn release_texture(&mut self) -> bool {
        let released = self.resolved.take();
        if let Some(resolved) = &released {
            debug!(sender = %resolved.name, "receiver texture released");
        }
        self.last_attempt = None;
        released.is_some()
    }

    /// Release the local texture. Idempotent.
    pub fn deinit(&mut self) {
        if self.release_texture() {
            self.enter(ReceiverState::Uninitialized(Unresolved::Pending));
        }
    }

    // -----------------------------------------------------------------------
    // Host contract
    // -----------------------------------------------------------------------

    /// Per-tick liveness check, then a throttled resolve. Does nothing while
    /// hidden.
    pub fn tick(&mut self) {
        if !self.visible {
            return;
        }
        if self.resolved.is_some() {
            if !self.check_liveness() {
                return;
            }
            self.release_texture();
            self.enter(ReceiverState::Uninitialized(Unresolved::SenderChanged));
        }
        self.resolve(false);
    }

    /// The source became visible: resolve now.
    pub fn show(&mut self) -> bool {
        self.visible = true;
        self.resolve(true)
    }

    /// The source was hidden: release the texture and the device until the
    /// next `show`.
    pub fn hide(&mut self) {
        self.visible = false;
        self.deinit();
        self.device = None;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn update(&mut self, settings: &ReceiverSettings) {
        self.selection = SenderSelection::from(settings);
        self.poll_interval_ms = settings.poll.millis();
        self.composite = settings.composite;
        if self.resolved.is_some() {
            self.deinit();
            self.resolve(false);
        }
    }

    /// Draw the received texture if there is one and the host is showing
    /// this source. Returns whether anything was drawn.
    pub fn draw(&mut self, host: &mut dyn HostGraphics<D>) -> bool {
        let next = if !host.is_active() {
            DrawState::Inactive
        } else if let Some(resolved) = &self.resolved {
            host.draw_texture(
                &resolved.texture,
                resolved.info.width,
                resolved.info.height,
                self.composite,
            );
            DrawState::Drawing
        } else {
            DrawState::Uninitialized
        };

        if next != self.draw_state {
            self.draw_state = next;
            self.status_changes += 1;
            match next {
                DrawState::Drawing => debug!(selection = %self.selection, "receiver drawing"),
                other => debug!(selection = %self.selection, state = ?other, "receiver skipping draw"),
            }
        }
        next == DrawState::Drawing
    }

    fn enter(&mut self, next: ReceiverState) {
        if self.state == next {
            return;
        }
        self.state = next;
        self.status_changes += 1;
        match next {
            ReceiverState::Resolved => {
                if let Some(resolved) = &self.resolved {
                    info!(
                        sender = %resolved.name,
                        width = resolved.info.width,
                        height = resolved.info.height,
                        format = resolved.info.format,
                        "receiver resolved"
                    );
                }
            }
            ReceiverState::Uninitialized(Unresolved::Pending) => {
                debug!(selection = %self.selection, "receiver released");
            }
            ReceiverState::Uninitialized(Unresolved::DeviceAbsent) => {
                error!(
                    selection = %self.selection,
                    code = Unresolved::DeviceAbsent.code(),
                    "receiver has no GPU device"
                );
            }
            ReceiverState::Uninitialized(reason) => {
                warn!(selection = %self.selection, code = reason.code(), "{reason}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn draw_state(&self) -> DrawState {
        self.draw_state
    }

    /// Number of state changes that produced a log line.
    pub fn status_changes(&self) -> u64 {
        self.status_changes
    }

    /// Last known size; 100x100 until the first resolve.
    pub fn dimensions(&self) -> (u32, u32) {
        self.size
    }

    pub fn selection(&self) -> &SenderSelection {
        &self.selection
    }

    pub fn composite_mode(&self) -> CompositeMode {
        self.composite
    }

    pub fn sender_name(&self) -> Option<&str> {
        self.resolved.as_ref().map(|r| r.name.as_str())
    }

    pub fn sender_info(&self) -> Option<SenderInfo> {
        self.resolved.as_ref().map(|r| r.info)
    }

    pub fn texture(&self) -> Option<&D::Texture> {
        self.resolved.as_ref().map(|r| &r.texture)
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use share_host::PollTier;
    use share_interop::soft::{SoftAdapter, SoftDevice, SoftTexture};
    use share_interop::{MemoryDirectory, PixelFormat, TextureDesc, TextureUsage};

    struct Fixture {
        adapter: SoftAdapter,
        directory: Arc<MemoryDirectory>,
        registry: SharedRegistry,
        clock: Arc<ManualClock>,
        devices: DeviceContext<SoftDevice>,
    }

    fn fixture() -> Fixture {
        let adapter = SoftAdapter::new();
        let factory = adapter.clone();
        let directory = Arc::new(MemoryDirectory::new());
        Fixture {
            registry: SharedRegistry::new(directory.clone()),
            devices: DeviceContext::new(move || factory.create_device()),
            clock: Arc::new(ManualClock::new(1_000)),
            adapter,
            directory,
        }
    }

    impl Fixture {
        fn receiver(&self, settings: ReceiverSettings) -> ReceiverBridge<SoftDevice> {
            ReceiverBridge::new(
                self.devices.clone(),
                self.registry.clone(),
                &settings,
                self.clock.clone(),
            )
        }

        /// Publish a BGRA texture the way a foreign sender would.
        fn publish(&self, name: &str, width: u32, height: u32) -> (SoftDevice, SoftTexture) {
            let device = self.adapter.create_device().unwrap();
            let texture = device
                .create_texture(
                    TextureDesc::new(width, height, PixelFormat::Bgra8Unorm),
                    TextureUsage::Shared,
                )
                .unwrap();
            let handle = device.shared_handle(&texture).unwrap();
            self.registry
                .create_sender(name, width, height, PixelFormat::Bgra8Unorm, handle)
                .unwrap();
            (device, texture)
        }
    }

    fn named(name: &str) -> ReceiverSettings {
        ReceiverSettings {
            sender: Some(name.to_owned()),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct Screen {
        active: bool,
        draws: Vec<(u32, u32, CompositeMode)>,
    }

    impl HostGraphics<SoftDevice> for Screen {
        fn is_active(&self) -> bool {
            self.active
        }

        fn draw_texture(&mut self, _texture: &SoftTexture, width: u32, height: u32, mode: CompositeMode) {
            self.draws.push((width, height, mode));
        }
    }

    #[test]
    fn first_available_without_senders() {
        let f = fixture();
        let mut receiver = f.receiver(ReceiverSettings::default());
        assert!(!receiver.resolve(true));
        assert_eq!(
            receiver.state(),
            ReceiverState::Uninitialized(Unresolved::NoSenders)
        );
        assert_eq!(receiver.dimensions(), (100, 100));
    }

    #[test]
    fn resolves_named_sender() {
        let f = fixture();
        let _sender = f.publish("A", 800, 600);
        let mut receiver = f.receiver(named("A"));

        assert!(receiver.resolve(false));
        assert_eq!(receiver.state(), ReceiverState::Resolved);
        assert_eq!(receiver.dimensions(), (800, 600));
        assert_eq!(receiver.sender_name(), Some("A"));
        assert_eq!(
            receiver.sender_info().map(|i| i.format),
            Some(PixelFormat::Bgra8Unorm.dxgi())
        );
        assert!(receiver.texture().is_some());
    }

    #[test]
    fn first_available_marks_sender_active() {
        let f = fixture();
        let _a = f.publish("A", 16, 16);
        let _b = f.publish("B", 32, 32);
        let mut receiver = f.receiver(ReceiverSettings::default());

        assert!(receiver.resolve(true));
        assert_eq!(receiver.sender_name(), Some("A"));
        assert_eq!(f.registry.active_sender().as_deref(), Some("A"));
    }

    #[test]
    fn missing_name_with_other_senders() {
        let f = fixture();
        let _a = f.publish("A", 16, 16);
        let mut receiver = f.receiver(named("B"));
        assert!(!receiver.resolve(true));
        assert_eq!(
            receiver.state(),
            ReceiverState::Uninitialized(Unresolved::NameNotFound)
        );
    }

    #[test]
    fn stale_entry_cannot_be_opened() {
        let f = fixture();
        let (device, texture) = f.publish("A", 16, 16);
        drop(texture);
        drop(device);

        let mut receiver = f.receiver(named("A"));
        assert!(!receiver.resolve(true));
        assert_eq!(
            receiver.state(),
            ReceiverState::Uninitialized(Unresolved::StaleName)
        );
    }

    #[test]
    fn missing_device_is_reported() {
        let f = fixture();
        f.adapter.set_available(false);
        let mut receiver = f.receiver(ReceiverSettings::default());
        assert!(!receiver.resolve(true));
        assert_eq!(
            receiver.state(),
            ReceiverState::Uninitialized(Unresolved::DeviceAbsent)
        );
        assert_eq!(f.directory.query_count(), 0);
    }

    #[test]
    fn unforced_attempts_are_throttled() {
        let f = fixture();
        let mut receiver = f.receiver(ReceiverSettings {
            poll: PollTier::Normal,
            ..Default::default()
        });

        receiver.resolve(false);
        let queries = f.directory.query_count();
        f.clock.advance(10);
        receiver.resolve(false);
        assert_eq!(f.directory.query_count(), queries);

        f.clock.advance(490);
        receiver.resolve(false);
        assert!(f.directory.query_count() > queries);
    }

    #[test]
    fn forced_attempts_skip_the_throttle() {
        let f = fixture();
        let mut receiver = f.receiver(ReceiverSettings {
            poll: PollTier::Slow,
            ..Default::default()
        });

        receiver.resolve(false);
        let _a = f.publish("A", 8, 8);
        assert!(!receiver.resolve(false));
        assert!(receiver.show());
    }

    #[test]
    fn repeated_failures_change_status_once() {
        let f = fixture();
        let mut receiver = f.receiver(ReceiverSettings::default());
        for _ in 0..10 {
            receiver.resolve(false);
            f.clock.advance(1_000);
        }
        assert_eq!(receiver.status_changes(), 1);
    }

    #[test]
    fn liveness_notices_resize_and_removal() {
        let f = fixture();
        let _a = f.publish("A", 64, 64);
        let mut receiver = f.receiver(named("A"));
        assert!(receiver.resolve(true));
        assert!(!receiver.check_liveness());

        let (device, texture) = f.publish("B", 128, 64);
        let handle = device.shared_handle(&texture).unwrap();
        f.registry.update_sender("A", 128, 64, handle).unwrap();
        assert!(receiver.check_liveness());
        assert!(receiver.is_initialized());

        f.registry.release_sender("A");
        assert!(receiver.check_liveness());
    }

    #[test]
    fn tick_reopens_after_resize() {
        let f = fixture();
        let _a = f.publish("A", 64, 64);
        let mut receiver = f.receiver(named("A"));
        assert!(receiver.resolve(true));

        let (device, texture) = f.publish("B", 128, 32);
        let handle = device.shared_handle(&texture).unwrap();
        f.registry.update_sender("A", 128, 32, handle).unwrap();

        receiver.tick();
        assert_eq!(receiver.state(), ReceiverState::Resolved);
        assert_eq!(receiver.dimensions(), (128, 32));
    }

    #[test]
    fn tick_keeps_a_live_sender() {
        let f = fixture();
        let _a = f.publish("A", 64, 64);
        let mut receiver = f.receiver(named("A"));
        assert!(receiver.resolve(true));
        let changes = receiver.status_changes();

        receiver.tick();
        receiver.tick();
        assert!(receiver.is_initialized());
        assert_eq!(receiver.status_changes(), changes);
    }

    #[test]
    fn tick_after_sender_stops() {
        let f = fixture();
        let (device, texture) = f.publish("A", 64, 64);
        let mut receiver = f.receiver(named("A"));
        assert!(receiver.resolve(true));

        f.registry.release_sender("A");
        drop(texture);
        drop(device);
        receiver.tick();
        assert!(!receiver.is_initialized());
        assert_eq!(
            receiver.state(),
            ReceiverState::Uninitialized(Unresolved::NoSenders)
        );
        assert_eq!(receiver.dimensions(), (64, 64));
    }

    #[test]
    fn deinit_is_idempotent() {
        let f = fixture();
        let _a = f.publish("A", 8, 8);
        let mut receiver = f.receiver(named("A"));
        assert!(receiver.resolve(true));

        receiver.deinit();
        let changes = receiver.status_changes();
        receiver.deinit();
        assert_eq!(receiver.status_changes(), changes);
        assert!(!receiver.is_initialized());

        assert!(receiver.resolve(false));
    }

    #[test]
    fn hide_releases_the_device() {
        let f = fixture();
        let _a = f.publish("A", 8, 8);
        let mut receiver = f.receiver(named("A"));
        assert!(receiver.show());
        assert_eq!(f.devices.lease_count(), 1);

        receiver.hide();
        assert_eq!(f.devices.lease_count(), 0);
        assert!(!f.devices.is_open());
    }

    #[test]
    fn hidden_receiver_stays_released() {
        let f = fixture();
        let _a = f.publish("A", 8, 8);
        let mut receiver = f.receiver(named("A"));
        assert!(receiver.show());

        receiver.hide();
        for _ in 0..3 {
            f.clock.advance(1_000);
            receiver.tick();
        }
        assert!(!receiver.is_visible());
        assert!(!receiver.is_initialized());
        assert_eq!(f.devices.lease_count(), 0);

        assert!(receiver.show());
        assert_eq!(f.devices.lease_count(), 1);
    }

    #[test]
    fn update_switches_sender() {
        let f = fixture();
        let _a = f.publish("A", 8, 8);
        let _b = f.publish("B", 24, 16);
        let mut receiver = f.receiver(named("A"));
        assert!(receiver.resolve(true));

        receiver.update(&ReceiverSettings {
            sender: Some("B".into()),
            poll: PollTier::Slow,
            composite: CompositeMode::PremultipliedAlpha,
        });
        assert_eq!(receiver.sender_name(), Some("B"));
        assert_eq!(receiver.dimensions(), (24, 16));
        assert_eq!(receiver.composite_mode(), CompositeMode::PremultipliedAlpha);
    }

    #[test]
    fn draw_tracks_state() {
        let f = fixture();
        let mut receiver = f.receiver(named("A"));
        let mut screen = Screen::default();

        assert!(!receiver.draw(&mut screen));
        assert_eq!(receiver.draw_state(), DrawState::Inactive);

        screen.active = true;
        assert!(!receiver.draw(&mut screen));
        assert_eq!(receiver.draw_state(), DrawState::Uninitialized);

        let _a = f.publish("A", 40, 30);
        receiver.show();
        assert!(receiver.draw(&mut screen));
        assert!(receiver.draw(&mut screen));
        assert_eq!(receiver.draw_state(), DrawState::Drawing);
        assert_eq!(screen.draws, vec![(40, 30, CompositeMode::Opaque); 2]);
    }
}
