//! Publishing a live texture under a name.
//!
//! State machine: `Idle -> Started -> Publishing -> Idle`. A geometry change
//! while publishing tears the shared texture down and recreates it under the
//! same name. Every transition and every send happens under the bridge's
//! lock, so a `stop()` racing a frame sees either a fully published sender
//! or a fully stopped one.

use parking_lot::Mutex;
use share_host::RawFrame;
use share_interop::{
    validate_name, GpuDevice, InteropError, PixelFormat, TextureDesc, TextureUsage,
};
use tracing::{debug, error, info, warn};

use crate::context::{DeviceContext, DeviceLease};
use crate::error::{BridgeError, RegistryError};
use crate::registry::{SharedRegistry, SharedTextureHandle};
use crate::stager::FrameStager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderPhase {
    Idle,
    /// Device acquired, nothing published yet.
    Started,
    Publishing,
}

/// What happened to one delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Not running, or the frame had no pixels.
    Skipped,
    /// Staged; the double buffer has nothing to send yet.
    Primed,
    Sent,
    /// Staging, publishing or sending failed. The next frame retries.
    Dropped,
}

/// What to do when sends keep failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendFailurePolicy {
    /// After this many consecutive failures the shared texture is recreated.
    /// `None` keeps dropping frames without recreating anything.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for SendFailurePolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: Some(30),
        }
    }
}

/// A shared texture registered with the protocol. Dropping it unpublishes
/// the name before the texture is released.
struct Publication<D: GpuDevice> {
    record: SharedTextureHandle,
    desc: TextureDesc,
    registry: SharedRegistry,
    texture: D::Texture,
}

impl<D: GpuDevice> Drop for Publication<D> {
    fn drop(&mut self) {
        self.registry.release_sender(&self.record.name);
        debug!(name = %self.record.name, desc = %self.desc, "shared texture released");
    }
}

struct SenderState<D: GpuDevice> {
    // Release order: publication, stager, device.
    publication: Option<Publication<D>>,
    stager: Option<FrameStager<D>>,
    device: Option<DeviceLease<D>>,
    phase: SenderPhase,
    /// Requested name.
    name: String,
    /// Name actually registered; differs from `name` after a collision and
    /// survives recreation so resizes keep it.
    published_name: Option<String>,
    consecutive_failures: u32,
    recreations: u64,
    frames_sent: u64,
    frames_dropped: u64,
}

pub struct SenderBridge<D: GpuDevice> {
    devices: DeviceContext<D>,
    registry: SharedRegistry,
    format: PixelFormat,
    policy: SendFailurePolicy,
    state: Mutex<SenderState<D>>,
}

impl<D: GpuDevice> SenderBridge<D> {
    /// A stopped sender publishing BGRA textures.
    pub fn new(devices: DeviceContext<D>, registry: SharedRegistry) -> Self {
        Self {
            devices,
            registry,
            format: PixelFormat::Bgra8Unorm,
            policy: SendFailurePolicy::default(),
            state: Mutex::new(SenderState {
                publication: None,
                stager: None,
                device: None,
                phase: SenderPhase::Idle,
                name: String::new(),
                published_name: None,
                consecutive_failures: 0,
                recreations: 0,
                frames_sent: 0,
                frames_dropped: 0,
            }),
        }
    }

    pub fn with_policy(mut self, policy: SendFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Acquire the device and get ready to publish under `name`.
    ///
    /// Starting a running sender under another name renames it.
    pub fn start(&self, name: &str) -> Result<(), BridgeError> {
        validate_name(name).map_err(|_| BridgeError::InvalidName(name.to_owned()))?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.phase != SenderPhase::Idle {
            if state.name != name {
                Self::apply_rename(state, name);
            }
            return Ok(());
        }

        let lease = self.devices.acquire().map_err(|e| match e {
            BridgeError::DeviceInit(source) => BridgeError::NoDevice(source),
            other => other,
        })?;
        state.stager = Some(FrameStager::new(lease.clone(), self.format));
        state.device = Some(lease);
        state.name = name.to_owned();
        state.published_name = None;
        state.consecutive_failures = 0;
        state.phase = SenderPhase::Started;
        info!(name, "sender started");
        Ok(())
    }

    /// Unpublish and release everything. Stopping a stopped sender does
    /// nothing.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.phase == SenderPhase::Idle {
            return;
        }
        state.publication = None;
        state.stager = None;
        state.device = None;
        state.published_name = None;
        state.consecutive_failures = 0;
        state.phase = SenderPhase::Idle;
        info!(name = %state.name, "sender stopped");
    }

    /// Change the published name. A publishing sender unpublishes now and
    /// republishes under the new name on its next frame.
    pub fn rename(&self, name: &str) -> Result<(), BridgeError> {
        validate_name(name).map_err(|_| BridgeError::InvalidName(name.to_owned()))?;
        let mut state = self.state.lock();
        if state.name != name {
            Self::apply_rename(&mut state, name);
        }
        Ok(())
    }

    fn apply_rename(state: &mut SenderState<D>, name: &str) {
        info!(from = %state.name, to = name, "sender renamed");
        state.name = name.to_owned();
        state.published_name = None;
        if state.publication.take().is_some() {
            state.phase = SenderPhase::Started;
        }
    }

    // -----------------------------------------------------------------------
    // Frames
    // -----------------------------------------------------------------------

    /// Deliver a rendered frame.
    pub fn on_frame(&self, source: &D::Texture, width: u32, height: u32) -> FrameOutcome {
        if width == 0 || height == 0 {
            return FrameOutcome::Skipped;
        }
        self.stage_and_deliver(|stager| {
            stager
                .stage_for_send(source, width, height)
                .map(|staged| staged.map(|s| s.desc))
        })
    }

    /// Deliver a CPU frame from the host's raw video path.
    pub fn on_raw_frame(&self, frame: &RawFrame<'_>) -> FrameOutcome {
        if frame.is_empty() {
            return FrameOutcome::Skipped;
        }
        self.stage_and_deliver(|stager| {
            stager
                .stage_raw_upload(frame)
                .map(|staged| staged.map(|s| s.desc))
        })
    }

    fn stage_and_deliver(
        &self,
        stage: impl FnOnce(&mut FrameStager<D>) -> Result<Option<TextureDesc>, InteropError>,
    ) -> FrameOutcome {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.phase == SenderPhase::Idle {
            return FrameOutcome::Skipped;
        }
        let Some(stager) = state.stager.as_mut() else {
            return FrameOutcome::Skipped;
        };

        match stage(stager) {
            Ok(Some(desc)) => self.deliver(state, desc),
            Ok(None) => FrameOutcome::Primed,
            Err(err) => self.record_failure(state, err.into()),
        }
    }

    fn deliver(&self, state: &mut SenderState<D>, desc: TextureDesc) -> FrameOutcome {
        if let Some(publication) = &state.publication {
            if publication.desc != desc {
                info!(
                    name = %publication.record.name,
                    from = %publication.desc,
                    to = %desc,
                    "sender geometry changed, recreating shared texture"
                );
                state.publication = None;
                state.phase = SenderPhase::Started;
            }
        }

        if state.publication.is_none() {
            match self.publish(state, desc) {
                Ok(publication) => {
                    info!(
                        name = %publication.record.name,
                        handle = %publication.record.handle,
                        desc = %desc,
                        "sender publishing"
                    );
                    state.published_name = Some(publication.record.name.clone());
                    state.publication = Some(publication);
                    state.phase = SenderPhase::Publishing;
                    state.recreations += 1;
                }
                Err(err) => return self.record_failure(state, err),
            }
        }

        match self.send(state) {
            Ok(()) => {
                state.consecutive_failures = 0;
                state.frames_sent += 1;
                FrameOutcome::Sent
            }
            Err(err) => self.record_failure(state, err),
        }
    }

    fn publish(
        &self,
        state: &SenderState<D>,
        desc: TextureDesc,
    ) -> Result<Publication<D>, BridgeError> {
        let device = state.device.as_ref().ok_or_else(|| {
            BridgeError::NoDevice(InteropError::DeviceUnavailable("sender not started".into()))
        })?;
        let texture = device.create_texture(desc, TextureUsage::Shared)?;
        let handle = device.shared_handle(&texture)?;

        let wanted = state.published_name.as_deref().unwrap_or(&state.name);
        let record = match self.registry.create_sender(
            wanted,
            desc.width,
            desc.height,
            desc.format,
            handle,
        ) {
            Ok(record) => record,
            Err(RegistryError::DuplicateName(taken)) => {
                let alternative = self.registry.unique_name(&taken)?;
                warn!(
                    requested = %taken,
                    published = %alternative,
                    "sender name in use, publishing under a suffixed name"
                );
                self.registry.create_sender(
                    &alternative,
                    desc.width,
                    desc.height,
                    desc.format,
                    handle,
                )?
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Publication {
            record,
            desc,
            registry: self.registry.clone(),
            texture,
        })
    }

    /// Copy the staged frame into the shared texture and tell the protocol.
    fn send(&self, state: &SenderState<D>) -> Result<(), BridgeError> {
        let (Some(publication), Some(stager), Some(device)) = (
            state.publication.as_ref(),
            state.stager.as_ref(),
            state.device.as_ref(),
        ) else {
            return Err(InteropError::from(anyhow::anyhow!("sender is not publishing")).into());
        };
        let staged = stager
            .ready_texture()
            .ok_or_else(|| InteropError::from(anyhow::anyhow!("no staged frame to send")))?;

        device.copy_texture(&publication.texture, staged.texture)?;
        device.flush();
        self.registry.update_sender(
            &publication.record.name,
            publication.desc.width,
            publication.desc.height,
            publication.record.handle,
        )?;
        Ok(())
    }

    fn record_failure(&self, state: &mut SenderState<D>, err: BridgeError) -> FrameOutcome {
        state.consecutive_failures += 1;
        state.frames_dropped += 1;
        if state.consecutive_failures == 1 {
            warn!(name = %state.name, error = %err, "sender dropped a frame");
        } else {
            debug!(
                name = %state.name,
                failures = state.consecutive_failures,
                error = %err,
                "sender still failing"
            );
        }

        if let Some(limit) = self.policy.max_consecutive_failures {
            if state.consecutive_failures >= limit && state.publication.is_some() {
                error!(
                    name = %state.name,
                    failures = state.consecutive_failures,
                    "sends keep failing, recreating shared texture"
                );
                state.publication = None;
                state.phase = SenderPhase::Started;
                state.consecutive_failures = 0;
            }
        }
        FrameOutcome::Dropped
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> SenderPhase {
        self.state.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() != SenderPhase::Idle
    }

    /// Requested name.
    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Name currently registered with the protocol.
    pub fn published_name(&self) -> Option<String> {
        let state = self.state.lock();
        state
            .publication
            .as_ref()
            .map(|p| p.record.name.clone())
    }

    pub fn published(&self) -> Option<SharedTextureHandle> {
        let state = self.state.lock();
        state.publication.as_ref().map(|p| p.record.clone())
    }

    /// How many shared textures were created since construction.
    pub fn recreations(&self) -> u64 {
        self.state.lock().recreations
    }

    pub fn frames_sent(&self) -> u64 {
        self.state.lock().frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.state.lock().frames_dropped
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn devices(&self) -> &DeviceContext<D> {
        &self.devices
    }
}
