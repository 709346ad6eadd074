//! The device context shared by every bridge in a process.
//!
//! One GPU device serves all senders, receivers and filters. It is created on
//! the first [`DeviceContext::acquire`] and dropped when the last
//! [`DeviceLease`] goes away, so a bridge holding a lease can never observe a
//! released device.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use share_interop::{GpuDevice, InteropError};
use tracing::{debug, info};

use crate::error::BridgeError;

type Factory<D> = dyn Fn() -> Result<D, InteropError> + Send + Sync;

struct Slot<D> {
    device: Option<Arc<D>>,
    leases: usize,
}

struct Shared<D> {
    /// `None` when the host supplied the device.
    factory: Option<Box<Factory<D>>>,
    /// Host-supplied device, kept for the context's whole life.
    pinned: Option<Arc<D>>,
    slot: Mutex<Slot<D>>,
}

/// Cheaply clonable handle to the process-wide GPU device.
pub struct DeviceContext<D: GpuDevice> {
    shared: Arc<Shared<D>>,
}

impl<D: GpuDevice> Clone for DeviceContext<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: GpuDevice> fmt::Debug for DeviceContext<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("open", &self.is_open())
            .field("leases", &self.lease_count())
            .finish()
    }
}

impl<D: GpuDevice> DeviceContext<D> {
    /// A context that creates its device with `factory` on demand.
    pub fn new(factory: impl Fn() -> Result<D, InteropError> + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                factory: Some(Box::new(factory)),
                pinned: None,
                slot: Mutex::new(Slot {
                    device: None,
                    leases: 0,
                }),
            }),
        }
    }

    /// A context around a device the host already owns, such as the
    /// compositor's own D3D11 device for filters.
    pub fn with_device(device: D) -> Self {
        Self {
            shared: Arc::new(Shared {
                factory: None,
                pinned: Some(Arc::new(device)),
                slot: Mutex::new(Slot {
                    device: None,
                    leases: 0,
                }),
            }),
        }
    }

    /// Lease the device, creating it if no lease is outstanding.
    pub fn acquire(&self) -> Result<DeviceLease<D>, BridgeError> {
        let mut slot = self.shared.slot.lock();
        let device = match (&slot.device, &self.shared.pinned) {
            (Some(device), _) => Arc::clone(device),
            (None, Some(pinned)) => Arc::clone(pinned),
            (None, None) => {
                let factory = self.shared.factory.as_ref().ok_or_else(|| {
                    BridgeError::DeviceInit(InteropError::DeviceUnavailable(
                        "no device factory".into(),
                    ))
                })?;
                let device = Arc::new(factory().map_err(BridgeError::DeviceInit)?);
                info!(backend = device.backend_name(), "GPU device created");
                device
            }
        };
        slot.device = Some(Arc::clone(&device));
        slot.leases += 1;
        debug!(leases = slot.leases, "device leased");

        Ok(DeviceLease {
            device,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Whether a device currently exists.
    pub fn is_open(&self) -> bool {
        self.shared.slot.lock().device.is_some()
    }

    pub fn lease_count(&self) -> usize {
        self.shared.slot.lock().leases
    }
}

#[cfg(target_os = "windows")]
impl DeviceContext<share_interop::dx11::Dx11Device> {
    /// A context that creates its own D3D11 device.
    pub fn d3d11() -> Self {
        Self::new(share_interop::dx11::Dx11Device::new)
    }

    /// A context around the host compositor's D3D11 device.
    pub fn from_host_device(
        device: windows::Win32::Graphics::Direct3D11::ID3D11Device,
    ) -> Result<Self, BridgeError> {
        let device =
            share_interop::dx11::Dx11Device::from_device(device).map_err(BridgeError::DeviceInit)?;
        Ok(Self::with_device(device))
    }
}

/// A reference to the shared device. Dropping it is the release.
pub struct DeviceLease<D: GpuDevice> {
    device: Arc<D>,
    shared: Arc<Shared<D>>,
}

impl<D: GpuDevice> Deref for DeviceLease<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.device
    }
}

impl<D: GpuDevice> Clone for DeviceLease<D> {
    fn clone(&self) -> Self {
        self.shared.slot.lock().leases += 1;
        Self {
            device: Arc::clone(&self.device),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: GpuDevice> Drop for DeviceLease<D> {
    fn drop(&mut self) {
        let released = {
            let mut slot = self.shared.slot.lock();
            slot.leases = slot.leases.saturating_sub(1);
            if slot.leases == 0 {
                slot.device.take()
            } else {
                None
            }
        };
        if released.is_some() && self.shared.pinned.is_none() {
            info!("GPU device released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use share_interop::soft::{SoftAdapter, SoftDevice};

    fn context(adapter: &SoftAdapter) -> DeviceContext<SoftDevice> {
        let adapter = adapter.clone();
        DeviceContext::new(move || adapter.create_device())
    }

    #[test]
    fn acquire_reuses_the_open_device() {
        let adapter = SoftAdapter::new();
        let ctx = context(&adapter);
        let a = ctx.acquire().unwrap();
        let b = ctx.acquire().unwrap();
        assert_eq!(adapter.devices_created(), 1);
        assert_eq!(ctx.lease_count(), 2);
        drop(a);
        assert!(ctx.is_open());
        drop(b);
        assert!(!ctx.is_open());
        assert_eq!(adapter.live_devices(), 0);
    }

    #[test]
    fn device_is_recreated_after_full_release() {
        let adapter = SoftAdapter::new();
        let ctx = context(&adapter);
        drop(ctx.acquire().unwrap());
        drop(ctx.acquire().unwrap());
        assert_eq!(adapter.devices_created(), 2);
    }

    #[test]
    fn cloned_lease_keeps_device_alive() {
        let adapter = SoftAdapter::new();
        let ctx = context(&adapter);
        let lease = ctx.acquire().unwrap();
        let clone = lease.clone();
        drop(lease);
        assert_eq!(adapter.live_devices(), 1);
        drop(clone);
        assert_eq!(adapter.live_devices(), 0);
    }

    #[test]
    fn factory_failure_is_device_init() {
        let adapter = SoftAdapter::new();
        adapter.set_available(false);
        let ctx = context(&adapter);
        assert!(matches!(ctx.acquire(), Err(BridgeError::DeviceInit(_))));
        assert_eq!(ctx.lease_count(), 0);
    }

    #[test]
    fn host_device_outlives_leases() {
        let adapter = SoftAdapter::new();
        let ctx = DeviceContext::with_device(adapter.create_device().unwrap());
        drop(ctx.acquire().unwrap());
        assert_eq!(adapter.live_devices(), 1);
        drop(ctx);
        assert_eq!(adapter.live_devices(), 0);
    }
}
