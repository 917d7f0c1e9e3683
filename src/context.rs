//! Execution contexts.
//!
//! A context binds a non-empty set of devices from one platform. Programs,
//! buffers and queues created against it hold its shared state, so a
//! context always outlives the resources built from it.

use crate::error::{Error, Result};
use crate::platform::driver::DeviceBackend;
use crate::platform::{Device, DeviceType, Platform, PlatformId, PlatformInfo, Registry};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[cfg(feature = "telemetry")]
use crate::telemetry::Metrics;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

/// Driver-side state behind a context.
pub(crate) enum ContextBackend {
    Host,
    #[cfg(feature = "opencl")]
    OpenCl(crate::opencl::ClContext),
}

impl ContextBackend {
    fn create(devices: &[Device]) -> Result<Self> {
        match devices[0].backend() {
            DeviceBackend::Host(_) => Ok(ContextBackend::Host),
            #[cfg(feature = "opencl")]
            DeviceBackend::OpenCl(_) => crate::opencl::ClContext::new(devices).map(ContextBackend::OpenCl),
        }
    }
}

pub(crate) struct ContextShared {
    pub(crate) id: ContextId,
    pub(crate) platform: PlatformId,
    pub(crate) devices: Vec<Device>,
    pub(crate) backend: ContextBackend,
    handles: AtomicUsize,
    #[cfg(feature = "telemetry")]
    pub(crate) metrics: Metrics,
}

impl ContextShared {
    pub(crate) fn contains(&self, device: &Device) -> bool {
        self.devices.iter().any(|d| d == device)
    }

    pub(crate) fn ensure_same(&self, other: &ContextShared, what: &str) -> Result<()> {
        if self.id != other.id {
            return Err(Error::ContextMismatch(format!(
                "{} belongs to context {:?}, expected {:?}",
                what, other.id, self.id
            )));
        }
        Ok(())
    }
}

/// Resource-sharing domain over devices of a single platform.
pub struct Context {
    pub(crate) shared: Arc<ContextShared>,
}

impl Context {
    /// Context over an explicit device list.
    ///
    /// Fails with `NoMatchingDevice` on an empty list and with
    /// `IncompatibleDeviceSet` when devices come from different platforms.
    pub fn new(devices: &[Device]) -> Result<Self> {
        let first = devices
            .first()
            .ok_or_else(|| Error::NoMatchingDevice("empty device list".to_string()))?;

        let platform_id = first.platform_id();
        if let Some(other) = devices.iter().find(|d| d.platform_id() != platform_id) {
            return Err(Error::IncompatibleDeviceSet(format!(
                "device '{}' is on platform {:?}, expected {:?}",
                other.name(),
                other.platform_id(),
                platform_id
            )));
        }

        let mut unique: Vec<Device> = Vec::with_capacity(devices.len());
        for device in devices {
            if !unique.contains(device) {
                unique.push(device.clone());
            }
        }

        Self::from_parts(platform_id, unique)
    }

    /// Context over every device of `device_type` on `platform`.
    pub fn from_type(platform: &Platform, device_type: DeviceType) -> Result<Self> {
        let devices = platform.devices_of_type(device_type);
        if devices.is_empty() {
            return Err(Error::NoMatchingDevice(format!(
                "platform '{}' has no {} device",
                platform.name(),
                device_type
            )));
        }
        Self::from_parts(platform.id(), devices)
    }

    fn from_parts(platform: PlatformId, devices: Vec<Device>) -> Result<Self> {
        let backend = ContextBackend::create(&devices)?;

        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            context = ?id,
            platform = devices[0].platform_info().name.as_str(),
            devices = devices.len(),
            "created context"
        );

        Ok(Self {
            shared: Arc::new(ContextShared {
                id,
                platform,
                devices,
                backend,
                handles: AtomicUsize::new(1),
                #[cfg(feature = "telemetry")]
                metrics: Metrics::new(),
            }),
        })
    }

    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    pub fn platform_id(&self) -> PlatformId {
        self.shared.platform
    }

    pub fn platform_info(&self) -> &PlatformInfo {
        self.shared.devices[0].platform_info()
    }

    pub fn devices(&self) -> &[Device] {
        &self.shared.devices
    }

    pub fn contains(&self, device: &Device) -> bool {
        self.shared.contains(device)
    }

    /// Number of live `Context` handles. Programs, buffers and queues do
    /// not count. Informational only.
    pub fn reference_count(&self) -> usize {
        self.shared.handles.load(Ordering::Acquire)
    }

    #[cfg(feature = "telemetry")]
    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }
}

impl Clone for Context {
    fn clone(&self) -> Self {
        self.shared.handles.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shared.handles.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.shared.id)
            .field("platform", &self.platform_info().name)
            .field("devices", &self.shared.devices)
            .finish()
    }
}

/// Try each device category in order on each platform, returning the first
/// context that can be built.
///
/// Every failed attempt is logged; if none succeeds the last failure is
/// returned.
pub fn select_context(registry: &Registry, preference: &[DeviceType]) -> Result<Context> {
    let mut last_err = Error::NoMatchingDevice("no device category requested".to_string());

    for &device_type in preference {
        for platform in registry.platforms() {
            match Context::from_type(platform, device_type) {
                Ok(context) => {
                    tracing::info!(
                        platform = platform.name(),
                        device_type = %device_type,
                        "selected context"
                    );
                    return Ok(context);
                }
                Err(err) => {
                    tracing::debug!(
                        platform = platform.name(),
                        device_type = %device_type,
                        error = %err,
                        "context attempt failed"
                    );
                    last_err = err;
                }
            }
        }
    }

    Err(last_err)
}
