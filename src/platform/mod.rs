//! Device registry: platform and device discovery.
//!
//! A [`Registry`] is built once at startup, is immutable afterwards and is
//! passed by reference to whatever needs devices. There is no process-wide
//! discovery state and nothing to tear down.

pub mod driver;

pub use driver::{DeviceDescriptor, Driver, HostDriver, PlatformDescriptor};

use crate::config::{Config, DriverKind};
use crate::error::{Error, Result};
use crate::executor::ComputePool;
use driver::DeviceBackend;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_PLATFORM_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Device category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Host CPU exposed as a compute device.
    Cpu,
    /// General-purpose graphics accelerator.
    Gpu,
    /// Dedicated accelerator.
    Accelerator,
}

impl DeviceType {
    pub const ALL: [DeviceType; 3] = [DeviceType::Cpu, DeviceType::Gpu, DeviceType::Accelerator];

    pub fn is_accelerator(self) -> bool {
        !matches!(self, DeviceType::Cpu)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceType::Cpu => "cpu",
            DeviceType::Gpu => "gpu",
            DeviceType::Accelerator => "accelerator",
        };
        f.write_str(s)
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceType::Cpu),
            "gpu" => Ok(DeviceType::Gpu),
            "accelerator" | "acc" => Ok(DeviceType::Accelerator),
            other => Err(Error::config(format!("unknown device type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

/// Optional device features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// `double` precision arithmetic in kernels.
    pub fp64: bool,
    /// Command timestamps on profiling queues.
    pub profiling: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub device_type: DeviceType,
    pub compute_units: usize,
    pub max_work_group_size: usize,
    pub global_mem_size: u64,
    pub capabilities: DeviceCapabilities,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

struct DeviceInner {
    id: DeviceId,
    platform: PlatformId,
    platform_info: Arc<PlatformInfo>,
    info: DeviceInfo,
    thread_name: String,
    queue_engines: usize,
    backend: DeviceBackend,
}

/// Handle to a discovered device. Cheap to clone; compares by identity.
///
/// A device keeps its platform's identity and description, so it stays
/// usable after the [`Registry`] that discovered it is dropped.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    fn new(
        platform: PlatformId,
        platform_info: Arc<PlatformInfo>,
        descriptor: DeviceDescriptor,
        config: &Config,
    ) -> Self {
        let id = DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(DeviceInner {
                id,
                platform,
                platform_info,
                thread_name: format!(
                    "{}-{}{}",
                    config.thread_name_prefix, descriptor.info.device_type, id.0
                ),
                queue_engines: config.queue_engines,
                info: descriptor.info,
                backend: descriptor.backend,
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    pub fn platform_id(&self) -> PlatformId {
        self.inner.platform
    }

    pub fn platform_info(&self) -> &PlatformInfo {
        &self.inner.platform_info
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.inner.info
    }

    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    pub fn device_type(&self) -> DeviceType {
        self.inner.info.device_type
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.inner.info.capabilities
    }

    pub fn max_work_group_size(&self) -> usize {
        self.inner.info.max_work_group_size
    }

    /// Prefix for threads working on behalf of this device.
    pub(crate) fn thread_name(&self) -> &str {
        &self.inner.thread_name
    }

    /// Engine threads for an out-of-order queue on this device.
    pub(crate) fn queue_engines(&self) -> usize {
        self.inner.queue_engines
    }

    pub(crate) fn backend(&self) -> &DeviceBackend {
        &self.inner.backend
    }

    /// The host driver's compute engine, started on first use.
    pub(crate) fn compute_pool(&self) -> Result<Arc<ComputePool>> {
        match &self.inner.backend {
            DeviceBackend::Host(host) => host.compute_pool(&self.inner.thread_name),
            #[cfg(feature = "opencl")]
            DeviceBackend::OpenCl(_) => Err(Error::InvalidDevice(format!(
                "device '{}' runs kernels through its OpenCL driver",
                self.name()
            ))),
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Device {}

impl std::hash::Hash for Device {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("platform", &self.inner.platform)
            .field("name", &self.inner.info.name)
            .field("type", &self.inner.info.device_type)
            .finish()
    }
}

struct PlatformInner {
    id: PlatformId,
    info: Arc<PlatformInfo>,
    devices: Vec<Device>,
}

/// Handle to a discovered platform and the devices it exposes.
#[derive(Clone)]
pub struct Platform {
    inner: Arc<PlatformInner>,
}

impl Platform {
    fn from_descriptor(descriptor: PlatformDescriptor, config: &Config) -> Self {
        let id = PlatformId(NEXT_PLATFORM_ID.fetch_add(1, Ordering::Relaxed));
        let info = Arc::new(descriptor.info);
        let devices = descriptor
            .devices
            .into_iter()
            .map(|d| Device::new(id, Arc::clone(&info), d, config))
            .collect();

        Self {
            inner: Arc::new(PlatformInner { id, info, devices }),
        }
    }

    pub fn id(&self) -> PlatformId {
        self.inner.id
    }

    pub fn info(&self) -> &PlatformInfo {
        &self.inner.info
    }

    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    /// Devices in enumeration order.
    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    pub fn devices_of_type(&self, device_type: DeviceType) -> Vec<Device> {
        self.inner
            .devices
            .iter()
            .filter(|d| d.device_type() == device_type)
            .cloned()
            .collect()
    }
}

impl PartialEq for Platform {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Platform {}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("id", &self.inner.id)
            .field("name", &self.inner.info.name)
            .field("devices", &self.inner.devices.len())
            .finish()
    }
}

/// Result of platform and device discovery.
#[derive(Debug, Clone)]
pub struct Registry {
    platforms: Vec<Platform>,
    driver: String,
}

impl Registry {
    /// Discover platforms through the driver selected by `config`.
    pub fn discover(config: &Config) -> Result<Self> {
        config.validate()?;
        match config.driver {
            DriverKind::Host => Self::with_driver(&HostDriver::new(config), config),
            #[cfg(feature = "opencl")]
            DriverKind::OpenCl => Self::with_driver(&crate::opencl::OpenClDriver::new(), config),
            #[cfg(not(feature = "opencl"))]
            DriverKind::OpenCl => Err(Error::config("parcl was built without the `opencl` feature")),
        }
    }

    pub fn with_driver(driver: &dyn Driver, config: &Config) -> Result<Self> {
        config.validate()?;

        let descriptors = driver.platforms()?;
        if descriptors.is_empty() {
            tracing::warn!(driver = driver.name(), "driver reported no platforms");
            return Err(Error::NoPlatformFound);
        }

        let platforms: Vec<Platform> = descriptors
            .into_iter()
            .map(|p| Platform::from_descriptor(p, config))
            .collect();

        for platform in &platforms {
            tracing::info!(
                driver = driver.name(),
                platform = platform.name(),
                devices = platform.devices().len(),
                "discovered platform"
            );
        }

        Ok(Self {
            platforms,
            driver: driver.name().to_string(),
        })
    }

    pub fn driver_name(&self) -> &str {
        &self.driver
    }

    /// Platforms in enumeration order.
    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    /// Devices of `platform` in enumeration order.
    pub fn devices(&self, platform: &Platform) -> Vec<Device> {
        platform.devices().to_vec()
    }

    /// Every device of every platform.
    pub fn all_devices(&self) -> Vec<Device> {
        self.platforms
            .iter()
            .flat_map(|p| p.devices().iter().cloned())
            .collect()
    }

    pub fn platform_of(&self, device: &Device) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.id() == device.platform_id())
    }
}
