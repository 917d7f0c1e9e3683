//! Driver layer seam.
//!
//! A driver reports the platforms it implements and the devices each one
//! exposes. The registry turns those descriptors into live handles; the
//! backend carried by each device descriptor is what later runs programs,
//! buffers and launches for that device.

use super::{DeviceCapabilities, DeviceInfo, PlatformInfo};
use crate::config::{Config, DeviceConfig, PlatformConfig};
use crate::error::Result;
use crate::executor::ComputePool;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Source of platform and device descriptors.
pub trait Driver: Send + Sync {
    /// Driver name used in logs.
    fn name(&self) -> &str;

    /// Platforms in enumeration order. An empty list means no usable
    /// implementation is installed.
    fn platforms(&self) -> Result<Vec<PlatformDescriptor>>;
}

/// One platform as reported by a driver.
#[derive(Debug)]
pub struct PlatformDescriptor {
    pub(crate) info: PlatformInfo,
    pub(crate) devices: Vec<DeviceDescriptor>,
}

impl PlatformDescriptor {
    pub fn info(&self) -> &PlatformInfo {
        &self.info
    }

    pub fn device_infos(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.iter().map(|d| &d.info)
    }
}

/// One device as reported by a driver.
#[derive(Debug)]
pub struct DeviceDescriptor {
    pub(crate) info: DeviceInfo,
    pub(crate) backend: DeviceBackend,
}

/// What executes work for a device.
pub(crate) enum DeviceBackend {
    Host(HostDevice),
    #[cfg(feature = "opencl")]
    OpenCl(crate::opencl::ClDevice),
}

impl fmt::Debug for DeviceBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceBackend::Host(host) => f.debug_tuple("Host").field(&host.workers).finish(),
            #[cfg(feature = "opencl")]
            DeviceBackend::OpenCl(_) => f.write_str("OpenCl"),
        }
    }
}

/// Software driver that executes kernels on host threads.
///
/// Its platform layout comes straight from [`Config::platforms`].
#[derive(Debug, Clone)]
pub struct HostDriver {
    config: Config,
}

impl HostDriver {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn describe(&self, platform: &PlatformConfig) -> PlatformDescriptor {
        PlatformDescriptor {
            info: PlatformInfo {
                name: platform.name.clone(),
                vendor: platform.vendor.clone(),
                version: platform.version.clone(),
            },
            devices: platform
                .devices
                .iter()
                .map(|d| self.describe_device(&platform.vendor, d))
                .collect(),
        }
    }

    fn describe_device(&self, vendor: &str, cfg: &DeviceConfig) -> DeviceDescriptor {
        DeviceDescriptor {
            info: DeviceInfo {
                name: cfg.name.clone(),
                vendor: vendor.to_string(),
                device_type: cfg.device_type,
                compute_units: cfg.compute_units,
                max_work_group_size: cfg.max_work_group_size,
                global_mem_size: cfg.global_mem_size,
                capabilities: DeviceCapabilities {
                    fp64: cfg.fp64,
                    profiling: true,
                },
            },
            backend: DeviceBackend::Host(HostDevice {
                workers: self.config.workers_for(cfg.compute_units),
                stack_size: self.config.stack_size,
                pool: Mutex::new(None),
            }),
        }
    }
}

impl Driver for HostDriver {
    fn name(&self) -> &str {
        "host"
    }

    fn platforms(&self) -> Result<Vec<PlatformDescriptor>> {
        Ok(self.config.platforms.iter().map(|p| self.describe(p)).collect())
    }
}

/// Host-driver device: a work-stealing pool started on first launch.
pub(crate) struct HostDevice {
    workers: usize,
    stack_size: Option<usize>,
    pool: Mutex<Option<Arc<ComputePool>>>,
}

impl HostDevice {
    pub(crate) fn compute_pool(&self, name: &str) -> Result<Arc<ComputePool>> {
        let mut slot = self.pool.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(ComputePool::new(name, self.workers, self.stack_size)?);
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::DeviceType;

    #[test]
    fn test_host_driver_follows_config() {
        let config = Config::builder()
            .platforms(vec![PlatformConfig::new("p")
                .device(DeviceConfig::cpu().compute_units(3))
                .device(DeviceConfig::gpu())])
            .max_workers(2)
            .build()
            .unwrap();

        let platforms = HostDriver::new(&config).platforms().unwrap();
        assert_eq!(platforms.len(), 1);
        assert_eq!(platforms[0].info().name, "p");

        let types: Vec<DeviceType> = platforms[0].device_infos().map(|d| d.device_type).collect();
        assert_eq!(types, vec![DeviceType::Cpu, DeviceType::Gpu]);

        match &platforms[0].devices[0].backend {
            DeviceBackend::Host(host) => assert_eq!(host.workers, 2),
            #[cfg(feature = "opencl")]
            DeviceBackend::OpenCl(_) => panic!("expected a host device"),
        }
    }
}
