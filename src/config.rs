use crate::error::{Error, Result};
use crate::platform::DeviceType;
use std::str::FromStr;

/// Environment variable read by [`Config::from_env`].
pub const PLATFORMS_ENV: &str = "PARCL_PLATFORMS";

/// Environment variable selecting the driver in [`Config::from_env`].
pub const DRIVER_ENV: &str = "PARCL_DRIVER";

/// Which driver [`Registry::discover`](crate::Registry::discover) asks for
/// platforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DriverKind {
    /// Software devices laid out by [`Config::platforms`], run on host threads.
    #[default]
    Host,
    /// Installed OpenCL implementations. Needs the `opencl` feature.
    OpenCl,
}

impl FromStr for DriverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(DriverKind::Host),
            "opencl" | "cl" => Ok(DriverKind::OpenCl),
            other => Err(Error::config(format!("unknown driver '{}'", other))),
        }
    }
}

/// Layout of one device exposed by the host driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub device_type: DeviceType,
    pub compute_units: usize,
    pub max_work_group_size: usize,
    pub global_mem_size: u64,
    pub fp64: bool,
}

impl DeviceConfig {
    pub fn new<S: Into<String>>(name: S, device_type: DeviceType) -> Self {
        Self {
            name: name.into(),
            device_type,
            compute_units: num_cpus::get(),
            max_work_group_size: 256,
            global_mem_size: 1 << 30,
            fp64: true,
        }
    }

    /// Host CPU exposed as a compute device.
    pub fn cpu() -> Self {
        Self {
            max_work_group_size: 1024,
            ..Self::new("parcl host cpu", DeviceType::Cpu)
        }
    }

    /// Simulated accelerator backed by host threads. No fp64 support,
    /// like most consumer GPUs.
    pub fn gpu() -> Self {
        Self {
            fp64: false,
            ..Self::new("parcl simulated gpu", DeviceType::Gpu)
        }
    }

    pub fn compute_units(mut self, n: usize) -> Self {
        self.compute_units = n;
        self
    }

    pub fn max_work_group_size(mut self, n: usize) -> Self {
        self.max_work_group_size = n;
        self
    }

    pub fn fp64(mut self, enable: bool) -> Self {
        self.fp64 = enable;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("device name must not be empty"));
        }
        if self.compute_units == 0 || self.compute_units > 1024 {
            return Err(Error::config(format!(
                "device '{}': compute_units must be in 1..=1024",
                self.name
            )));
        }
        if self.max_work_group_size == 0 {
            return Err(Error::config(format!(
                "device '{}': max_work_group_size must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// Layout of one platform exposed by the host driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub devices: Vec<DeviceConfig>,
}

impl PlatformConfig {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            vendor: "parcl".to_string(),
            version: concat!("parcl ", env!("CARGO_PKG_VERSION")).to_string(),
            devices: Vec::new(),
        }
    }

    pub fn device(mut self, device: DeviceConfig) -> Self {
        self.devices.push(device);
        self
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::new("parcl host platform")
            .device(DeviceConfig::gpu())
            .device(DeviceConfig::cpu())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub driver: DriverKind,
    /// Host driver layout. Ignored by other drivers.
    pub platforms: Vec<PlatformConfig>,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
    /// Caps the worker count of every device pool, whatever the device
    /// reports as compute units.
    pub max_workers: Option<usize>,
    /// Threads running the commands of one out-of-order queue.
    pub queue_engines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: DriverKind::Host,
            platforms: vec![PlatformConfig::default()],
            thread_name_prefix: "parcl".to_string(),
            stack_size: Some(2 * 1024 * 1024),
            max_workers: None,
            queue_engines: 4,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Default config, adjusted from the environment:
    ///
    /// - `PARCL_DRIVER` picks the driver (`host` or `opencl`).
    /// - `PARCL_PLATFORMS` sets the device mix of the single host platform
    ///   (e.g. `cpu`, `gpu,cpu`, `none`).
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();
        if let Ok(driver) = std::env::var(DRIVER_ENV) {
            builder = builder.driver(driver.parse()?);
        }
        if let Ok(mix) = std::env::var(PLATFORMS_ENV) {
            builder = builder.device_mix(&mix)?;
        }
        builder.build()
    }

    pub fn validate(&self) -> Result<()> {
        if self.driver == DriverKind::OpenCl && !cfg!(feature = "opencl") {
            return Err(Error::config(
                "the OpenCL driver needs parcl built with the `opencl` feature",
            ));
        }

        for platform in &self.platforms {
            if platform.name.trim().is_empty() {
                return Err(Error::config("platform name must not be empty"));
            }
            for device in &platform.devices {
                device.validate()?;
            }
        }

        if let Some(0) = self.max_workers {
            return Err(Error::config("max_workers must be > 0"));
        }

        if self.queue_engines == 0 {
            return Err(Error::config("queue_engines must be > 0"));
        }

        if let Some(size) = self.stack_size {
            if size < 64 * 1024 {
                return Err(Error::config("stack_size too small (min 64 KiB)"));
            }
        }

        Ok(())
    }

    /// Number of pool workers for a device with `compute_units`.
    pub fn workers_for(&self, compute_units: usize) -> usize {
        let n = compute_units.max(1);
        match self.max_workers {
            Some(cap) => n.min(cap),
            None => n,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn driver(mut self, driver: DriverKind) -> Self {
        self.config.driver = driver;
        self
    }

    /// Replace the platform layout. An empty list is legal and makes
    /// discovery fail with `NoPlatformFound`.
    pub fn platforms(mut self, platforms: Vec<PlatformConfig>) -> Self {
        self.config.platforms = platforms;
        self
    }

    pub fn platform(mut self, platform: PlatformConfig) -> Self {
        self.config.platforms.push(platform);
        self
    }

    /// One platform whose devices follow a comma separated list of
    /// categories. `none` yields no platform at all.
    pub fn device_mix(mut self, mix: &str) -> Result<Self> {
        let mix = mix.trim();
        if mix.eq_ignore_ascii_case("none") || mix.is_empty() {
            self.config.platforms.clear();
            return Ok(self);
        }

        let mut platform = PlatformConfig::new("parcl host platform");
        for part in mix.split(',') {
            let device = match part.trim().parse::<DeviceType>()? {
                DeviceType::Cpu => DeviceConfig::cpu(),
                DeviceType::Gpu => DeviceConfig::gpu(),
                DeviceType::Accelerator => {
                    DeviceConfig::new("parcl simulated accelerator", DeviceType::Accelerator)
                }
            };
            platform.devices.push(device);
        }
        self.config.platforms = vec![platform];
        Ok(self)
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = Some(n);
        self
    }

    pub fn queue_engines(mut self, n: usize) -> Self {
        self.config.queue_engines = n;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.platforms.len(), 1);

        let types: Vec<_> = config.platforms[0]
            .devices
            .iter()
            .map(|d| d.device_type)
            .collect();
        assert_eq!(types, vec![DeviceType::Gpu, DeviceType::Cpu]);
    }

    #[test]
    fn test_device_mix() {
        let config = Config::builder().device_mix("cpu").unwrap().build().unwrap();
        assert_eq!(config.platforms[0].devices.len(), 1);
        assert_eq!(config.platforms[0].devices[0].device_type, DeviceType::Cpu);

        let config = Config::builder().device_mix("none").unwrap().build().unwrap();
        assert!(config.platforms.is_empty());

        assert!(Config::builder().device_mix("cpu,fpga").is_err());
    }

    #[test]
    fn test_invalid_device() {
        let result = Config::builder()
            .platforms(vec![
                PlatformConfig::new("p").device(DeviceConfig::cpu().compute_units(0))
            ])
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_workers_for() {
        let config = Config::builder().max_workers(2).build().unwrap();
        assert_eq!(config.workers_for(8), 2);
        assert_eq!(config.workers_for(1), 1);
        assert!(Config::builder().max_workers(0).build().is_err());
        assert!(Config::builder().queue_engines(0).build().is_err());
    }

    #[test]
    fn test_driver_kind() {
        assert_eq!("Host".parse::<DriverKind>().unwrap(), DriverKind::Host);
        assert_eq!("opencl".parse::<DriverKind>().unwrap(), DriverKind::OpenCl);
        assert!("cuda".parse::<DriverKind>().is_err());

        let opencl = Config::builder().driver(DriverKind::OpenCl).build();
        assert_eq!(opencl.is_ok(), cfg!(feature = "opencl"));
    }
}
