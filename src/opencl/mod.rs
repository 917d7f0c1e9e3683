//! Driver backed by an installed OpenCL runtime.
//!
//! Enabled by the `opencl` feature and selected with
//! [`DriverKind::OpenCl`](crate::config::DriverKind). Platforms and devices
//! come from the ICD loader; programs go through the vendor compiler with
//! its build log surfaced as [`Error::Build`]; buffers live in device
//! memory; every device gets a profiling queue, so kernel timestamps are
//! measured by the device.

mod memory;
mod program;

pub(crate) use memory::ClBuffer;
pub(crate) use program::{launch, ClProgram};

use crate::error::{Error, Result};
use crate::platform::driver::{DeviceBackend, DeviceDescriptor, Driver, PlatformDescriptor};
use crate::platform::{Device, DeviceCapabilities, DeviceInfo, DeviceType, PlatformInfo};
use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context as RawContext;
use opencl3::device::{
    Device as RawDevice, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU,
};
use opencl3::platform::{get_platforms, Platform as RawPlatform};
use opencl3::types::cl_device_id;
use std::fmt;
use std::sync::Arc;

fn driver_error<E: fmt::Display>(call: &'static str) -> impl FnOnce(E) -> Error {
    move |err| Error::driver(format!("{}: {}", call, err))
}

/// Platforms and devices reported by the OpenCL ICD loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenClDriver;

impl OpenClDriver {
    pub fn new() -> Self {
        Self
    }

    fn describe(platform: &RawPlatform) -> Result<PlatformDescriptor> {
        let info = PlatformInfo {
            name: platform.name().map_err(driver_error("clGetPlatformInfo"))?,
            vendor: platform.vendor().unwrap_or_default(),
            version: platform.version().unwrap_or_default(),
        };

        // A platform without devices reports an error rather than an empty list.
        let ids = platform.get_devices(CL_DEVICE_TYPE_ALL).unwrap_or_default();
        let devices = ids
            .into_iter()
            .map(|id| Self::describe_device(RawDevice::new(id)))
            .collect::<Result<Vec<_>>>()?;

        Ok(PlatformDescriptor { info, devices })
    }

    fn describe_device(device: RawDevice) -> Result<DeviceDescriptor> {
        let kind = device.dev_type().map_err(driver_error("clGetDeviceInfo"))?;
        let device_type = if kind & CL_DEVICE_TYPE_GPU != 0 {
            DeviceType::Gpu
        } else if kind & CL_DEVICE_TYPE_CPU != 0 {
            DeviceType::Cpu
        } else {
            DeviceType::Accelerator
        };

        let info = DeviceInfo {
            name: device.name().map_err(driver_error("clGetDeviceInfo"))?,
            vendor: device.vendor().unwrap_or_default(),
            device_type,
            compute_units: device.max_compute_units().map_err(driver_error("clGetDeviceInfo"))? as usize,
            max_work_group_size: device.max_work_group_size().map_err(driver_error("clGetDeviceInfo"))?,
            global_mem_size: device.global_mem_size().map_err(driver_error("clGetDeviceInfo"))?,
            capabilities: DeviceCapabilities {
                fp64: device.double_fp_config().map(|c| c != 0).unwrap_or(false),
                profiling: true,
            },
        };

        Ok(DeviceDescriptor {
            info,
            backend: DeviceBackend::OpenCl(ClDevice { device }),
        })
    }
}

impl Driver for OpenClDriver {
    fn name(&self) -> &str {
        "opencl"
    }

    fn platforms(&self) -> Result<Vec<PlatformDescriptor>> {
        let platforms = match get_platforms() {
            Ok(platforms) => platforms,
            Err(err) => {
                // No ICD installed.
                tracing::debug!(error = %err, "OpenCL platform enumeration failed");
                return Ok(Vec::new());
            }
        };

        platforms.iter().map(Self::describe).collect()
    }
}

/// One OpenCL device.
pub(crate) struct ClDevice {
    device: RawDevice,
}

// SAFETY: a device id is an immutable handle owned by the ICD; OpenCL allows
// it to be used from any thread.
unsafe impl Send for ClDevice {}
unsafe impl Sync for ClDevice {}

impl ClDevice {
    fn id(&self) -> cl_device_id {
        self.device.id()
    }
}

fn cl_device(device: &Device) -> Result<&ClDevice> {
    match device.backend() {
        DeviceBackend::OpenCl(cl) => Ok(cl),
        DeviceBackend::Host(_) => Err(Error::IncompatibleDeviceSet(format!(
            "device '{}' is not an OpenCL device",
            device.name()
        ))),
    }
}

struct ClShared {
    context: RawContext,
    /// One profiling queue per context device, in context order.
    queues: Vec<(cl_device_id, CommandQueue)>,
    /// Blocking host transfers.
    transfer: CommandQueue,
}

// SAFETY: OpenCL 1.1+ makes every API call thread-safe except
// clSetKernelArg, and kernels are created per launch, never shared.
unsafe impl Send for ClShared {}
unsafe impl Sync for ClShared {}

impl ClShared {
    fn queue_for(&self, device: &Device) -> Result<&CommandQueue> {
        let id = cl_device(device)?.id();
        self.queues
            .iter()
            .find(|(d, _)| *d == id)
            .map(|(_, q)| q)
            .ok_or_else(|| {
                Error::InvalidDevice(format!("device '{}' has no queue in this context", device.name()))
            })
    }
}

/// Native context plus the queues parcl drives it through.
pub(crate) struct ClContext {
    shared: Arc<ClShared>,
}

impl ClContext {
    pub(crate) fn new(devices: &[Device]) -> Result<Self> {
        let ids = devices
            .iter()
            .map(|d| cl_device(d).map(ClDevice::id))
            .collect::<Result<Vec<_>>>()?;

        let context = RawContext::from_devices(&ids, &[], None, std::ptr::null_mut())
            .map_err(driver_error("clCreateContext"))?;

        let queues = ids
            .iter()
            .map(|&id| {
                CommandQueue::create_with_properties(&context, id, CL_QUEUE_PROFILING_ENABLE, 0)
                    .map(|q| (id, q))
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(driver_error("clCreateCommandQueueWithProperties"))?;
        let transfer = CommandQueue::create_with_properties(&context, ids[0], 0, 0)
            .map_err(driver_error("clCreateCommandQueueWithProperties"))?;

        tracing::debug!(devices = ids.len(), "created OpenCL context");

        Ok(Self {
            shared: Arc::new(ClShared {
                context,
                queues,
                transfer,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DriverKind};
    use crate::context::Context;
    use crate::memory::{AccessMode, Buffer};
    use crate::platform::Registry;
    use crate::program::{AddressSpace, ParamType, Program, ScalarType};
    use crate::queue::{CommandQueue as Queue, QueueProperties};

    fn registry() -> Option<Registry> {
        let config = Config::builder().driver(DriverKind::OpenCl).build().unwrap();
        // Skipped on machines without an OpenCL device.
        Registry::discover(&config)
            .ok()
            .filter(|r| !r.all_devices().is_empty())
    }

    #[test]
    fn test_enumeration_does_not_panic() {
        let platforms = OpenClDriver::new().platforms().unwrap_or_default();
        for platform in &platforms {
            assert!(!platform.info().name.is_empty());
            assert!(platform.device_infos().all(|d| d.capabilities.profiling));
        }
    }

    #[test]
    fn test_build_log_from_vendor_compiler() {
        let Some(registry) = registry() else { return };
        let ctx = Context::new(&registry.all_devices()[..1]).unwrap();

        let err = Program::build(&ctx, "__kernel void k(__global int *o) { o[0] = missing; }").unwrap_err();
        assert!(matches!(err, Error::Build { ref log } if log.contains("missing")), "{:?}", err);
    }

    #[test]
    fn test_kernel_on_device() {
        let Some(registry) = registry() else { return };
        let ctx = Context::new(&registry.all_devices()[..1]).unwrap();
        let device = ctx.devices()[0].clone();

        let program = Program::build(
            &ctx,
            "__kernel void scale(__global const float *src, __global float *dst, float k) {
                 size_t i = get_global_id(0);
                 dst[i] = src[i] * k;
             }",
        )
        .unwrap();
        let params = program.kernel_params("scale").unwrap();
        assert_eq!(
            params[0].ty,
            ParamType::Pointer {
                elem: ScalarType::Float,
                space: AddressSpace::Global,
                is_const: true
            }
        );
        assert_eq!(params[2].ty, ParamType::Scalar(ScalarType::Float));

        let src = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let dst = Buffer::new::<f32>(&ctx, AccessMode::WriteOnly, 4).unwrap();
        let mut scale = program.entry_point("scale").unwrap();
        scale.set_args(&[(&src).into(), (&dst).into(), 0.5f32.into()]).unwrap();

        let queue = Queue::new(&ctx, &device, QueueProperties::new().profiling(true)).unwrap();
        let done = queue.enqueue_kernel(&scale, &[4], None, &[]).unwrap();
        let mut out = [0f32; 4];
        queue.read_buffer(&dst, &mut out, &[done.clone()]).unwrap();
        assert_eq!(out, [0.5, 1.0, 1.5, 2.0]);

        let t = done.profiling_info().unwrap();
        assert!(t.start <= t.end);
    }
}
