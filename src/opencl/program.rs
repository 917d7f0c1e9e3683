use super::{driver_error, ClContext, ClShared};
use crate::error::{Error, Result};
use crate::platform::Device;
use crate::program::interp::{Binding, WorkGeometry};
use crate::program::{AddressSpace, BuildOptions, KernelDef, KernelImage, ParamInfo, ParamType, ScalarType, Value};
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::program::Program as RawProgram;
use opencl3::types::{cl_kernel_arg_address_qualifier, cl_kernel_arg_type_qualifier};
use std::sync::Arc;

// cl.h values; opencl3 does not re-export the kernel argument qualifiers.
const CL_KERNEL_ARG_ADDRESS_GLOBAL: cl_kernel_arg_address_qualifier = 0x119B;
const CL_KERNEL_ARG_ADDRESS_CONSTANT: cl_kernel_arg_address_qualifier = 0x119C;
const CL_KERNEL_ARG_ADDRESS_LOCAL: cl_kernel_arg_address_qualifier = 0x119D;
const CL_KERNEL_ARG_TYPE_CONST: cl_kernel_arg_type_qualifier = 1;

/// Program built by the vendor compiler.
pub(crate) struct ClProgram {
    shared: Arc<ClShared>,
    program: RawProgram,
}

// SAFETY: a built cl_program is immutable and may be used from any thread.
unsafe impl Send for ClProgram {}
unsafe impl Sync for ClProgram {}

impl ClContext {
    /// Build `source` for `devices` and describe every kernel in it. A
    /// compiler failure returns the build log of each target.
    pub(crate) fn build_program(
        &self,
        source: &str,
        devices: &[Device],
        options: &BuildOptions,
    ) -> Result<Vec<Arc<KernelDef>>> {
        let ids = devices
            .iter()
            .map(|d| super::cl_device(d).map(|cl| cl.id()))
            .collect::<Result<Vec<_>>>()?;

        let mut flags = String::from("-cl-kernel-arg-info");
        for (name, value) in options.defines() {
            flags.push_str(&format!(" -D {}={}", name, value));
        }

        let mut program = RawProgram::create_from_source(&self.shared.context, source)
            .map_err(driver_error("clCreateProgramWithSource"))?;

        if let Err(err) = program.build(&ids, &flags) {
            let mut log = String::new();
            for (device, &id) in devices.iter().zip(&ids) {
                let device_log = program.get_build_log(id).unwrap_or_default();
                if !device_log.trim().is_empty() {
                    log.push_str(&format!("{}:\n{}\n", device.name(), device_log.trim_end()));
                }
            }
            if log.is_empty() {
                log = err.to_string();
            }
            tracing::warn!(error = %err, "OpenCL program build failed");
            return Err(Error::build(log));
        }

        let program = Arc::new(ClProgram {
            shared: Arc::clone(&self.shared),
            program,
        });

        let names = program
            .program
            .get_kernel_names()
            .map_err(driver_error("clGetProgramInfo"))?;

        names
            .split(';')
            .filter(|name| !name.is_empty())
            .map(|name| {
                let kernel = Kernel::create(&program.program, name).map_err(driver_error("clCreateKernel"))?;
                Ok(Arc::new(KernelDef {
                    name: name.to_string(),
                    params: describe_params(&kernel, name)?,
                    image: KernelImage::OpenCl(Arc::clone(&program)),
                }))
            })
            .collect()
    }
}

fn describe_params(kernel: &Kernel, kernel_name: &str) -> Result<Vec<ParamInfo>> {
    let count = kernel.num_args().map_err(driver_error("clGetKernelInfo"))?;

    (0..count)
        .map(|index| {
            let name = kernel.get_arg_name(index).map_err(driver_error("clGetKernelArgInfo"))?;
            let type_name = kernel
                .get_arg_type_name(index)
                .map_err(driver_error("clGetKernelArgInfo"))?;
            let address = kernel
                .get_arg_address_qualifier(index)
                .map_err(driver_error("clGetKernelArgInfo"))?;
            let qualifiers = kernel
                .get_arg_type_qualifier(index)
                .map_err(driver_error("clGetKernelArgInfo"))?;

            let unsupported = || {
                Error::build(format!(
                    "kernel `{}`: parameter `{}` of type `{}` cannot be bound",
                    kernel_name, name, type_name
                ))
            };

            let (base, is_pointer) = match type_name.trim().strip_suffix('*') {
                Some(base) => (base.trim(), true),
                None => (type_name.trim(), false),
            };
            let elem = scalar_type(base)
                .filter(|ty| *ty != ScalarType::Bool)
                .ok_or_else(unsupported)?;

            let ty = if is_pointer {
                let space = match address {
                    CL_KERNEL_ARG_ADDRESS_GLOBAL => AddressSpace::Global,
                    CL_KERNEL_ARG_ADDRESS_CONSTANT => AddressSpace::Constant,
                    CL_KERNEL_ARG_ADDRESS_LOCAL => return Err(unsupported()),
                    _ => AddressSpace::Private,
                };
                ParamType::Pointer {
                    elem,
                    space,
                    is_const: qualifiers & CL_KERNEL_ARG_TYPE_CONST != 0
                        || space == AddressSpace::Constant,
                }
            } else {
                ParamType::Scalar(elem)
            };

            // The vendor compiler does not say which pointers are loaded
            // from; only const pointers are known to be read-only.
            let reads = matches!(ty, ParamType::Pointer { is_const: true, .. });
            Ok(ParamInfo {
                name,
                ty,
                slot: None,
                reads,
                writes: false,
            })
        })
        .collect()
}

fn scalar_type(name: &str) -> Option<ScalarType> {
    let name = match name {
        "unsigned char" => "uchar",
        "unsigned short" => "ushort",
        "unsigned int" => "uint",
        "unsigned long" => "ulong",
        other => other,
    };
    ScalarType::from_name(name)
}

/// Run one launch on `device`'s profiling queue and return the execution
/// time the device measured, in nanoseconds.
pub(crate) fn launch(
    program: &ClProgram,
    kernel: &KernelDef,
    bindings: &[Binding],
    device: &Device,
    geometry: WorkGeometry,
) -> Result<u64> {
    let queue = program.shared.queue_for(device)?;
    let raw_kernel = Kernel::create(&program.program, &kernel.name).map_err(driver_error("clCreateKernel"))?;

    let mut pinned = Vec::new();
    for binding in bindings {
        if let Binding::Buffer(buffer) = binding {
            let storage = buffer
                .cl_storage()
                .ok_or_else(|| Error::execution("buffer is not in OpenCL device memory"))?;
            pinned.push(storage.pin()?);
        }
    }

    let dims = geometry.dims;
    let mut exec = ExecuteKernel::new(&raw_kernel);
    let mut buffers = pinned.iter();

    for (param, binding) in kernel.params.iter().zip(bindings) {
        // SAFETY: each argument matches the parameter's size as reported by
        // the compiler; buffer handles stay pinned until the launch is done.
        unsafe {
            match (binding, &param.ty) {
                (Binding::Buffer(_), _) => {
                    let mem = buffers
                        .next()
                        .and_then(|p| p.raw())
                        .ok_or_else(|| Error::execution("buffer storage is gone"))?;
                    exec.set_arg(&mem);
                }
                (Binding::Scalar(value), ParamType::Scalar(ty)) => set_scalar(&mut exec, *ty, *value),
                (Binding::Scalar(_), ParamType::Pointer { .. }) => {
                    return Err(Error::argument(format!("`{}` is a pointer and needs a buffer", param.name)))
                }
            }
        }
    }

    exec.set_global_work_sizes(&geometry.global[..dims])
        .set_local_work_sizes(&geometry.local[..dims]);
    if geometry.offset[..dims].iter().any(|&o| o != 0) {
        exec.set_global_work_offsets(&geometry.offset[..dims]);
    }

    // SAFETY: every argument is set and the work sizes were validated
    // against the device at enqueue.
    let event = unsafe { exec.enqueue_nd_range(queue) }.map_err(driver_error("clEnqueueNDRangeKernel"))?;
    event
        .wait()
        .map_err(|err| Error::execution(format!("kernel `{}`: {}", kernel.name, err)))?;
    drop(pinned);

    let start = event.profiling_command_start().map_err(driver_error("clGetEventProfilingInfo"))?;
    let end = event.profiling_command_end().map_err(driver_error("clGetEventProfilingInfo"))?;
    Ok(end.saturating_sub(start))
}

/// # Safety
/// `exec`'s next argument must be a scalar of type `ty`.
unsafe fn set_scalar(exec: &mut ExecuteKernel, ty: ScalarType, value: Value) {
    let int = value.as_i64();
    let float = match value {
        Value::Float(f) => f,
        Value::Int(i) => i as f64,
    };
    match ty {
        ScalarType::Char => exec.set_arg(&(int as i8)),
        ScalarType::UChar | ScalarType::Bool => exec.set_arg(&(int as u8)),
        ScalarType::Short => exec.set_arg(&(int as i16)),
        ScalarType::UShort => exec.set_arg(&(int as u16)),
        ScalarType::Int => exec.set_arg(&(int as i32)),
        ScalarType::UInt => exec.set_arg(&(int as u32)),
        ScalarType::Long => exec.set_arg(&int),
        ScalarType::ULong => exec.set_arg(&(int as u64)),
        ScalarType::Float => exec.set_arg(&(float as f32)),
        ScalarType::Double => exec.set_arg(&float),
    };
}
