//! Kernel invocations and argument binding.

use crate::error::{Error, Result};
use crate::memory::Buffer;
use crate::platform::Device;
use crate::program::interp::{self, Binding, WorkGeometry};
use crate::program::{CompiledKernel, KernelDef, KernelImage, ParamInfo, ParamType, Program, ScalarType, Value};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvocationId(u64);

/// Scalar kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Char(i8),
    UChar(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
}

impl Scalar {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Scalar::Char(_) => ScalarType::Char,
            Scalar::UChar(_) => ScalarType::UChar,
            Scalar::Short(_) => ScalarType::Short,
            Scalar::UShort(_) => ScalarType::UShort,
            Scalar::Int(_) => ScalarType::Int,
            Scalar::UInt(_) => ScalarType::UInt,
            Scalar::Long(_) => ScalarType::Long,
            Scalar::ULong(_) => ScalarType::ULong,
            Scalar::Float(_) => ScalarType::Float,
            Scalar::Double(_) => ScalarType::Double,
        }
    }

    pub(crate) fn value(&self) -> Value {
        match *self {
            Scalar::Char(v) => Value::Int(v as i64),
            Scalar::UChar(v) => Value::Int(v as i64),
            Scalar::Short(v) => Value::Int(v as i64),
            Scalar::UShort(v) => Value::Int(v as i64),
            Scalar::Int(v) => Value::Int(v as i64),
            Scalar::UInt(v) => Value::Int(v as i64),
            Scalar::Long(v) => Value::Int(v),
            Scalar::ULong(v) => Value::Int(v as i64),
            Scalar::Float(v) => Value::Float(v as f64),
            Scalar::Double(v) => Value::Float(v),
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Scalar {
                fn from(v: $ty) -> Self {
                    Scalar::$variant(v)
                }
            }

            impl From<$ty> for KernelArg {
                fn from(v: $ty) -> Self {
                    KernelArg::Scalar(Scalar::$variant(v))
                }
            }
        )*
    };
}

scalar_from! {
    i8 => Char,
    u8 => UChar,
    i16 => Short,
    u16 => UShort,
    i32 => Int,
    u32 => UInt,
    i64 => Long,
    u64 => ULong,
    f32 => Float,
    f64 => Double,
}

impl From<usize> for Scalar {
    fn from(v: usize) -> Self {
        Scalar::ULong(v as u64)
    }
}

impl From<usize> for KernelArg {
    fn from(v: usize) -> Self {
        KernelArg::Scalar(v.into())
    }
}

/// Value bound to one kernel parameter.
#[derive(Debug, Clone)]
pub enum KernelArg {
    Buffer(Buffer),
    Scalar(Scalar),
}

impl From<Buffer> for KernelArg {
    fn from(buffer: Buffer) -> Self {
        KernelArg::Buffer(buffer)
    }
}

impl From<&Buffer> for KernelArg {
    fn from(buffer: &Buffer) -> Self {
        KernelArg::Buffer(buffer.clone())
    }
}

impl From<Scalar> for KernelArg {
    fn from(scalar: Scalar) -> Self {
        KernelArg::Scalar(scalar)
    }
}

/// A kernel entry point plus its argument bindings.
///
/// Handles come from [`Program::entry_point`]; each one is independent.
/// Binding takes `&mut self`, so one handle cannot be re-bound while
/// another thread dispatches it; give each dispatching thread its own
/// handle. Enqueueing snapshots the bindings, so re-binding after an
/// enqueue does not affect the queued launch.
pub struct KernelInvocation {
    id: InvocationId,
    program: Program,
    kernel: Arc<KernelDef>,
    args: Vec<Option<KernelArg>>,
}

impl KernelInvocation {
    pub(crate) fn new(program: Program, kernel: Arc<KernelDef>) -> Self {
        let args = vec![None; kernel.params.len()];
        Self {
            id: InvocationId(NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed)),
            program,
            kernel,
            args,
        }
    }

    pub fn id(&self) -> InvocationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.kernel.name
    }

    pub fn num_args(&self) -> usize {
        self.kernel.params.len()
    }

    pub fn params(&self) -> &[ParamInfo] {
        &self.kernel.params
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Bind argument `index`.
    pub fn set_arg<A: Into<KernelArg>>(&mut self, index: usize, arg: A) -> Result<()> {
        let arg = arg.into();
        let param = self.kernel.params.get(index).ok_or_else(|| {
            Error::argument(format!(
                "kernel `{}` takes {} arguments, index {} is out of range",
                self.kernel.name,
                self.kernel.params.len(),
                index
            ))
        })?;

        match (&param.ty, &arg) {
            (ParamType::Pointer { .. }, KernelArg::Buffer(buffer)) => {
                buffer.ensure_live()?;
                self.program
                    .context()
                    .ensure_same(&buffer.shared.context, "buffer")?;
            }
            (ParamType::Scalar(expected), KernelArg::Scalar(scalar)) => {
                if scalar.scalar_type() != *expected {
                    return Err(Error::argument(format!(
                        "argument {} (`{}`) of `{}` is `{}`, got `{}`",
                        index,
                        param.name,
                        self.kernel.name,
                        expected,
                        scalar.scalar_type()
                    )));
                }
            }
            (ParamType::Pointer { .. }, KernelArg::Scalar(_)) => {
                return Err(Error::argument(format!(
                    "argument {} (`{}`) of `{}` is a pointer and needs a buffer",
                    index, param.name, self.kernel.name
                )));
            }
            (ParamType::Scalar(expected), KernelArg::Buffer(_)) => {
                return Err(Error::argument(format!(
                    "argument {} (`{}`) of `{}` is a `{}`, not a buffer",
                    index, param.name, self.kernel.name, expected
                )));
            }
        }

        self.args[index] = Some(arg);
        Ok(())
    }

    /// Bind every argument at once. The count must match the kernel's
    /// parameter count exactly.
    pub fn set_args(&mut self, args: &[KernelArg]) -> Result<()> {
        if args.len() != self.kernel.params.len() {
            return Err(Error::argument(format!(
                "kernel `{}` takes {} arguments, {} given",
                self.kernel.name,
                self.kernel.params.len(),
                args.len()
            )));
        }
        for (index, arg) in args.iter().enumerate() {
            self.set_arg(index, arg.clone())?;
        }
        Ok(())
    }

    /// Validate the bindings and freeze them for a launch.
    pub(crate) fn snapshot(&self) -> Result<Launch> {
        let mut bindings = Vec::with_capacity(self.args.len());

        for (param, arg) in self.kernel.params.iter().zip(&self.args) {
            let binding = match arg {
                None => {
                    return Err(Error::argument(format!(
                        "argument `{}` of `{}` is not set",
                        param.name, self.kernel.name
                    )))
                }
                Some(KernelArg::Scalar(scalar)) => Binding::Scalar(scalar.value()),
                Some(KernelArg::Buffer(buffer)) => {
                    buffer.ensure_live()?;
                    let mode = buffer.access_mode();
                    if param.writes && !mode.kernel_can_write() {
                        return Err(Error::AccessViolation(format!(
                            "`{}` writes parameter `{}` but buffer {:?} is {:?}",
                            self.kernel.name,
                            param.name,
                            buffer.id(),
                            mode
                        )));
                    }
                    if param.reads && !mode.kernel_can_read() {
                        return Err(Error::AccessViolation(format!(
                            "`{}` reads parameter `{}` but buffer {:?} is {:?}",
                            self.kernel.name,
                            param.name,
                            buffer.id(),
                            mode
                        )));
                    }
                    Binding::Buffer(buffer.clone())
                }
            };
            bindings.push(binding);
        }

        Ok(Launch {
            kernel: Arc::clone(&self.kernel),
            bindings: Arc::new(bindings),
        })
    }
}

impl fmt::Debug for KernelInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelInvocation")
            .field("id", &self.id)
            .field("kernel", &self.kernel.name)
            .field("args", &self.args)
            .finish()
    }
}

/// A kernel with frozen argument bindings, ready to run.
#[derive(Clone)]
pub(crate) struct Launch {
    kernel: Arc<KernelDef>,
    bindings: Arc<Vec<Binding>>,
}

impl Launch {
    pub(crate) fn name(&self) -> &str {
        &self.kernel.name
    }

    /// Run the launch on `device` and block until it has finished. Returns
    /// the device-measured execution time when the driver reports one.
    pub(crate) fn run(&self, device: &Device, geometry: WorkGeometry) -> Result<Option<u64>> {
        match &self.kernel.image {
            KernelImage::Host(compiled) => {
                self.run_host(device, compiled, geometry)?;
                Ok(None)
            }
            #[cfg(feature = "opencl")]
            KernelImage::OpenCl(program) => {
                crate::opencl::launch(program, &self.kernel, &self.bindings, device, geometry).map(Some)
            }
        }
    }

    /// Run every work-group on the device's compute pool. The first fault
    /// of any group fails the launch.
    fn run_host(&self, device: &Device, compiled: &Arc<CompiledKernel>, geometry: WorkGeometry) -> Result<()> {
        let pool = device.compute_pool()?;
        let groups = geometry.total_groups();
        let fault: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let finished = Arc::new(AtomicUsize::new(0));

        {
            let kernel = Arc::clone(compiled);
            let bindings = Arc::clone(&self.bindings);
            let fault = Arc::clone(&fault);
            let finished = Arc::clone(&finished);

            pool.scatter(groups, move |group| {
                if fault.lock().is_some() {
                    finished.fetch_add(1, Ordering::AcqRel);
                    return;
                }
                if let Err(msg) = interp::run_group(&kernel, &bindings, &geometry, group) {
                    let mut slot = fault.lock();
                    if slot.is_none() {
                        *slot = Some(format!("kernel `{}`, work-group {}: {}", kernel.name, group, msg));
                    }
                }
                finished.fetch_add(1, Ordering::AcqRel);
            });
        }

        if let Some(msg) = fault.lock().take() {
            return Err(Error::execution(msg));
        }
        if finished.load(Ordering::Acquire) != groups {
            return Err(Error::execution(format!(
                "kernel `{}`: a work-group panicked",
                self.kernel.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::Context;
    use crate::memory::AccessMode;
    use crate::platform::{DeviceType, Registry};

    const SRC: &str = "kernel void scale(__global const float *src, __global float *dst, float k) {
        size_t i = get_global_id(0);
        dst[i] = src[i] * k;
    }";

    fn setup() -> (Registry, Context, Program) {
        let registry = Registry::discover(&Config::default()).unwrap();
        let ctx = Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap();
        let program = Program::build(&ctx, SRC).unwrap();
        (registry, ctx, program)
    }

    #[test]
    fn test_argument_type_checks() {
        let (_registry, ctx, program) = setup();
        let mut inv = program.entry_point("scale").unwrap();
        let buf = Buffer::new::<f32>(&ctx, AccessMode::ReadWrite, 4).unwrap();

        assert!(matches!(inv.set_arg(0, 1.0f32), Err(Error::ArgumentMismatch(_))));
        assert!(matches!(inv.set_arg(2, &buf), Err(Error::ArgumentMismatch(_))));
        assert!(matches!(inv.set_arg(2, 1.0f64), Err(Error::ArgumentMismatch(_))));
        assert!(matches!(inv.set_arg(3, 1.0f32), Err(Error::ArgumentMismatch(_))));

        inv.set_arg(0, &buf).unwrap();
        inv.set_arg(1, &buf).unwrap();
        inv.set_arg(2, 2.0f32).unwrap();
        assert!(inv.snapshot().is_ok());
    }

    #[test]
    fn test_set_args_arity() {
        let (_registry, ctx, program) = setup();
        let mut inv = program.entry_point("scale").unwrap();
        let buf = Buffer::new::<f32>(&ctx, AccessMode::ReadWrite, 4).unwrap();

        let err = inv.set_args(&[KernelArg::from(&buf), KernelArg::from(&buf)]).unwrap_err();
        assert!(matches!(err, Error::ArgumentMismatch(_)));
        inv.set_args(&[(&buf).into(), (&buf).into(), 3.0f32.into()]).unwrap();
    }

    #[test]
    fn test_unset_argument_rejected_at_snapshot() {
        let (_registry, _ctx, program) = setup();
        let inv = program.entry_point("scale").unwrap();
        assert!(matches!(inv.snapshot(), Err(Error::ArgumentMismatch(_))));
    }

    #[test]
    fn test_access_mode_enforced() {
        let (_registry, ctx, program) = setup();
        let mut inv = program.entry_point("scale").unwrap();
        let src = Buffer::new::<f32>(&ctx, AccessMode::WriteOnly, 4).unwrap();
        let dst = Buffer::new::<f32>(&ctx, AccessMode::ReadOnly, 4).unwrap();
        inv.set_args(&[(&src).into(), (&dst).into(), 1.0f32.into()]).unwrap();

        assert!(matches!(inv.snapshot(), Err(Error::AccessViolation(_))));
    }

    #[test]
    fn test_foreign_buffer_rejected() {
        let (registry, _ctx, program) = setup();
        let other = Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap();
        let buf = Buffer::new::<f32>(&other, AccessMode::ReadWrite, 4).unwrap();

        let mut inv = program.entry_point("scale").unwrap();
        assert!(matches!(inv.set_arg(0, &buf), Err(Error::ContextMismatch(_))));
    }

    #[test]
    fn test_launch_runs_on_pool() {
        let (_registry, ctx, program) = setup();
        let src = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let dst = Buffer::new::<f32>(&ctx, AccessMode::WriteOnly, 4).unwrap();

        let mut inv = program.entry_point("scale").unwrap();
        inv.set_args(&[(&src).into(), (&dst).into(), 0.5f32.into()]).unwrap();

        let geometry = WorkGeometry {
            dims: 1,
            global: [4, 1, 1],
            local: [2, 1, 1],
            offset: [0; 3],
        };
        let device_ns = inv.snapshot().unwrap().run(&ctx.devices()[0], geometry).unwrap();
        assert_eq!(device_ns, None);

        let mut out = [0f32; 4];
        dst.read_bytes(bytemuck::cast_slice_mut(&mut out)).unwrap();
        assert_eq!(out, [0.5, 1.0, 1.5, 2.0]);
    }
}
