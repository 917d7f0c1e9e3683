//! Kernel programs.
//!
//! A [`Program`] is kernel source compiled for a set of devices of one
//! context. Contexts on the OpenCL driver hand the source to the vendor
//! compiler and surface its build log. The host driver compiles a C-like
//! subset itself: `__kernel void` entry points taking `__global`/`__constant`
//! pointers and scalars, with locals, structured control flow, the usual C
//! operators, work-item builtins (`get_global_id` and friends) and a few
//! math builtins.
//!
//! Building is all-or-nothing: the source is compiled once and then checked
//! against every target device. A kernel that uses `double` fails on any
//! target without the `fp64` capability, and the whole build fails with it.

mod ast;
mod compile;
mod diagnostics;
pub(crate) mod interp;
mod lexer;
mod parser;
mod types;

pub use ast::{AddressSpace, ParamType};
pub use compile::ParamInfo;
pub use types::ScalarType;

pub(crate) use compile::CompiledKernel;
pub(crate) use types::Value;

use crate::context::{Context, ContextBackend, ContextShared};
use crate::error::{Error, Result};
use crate::kernel::KernelInvocation;
use crate::platform::Device;
use diagnostics::Diagnostic;
use std::fmt;
use std::sync::Arc;

/// File name used for positions in build logs.
const SOURCE_NAME: &str = "program.cl";

/// Compiler options, in the `-D NAME[=VALUE]` style.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    defines: Vec<(String, String)>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object-like macro: every `name` token in the source is replaced by
    /// the tokens of `value`. A later define of the same name wins.
    pub fn define<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        let name = name.into();
        self.defines.retain(|(n, _)| *n != name);
        self.defines.push((name, value.into()));
        self
    }

    /// Parse an options string such as `"-D N=16 -DUSE_FAST"`. A define
    /// without a value gets `1`. Unrecognized options are logged and
    /// ignored.
    pub fn parse(options: &str) -> Result<Self> {
        let mut parsed = Self::new();
        let mut words = options.split_whitespace();

        while let Some(word) = words.next() {
            let define = match word.strip_prefix("-D") {
                Some("") => words
                    .next()
                    .ok_or_else(|| Error::build("build option `-D` is missing a macro name"))?,
                Some(rest) => rest,
                None => {
                    tracing::warn!(option = word, "ignoring unsupported build option");
                    continue;
                }
            };

            let (name, value) = define.split_once('=').unwrap_or((define, "1"));
            let valid = name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(Error::build(format!("invalid macro name `{}` in build options", name)));
            }
            parsed = parsed.define(name, value);
        }

        Ok(parsed)
    }

    pub fn defines(&self) -> &[(String, String)] {
        &self.defines
    }
}

/// One kernel entry point and the driver code that runs it.
pub(crate) struct KernelDef {
    pub(crate) name: String,
    pub(crate) params: Vec<ParamInfo>,
    pub(crate) image: KernelImage,
}

pub(crate) enum KernelImage {
    Host(Arc<CompiledKernel>),
    #[cfg(feature = "opencl")]
    OpenCl(Arc<crate::opencl::ClProgram>),
}

struct ProgramInner {
    context: Arc<ContextShared>,
    source: String,
    devices: Vec<Device>,
    options: BuildOptions,
    kernels: Vec<Arc<KernelDef>>,
}

/// Compiled kernel source. Cheap to clone.
#[derive(Clone)]
pub struct Program {
    inner: Arc<ProgramInner>,
}

impl Program {
    /// Build `source` for every device of `context`.
    pub fn build(context: &Context, source: &str) -> Result<Self> {
        Self::build_with(context, source, context.devices(), &BuildOptions::default())
    }

    /// Build `source` for `devices`, all of which must belong to `context`.
    pub fn build_with(
        context: &Context,
        source: &str,
        devices: &[Device],
        options: &BuildOptions,
    ) -> Result<Self> {
        if devices.is_empty() {
            return Err(Error::InvalidDevice("no target devices given".to_string()));
        }
        if let Some(outside) = devices.iter().find(|d| !context.contains(d)) {
            return Err(Error::InvalidDevice(format!(
                "device '{}' is not part of context {:?}",
                outside.name(),
                context.id()
            )));
        }

        let kernels = match &context.shared.backend {
            ContextBackend::Host => build_host(source, devices, options)?,
            #[cfg(feature = "opencl")]
            ContextBackend::OpenCl(cl) => cl.build_program(source, devices, options)?,
        };

        let mut unique: Vec<Device> = Vec::with_capacity(devices.len());
        for device in devices {
            if !unique.contains(device) {
                unique.push(device.clone());
            }
        }

        tracing::info!(
            context = ?context.id(),
            kernels = kernels.len(),
            devices = unique.len(),
            "built program"
        );

        Ok(Self {
            inner: Arc::new(ProgramInner {
                context: Arc::clone(&context.shared),
                source: source.to_string(),
                devices: unique,
                options: options.clone(),
                kernels,
            }),
        })
    }

    /// Kernel names in source order.
    pub fn kernel_names(&self) -> Vec<&str> {
        self.inner.kernels.iter().map(|k| k.name.as_str()).collect()
    }

    /// Parameters of a kernel, in declaration order.
    pub fn kernel_params(&self, name: &str) -> Result<&[ParamInfo]> {
        self.find(name).map(|k| k.params.as_slice())
    }

    /// Devices the program was built for.
    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn options(&self) -> &BuildOptions {
        &self.inner.options
    }

    pub fn is_built_for(&self, device: &Device) -> bool {
        self.inner.devices.contains(device)
    }

    /// A fresh invocation handle for kernel `name`. Every call returns an
    /// independent handle with its own argument bindings.
    pub fn entry_point(&self, name: &str) -> Result<KernelInvocation> {
        let kernel = Arc::clone(self.find(name)?);
        Ok(KernelInvocation::new(self.clone(), kernel))
    }

    fn find(&self, name: &str) -> Result<&Arc<KernelDef>> {
        self.inner
            .kernels
            .iter()
            .find(|k| k.name == name)
            .ok_or_else(|| Error::KernelNotFound(name.to_string()))
    }

    pub(crate) fn context(&self) -> &Arc<ContextShared> {
        &self.inner.context
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("kernels", &self.kernel_names())
            .field("devices", &self.inner.devices)
            .finish()
    }
}

fn compile_source(source: &str, options: &BuildOptions) -> std::result::Result<Vec<CompiledKernel>, Vec<Diagnostic>> {
    let tokens = lexer::lex(source, options.defines()).map_err(|d| vec![d])?;
    let decls = parser::parse(&tokens, source.len()).map_err(|d| vec![d])?;
    compile::compile(&decls)
}

/// Compile with the host driver and check every target's capabilities.
fn build_host(source: &str, devices: &[Device], options: &BuildOptions) -> Result<Vec<Arc<KernelDef>>> {
    let kernels = match compile_source(source, options) {
        Ok(kernels) => kernels,
        Err(diags) => {
            let log = diagnostics::render_all(source, SOURCE_NAME, &diags);
            tracing::warn!(errors = diags.len(), "program build failed");
            return Err(Error::build(log));
        }
    };

    let mut diags = Vec::new();
    for device in devices {
        for kernel in kernels.iter().filter(|k| k.requires_fp64) {
            if !device.capabilities().fp64 {
                diags.push(Diagnostic::new(
                    format!(
                        "kernel `{}` uses `double`, which device '{}' does not support",
                        kernel.name,
                        device.name()
                    ),
                    kernel.span.clone(),
                ));
            }
        }
    }
    if !diags.is_empty() {
        tracing::warn!(errors = diags.len(), "program rejected by target devices");
        return Err(Error::build(diagnostics::render_all(source, SOURCE_NAME, &diags)));
    }

    Ok(kernels
        .into_iter()
        .map(|kernel| {
            Arc::new(KernelDef {
                name: kernel.name.clone(),
                params: kernel.params.clone(),
                image: KernelImage::Host(Arc::new(kernel)),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DeviceConfig, PlatformConfig};
    use crate::platform::{DeviceType, Registry};

    const SUB: &str = "__kernel void sub(__global const int *a, __global int *out) {
        size_t i = get_global_id(0);
        out[i] = a[i] - 1;
    }";

    fn registry() -> Registry {
        Registry::discover(&Config::default()).unwrap()
    }

    #[test]
    fn test_build_and_entry_points() {
        let registry = registry();
        let ctx = Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap();
        let program = Program::build(&ctx, SUB).unwrap();

        assert_eq!(program.kernel_names(), vec!["sub"]);
        assert_eq!(program.devices(), ctx.devices());

        let first = program.entry_point("sub").unwrap();
        let second = program.entry_point("sub").unwrap();
        assert_ne!(first.id(), second.id());

        assert_eq!(
            program.entry_point("add").unwrap_err(),
            Error::KernelNotFound("add".into())
        );
    }

    #[test]
    fn test_build_log_has_position() {
        let registry = registry();
        let ctx = Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap();
        let err = Program::build(&ctx, "kernel void k(__global int *o) {\n  o[0] = missing;\n}").unwrap_err();

        let Error::Build { log } = err else {
            panic!("expected build error");
        };
        assert!(log.starts_with("program.cl:2:10: error: use of undeclared identifier `missing`"), "{}", log);
        assert!(log.contains("\n  o[0] = missing;\n         ^^^^^^^"), "{}", log);
    }

    #[test]
    fn test_fp64_all_or_nothing() {
        let config = Config::builder()
            .platforms(vec![PlatformConfig::new("p")
                .device(DeviceConfig::cpu())
                .device(DeviceConfig::gpu().fp64(false))])
            .build()
            .unwrap();
        let registry = Registry::discover(&config).unwrap();
        let platform = &registry.platforms()[0];
        let ctx = Context::new(platform.devices()).unwrap();

        let src = "kernel void k(__global double *x) { x[0] = 1.0; }";
        let err = Program::build(&ctx, src).unwrap_err();
        assert!(matches!(err, Error::Build { ref log } if log.contains("does not support")));

        let cpu = platform.devices_of_type(DeviceType::Cpu);
        let program = Program::build_with(&ctx, src, &cpu, &BuildOptions::default()).unwrap();
        assert_eq!(program.devices(), &cpu[..]);
    }

    #[test]
    fn test_foreign_device_rejected() {
        let registry = registry();
        let platform = &registry.platforms()[0];
        let ctx = Context::from_type(platform, DeviceType::Cpu).unwrap();
        let gpu = platform.devices_of_type(DeviceType::Gpu);

        let err = Program::build_with(&ctx, SUB, &gpu, &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidDevice(_)));
    }

    #[test]
    fn test_unsupported_directive_fails_build() {
        let registry = registry();
        let ctx = Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap();

        let src = "#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n\
                   #if 0\n\
                   kernel void k(__global int *o) { o[0] = 1; }\n\
                   #endif\n";
        let Error::Build { log } = Program::build(&ctx, src).unwrap_err() else {
            panic!("expected build error");
        };
        assert!(log.contains("program.cl:2:1: error: preprocessor directive `#if`"), "{}", log);
    }

    #[test]
    fn test_deep_nesting_fails_build() {
        let registry = registry();
        let ctx = Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap();

        let depth = 50_000;
        let src = format!(
            "kernel void k(__global int *o) {{ o[0] = {}1{}; }}",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let err = Program::build(&ctx, &src).unwrap_err();
        assert!(matches!(err, Error::Build { ref log } if log.contains("nesting")), "{:?}", err);
    }

    #[test]
    fn test_build_options() {
        let opts = BuildOptions::parse("-D N=4 -DSCALE -cl-fast-relaxed-math").unwrap();
        assert_eq!(
            opts.defines(),
            &[("N".to_string(), "4".to_string()), ("SCALE".to_string(), "1".to_string())]
        );
        assert!(BuildOptions::parse("-D").is_err());
        assert!(BuildOptions::parse("-D 1X=2").is_err());

        let registry = registry();
        let ctx = Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap();
        let src = "kernel void k(__global int *o) { o[0] = N * SCALE; }";
        assert!(Program::build(&ctx, src).is_err());
        Program::build_with(&ctx, src, ctx.devices(), &opts).unwrap();
    }
}
