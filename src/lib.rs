//! parcl - a portable compute dispatch pipeline.
//!
//! Discover compute devices, group them into a context, compile kernels
//! written in a C-like kernel language, move data through device buffers
//! and launch kernels over an N-dimensional index space through command
//! queues ordered by events.
//!
//! # Quick Start
//!
//! ```no_run
//! use parcl::prelude::*;
//!
//! # fn main() -> parcl::Result<()> {
//! let registry = Registry::discover(&Config::default())?;
//! let context = select_context(&registry, &[DeviceType::Gpu, DeviceType::Cpu])?;
//! let device = context.devices()[0].clone();
//! let queue = CommandQueue::new(&context, &device, QueueProperties::new().profiling(true))?;
//!
//! let program = Program::build(
//!     &context,
//!     "__kernel void dec(__global const int *in, __global int *out) {
//!          size_t i = get_global_id(0);
//!          out[i] = in[i] - 1;
//!      }",
//! )?;
//!
//! let input = Buffer::from_slice(&context, AccessMode::ReadOnly, &[1i32, 2, 3, 4])?;
//! let output = Buffer::new::<i32>(&context, AccessMode::WriteOnly, 4)?;
//!
//! let mut dec = program.entry_point("dec")?;
//! dec.set_arg(0, &input)?;
//! dec.set_arg(1, &output)?;
//! let done = queue.enqueue_kernel(&dec, &[4], None, &[])?;
//!
//! let result = HostArray::<i32>::zeros(4);
//! let read = queue.enqueue_copy(&result, &output, &[done.clone()])?;
//! read.wait()?;
//! assert_eq!(result.to_vec(), vec![0, 1, 2, 3]);
//! println!("kernel took {:?}", parcl::profiling::elapsed(&done)?);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Device registry**: platforms and devices from a pluggable [`platform::Driver`],
//!   either the software host driver or an installed OpenCL runtime (`opencl` feature)
//! - **Contexts**: device groups with category fallback via [`select_context`]
//! - **Kernel compiler**: diagnostics with source positions, per-device capability checks
//! - **Command queues**: in-order or out-of-order, with events across queues
//! - **Profiling**: queued, submitted, start and end timestamps per command
//! - **Telemetry**: per-context counters and kernel latency histogram (optional)

#![warn(missing_debug_implementations)]

pub mod config;
pub mod context;
pub mod error;
pub(crate) mod executor;
pub mod kernel;
pub mod memory;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod platform;
pub mod prelude;
pub mod profiling;
pub mod program;
pub mod queue;
pub mod telemetry;

pub use config::{Config, ConfigBuilder, DeviceConfig, DriverKind, PlatformConfig};
pub use context::{select_context, Context, ContextId};
pub use error::{Error, Result};
pub use kernel::{KernelArg, KernelInvocation, Scalar};
pub use memory::{AccessMode, Buffer, HostArray};
pub use platform::{Device, DeviceInfo, DeviceType, Platform, PlatformInfo, Registry};
pub use program::{BuildOptions, Program};
pub use queue::{CommandQueue, Event, EventStatus, NdRange, QueueProperties, UserEvent};
