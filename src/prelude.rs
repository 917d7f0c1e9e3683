pub use crate::config::{Config, ConfigBuilder, DeviceConfig, DriverKind, PlatformConfig};
pub use crate::context::{select_context, Context};
pub use crate::error::{Error, Result};
pub use crate::kernel::{KernelArg, KernelInvocation, Scalar};
pub use crate::memory::{AccessMode, Buffer, HostArray};
pub use crate::platform::{Device, DeviceType, Platform, Registry};
pub use crate::program::{BuildOptions, Program};
pub use crate::queue::{
    wait_for_events, CommandQueue, CommandType, Event, EventStatus, NdRange, QueueProperties,
    UserEvent,
};

#[cfg(feature = "telemetry")]
pub use crate::telemetry::{Metrics, MetricsSnapshot};
