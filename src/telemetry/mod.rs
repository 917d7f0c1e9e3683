//! Runtime metrics.
//!
//! Each context keeps a [`Metrics`] collector. Queues report finished
//! commands into it and buffers report their allocations. Read it with
//! [`Context::metrics`](crate::context::Context::metrics).

#[cfg(feature = "telemetry")]
pub mod metrics;

#[cfg(feature = "telemetry")]
pub use metrics::{Metrics, MetricsSnapshot};
