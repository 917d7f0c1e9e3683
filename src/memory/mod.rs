//! Device-visible memory.
//!
//! [`Buffer`]s are owned by a context and never move between contexts.
//! [`HostArray`]s are the host-side end of asynchronous copies.

pub mod buffer;
pub mod host;

pub use buffer::{AccessMode, Buffer, BufferId};
pub use host::{HostArray, HostRegion};
