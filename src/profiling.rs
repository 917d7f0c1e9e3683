//! Command timestamps.
//!
//! Every command records four timestamps in nanoseconds of a monotonic,
//! process-wide device clock: when it was queued, when it was handed to
//! the device, when it started and when it ended. They are only readable
//! for commands of a queue created with profiling enabled.
//!
//! Reading a timeline waits for the command to finish, so it is a host
//! synchronization point.

use crate::error::Result;
use crate::queue::Event;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the first use of the device clock in this process.
pub(crate) fn now_ns() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// The four command timestamps, `queued ≤ submitted ≤ start ≤ end`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeline {
    pub queued: u64,
    pub submitted: u64,
    pub start: u64,
    pub end: u64,
}

impl Timeline {
    /// Time spent waiting behind earlier commands of the queue.
    pub fn queue_delay(&self) -> Duration {
        Duration::from_nanos(self.submitted.saturating_sub(self.queued))
    }

    /// Time between submission and start, including dependency waits.
    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_nanos(self.start.saturating_sub(self.submitted))
    }

    pub fn execution_time(&self) -> Duration {
        Duration::from_nanos(self.end.saturating_sub(self.start))
    }

    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.end.saturating_sub(self.queued))
    }
}

/// Execution time of the command behind `event` (`end - start`).
pub fn elapsed(event: &Event) -> Result<Duration> {
    Ok(timeline(event)?.execution_time())
}

/// All timestamps of the command behind `event`.
///
/// Fails with `ProfilingUnavailable` when the command's queue was not
/// created with profiling, and with the command's own error when it
/// failed.
pub fn timeline(event: &Event) -> Result<Timeline> {
    event.profiling_info()
}
