//! Host-driver compute engines.
//!
//! Every host device owns a work-stealing pool sized from its compute
//! units. A kernel launch scatters one job per work-group over the pool
//! and blocks until all of them have run.

mod pool;
mod worker;

pub(crate) use pool::ComputePool;

/// A unit of work run by a pool thread.
type Job = Box<dyn FnOnce() + Send + 'static>;
