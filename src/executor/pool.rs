use super::worker::{Shared, Worker};
use super::Job;
use crate::error::{Error, Result};
use crossbeam_deque::Injector;
use crossbeam_utils::sync::WaitGroup;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Work-stealing pool that backs one device's compute units.
pub(crate) struct ComputePool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl ComputePool {
    pub(crate) fn new(name: &str, num_threads: usize, stack_size: Option<usize>) -> Result<Self> {
        if num_threads == 0 {
            return Err(Error::executor("need at least 1 thread"));
        }

        let workers: Vec<Worker> = (0..num_threads).map(Worker::new).collect();
        let shared = Arc::new(Shared {
            injector: Injector::new(),
            stealers: workers.iter().map(Worker::stealer).collect(),
            shutdown: AtomicBool::new(false),
        });

        let mut pool = Self {
            shared,
            threads: Vec::with_capacity(num_threads),
        };

        for (index, worker) in workers.into_iter().enumerate() {
            let mut builder = thread::Builder::new().name(format!("{}-{}", name, index));
            if let Some(stack_size) = stack_size {
                builder = builder.stack_size(stack_size);
            }

            let shared = Arc::clone(&pool.shared);
            // On failure, dropping `pool` stops the threads already started.
            let handle = builder
                .spawn(move || worker.run(shared))
                .map_err(|e| Error::executor(format!("spawn failed: {}", e)))?;
            pool.threads.push(handle);
        }

        tracing::debug!(pool = name, threads = num_threads, "compute pool started");
        Ok(pool)
    }

    /// Run `f(0..parts)` across the pool and block until every part has
    /// returned. Must not be called from a pool thread.
    pub(crate) fn scatter<F>(&self, parts: usize, f: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        if parts == 0 {
            return;
        }

        let f = Arc::new(f);
        let wg = WaitGroup::new();

        for part in 0..parts {
            let f = Arc::clone(&f);
            let wg = wg.clone();
            let job: Job = Box::new(move || {
                let _wg = wg;
                f(part);
            });
            self.shared.injector.push(job);
        }

        self.wake_all();
        wg.wait();
    }

    pub(crate) fn num_threads(&self) -> usize {
        self.threads.len()
    }

    fn wake_all(&self) {
        for handle in &self.threads {
            handle.thread().unpark();
        }
    }
}

impl std::fmt::Debug for ComputePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePool")
            .field("threads", &self.threads.len())
            .finish()
    }
}

impl Drop for ComputePool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.wake_all();

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("pool thread exited with a panic");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_scatter_runs_every_part() {
        let pool = ComputePool::new("test-pool", 3, None).unwrap();
        let sum = Arc::new(AtomicU64::new(0));

        let s = sum.clone();
        pool.scatter(100, move |i| {
            s.fetch_add(i as u64, Ordering::Relaxed);
        });

        assert_eq!(sum.load(Ordering::Relaxed), 4950);
        assert_eq!(pool.num_threads(), 3);
    }

    #[test]
    fn test_panicking_job_keeps_thread_alive() {
        let pool = ComputePool::new("test-pool", 1, None).unwrap();
        pool.scatter(1, |_| panic!("boom"));

        let hit = Arc::new(AtomicBool::new(false));
        let h = hit.clone();
        pool.scatter(1, move |_| h.store(true, Ordering::Relaxed));
        assert!(hit.load(Ordering::Relaxed));
    }

    #[test]
    fn test_parts_spread_over_threads() {
        let pool = ComputePool::new("test-pool", 4, None).unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(std::collections::HashSet::new()));

        let s = seen.clone();
        pool.scatter(64, move |_| {
            std::thread::sleep(std::time::Duration::from_millis(1));
            s.lock().insert(std::thread::current().id());
        });

        assert!(seen.lock().len() > 1);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(ComputePool::new("test-pool", 0, None).is_err());
    }
}
