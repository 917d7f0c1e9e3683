use super::Job;
use crossbeam_deque::{Injector, Steal, Stealer, Worker as LocalQueue};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// State every pool thread sees.
pub(super) struct Shared {
    pub(super) injector: Injector<Job>,
    pub(super) stealers: Vec<Stealer<Job>>,
    pub(super) shutdown: AtomicBool,
}

pub(super) struct Worker {
    index: usize,
    local: LocalQueue<Job>,
}

impl Worker {
    pub(super) fn new(index: usize) -> Self {
        Self {
            index,
            local: LocalQueue::new_fifo(),
        }
    }

    pub(super) fn stealer(&self) -> Stealer<Job> {
        self.local.stealer()
    }

    pub(super) fn run(self, shared: Arc<Shared>) {
        let mut idle = 0u32;

        while !shared.shutdown.load(Ordering::Acquire) {
            match self.next_job(&shared) {
                Some(job) => {
                    idle = 0;
                    self.run_job(job);
                }
                None => backoff(&mut idle),
            }
        }
    }

    // local, then the injector, then a random sibling
    fn next_job(&self, shared: &Shared) -> Option<Job> {
        if let Some(job) = self.local.pop() {
            return Some(job);
        }

        if let Some(job) = steal(|| shared.injector.steal_batch_and_pop(&self.local)) {
            return Some(job);
        }

        let mut victims: Vec<usize> = (0..shared.stealers.len())
            .filter(|&i| i != self.index)
            .collect();
        victims.shuffle(&mut rand::thread_rng());

        victims
            .into_iter()
            .find_map(|i| steal(|| shared.stealers[i].steal_batch_and_pop(&self.local)))
    }

    fn run_job(&self, job: Job) {
        // Launch jobs record their own faults; this only keeps the thread alive.
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
            tracing::error!(worker = self.index, "pool job panicked");
        }
    }
}

fn steal(mut attempt: impl FnMut() -> Steal<Job>) -> Option<Job> {
    loop {
        match attempt() {
            Steal::Success(job) => return Some(job),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}

fn backoff(idle: &mut u32) {
    *idle = idle.saturating_add(1);
    match *idle {
        0..=6 => (0..1u32 << *idle).for_each(|_| std::hint::spin_loop()),
        7..=20 => thread::yield_now(),
        _ => thread::park_timeout(Duration::from_micros(200)),
    }
}
