//! A round-robin fan-out over `k` [`FifoWorker`]s for coarse parallelism.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, ErrorKind, Result};
use crate::fifo_worker::FifoWorker;
use crate::task::Task;

/// Routes pushed tasks to one of `k` independent [`FifoWorker`]s in round-robin order.
///
/// Each worker keeps its own FIFO order; there is no ordering guarantee across workers.
/// Killing (or dropping) the pool gracefully drains and joins every worker.
#[derive(Debug)]
pub struct ThreadPool {
    workers: Vec<FifoWorker>,
    next: AtomicUsize,
}

impl ThreadPool {
    /// Spawns `k` worker threads. Fails with [`ErrorKind::ConstructionError`] if
    /// `k == 0`.
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 {
            return Err(Error::with_message(
                ErrorKind::ConstructionError,
                "worker count must be non-zero",
            ));
        }
        let workers = (0..k).map(|_| FifoWorker::new()).collect();
        Ok(Self {
            workers,
            next: AtomicUsize::new(0),
        })
    }

    /// Spawns one worker per available CPU core (at least one).
    pub fn with_available_parallelism() -> Self {
        Self::new(num_cpus::get().max(1)).expect("num_cpus::get() is never zero after max(1)")
    }

    /// Routes `task` to worker `i = (last + 1) mod k`.
    pub fn push(&self, task: Task) -> Result<()> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[index].push(task)
    }

    /// The number of workers backing this pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The sum of pending task counts across all workers.
    pub fn size(&self) -> usize {
        self.workers.iter().map(FifoWorker::size).sum()
    }

    /// Gracefully kills every worker (see [`FifoWorker::kill`]).
    pub fn kill(&mut self) {
        for worker in &mut self.workers {
            worker.kill();
        }
    }
}
