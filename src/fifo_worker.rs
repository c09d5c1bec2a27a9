//! A single-consumer background worker draining an ordered task queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::signal::Signal;
use crate::task::{run_task, Task};

struct Shared {
    queue: Mutex<Vec<Task>>,
    signal: Signal,
    paused: AtomicBool,
    terminating: AtomicBool,
    consumer_busy: AtomicBool,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("pending", &self.queue.lock().len())
            .field("paused", &self.paused.load(Ordering::Relaxed))
            .field("terminating", &self.terminating.load(Ordering::Relaxed))
            .field("consumer_busy", &self.consumer_busy.load(Ordering::Relaxed))
            .finish()
    }
}

/// Drains a FIFO queue of [`Task`]s on one dedicated background thread.
///
/// Supports `pause`/`resume` (halting and releasing the drain without dropping queued
/// work) and a graceful `kill` that runs every task enqueued strictly before the kill
/// call before the thread exits.
#[derive(Debug)]
pub struct FifoWorker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Default for FifoWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl FifoWorker {
    /// Spawns the worker thread and returns a handle to it.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Vec::new()),
            signal: Signal::new(),
            paused: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            consumer_busy: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("fifo-worker".into())
            .spawn(move || Self::drain_loop(worker_shared))
            .expect("failed to spawn FifoWorker thread");
        Self {
            shared,
            thread: Some(thread),
        }
    }

    fn drain_loop(shared: Arc<Shared>) {
        loop {
            let mut queue = shared.queue.lock();
            loop {
                if !queue.is_empty() {
                    break;
                }
                if shared.terminating.load(Ordering::Acquire) {
                    log::trace!("FifoWorker: queue empty and terminating, exiting");
                    return;
                }
                shared.consumer_busy.store(false, Ordering::Release);
                drop(queue);
                shared.signal.wait();
                queue = shared.queue.lock();
            }

            // A kill forces one last drain even while paused, so no task submitted
            // before the kill call is lost; otherwise pause halts draining.
            if shared.paused.load(Ordering::Acquire) && !shared.terminating.load(Ordering::Acquire)
            {
                drop(queue);
                shared.signal.wait();
                continue;
            }

            shared.consumer_busy.store(true, Ordering::Release);
            let batch = std::mem::take(&mut *queue);
            drop(queue);

            log::trace!("FifoWorker: draining batch of {} task(s)", batch.len());
            for task in batch {
                run_task("FifoWorker", task);
            }
        }
    }

    /// Enqueues `task`. Fails with [`ErrorKind::PushAfterKill`] once `kill` has started.
    pub fn push(&self, task: Task) -> Result<()> {
        if self.shared.terminating.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::PushAfterKill));
        }
        {
            let mut queue = self.shared.queue.lock();
            queue.push(task);
        }
        if !self.shared.consumer_busy.load(Ordering::Acquire)
            && !self.shared.paused.load(Ordering::Acquire)
        {
            self.shared.signal.notify_one();
        }
        Ok(())
    }

    /// The number of tasks currently pending.
    pub fn size(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Halts draining. Fails with [`ErrorKind::AlreadyPaused`] if already paused.
    ///
    /// Of `K` concurrent callers, exactly one succeeds; the rest observe the error.
    pub fn pause(&self) -> Result<()> {
        let was_paused = self.shared.paused.swap(true, Ordering::AcqRel);
        if was_paused {
            Err(Error::new(ErrorKind::AlreadyPaused))
        } else {
            log::debug!("FifoWorker: paused");
            Ok(())
        }
    }

    /// Releases the drain. Fails with [`ErrorKind::NotPaused`] if not paused.
    pub fn resume(&self) -> Result<()> {
        let was_paused = self.shared.paused.swap(false, Ordering::AcqRel);
        if !was_paused {
            Err(Error::new(ErrorKind::NotPaused))
        } else {
            log::debug!("FifoWorker: resumed");
            self.shared.signal.notify_one();
            Ok(())
        }
    }

    /// Terminates the thread after draining every task enqueued before this call.
    /// Idempotent after the first successful call.
    pub fn kill(&mut self) {
        self.shared.terminating.store(true, Ordering::Release);
        self.shared.signal.notify_all();
        if let Some(handle) = self.thread.take() {
            log::debug!("FifoWorker: killing, joining drain thread");
            let _ = handle.join();
        }
    }
}

impl Drop for FifoWorker {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn every_task_executes_and_queue_drains() {
        let worker = FifoWorker::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            worker
                .push(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 100 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(worker.size(), 0);
    }

    #[test]
    fn fifo_order_is_preserved_per_producer() {
        let worker = FifoWorker::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let order = Arc::clone(&order);
            worker
                .push(Box::new(move || order.lock().push(i)))
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(200));
        let order = order.lock();
        let expected: Vec<i32> = (0..50).collect();
        assert_eq!(*order, expected);
    }

    #[test]
    fn pause_halts_progress_until_resume() {
        let worker = FifoWorker::new();
        worker.pause().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            worker
                .push(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        worker.resume().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 10 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn exactly_one_concurrent_pause_succeeds() {
        let worker = Arc::new(FifoWorker::new());
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let worker = Arc::clone(&worker);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    worker.pause().is_ok()
                })
            })
            .collect();
        let successes: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn push_after_kill_errors() {
        let mut worker = FifoWorker::new();
        worker.kill();
        let err = worker.push(Box::new(|| {})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PushAfterKill);
    }

    #[test]
    fn kill_drains_pending_tasks_before_exit() {
        let mut worker = FifoWorker::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            worker
                .push(Box::new(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        worker.kill();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn a_panicking_task_does_not_take_down_the_worker() {
        let worker = FifoWorker::new();
        let counter = Arc::new(AtomicUsize::new(0));
        worker.push(Box::new(|| panic!("boom"))).unwrap();
        for _ in 0..9 {
            let counter = Arc::clone(&counter);
            worker
                .push(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 9 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 9);
    }
}
