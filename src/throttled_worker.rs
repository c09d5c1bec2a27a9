//! A stand-alone, rate-limited worker bounding invocations to `N` per sliding window `W`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::{system_clock, Clock};
use crate::error::{Error, ErrorKind, Result};
use crate::ring::RingBuffer;
use crate::signal::Signal;
use crate::task::{run_task, Task};

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    signal: Signal,
    terminating: AtomicBool,
    consumer_busy: AtomicBool,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("pending", &self.queue.lock().len())
            .field("window", &self.window)
            .field("terminating", &self.terminating.load(Ordering::Relaxed))
            .finish()
    }
}

/// A single-stream, rate-limited worker: over any sliding window of length `W`, at most
/// `N` tasks run; subject to that bound, tasks fire in FIFO order.
///
/// Owns one dedicated thread and blocks on it, either on its [`Signal`] when idle or on
/// the clock when the window is exhausted.
#[derive(Debug)]
pub struct ThrottledWorker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl ThrottledWorker {
    /// Constructs a worker bounding invocations to `capacity` per `window`, using the
    /// real system clock.
    ///
    /// Fails with [`ErrorKind::ConstructionError`] if `capacity == 0` or `window` is
    /// zero.
    pub fn new(window: Duration, capacity: usize) -> Result<Self> {
        Self::with_clock(window, capacity, system_clock())
    }

    /// As [`ThrottledWorker::new`], but against a caller-supplied [`Clock`].
    pub fn with_clock(window: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::with_message(
                ErrorKind::ConstructionError,
                "capacity must be non-zero",
            ));
        }
        if window.is_zero() {
            return Err(Error::with_message(
                ErrorKind::ConstructionError,
                "window must be non-zero",
            ));
        }
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            signal: Signal::new(),
            terminating: AtomicBool::new(false),
            consumer_busy: AtomicBool::new(false),
            window,
            clock,
        });
        let worker_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("throttled-worker".into())
            .spawn(move || Self::run(worker_shared, capacity))
            .expect("failed to spawn ThrottledWorker thread");
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    fn run(shared: Arc<Shared>, capacity: usize) {
        let mut log = RingBuffer::<Instant>::new(capacity);
        loop {
            let task = {
                let mut queue = shared.queue.lock();
                loop {
                    if shared.terminating.load(Ordering::Acquire) {
                        shared.consumer_busy.store(false, Ordering::Release);
                        break None;
                    }
                    if let Some(task) = queue.pop_front() {
                        break Some(task);
                    }
                    shared.consumer_busy.store(false, Ordering::Release);
                    drop(queue);
                    shared.signal.wait();
                    queue = shared.queue.lock();
                }
            };
            let task = match task {
                Some(task) => task,
                None => return,
            };
            shared.consumer_busy.store(true, Ordering::Release);

            if log.full() {
                let now = shared.clock.now();
                let oldest = *log.front().expect("full ring buffer has a front");
                let elapsed = now.saturating_duration_since(oldest);
                if elapsed < shared.window {
                    let remaining = shared.window - elapsed;
                    log::trace!("ThrottledWorker: window exhausted, sleeping {remaining:?}");
                    std::thread::sleep(remaining);
                }
            }
            log.push(shared.clock.now());
            run_task("ThrottledWorker", task);
        }
    }

    /// Enqueues `task`. Fails with [`ErrorKind::PushAfterKill`] once `kill` has started.
    pub fn push(&self, task: Task) -> Result<()> {
        if self.shared.terminating.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::PushAfterKill));
        }
        {
            let mut queue = self.shared.queue.lock();
            queue.push_back(task);
        }
        if !self.shared.consumer_busy.load(Ordering::Acquire) {
            self.shared.signal.notify_one();
        }
        Ok(())
    }

    /// Terminates the thread. Tasks still pending are discarded rather than drained.
    pub fn kill(&mut self) {
        self.shared.terminating.store(true, Ordering::Release);
        self.shared.signal.notify_all();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ThrottledWorker {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn rejects_zero_capacity_or_window() {
        assert_eq!(
            ThrottledWorker::new(Duration::from_secs(1), 0)
                .unwrap_err()
                .kind(),
            ErrorKind::ConstructionError
        );
        assert_eq!(
            ThrottledWorker::new(Duration::ZERO, 10).unwrap_err().kind(),
            ErrorKind::ConstructionError
        );
    }

    #[test]
    fn every_task_executes_in_fifo_order() {
        let worker = ThrottledWorker::new(Duration::from_millis(50), 1000).unwrap();
        let order = Arc::new(StdMutex::new(Vec::new()));
        for i in 0..200 {
            let order = Arc::clone(&order);
            worker.push(Box::new(move || order.lock().unwrap().push(i))).unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while order.lock().unwrap().len() < 200 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let expected: Vec<i32> = (0..200).collect();
        assert_eq!(*order.lock().unwrap(), expected);
    }

    #[test]
    fn bounds_every_sliding_window() {
        let window = Duration::from_millis(100);
        let capacity = 20;
        let worker = ThrottledWorker::new(window, capacity).unwrap();
        let timestamps = Arc::new(StdMutex::new(Vec::new()));
        for _ in 0..120 {
            let timestamps = Arc::clone(&timestamps);
            worker
                .push(Box::new(move || timestamps.lock().unwrap().push(Instant::now())))
                .unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(10);
        while timestamps.lock().unwrap().len() < 120 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let timestamps = timestamps.lock().unwrap();
        assert_eq!(timestamps.len(), 120);
        for (i, &t) in timestamps.iter().enumerate() {
            let window_start = t.checked_sub(window).unwrap_or(t);
            let count_in_window = timestamps[..=i]
                .iter()
                .filter(|&&ts| ts > window_start && ts <= t)
                .count();
            assert!(
                count_in_window <= capacity,
                "window ending at index {i} contained {count_in_window} invocations"
            );
        }
    }

    #[test]
    fn counter_still_reaches_total_with_panicking_task() {
        let worker = ThrottledWorker::new(Duration::from_millis(20), 5).unwrap();
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
        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 9 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 9);
    }
}
