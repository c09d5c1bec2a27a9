//! A rate limiter that shares one [`FifoWorker`] and one [`Scheduler`] across many
//! independent rate budgets.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::{system_clock, Clock};
use crate::error::{Error, ErrorKind, Result};
use crate::fifo_worker::FifoWorker;
use crate::ring::RingBuffer;
use crate::scheduler::Scheduler;
use crate::task::{run_task, Task};

struct ThrottlerState {
    pending: VecDeque<Task>,
    log: RingBuffer<Instant>,
}

/// A rate limiter that never blocks its own thread.
///
/// Rather than owning a consumer, a `ReusableThrottler` submits a small admission task
/// to a shared [`FifoWorker`] on every `push`, and reschedules through a shared
/// [`Scheduler`] when the window is exhausted. This lets an arbitrary number of
/// independent `(W, N)` budgets share one worker thread and one scheduler thread
/// without any of them blocking the others.
///
/// The throttler's own state (`pending`, `log`) is touched only from the shared
/// worker's thread, one task at a time; the `Mutex` below exists purely so the state
/// can be shared across the `'static` closures handed to that worker, not because of
/// real contention.
#[derive(Debug)]
pub struct ReusableThrottler {
    state: Arc<Mutex<ThrottlerState>>,
    worker: Arc<FifoWorker>,
    scheduler: Arc<Scheduler>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ThrottlerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottlerState")
            .field("pending", &self.pending.len())
            .field("log_size", &self.log.size())
            .finish()
    }
}

impl ReusableThrottler {
    /// Constructs a throttler bounding invocations to `capacity` per `window`, riding on
    /// the given shared worker and scheduler, using the real system clock.
    ///
    /// Fails with [`ErrorKind::ConstructionError`] if `capacity == 0` or `window` is
    /// zero.
    pub fn new(
        worker: Arc<FifoWorker>,
        scheduler: Arc<Scheduler>,
        window: Duration,
        capacity: usize,
    ) -> Result<Self> {
        Self::with_clock(worker, scheduler, window, capacity, system_clock())
    }

    /// As [`ReusableThrottler::new`], but against a caller-supplied [`Clock`].
    pub fn with_clock(
        worker: Arc<FifoWorker>,
        scheduler: Arc<Scheduler>,
        window: Duration,
        capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
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
        Ok(Self {
            state: Arc::new(Mutex::new(ThrottlerState {
                pending: VecDeque::new(),
                log: RingBuffer::new(capacity),
            })),
            worker,
            scheduler,
            window,
            clock,
        })
    }

    /// Submits `item` for admission. The admission decision itself runs asynchronously
    /// on the shared worker; this only fails if the shared worker has already been
    /// killed.
    pub fn push(&self, item: Task) -> Result<()> {
        let state = Arc::clone(&self.state);
        let scheduler = Arc::clone(&self.scheduler);
        let worker = Arc::clone(&self.worker);
        let window = self.window;
        let clock = Arc::clone(&self.clock);
        self.worker.push(Box::new(move || {
            Self::try_process(state, scheduler, worker, window, clock, item);
        }))
    }

    fn bandwidth_exhausted(log: &RingBuffer<Instant>, window: Duration, now: Instant) -> bool {
        match log.front() {
            Some(&oldest) if log.full() => now.saturating_duration_since(oldest) < window,
            _ => false,
        }
    }

    fn try_process(
        state: Arc<Mutex<ThrottlerState>>,
        scheduler: Arc<Scheduler>,
        worker: Arc<FifoWorker>,
        window: Duration,
        clock: Arc<dyn Clock>,
        item: Task,
    ) {
        let mut guard = state.lock();
        if !guard.pending.is_empty() {
            guard.pending.push_back(item);
            return;
        }

        let now = clock.now();
        if Self::bandwidth_exhausted(&guard.log, window, now) {
            guard.pending.push_back(item);
            let deadline = *guard.log.front().expect("bandwidth exhausted implies a front") + window;
            drop(guard);
            log::trace!("ReusableThrottler: no bandwidth, deferring wake to {deadline:?}");
            Self::schedule_wake(state, scheduler, worker, window, clock, deadline);
            return;
        }

        guard.log.push(now);
        drop(guard);
        run_task("ReusableThrottler", item);
    }

    fn schedule_wake(
        state: Arc<Mutex<ThrottlerState>>,
        scheduler: Arc<Scheduler>,
        worker: Arc<FifoWorker>,
        window: Duration,
        clock: Arc<dyn Clock>,
        deadline: Instant,
    ) {
        let worker_for_trampoline = Arc::clone(&worker);
        let trampoline: Task = Box::new(move || {
            let state = Arc::clone(&state);
            let scheduler = Arc::clone(&scheduler);
            let worker = Arc::clone(&worker);
            let clock = Arc::clone(&clock);
            // Hop back onto the shared worker so the scheduler thread never runs user
            // admission logic directly.
            let _ = worker_for_trampoline.push(Box::new(move || {
                Self::on_bandwidth_available(state, scheduler, worker, window, clock);
            }));
        });
        let _ = scheduler.push(deadline, trampoline);
    }

    fn on_bandwidth_available(
        state: Arc<Mutex<ThrottlerState>>,
        scheduler: Arc<Scheduler>,
        worker: Arc<FifoWorker>,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) {
        loop {
            let mut guard = state.lock();
            if guard.pending.is_empty() {
                return;
            }
            let now = clock.now();
            if Self::bandwidth_exhausted(&guard.log, window, now) {
                let deadline = *guard.log.front().expect("bandwidth exhausted implies a front") + window;
                drop(guard);
                Self::schedule_wake(state, scheduler, worker, window, clock, deadline);
                return;
            }
            let item = guard.pending.pop_front().expect("checked non-empty above");
            guard.log.push(now);
            drop(guard);
            run_task("ReusableThrottler", item);
        }
    }
}
