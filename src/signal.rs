//! A one-shot, edge-triggered wake-up latch built on a mutex and condition variable.
//!
//! Every background consumer in this crate (the [`FifoWorker`](crate::fifo_worker::FifoWorker)
//! drain loop, the [`Scheduler`](crate::scheduler::Scheduler) fire loop, the
//! [`ThrottledWorker`](crate::throttled_worker::ThrottledWorker) admission loop) blocks
//! on exactly one `Signal` when it has nothing to do.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Why a [`Signal`] wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The wait returned because the signal was notified (or was already set).
    Notified,
    /// The wait returned because the deadline elapsed with no notification.
    TimedOut,
}

/// A binary latch used to wake a single consumer.
///
/// `signalled` is sticky: a `notify_*` call that races ahead of the matching `wait` is
/// not lost, since the flag persists until the next `wait` consumes it. A spurious
/// wake-up may still cause `wait` to return without a matching notify; callers must
/// re-check their own predicate in a loop.
#[derive(Debug)]
pub struct Signal {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    /// Creates a new, unsignalled latch.
    pub fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until notified. Returns immediately if already signalled.
    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();
        if !*signalled {
            self.condvar.wait(&mut signalled);
        }
        *signalled = false;
    }

    /// Blocks until notified or `timeout` elapses, whichever comes first.
    pub fn wait_for(&self, timeout: Duration) -> WaitResult {
        let mut signalled = self.signalled.lock();
        let result = if *signalled {
            WaitResult::Notified
        } else if self.condvar.wait_for(&mut signalled, timeout).timed_out() {
            WaitResult::TimedOut
        } else {
            WaitResult::Notified
        };
        *signalled = false;
        result
    }

    /// Blocks until notified or `deadline` passes, whichever comes first.
    pub fn wait_until(&self, deadline: Instant) -> WaitResult {
        let now = Instant::now();
        if deadline <= now {
            let mut signalled = self.signalled.lock();
            let result = if *signalled {
                WaitResult::Notified
            } else {
                WaitResult::TimedOut
            };
            *signalled = false;
            return result;
        }
        self.wait_for(deadline - now)
    }

    /// Waits while holding a caller-held lock on an unrelated mutex.
    ///
    /// The caller's lock is released before the internal wait sleeps and re-acquired
    /// only after the wait returns, so the external lock never has to be held across a
    /// sleep, avoiding a lock-order inversion with the signal's own internal mutex.
    pub fn wait_with<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = MutexGuard::mutex(&guard);
        drop(guard);
        self.wait();
        mutex.lock()
    }

    /// Sets the latch and wakes one waiter.
    pub fn notify_one(&self) {
        *self.signalled.lock() = true;
        self.condvar.notify_one();
    }

    /// Sets the latch and wakes all waiters.
    pub fn notify_all(&self) {
        *self.signalled.lock() = true;
        self.condvar.notify_all();
    }
}
