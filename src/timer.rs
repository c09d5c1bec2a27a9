//! A periodic task registry implemented on top of [`Scheduler`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::{system_clock, Clock};
use crate::scheduler::Scheduler;
use crate::task::Task;

/// Identifies an installed periodic timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// A repeatable unit of work a [`Timer`] invokes on every period.
///
/// Unlike the one-shot [`crate::task::Task`] the other facades consume, a timer must
/// invoke the same callback over and over, so it is modeled as a shared `Fn` rather
/// than a `FnOnce`.
pub type RecurringTask = Arc<dyn Fn() + Send + Sync + 'static>;

struct Entry {
    task: RecurringTask,
    interval: Duration,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Periodic task registry built on top of a shared [`Scheduler`].
///
/// `install` arms the first fire at `now() + interval`; every subsequent fire
/// re-schedules from the previously *scheduled* deadline (`scheduled_time + interval`),
/// not from the actual fire time, so drift does not accumulate relative to the
/// original anchor (fixed-rate, not fixed-delay).
///
/// Because the firing callback looks up and invokes the task with the registry lock
/// released, an `uninstall` racing a concurrent fire can let one extra invocation
/// complete after `uninstall` returns. Callers needing a strict "no more fires after
/// uninstall" guarantee must add their own synchronization.
#[derive(Debug)]
pub struct Timer {
    scheduler: Arc<Scheduler>,
    entries: Arc<Mutex<HashMap<TimerId, Entry>>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Timer {
    /// Creates a timer registry delegating scheduling to `scheduler`, using the real
    /// system clock.
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self::with_clock(scheduler, system_clock())
    }

    /// As [`Timer::new`], but against a caller-supplied [`Clock`].
    pub fn with_clock(scheduler: Arc<Scheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            scheduler,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    /// Installs `task` to fire every `interval`, first firing at `now() + interval`.
    pub fn install(&self, task: RecurringTask, interval: Duration) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().insert(id, Entry { task, interval });
        log::debug!("Timer: installed {id:?} with interval {interval:?}");
        let first_deadline = self.clock.now() + interval;
        Self::arm(Arc::clone(&self.scheduler), Arc::clone(&self.entries), id, first_deadline);
        id
    }

    /// Removes `id` so it fires no more (subject to the race documented above).
    pub fn uninstall(&self, id: TimerId) {
        self.entries.lock().remove(&id);
        log::debug!("Timer: uninstalled {id:?}");
    }

    /// The number of timers currently installed.
    pub fn installed_count(&self) -> usize {
        self.entries.lock().len()
    }

    fn arm(
        scheduler: Arc<Scheduler>,
        entries: Arc<Mutex<HashMap<TimerId, Entry>>>,
        id: TimerId,
        deadline: Instant,
    ) {
        let scheduler_for_next = Arc::clone(&scheduler);
        let fire: Task = Box::new(move || {
            let task_and_interval = {
                let guard = entries.lock();
                guard
                    .get(&id)
                    .map(|entry| (Arc::clone(&entry.task), entry.interval))
            };
            if let Some((task, interval)) = task_and_interval {
                task();
                let next_deadline = deadline + interval;
                Timer::arm(scheduler_for_next, entries, id, next_deadline);
            }
        });
        let _ = scheduler.push(deadline, fire);
    }
}
