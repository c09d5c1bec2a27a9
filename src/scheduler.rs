//! A time-ordered scheduler that fires tasks at specified wall-clock instants.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;

use crate::clock::{system_clock, Clock};
use crate::error::{Error, ErrorKind, Result};
use crate::signal::Signal;
use crate::task::{run_task, Task};

struct Shared {
    ingress: Mutex<Vec<(Instant, Task)>>,
    signal: Signal,
    terminating: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("queued", &self.ingress.lock().len())
            .field("terminating", &self.terminating.load(Ordering::Relaxed))
            .finish()
    }
}

/// Fires tasks at their registered deadline, in deadline order; tasks sharing a
/// deadline fire in submission order.
///
/// Runs a two-stage loop on one dedicated thread: an ingestion pass that swaps pending
/// pushes into a deadline-keyed map, and a firing pass that fires or sleeps until the
/// earliest deadline. Late-arriving, earlier deadlines are safe because the earliest
/// key is re-examined after every ingestion.
#[derive(Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Spawns the scheduler thread, using the real system clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Spawns the scheduler thread against a caller-supplied [`Clock`].
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::new(Shared {
            ingress: Mutex::new(Vec::new()),
            signal: Signal::new(),
            terminating: AtomicBool::new(false),
            clock,
        });
        let worker_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || Self::run(worker_shared))
            .expect("failed to spawn Scheduler thread");
        Self {
            shared,
            thread: Some(thread),
        }
    }

    fn run(shared: Arc<Shared>) {
        let mut processing: BTreeMap<Instant, Vec<Task>> = BTreeMap::new();
        loop {
            let batch = {
                let mut ingress = shared.ingress.lock();
                std::mem::take(&mut *ingress)
            };
            for (deadline, task) in batch {
                processing.entry(deadline).or_default().push(task);
            }

            match processing.keys().next().copied() {
                None => {
                    if shared.terminating.load(Ordering::Acquire) {
                        log::trace!("Scheduler: processing map empty and terminating, exiting");
                        return;
                    }
                    shared.signal.wait();
                }
                Some(deadline) => {
                    let now = shared.clock.now();
                    if deadline <= now {
                        if let Some(tasks) = processing.remove(&deadline) {
                            log::trace!(
                                "Scheduler: firing {} task(s) at deadline",
                                tasks.len()
                            );
                            for task in tasks {
                                run_task("Scheduler", task);
                            }
                        }
                    } else if shared.terminating.load(Ordering::Acquire) {
                        log::trace!(
                            "Scheduler: terminating with {} future deadline(s) discarded",
                            processing.len()
                        );
                        return;
                    } else {
                        shared.signal.wait_until(deadline);
                    }
                }
            }
        }
    }

    /// Enqueues `task` to fire at-or-after `deadline`.
    pub fn push(&self, deadline: Instant, task: Task) -> Result<()> {
        if self.shared.terminating.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::PushAfterKill));
        }
        {
            let mut ingress = self.shared.ingress.lock();
            ingress.push((deadline, task));
        }
        self.shared.signal.notify_one();
        Ok(())
    }

    /// Terminates the thread. Tasks remaining in the processing map are discarded;
    /// there is no obligation to execute future-dated tasks at shutdown.
    pub fn kill(&mut self) {
        self.shared.terminating.store(true, Ordering::Release);
        self.shared.signal.notify_all();
        if let Some(handle) = self.thread.take() {
            log::debug!("Scheduler: killing, joining fire thread");
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.kill();
    }
}
