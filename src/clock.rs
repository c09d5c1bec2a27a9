//! The monotonic time source every time-sensitive component reads through.
//!
//! [`Scheduler`](crate::scheduler::Scheduler), [`ThrottledWorker`](crate::throttled_worker::ThrottledWorker),
//! [`ReusableThrottler`](crate::reusable_throttler::ReusableThrottler), and
//! [`Timer`](crate::timer::Timer) all read the current instant through an injected
//! [`Clock`] handle rather than calling `Instant::now()` inline, so a test can substitute
//! a fake one. [`Signal`](crate::signal::Signal)'s own timed waits still read
//! `Instant::now()` directly, since they are the underlying sleep primitive rather than
//! scheduling or rate-limiting logic.

use std::sync::Arc;
use std::time::Instant;

/// Supplies the current instant.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current instant on this clock.
    fn now(&self) -> Instant;
}

/// The production [`Clock`], backed by [`std::time::Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub(crate) fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
