//! The opaque unit of work every facade hands off to a background thread.

/// A no-argument, no-return invocable, opaque to this crate, that is safe to send to a
/// different thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Invokes `task`, catching and logging a panic rather than letting it unwind into the
/// consumer thread.
///
/// This is the crate-wide task-failure policy: one bad task must not take a shared
/// consumer thread down with it.
pub(crate) fn run_task(component: &str, task: Task) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");
        log::error!("{component}: task panicked: {message}");
    }
}
