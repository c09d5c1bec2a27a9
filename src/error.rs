//! Error types returned by the library's precondition checks.
//!
//! A plain `Copy` `ErrorKind` plus an `Error` wrapper carrying it and an optional fixed
//! message, rather than a per-component error enum.

use std::fmt;

/// The kind of precondition violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `pause()` called on a worker that is already paused.
    AlreadyPaused,
    /// `resume()` called on a worker that is not paused.
    NotPaused,
    /// `push()` called on a component whose `kill()` has started.
    PushAfterKill,
    /// Invalid construction parameters: a zero window, zero capacity, or zero workers.
    ConstructionError,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AlreadyPaused => "worker is already paused",
            ErrorKind::NotPaused => "worker is not paused",
            ErrorKind::PushAfterKill => "push after kill",
            ErrorKind::ConstructionError => "invalid construction parameters",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type returned by this crate's fallible operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<&'static str>,
}

impl Error {
    /// Creates an error carrying only a kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates an error carrying a kind plus a fixed, descriptive message.
    pub fn with_message(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            message: Some(message),
        }
    }

    /// The precondition this error represents.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

/// This crate's result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let err = Error::new(ErrorKind::AlreadyPaused);
        assert_eq!(err.kind(), ErrorKind::AlreadyPaused);
        assert_eq!(err.to_string(), "worker is already paused");
    }

    #[test]
    fn display_includes_message_when_present() {
        let err = Error::with_message(ErrorKind::ConstructionError, "window must be non-zero");
        assert_eq!(
            err.to_string(),
            "invalid construction parameters: window must be non-zero"
        );
    }
}
