use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Result of a cancellable pass. Cancellation is not an error: a cancelled
/// run produced nothing, a completed run produced everything.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

/// Contract between the engine and its caller for long passes: the engine
/// polls `is_cancelled` at a bounded granularity and announces phase
/// changes; it never blocks on the other side.
pub trait Progress {
    fn is_cancelled(&self) -> bool;

    fn phase(&self, _name: &str) {}
}

/// No reporting, never cancelled. Default for tests and library callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Progress for Silent {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Thread-safe cancellation flag; clone it to the thread that wants to
/// interrupt a running analysis.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl Progress for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
