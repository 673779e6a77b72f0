//! Run deadline and stop flag shared by the orchestrator and every worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RunControl {
    deadline: Option<Instant>,
    stop: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Raises the stop flag, e.g. from a Ctrl-C handler.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// True once new work must not start.
    pub fn should_stop(&self) -> bool {
        self.stop_requested() || self.deadline_passed()
    }
}
