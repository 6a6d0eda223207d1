//! Single-flight guard: at most one submit in progress per conversation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Returned when a submit is attempted while another is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a request is already in progress")]
pub struct Busy;

/// Shared busy flag. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl FlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag, or fail with [`Busy`] if it is already held.
    pub fn try_acquire(&self) -> Result<FlightPermit, Busy> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Busy)?;
        Ok(FlightPermit {
            busy: Arc::clone(&self.busy),
        })
    }

    /// Whether a permit is currently outstanding.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of an in-progress submit. Dropping it clears the busy flag,
/// whatever the outcome.
#[derive(Debug)]
pub struct FlightPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
