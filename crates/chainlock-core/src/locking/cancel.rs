//! Cooperative cancellation for lock requests
//!
//! A request observes its flag at the top of every acquisition attempt,
//! before and during backoff sleeps, and while waiting for a fairness turn.
//! The optional auto-cancel deadline is checked at the same points.

use super::types::CancelReason;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const NO_DEADLINE: u64 = u64::MAX;

/// Smallest slice a cancellable sleep waits before re-checking the flag
const MIN_SLICE: Duration = Duration::from_millis(1);

/// Atomic cancellation flag with an optional deadline
#[derive(Debug)]
pub struct CancelFlag {
    requested: AtomicBool,
    origin: Instant,
    /// Milliseconds after `origin` at which the request auto-cancels
    deadline_ms: AtomicU64,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            origin: Instant::now(),
            deadline_ms: AtomicU64::new(NO_DEADLINE),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Cancel automatically once `after` has elapsed from now
    pub fn set_deadline(&self, after: Duration) {
        let at = self.origin.elapsed().saturating_add(after).as_millis();
        let at = u64::try_from(at).unwrap_or(NO_DEADLINE - 1).min(NO_DEADLINE - 1);
        self.deadline_ms.store(at, Ordering::SeqCst);
    }

    /// Drop a previously set deadline
    pub fn clear_deadline(&self) {
        self.deadline_ms.store(NO_DEADLINE, Ordering::SeqCst);
    }

    /// Why the request should stop, if it should
    pub fn reason(&self) -> Option<CancelReason> {
        if self.requested.load(Ordering::SeqCst) {
            return Some(CancelReason::Requested);
        }
        let deadline = self.deadline_ms.load(Ordering::SeqCst);
        if deadline != NO_DEADLINE && self.origin.elapsed().as_millis() >= u128::from(deadline) {
            return Some(CancelReason::DeadlineElapsed);
        }
        None
    }

    pub fn is_canceled(&self) -> bool {
        self.reason().is_some()
    }

    /// Sleep for `total`, waking every `slice` to check for cancellation.
    ///
    /// Returns `true` if the full duration elapsed, `false` if the sleep was
    /// cut short by cancellation.
    pub fn sleep(&self, total: Duration, slice: Duration) -> bool {
        let slice = slice.max(MIN_SLICE);
        let deadline = Instant::now() + total;
        loop {
            if self.is_canceled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(slice));
        }
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}
