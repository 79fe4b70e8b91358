//! Status tracking for lock requests
//!
//! Provides a thread-safe status cell shared between a request's worker and
//! the caller's handle.

use std::sync::atomic::{AtomicU8, Ordering};

use super::types::LockStatus;

/// Thread-safe status tracker for a lock request
///
/// Uses AtomicU8 for lock-free reads from the caller's side. Transitions are
/// validated against [`LockStatus::can_transition_to`], so a terminal status
/// can never be overwritten.
#[derive(Debug)]
pub struct StatusTracker {
    status: AtomicU8,
}

impl StatusTracker {
    /// Create a new status tracker in NotStarted state
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(LockStatus::NotStarted as u8),
        }
    }

    /// Get the current status
    pub fn get(&self) -> LockStatus {
        LockStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Move to `next` if the state machine allows it from the current state
    pub fn transition(&self, next: LockStatus) -> bool {
        let mut current = self.status.load(Ordering::SeqCst);
        loop {
            if !LockStatus::from_u8(current).can_transition_to(next) {
                return false;
            }
            match self.status.compare_exchange(
                current,
                next as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Check if currently in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.get().is_terminal()
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_tracker_new() {
        let tracker = StatusTracker::new();
        assert_eq!(tracker.get(), LockStatus::NotStarted);
        assert!(!tracker.is_terminal());
    }

    #[test]
    fn test_status_tracker_happy_path() {
        let tracker = StatusTracker::new();
        assert!(tracker.transition(LockStatus::Locking));
        assert!(tracker.transition(LockStatus::Processing));
        assert!(tracker.transition(LockStatus::Finished));
        assert_eq!(tracker.get(), LockStatus::Finished);
        assert!(tracker.is_terminal());
    }

    #[test]
    fn test_status_tracker_rejects_invalid_moves() {
        let tracker = StatusTracker::new();
        assert!(!tracker.transition(LockStatus::Processing));
        assert_eq!(tracker.get(), LockStatus::NotStarted);

        assert!(tracker.transition(LockStatus::Locking));
        assert!(!tracker.transition(LockStatus::Skipped));
        assert!(tracker.transition(LockStatus::Canceled));
    }

    #[test]
    fn test_terminal_is_immutable() {
        let tracker = StatusTracker::new();
        assert!(tracker.transition(LockStatus::Skipped));
        assert!(!tracker.transition(LockStatus::Locking));
        assert!(!tracker.transition(LockStatus::Error));
        assert_eq!(tracker.get(), LockStatus::Skipped);
    }
}
