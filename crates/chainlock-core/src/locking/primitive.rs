//! Per-level reader/writer lock primitives
//!
//! The coordinator never decides read/write exclusion itself; it asks a
//! [`ResourceLock`] for each level with a timeout and interprets the answer.
//! A failed attempt tells the coordinator whether a writer is queued
//! ([`Contention::WriterPending`]) or the wait simply ran out
//! ([`Contention::TimedOut`]).
//!
//! [`TimedRwLock`] is a writer-preferring implementation with owned guards,
//! used by hosts that do not bring their own primitive.

use super::guard::LevelGuard;
use super::types::LockMode;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Why a timed acquisition failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contention {
    /// The timeout elapsed and no writer is waiting
    TimedOut,
    /// A writer is queued; readers should back off and let it in
    WriterPending,
}

impl fmt::Display for Contention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "timed out"),
            Self::WriterPending => write!(f, "writer pending"),
        }
    }
}

/// Reader/writer lock guarding one resource level
pub trait ResourceLock: Send + Sync {
    /// Non-blocking probe: is a write lock currently held?
    fn is_write_held(&self) -> bool;

    /// Acquire shared access within `timeout`
    fn try_read(&self, timeout: Duration) -> Result<LevelGuard, Contention>;

    /// Acquire exclusive access within `timeout`
    fn try_write(&self, timeout: Duration) -> Result<LevelGuard, Contention>;

    /// Acquire in the given mode
    fn try_acquire(&self, mode: LockMode, timeout: Duration) -> Result<LevelGuard, Contention> {
        match mode {
            LockMode::Read => self.try_read(timeout),
            LockMode::Write => self.try_write(timeout),
        }
    }
}

#[derive(Debug, Default)]
struct RwState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<RwState>,
    changed: Condvar,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, RwState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Writer-preferring reader/writer lock with timed acquisition
///
/// New readers wait while a writer holds or is queued for the lock. Guards
/// own a reference to the lock, so they can travel with the request that
/// acquired them.
#[derive(Debug, Clone, Default)]
pub struct TimedRwLock {
    shared: Arc<Shared>,
}

impl TimedRwLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of readers currently inside
    pub fn readers(&self) -> usize {
        self.shared.state().readers
    }

    /// Number of writers waiting to get in
    pub fn waiting_writers(&self) -> usize {
        self.shared.state().waiting_writers
    }

    /// Whether nobody holds the lock
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state();
        state.readers == 0 && !state.writer
    }
}

impl ResourceLock for TimedRwLock {
    fn is_write_held(&self) -> bool {
        self.shared.state().writer
    }

    fn try_read(&self, timeout: Duration) -> Result<LevelGuard, Contention> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state();

        while state.writer || state.waiting_writers > 0 {
            let now = Instant::now();
            if now >= deadline {
                return Err(if state.waiting_writers > 0 {
                    Contention::WriterPending
                } else {
                    Contention::TimedOut
                });
            }
            let (next, _) = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }

        state.readers += 1;
        Ok(LevelGuard::new(ReadRelease(Arc::clone(&self.shared))))
    }

    fn try_write(&self, timeout: Duration) -> Result<LevelGuard, Contention> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state();
        state.waiting_writers += 1;

        while state.writer || state.readers > 0 {
            let now = Instant::now();
            if now >= deadline {
                state.waiting_writers -= 1;
                let pending = state.waiting_writers > 0;
                drop(state);
                // Readers parked behind this writer may proceed now
                self.shared.changed.notify_all();
                return Err(if pending {
                    Contention::WriterPending
                } else {
                    Contention::TimedOut
                });
            }
            let (next, _) = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }

        state.waiting_writers -= 1;
        state.writer = true;
        Ok(LevelGuard::new(WriteRelease(Arc::clone(&self.shared))))
    }
}

struct ReadRelease(Arc<Shared>);

impl Drop for ReadRelease {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.readers = state.readers.saturating_sub(1);
        drop(state);
        self.0.changed.notify_all();
    }
}

struct WriteRelease(Arc<Shared>);

impl Drop for WriteRelease {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.writer = false;
        drop(state);
        self.0.changed.notify_all();
    }
}
