//! Exclusivity set for coalescing duplicate work
//!
//! At most one live claim exists per key. A request that cannot claim its
//! key is skipped outright; this is a gate, not a queue.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Process-wide set of claimed exclusivity keys
#[derive(Debug, Default)]
pub struct ExclusivitySet {
    claimed: Mutex<HashSet<String>>,
}

impl ExclusivitySet {
    pub fn new() -> Self {
        Self::default()
    }

    fn keys(&self) -> MutexGuard<'_, HashSet<String>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `key` if nobody holds it
    pub fn try_claim(&self, key: &str) -> bool {
        self.keys().insert(key.to_string())
    }

    /// Release `key`; returns whether it was claimed
    pub fn release(&self, key: &str) -> bool {
        self.keys().remove(key)
    }

    pub fn is_claimed(&self, key: &str) -> bool {
        self.keys().contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Claim `key`, returning a guard that releases it on drop
    pub fn claim(self: &Arc<Self>, key: impl Into<String>) -> Option<ExclusivityClaim> {
        let key = key.into();
        if !self.try_claim(&key) {
            return None;
        }
        Some(ExclusivityClaim {
            set: Arc::clone(self),
            key,
        })
    }
}

/// A held exclusivity key
#[derive(Debug)]
pub struct ExclusivityClaim {
    set: Arc<ExclusivitySet>,
    key: String,
}

impl ExclusivityClaim {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ExclusivityClaim {
    fn drop(&mut self) {
        self.set.release(&self.key);
    }
}
