//! Acquisition timeout and contention backoff
//!
//! Each level acquisition is bounded by a timeout that grows slowly with
//! every failed attempt. After a "writer pending" signal the whole chain is
//! released and the request sleeps for a longer period so the writer can get
//! in. Both values are capped at the same ceiling.

use std::time::Duration;

/// Timeout used for the first acquisition attempt
pub const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_millis(100);

/// Amount the timeout grows after every failed attempt
pub const DEFAULT_TIMEOUT_STEP: Duration = Duration::from_millis(30);

/// Ceiling for both the acquisition timeout and the contention sleep
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_millis(2250);

/// Contention sleep = current timeout * this factor (capped)
pub const DEFAULT_CONTENTION_MULTIPLIER: u32 = 2;

/// Plain timeouts retried on the same level before the chain is restarted
pub const DEFAULT_MAX_LEVEL_RETRIES: u32 = 5;

/// Pure backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_timeout: Duration,
    pub timeout_step: Duration,
    pub max_timeout: Duration,
    pub contention_multiplier: u32,
    pub max_level_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_timeout: DEFAULT_INITIAL_TIMEOUT,
            timeout_step: DEFAULT_TIMEOUT_STEP,
            max_timeout: DEFAULT_MAX_TIMEOUT,
            contention_multiplier: DEFAULT_CONTENTION_MULTIPLIER,
            max_level_retries: DEFAULT_MAX_LEVEL_RETRIES,
        }
    }
}

impl BackoffPolicy {
    /// Timeout to use after `current` expired
    pub fn next_timeout(&self, current: Duration) -> Duration {
        current.saturating_add(self.timeout_step).min(self.max_timeout)
    }

    /// Sleep after a writer-pending signal observed with `current_timeout`
    pub fn contention_sleep(&self, current_timeout: Duration) -> Duration {
        current_timeout
            .saturating_mul(self.contention_multiplier)
            .min(self.max_timeout)
    }

    /// Start a fresh per-request state
    pub fn start(&self) -> BackoffState {
        BackoffState {
            policy: *self,
            timeout: self.initial_timeout.min(self.max_timeout),
            restarts: 0,
            level_retries: 0,
        }
    }

    pub fn with_initial_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = timeout;
        self
    }

    pub fn with_timeout_step(mut self, step: Duration) -> Self {
        self.timeout_step = step;
        self
    }

    pub fn with_max_timeout(mut self, max: Duration) -> Self {
        self.max_timeout = max;
        self
    }

    pub fn with_max_level_retries(mut self, retries: u32) -> Self {
        self.max_level_retries = retries;
        self
    }
}

/// Mutable backoff counters owned by one request
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: BackoffPolicy,
    timeout: Duration,
    restarts: u32,
    level_retries: u32,
}

impl BackoffState {
    /// Timeout for the next acquisition attempt
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of full chain restarts so far
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Plain timeouts seen on the current level
    pub fn level_retries(&self) -> u32 {
        self.level_retries
    }

    /// Record a plain timeout on the current level.
    ///
    /// Returns `true` while the same level may be retried, `false` once the
    /// retry bound is exhausted and the chain should be restarted instead.
    pub fn on_timeout(&mut self) -> bool {
        self.level_retries += 1;
        self.timeout = self.policy.next_timeout(self.timeout);
        self.level_retries <= self.policy.max_level_retries
    }

    /// Record a contention signal; returns how long to sleep before restarting
    pub fn on_contention(&mut self) -> Duration {
        let sleep = self.policy.contention_sleep(self.timeout);
        self.timeout = self.policy.next_timeout(self.timeout);
        self.restarts += 1;
        self.level_retries = 0;
        sleep
    }

    /// A level was acquired; same-level retries start over for the next one
    pub fn level_acquired(&mut self) {
        self.level_retries = 0;
    }
}
