//! Lock types, statuses and coordinator configuration

use super::backoff::BackoffPolicy;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Default polling interval while waiting for a fairness turn
pub const DEFAULT_FAIRNESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default slice used to observe cancellation during sleeps
pub const DEFAULT_CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Default name prefix for dedicated request workers
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "chainlock-worker";

/// A level of the scenario resource tree
///
/// The declaration order is the fixed acquisition order. A chain that needs
/// several levels always locks them in ascending [`ResourceKind::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// The scenario registry (root)
    Registry,
    /// A single scenario inside the registry
    Entity,
    /// Scenario detail data
    EntityDetail,
    /// Scenario summary data
    EntitySummary,
    /// Scenario event history
    EntityEvents,
    /// Undo event history
    EntityUndoEvents,
    /// Undo sets
    EntityUndoSets,
    /// Secondary registry (root, locked last)
    SecondaryRegistry,
}

impl ResourceKind {
    /// Every level in acquisition order
    pub const ALL: [ResourceKind; 8] = [
        Self::Registry,
        Self::Entity,
        Self::EntityDetail,
        Self::EntitySummary,
        Self::EntityEvents,
        Self::EntityUndoEvents,
        Self::EntityUndoSets,
        Self::SecondaryRegistry,
    ];

    /// Get the acquisition rank (lower = acquired first)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Registry => 0,
            Self::Entity => 1,
            Self::EntityDetail => 2,
            Self::EntitySummary => 3,
            Self::EntityEvents => 4,
            Self::EntityUndoEvents => 5,
            Self::EntityUndoSets => 6,
            Self::SecondaryRegistry => 7,
        }
    }

    /// The level this one is resolved from, `None` for roots
    pub fn parent(&self) -> Option<ResourceKind> {
        match self {
            Self::Registry | Self::SecondaryRegistry => None,
            Self::Entity => Some(Self::Registry),
            Self::EntityDetail
            | Self::EntitySummary
            | Self::EntityEvents
            | Self::EntityUndoEvents
            | Self::EntityUndoSets => Some(Self::Entity),
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Entity => "entity",
            Self::EntityDetail => "entity_detail",
            Self::EntitySummary => "entity_summary",
            Self::EntityEvents => "entity_events",
            Self::EntityUndoEvents => "entity_undo_events",
            Self::EntityUndoSets => "entity_undo_sets",
            Self::SecondaryRegistry => "secondary_registry",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Access mode requested for a level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Read,
    Write,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a lock request
///
/// `NotStarted -> Locking -> Processing -> {Finished, Error, Canceled}`,
/// plus `NotStarted -> Skipped` when the exclusivity gate coalesces the
/// request. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LockStatus {
    NotStarted = 0,
    Locking = 1,
    Processing = 2,
    Finished = 3,
    Error = 4,
    Canceled = 5,
    Skipped = 6,
}

impl LockStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Error | Self::Canceled | Self::Skipped
        )
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: LockStatus) -> bool {
        use LockStatus::*;
        matches!(
            (self, next),
            (NotStarted, Locking)
                | (NotStarted, Skipped)
                | (Locking, Processing)
                | (Locking, Canceled)
                | (Locking, Error)
                | (Processing, Finished)
                | (Processing, Error)
        )
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Locking,
            2 => Self::Processing,
            3 => Self::Finished,
            4 => Self::Error,
            5 => Self::Canceled,
            _ => Self::Skipped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Locking => "locking",
            Self::Processing => "processing",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a request ended in [`LockStatus::Canceled`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum CancelReason {
    /// `cancel()` was called on the handle
    Requested,
    /// The auto-cancel deadline passed
    DeadlineElapsed,
    /// A level of the chain disappeared while acquiring
    TargetVanished { level: String },
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::DeadlineElapsed => write!(f, "deadline elapsed"),
            Self::TargetVanished { level } => write!(f, "{} vanished", level),
        }
    }
}

/// Terminal outcome of one lock request
#[derive(Debug)]
pub struct LockResult {
    /// Request ID
    pub id: Uuid,

    /// Terminal status
    pub status: LockStatus,

    /// Error captured when `status` is [`LockStatus::Error`]
    pub error: Option<Error>,

    /// Set when `status` is [`LockStatus::Canceled`]
    pub cancel_reason: Option<CancelReason>,

    /// Wall-clock time from worker start to terminal status
    pub elapsed: Duration,
}

impl LockResult {
    pub(crate) fn finished(id: Uuid, elapsed: Duration) -> Self {
        Self {
            id,
            status: LockStatus::Finished,
            error: None,
            cancel_reason: None,
            elapsed,
        }
    }

    pub(crate) fn skipped(id: Uuid) -> Self {
        Self {
            id,
            status: LockStatus::Skipped,
            error: None,
            cancel_reason: None,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn canceled(id: Uuid, reason: CancelReason, elapsed: Duration) -> Self {
        Self {
            id,
            status: LockStatus::Canceled,
            error: None,
            cancel_reason: Some(reason),
            elapsed,
        }
    }

    pub(crate) fn failed(id: Uuid, error: Error, elapsed: Duration) -> Self {
        Self {
            id,
            status: LockStatus::Error,
            error: Some(error),
            cancel_reason: None,
            elapsed,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == LockStatus::Finished
    }

    pub fn is_skipped(&self) -> bool {
        self.status == LockStatus::Skipped
    }

    pub fn is_canceled(&self) -> bool {
        self.status == LockStatus::Canceled
    }

    /// Convert into a `Result`, surfacing only real errors
    pub fn into_result(self) -> crate::Result<LockStatus> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.status),
        }
    }
}

/// Runtime configuration for the lock coordinator
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Acquisition timeout and contention sleep policy
    pub backoff: BackoffPolicy,

    /// How often a queued request re-checks whether it is first in line
    pub fairness_poll_interval: Duration,

    /// Granularity at which sleeps observe cancellation
    pub cancel_poll_interval: Duration,

    /// Name prefix for dedicated worker threads
    pub thread_name_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            fairness_poll_interval: DEFAULT_FAIRNESS_POLL_INTERVAL,
            cancel_poll_interval: DEFAULT_CANCEL_POLL_INTERVAL,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl LockConfig {
    /// Set the backoff policy
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the fairness polling interval
    pub fn with_fairness_poll_interval(mut self, interval: Duration) -> Self {
        self.fairness_poll_interval = interval;
        self
    }

    /// Set the cancellation polling slice
    pub fn with_cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.cancel_poll_interval = interval;
        self
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}
