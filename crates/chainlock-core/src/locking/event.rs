//! Locking events
//!
//! Events for tracking what lock requests went through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::chain::{ChainDescriptor, LevelSpec};
use super::types::{LockResult, LockStatus};

/// Type of lock event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEventType {
    /// A write lock was observed on a level about to be acquired
    ResourceBusy,
    /// A writer was pending; the chain was released and will be retried
    ChainRestarted,
    /// Every level of the chain is held
    ChainAcquired,
    /// The action ran and returned successfully
    RequestFinished,
    /// The request was canceled or its target vanished
    RequestCanceled,
    /// The request was coalesced by the exclusivity gate
    RequestSkipped,
    /// The request ended in an error
    RequestFailed,
}

impl LockEventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceBusy => "resource_busy",
            Self::ChainRestarted => "chain_restarted",
            Self::ChainAcquired => "chain_acquired",
            Self::RequestFinished => "request_finished",
            Self::RequestCanceled => "request_canceled",
            Self::RequestSkipped => "request_skipped",
            Self::RequestFailed => "request_failed",
        }
    }
}

impl std::fmt::Display for LockEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A locking event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// The request this event belongs to
    pub request_id: Uuid,
    /// Type of event
    pub event_type: LockEventType,
    /// Event data
    pub data: Option<serde_json::Value>,
    /// When the event occurred
    pub created_at: DateTime<Utc>,
}

impl LockEvent {
    /// Create a new lock event
    pub fn new(
        request_id: Uuid,
        event_type: LockEventType,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            event_type,
            data,
            created_at: Utc::now(),
        }
    }

    /// Create a resource busy event
    pub fn resource_busy(request_id: Uuid, level: &LevelSpec) -> Self {
        let data = serde_json::json!({
            "level": level.label(),
            "mode": level.mode().as_str(),
        });
        Self::new(request_id, LockEventType::ResourceBusy, Some(data))
    }

    /// Create a chain restarted event
    pub fn chain_restarted(request_id: Uuid, level: &LevelSpec, sleep: Duration) -> Self {
        let data = serde_json::json!({
            "level": level.label(),
            "sleep_ms": sleep.as_millis() as u64,
        });
        Self::new(request_id, LockEventType::ChainRestarted, Some(data))
    }

    /// Create a chain acquired event
    pub fn chain_acquired(request_id: Uuid, chain: &ChainDescriptor) -> Self {
        let levels: Vec<String> = chain.iter().map(|level| level.to_string()).collect();
        let data = serde_json::json!({ "levels": levels });
        Self::new(request_id, LockEventType::ChainAcquired, Some(data))
    }

    /// Create the terminal event for a finished request
    pub fn terminal(result: &LockResult) -> Self {
        let elapsed_ms = result.elapsed.as_millis() as u64;
        let (event_type, data) = match result.status {
            LockStatus::Skipped => (LockEventType::RequestSkipped, None),
            LockStatus::Canceled => (
                LockEventType::RequestCanceled,
                Some(serde_json::json!({
                    "reason": result.cancel_reason,
                    "elapsed_ms": elapsed_ms,
                })),
            ),
            LockStatus::Error => (
                LockEventType::RequestFailed,
                Some(serde_json::json!({
                    "code": result.error.as_ref().map(|e| e.code()),
                    "message": result.error.as_ref().map(|e| e.to_string()),
                    "elapsed_ms": elapsed_ms,
                })),
            ),
            _ => (
                LockEventType::RequestFinished,
                Some(serde_json::json!({ "elapsed_ms": elapsed_ms })),
            ),
        };
        Self::new(result.id, event_type, data)
    }
}
