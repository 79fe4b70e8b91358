//! Observers notified about lock request activity
//!
//! Notifications are fire-and-forget: observers cannot influence the
//! acquisition, and are called from request worker threads.

use super::chain::{ChainDescriptor, LevelSpec};
use super::event::{LockEvent, LockEventType};
use super::types::{LockResult, LockStatus};
use crate::error::Error;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receives resource-busy signals and terminal reports
pub trait LockObserver: Send + Sync {
    /// A write lock was held on `level` just before this request blocked on it
    fn resource_busy(&self, _request_id: Uuid, _level: &LevelSpec) {}

    /// A writer was pending on `level`; the chain was released
    fn chain_restarted(&self, _request_id: Uuid, _level: &LevelSpec, _sleep: Duration) {}

    /// Every level of `chain` is held and the action is about to run
    fn chain_acquired(&self, _request_id: Uuid, _chain: &ChainDescriptor) {}

    /// The request is about to end in [`LockStatus::Error`]
    fn request_failed(&self, _request_id: Uuid, _error: &Error) {}

    /// The request reached a terminal status; called exactly once per request
    fn request_finished(&self, _result: &LockResult) {}
}

/// Observer that writes notifications to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LockObserver for TracingObserver {
    fn resource_busy(&self, request_id: Uuid, level: &LevelSpec) {
        debug!(request_id = %request_id, level = %level, "Resource busy");
    }

    fn chain_restarted(&self, request_id: Uuid, level: &LevelSpec, sleep: Duration) {
        debug!(
            request_id = %request_id,
            level = %level,
            sleep_ms = sleep.as_millis() as u64,
            "Writer pending, restarting chain"
        );
    }

    fn request_failed(&self, request_id: Uuid, error: &Error) {
        warn!(
            request_id = %request_id,
            code = error.code(),
            error = %error,
            "Lock request failed"
        );
    }

    fn request_finished(&self, result: &LockResult) {
        if result.status == LockStatus::Error {
            return;
        }
        info!(
            request_id = %result.id,
            status = %result.status,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Lock request completed"
        );
    }
}

/// Observer that records every notification as a [`LockEvent`]
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<Vec<LockEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: LockEvent) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// All recorded events, oldest first
    pub fn events(&self) -> Vec<LockEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events recorded for one request
    pub fn for_request(&self, request_id: Uuid) -> Vec<LockEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.request_id == request_id)
            .collect()
    }

    /// Number of events of the given type
    pub fn count(&self, event_type: LockEventType) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.event_type == event_type)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl LockObserver for EventLog {
    fn resource_busy(&self, request_id: Uuid, level: &LevelSpec) {
        self.record(LockEvent::resource_busy(request_id, level));
    }

    fn chain_restarted(&self, request_id: Uuid, level: &LevelSpec, sleep: Duration) {
        self.record(LockEvent::chain_restarted(request_id, level, sleep));
    }

    fn chain_acquired(&self, request_id: Uuid, chain: &ChainDescriptor) {
        self.record(LockEvent::chain_acquired(request_id, chain));
    }

    fn request_finished(&self, result: &LockResult) {
        self.record(LockEvent::terminal(result));
    }
}
