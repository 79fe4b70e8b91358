//! Fairness ordering registry
//!
//! Requests that share a fairness key are served in submission order. Each
//! request takes a ticket whose order is one past the highest live order for
//! its key, and may start acquiring only when its order is the minimum.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Process-wide table of outstanding tickets per fairness key
#[derive(Debug, Default)]
pub struct OrderingRegistry {
    queues: Mutex<HashMap<String, Vec<u64>>>,
}

impl OrderingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Vec<u64>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a ticket for `key` and return its order
    pub fn enqueue(&self, key: &str) -> u64 {
        let mut table = self.table();
        let orders = table.entry(key.to_string()).or_default();
        let order = orders.iter().max().map_or(0, |max| max + 1);
        orders.push(order);
        trace!(key = %key, order, queued = orders.len(), "Ticket enqueued");
        order
    }

    /// Whether `order` is the lowest live ticket for `key`
    ///
    /// An unknown key answers `false`; callers poll again after a delay.
    pub fn is_minimum(&self, key: &str, order: u64) -> bool {
        self.table()
            .get(key)
            .and_then(|orders| orders.iter().min())
            .is_some_and(|min| *min == order)
    }

    /// Remove a ticket; returns whether it was present
    pub fn dequeue(&self, key: &str, order: u64) -> bool {
        let mut table = self.table();
        let Some(orders) = table.get_mut(key) else {
            return false;
        };

        let removed = match orders.iter().position(|o| *o == order) {
            Some(index) => {
                orders.remove(index);
                true
            }
            None => false,
        };

        if orders.is_empty() {
            table.remove(key);
        }

        trace!(key = %key, order, removed, "Ticket dequeued");
        removed
    }

    /// Number of live tickets for `key`
    pub fn queued(&self, key: &str) -> usize {
        self.table().get(key).map_or(0, Vec::len)
    }

    /// Number of keys with live tickets
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Enqueue and wrap the result in a ticket that dequeues on drop
    pub fn enqueue_ticket(self: &Arc<Self>, key: impl Into<String>) -> Ticket {
        let key = key.into();
        let order = self.enqueue(&key);
        Ticket {
            registry: Arc::clone(self),
            key,
            order,
        }
    }
}

/// A place in a fairness queue, released when dropped
#[derive(Debug)]
pub struct Ticket {
    registry: Arc<OrderingRegistry>,
    key: String,
    order: u64,
}

impl Ticket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn order(&self) -> u64 {
        self.order
    }

    /// Whether this ticket is first in line
    pub fn is_turn(&self) -> bool {
        self.registry.is_minimum(&self.key, self.order)
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.registry.dequeue(&self.key, self.order);
    }
}
