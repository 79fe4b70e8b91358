//! Chain acquisition with contention detection and backoff
//!
//! Levels are taken in chain order. Each level is resolved from the node
//! already held for its parent kind, probed for a current writer, then
//! acquired with the current backoff timeout:
//!
//! - a plain timeout keeps the held prefix and retries the same level with
//!   a longer timeout, up to the policy's retry bound;
//! - a pending writer (or an exhausted retry bound) releases the whole
//!   chain, sleeps, and starts over from the first level.
//!
//! Nothing is ever held while sleeping, so a chain can only block others
//! while it is actively acquiring.

use super::backoff::BackoffState;
use super::cancel::CancelFlag;
use super::chain::{ChainDescriptor, LevelSpec};
use super::guard::{HeldChain, HeldLevel};
use super::observer::LockObserver;
use super::primitive::{Contention, ResourceLock};
use super::resolver::{Resolution, ResourceResolver};
use super::types::CancelReason;
use crate::error::{Error, Result};
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

/// Outcome of acquiring a whole chain
pub(crate) enum Acquisition<N> {
    Acquired(HeldChain<N>),
    Canceled(CancelReason),
    Failed(Error),
}

pub(crate) struct AcquisitionEngine<'a, R: ResourceResolver> {
    request_id: Uuid,
    resolver: &'a R,
    observer: &'a dyn LockObserver,
    cancel: &'a CancelFlag,
    cancel_poll_interval: Duration,
}

impl<'a, R: ResourceResolver> AcquisitionEngine<'a, R> {
    pub(crate) fn new(
        request_id: Uuid,
        resolver: &'a R,
        observer: &'a dyn LockObserver,
        cancel: &'a CancelFlag,
        cancel_poll_interval: Duration,
    ) -> Self {
        Self {
            request_id,
            resolver,
            observer,
            cancel,
            cancel_poll_interval,
        }
    }

    /// Acquire every level of `chain`, restarting on contention until the
    /// chain is held, the request is canceled, or resolution fails.
    pub(crate) fn acquire(
        &self,
        chain: &ChainDescriptor,
        backoff: &mut BackoffState,
    ) -> Acquisition<R::Node> {
        'chain: loop {
            if let Some(reason) = self.cancel.reason() {
                return Acquisition::Canceled(reason);
            }

            let mut held = HeldChain::new();
            for level in chain.iter() {
                let node = match self.resolve(&held, level) {
                    Ok(Resolution::Found(node)) => node,
                    Ok(Resolution::NotFound) => {
                        debug!(
                            request_id = %self.request_id,
                            level = %level,
                            held = held.len(),
                            "Level vanished, releasing chain"
                        );
                        return Acquisition::Canceled(CancelReason::TargetVanished {
                            level: level.label(),
                        });
                    }
                    Err(error) => return Acquisition::Failed(error),
                };

                loop {
                    if node.is_write_held() {
                        self.observer.resource_busy(self.request_id, level);
                    }

                    let timeout = backoff.timeout();
                    match node.try_acquire(level.mode(), timeout) {
                        Ok(guard) => {
                            trace!(
                                request_id = %self.request_id,
                                level = %level,
                                timeout_ms = timeout.as_millis() as u64,
                                "Level acquired"
                            );
                            backoff.level_acquired();
                            held.push(HeldLevel::new(level.clone(), node, guard));
                            break;
                        }
                        Err(Contention::TimedOut) => {
                            if let Some(reason) = self.cancel.reason() {
                                return Acquisition::Canceled(reason);
                            }
                            if backoff.on_timeout() {
                                trace!(
                                    request_id = %self.request_id,
                                    level = %level,
                                    retries = backoff.level_retries(),
                                    "Timed out, retrying level"
                                );
                                continue;
                            }
                            drop(held);
                            if let Some(reason) = self.back_off(level, backoff) {
                                return Acquisition::Canceled(reason);
                            }
                            continue 'chain;
                        }
                        Err(Contention::WriterPending) => {
                            drop(held);
                            if let Some(reason) = self.back_off(level, backoff) {
                                return Acquisition::Canceled(reason);
                            }
                            continue 'chain;
                        }
                    }
                }
            }

            debug!(
                request_id = %self.request_id,
                chain = %chain,
                restarts = backoff.restarts(),
                "Chain acquired"
            );
            return Acquisition::Acquired(held);
        }
    }

    fn resolve(
        &self,
        held: &HeldChain<R::Node>,
        level: &LevelSpec,
    ) -> Result<Resolution<R::Node>> {
        let parent = match level.kind().parent() {
            None => None,
            Some(kind) => Some(held.node(kind).ok_or_else(|| {
                Error::InvalidChain(format!(
                    "{} resolved before its parent {}",
                    level.kind(),
                    kind
                ))
            })?),
        };
        self.resolver.resolve(parent, level)
    }

    /// Sleep off contention with nothing held. Returns the cancel reason if
    /// the request was canceled before or during the sleep.
    fn back_off(&self, level: &LevelSpec, backoff: &mut BackoffState) -> Option<CancelReason> {
        if let Some(reason) = self.cancel.reason() {
            return Some(reason);
        }
        let sleep = backoff.on_contention();
        self.observer.chain_restarted(self.request_id, level, sleep);
        if self.cancel.sleep(sleep, self.cancel_poll_interval) {
            None
        } else {
            Some(self.cancel.reason().unwrap_or(CancelReason::Requested))
        }
    }
}
