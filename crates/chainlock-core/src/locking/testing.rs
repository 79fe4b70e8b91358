//! Scripted lock primitives and resolvers for unit tests

use super::chain::LevelSpec;
use super::guard::LevelGuard;
use super::primitive::{Contention, ResourceLock};
use super::resolver::{Resolution, ResourceResolver};
use super::types::ResourceKind;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome of one scripted acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Grant,
    TimedOut,
    WriterPending,
}

/// Lock whose attempts follow a script; grants once the script runs out
#[derive(Debug, Default)]
pub(crate) struct ScriptedLock {
    script: Mutex<VecDeque<Step>>,
    probes: Mutex<VecDeque<bool>>,
    timeouts: Mutex<Vec<Duration>>,
    attempts: AtomicUsize,
    held: Arc<AtomicUsize>,
}

struct HeldCounter(Arc<AtomicUsize>);

impl Drop for HeldCounter {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedLock {
    pub(crate) fn script(&self, steps: &[Step]) {
        self.script.lock().unwrap().extend(steps.iter().copied());
    }

    /// Answers for successive `is_write_held` probes; `false` once exhausted
    pub(crate) fn probes(&self, answers: &[bool]) {
        self.probes.lock().unwrap().extend(answers.iter().copied());
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub(crate) fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }

    fn attempt(&self, timeout: Duration) -> std::result::Result<LevelGuard, Contention> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.timeouts.lock().unwrap().push(timeout);
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Grant);
        match step {
            Step::Grant => {
                self.held.fetch_add(1, Ordering::SeqCst);
                Ok(LevelGuard::new(HeldCounter(Arc::clone(&self.held))))
            }
            Step::TimedOut => Err(Contention::TimedOut),
            Step::WriterPending => Err(Contention::WriterPending),
        }
    }
}

impl ResourceLock for ScriptedLock {
    fn is_write_held(&self) -> bool {
        self.probes.lock().unwrap().pop_front().unwrap_or(false)
    }

    fn try_read(&self, timeout: Duration) -> std::result::Result<LevelGuard, Contention> {
        self.attempt(timeout)
    }

    fn try_write(&self, timeout: Duration) -> std::result::Result<LevelGuard, Contention> {
        self.attempt(timeout)
    }
}

/// Resolver handing out one [`ScriptedLock`] per resource kind
#[derive(Debug, Default)]
pub(crate) struct MockTree {
    locks: HashMap<ResourceKind, Arc<ScriptedLock>>,
    missing: Mutex<HashSet<ResourceKind>>,
    failing: Mutex<HashSet<ResourceKind>>,
    parents: Mutex<Vec<(ResourceKind, bool)>>,
}

impl MockTree {
    pub(crate) fn new() -> Self {
        let locks = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(ScriptedLock::default())))
            .collect();
        Self {
            locks,
            ..Default::default()
        }
    }

    pub(crate) fn lock(&self, kind: ResourceKind) -> Arc<ScriptedLock> {
        Arc::clone(&self.locks[&kind])
    }

    pub(crate) fn remove(&self, kind: ResourceKind) {
        self.missing.lock().unwrap().insert(kind);
    }

    pub(crate) fn fail(&self, kind: ResourceKind) {
        self.failing.lock().unwrap().insert(kind);
    }

    /// Number of locks currently held across the tree
    pub(crate) fn held(&self) -> usize {
        self.locks.values().map(|lock| lock.held()).sum()
    }

    /// Total acquisition attempts across the tree
    pub(crate) fn attempts(&self) -> usize {
        self.locks.values().map(|lock| lock.attempts()).sum()
    }

    /// Each resolution as (kind, whether a parent node was supplied)
    pub(crate) fn resolutions(&self) -> Vec<(ResourceKind, bool)> {
        self.parents.lock().unwrap().clone()
    }
}

impl ResourceResolver for MockTree {
    type Node = ScriptedLock;

    fn resolve(
        &self,
        parent: Option<&Arc<ScriptedLock>>,
        level: &LevelSpec,
    ) -> Result<Resolution<ScriptedLock>> {
        self.parents
            .lock()
            .unwrap()
            .push((level.kind(), parent.is_some()));
        if self.failing.lock().unwrap().contains(&level.kind()) {
            return Err(Error::resolve_failed(level.label(), "lookup exploded"));
        }
        if self.missing.lock().unwrap().contains(&level.kind()) {
            return Ok(Resolution::NotFound);
        }
        Ok(Resolution::Found(self.lock(level.kind())))
    }
}
