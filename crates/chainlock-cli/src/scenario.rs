//! In-memory scenario tree used by `chainlock simulate`

use chainlock_core::Error;
use chainlock_core::locking::{
    Contention, LevelGuard, LevelSpec, Resolution, ResourceKind, ResourceLock, ResourceResolver,
    TimedRwLock,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Data levels created under every entity
const ENTITY_LEVELS: [ResourceKind; 5] = [
    ResourceKind::EntityDetail,
    ResourceKind::EntitySummary,
    ResourceKind::EntityEvents,
    ResourceKind::EntityUndoEvents,
    ResourceKind::EntityUndoSets,
];

/// A node of the scenario tree guarded by a timed reader-writer lock
#[derive(Debug)]
pub struct ScenarioNode {
    name: String,
    lock: TimedRwLock,
    children: Mutex<BTreeMap<String, Arc<ScenarioNode>>>,
    revision: AtomicU64,
}

impl ScenarioNode {
    fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            lock: TimedRwLock::new(),
            children: Mutex::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn child(&self, key: &str) -> Option<Arc<ScenarioNode>> {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn insert(&self, key: impl Into<String>, node: Arc<ScenarioNode>) {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), node);
    }

    /// Detach a child; returns whether it existed
    pub fn remove(&self, key: &str) -> bool {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn child_keys(&self) -> Vec<String> {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn bump(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl ResourceLock for ScenarioNode {
    fn is_write_held(&self) -> bool {
        self.lock.is_write_held()
    }

    fn try_read(&self, timeout: Duration) -> Result<LevelGuard, Contention> {
        self.lock.try_read(timeout)
    }

    fn try_write(&self, timeout: Duration) -> Result<LevelGuard, Contention> {
        self.lock.try_write(timeout)
    }
}

/// Registry of entities plus a secondary registry root
#[derive(Debug)]
pub struct ScenarioStore {
    registry: Arc<ScenarioNode>,
    secondary: Arc<ScenarioNode>,
}

impl ScenarioStore {
    /// Build a store with entities `s-1` .. `s-{count}`
    pub fn new(count: usize) -> Self {
        let registry = ScenarioNode::new(ResourceKind::Registry.as_str());
        for id in Self::entity_ids(count) {
            let entity = ScenarioNode::new(format!("entity:{}", id));
            for kind in ENTITY_LEVELS {
                entity.insert(kind.as_str(), ScenarioNode::new(kind.as_str()));
            }
            registry.insert(id, entity);
        }
        Self {
            registry,
            secondary: ScenarioNode::new(ResourceKind::SecondaryRegistry.as_str()),
        }
    }

    pub fn entity_ids(count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("s-{}", i)).collect()
    }

    pub fn registry(&self) -> &Arc<ScenarioNode> {
        &self.registry
    }

    /// Revision of every entity still present, by id
    pub fn revisions(&self) -> BTreeMap<String, u64> {
        self.registry
            .child_keys()
            .into_iter()
            .filter_map(|id| {
                let revision = self.registry.child(&id)?.revision();
                Some((id, revision))
            })
            .collect()
    }
}

impl ResourceResolver for ScenarioStore {
    type Node = ScenarioNode;

    fn resolve(
        &self,
        parent: Option<&Arc<ScenarioNode>>,
        level: &LevelSpec,
    ) -> chainlock_core::Result<Resolution<ScenarioNode>> {
        let found = match level.kind() {
            ResourceKind::Registry => Some(Arc::clone(&self.registry)),
            ResourceKind::SecondaryRegistry => Some(Arc::clone(&self.secondary)),
            kind => {
                let parent = parent.ok_or_else(|| {
                    Error::resolve_failed(level.label(), "no parent node supplied")
                })?;
                match kind {
                    ResourceKind::Entity => {
                        let id = level
                            .id()
                            .ok_or_else(|| Error::resolve_failed(level.label(), "missing id"))?;
                        parent.child(id)
                    }
                    _ => parent.child(kind.as_str()),
                }
            }
        };
        Ok(match found {
            Some(node) => Resolution::Found(node),
            None => Resolution::NotFound,
        })
    }
}
