//! Lock guards for RAII-style lock management
//!
//! Guards release their level when dropped, so a chain unwinds correctly on
//! early returns, errors and panics alike.

use super::chain::LevelSpec;
use super::types::ResourceKind;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An acquired level lock
///
/// Wraps whatever guard value the lock primitive hands out. Dropping the
/// `LevelGuard` drops that value, which releases the primitive.
pub struct LevelGuard {
    release: Option<Box<dyn Send>>,
    acquired_at: Instant,
}

impl LevelGuard {
    /// Wrap a primitive's guard value
    pub fn new<T: Send + 'static>(inner: T) -> Self {
        Self {
            release: Some(Box::new(inner)),
            acquired_at: Instant::now(),
        }
    }

    /// How long the lock has been held
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Explicitly release the lock (normally done automatically on drop)
    pub fn release(mut self) {
        self.release.take();
    }
}

impl fmt::Debug for LevelGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelGuard")
            .field("held", &self.release.is_some())
            .field("held_for", &self.held_for())
            .finish()
    }
}

/// A level held as part of a chain: its spec, node and guard
pub struct HeldLevel<N> {
    spec: LevelSpec,
    node: Arc<N>,
    guard: LevelGuard,
}

impl<N> HeldLevel<N> {
    pub(crate) fn new(spec: LevelSpec, node: Arc<N>, guard: LevelGuard) -> Self {
        Self { spec, node, guard }
    }

    pub fn spec(&self) -> &LevelSpec {
        &self.spec
    }

    pub fn node(&self) -> &Arc<N> {
        &self.node
    }

    pub fn guard(&self) -> &LevelGuard {
        &self.guard
    }
}

impl<N> fmt::Display for HeldLevel<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lock[{}]", self.spec)
    }
}

/// The levels a request currently holds, in acquisition order
///
/// Dropping the chain releases levels child-first.
pub struct HeldChain<N> {
    levels: Vec<HeldLevel<N>>,
}

impl<N> HeldChain<N> {
    pub(crate) fn new() -> Self {
        Self { levels: Vec::new() }
    }

    pub(crate) fn push(&mut self, level: HeldLevel<N>) {
        self.levels.push(level);
    }

    /// Get the number of levels held
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Node held for `kind`, if that level is locked
    pub fn node(&self, kind: ResourceKind) -> Option<&Arc<N>> {
        self.levels
            .iter()
            .find(|level| level.spec.kind() == kind)
            .map(|level| &level.node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeldLevel<N>> {
        self.levels.iter()
    }

    /// Node handles handed to the caller's action
    pub fn view(&self) -> ChainView<N> {
        ChainView {
            levels: self
                .levels
                .iter()
                .map(|level| (level.spec.clone(), Arc::clone(&level.node)))
                .collect(),
        }
    }

    /// Release all levels explicitly
    pub fn release(self) {
        drop(self);
    }
}

impl<N> Drop for HeldChain<N> {
    fn drop(&mut self) {
        while let Some(level) = self.levels.pop() {
            drop(level);
        }
    }
}

impl<N> fmt::Display for HeldChain<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeldChain[")?;
        for (i, level) in self.levels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", level.spec)?;
        }
        write!(f, "]")
    }
}

/// Resolved nodes of a fully acquired chain, as seen by the action
///
/// The view carries no guards; the locks stay owned by the request's worker
/// until the action returns.
pub struct ChainView<N> {
    levels: Vec<(LevelSpec, Arc<N>)>,
}

impl<N> ChainView<N> {
    /// Node for `kind`
    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<N>> {
        self.levels
            .iter()
            .find(|(spec, _)| spec.kind() == kind)
            .map(|(_, node)| node)
    }

    /// Node for `kind`, or an error naming the missing level
    pub fn require(&self, kind: ResourceKind) -> anyhow::Result<&Arc<N>> {
        self.get(kind)
            .ok_or_else(|| anyhow::anyhow!("{} is not part of the locked chain", kind))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LevelSpec, &Arc<N>)> {
        self.levels.iter().map(|(spec, node)| (spec, node))
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl<N> Clone for ChainView<N> {
    fn clone(&self) -> Self {
        Self {
            levels: self.levels.clone(),
        }
    }
}

impl<N> fmt::Debug for ChainView<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.levels.iter().map(|(spec, _)| spec))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Drop for Recorder {
        fn drop(&mut self) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    fn held(
        kind: ResourceKind,
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> HeldLevel<&'static str> {
        let spec = match kind {
            ResourceKind::Entity => LevelSpec::read(kind).with_id("s-1"),
            _ => LevelSpec::read(kind),
        };
        HeldLevel::new(
            spec,
            Arc::new(name),
            LevelGuard::new(Recorder {
                name,
                log: Arc::clone(log),
            }),
        )
    }

    #[test]
    fn test_chain_releases_child_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HeldChain::new();
        chain.push(held(ResourceKind::Registry, "registry", &log));
        chain.push(held(ResourceKind::Entity, "entity", &log));
        chain.push(held(ResourceKind::EntityDetail, "detail", &log));

        assert_eq!(chain.len(), 3);
        chain.release();

        assert_eq!(*log.lock().unwrap(), vec!["detail", "entity", "registry"]);
    }

    #[test]
    fn test_level_guard_release() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let guard = LevelGuard::new(Recorder {
            name: "guard",
            log: Arc::clone(&log),
        });
        assert!(log.lock().unwrap().is_empty());

        guard.release();
        assert_eq!(*log.lock().unwrap(), vec!["guard"]);
    }

    #[test]
    fn test_view_exposes_nodes_without_guards() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HeldChain::new();
        chain.push(held(ResourceKind::Registry, "registry", &log));
        chain.push(held(ResourceKind::Entity, "entity", &log));

        let view = chain.view();
        assert_eq!(view.len(), 2);
        assert_eq!(**view.get(ResourceKind::Entity).unwrap(), "entity");
        assert!(view.get(ResourceKind::EntityDetail).is_none());
        assert!(view.require(ResourceKind::EntityDetail).is_err());
        assert_eq!(**chain.node(ResourceKind::Registry).unwrap(), "registry");

        // Views carry no guards: locks are still held until the chain drops
        drop(view);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_held_chain_display() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HeldChain::new();
        chain.push(held(ResourceKind::Registry, "registry", &log));
        chain.push(held(ResourceKind::Entity, "entity", &log));

        assert_eq!(
            chain.to_string(),
            "HeldChain[registry(read), entity:s-1(read)]"
        );
    }
}
