//! Resolution of chain levels to live domain nodes

use super::chain::LevelSpec;
use super::primitive::ResourceLock;
use crate::error::Result;
use std::sync::Arc;

/// Outcome of looking up one level
#[derive(Debug)]
pub enum Resolution<N> {
    /// The node exists
    Found(Arc<N>),
    /// The node was removed concurrently
    NotFound,
}

/// Maps chain levels to the nodes (and their lock primitives) of the
/// host's object tree
///
/// `parent` is `None` for root levels and otherwise the already locked node
/// of the level's parent kind. Returning [`Resolution::NotFound`] cancels
/// the request; returning an error fails it.
pub trait ResourceResolver: Send + Sync + 'static {
    type Node: ResourceLock + Send + Sync + 'static;

    fn resolve(
        &self,
        parent: Option<&Arc<Self::Node>>,
        level: &LevelSpec,
    ) -> Result<Resolution<Self::Node>>;
}

impl<R: ResourceResolver> ResourceResolver for Arc<R> {
    type Node = R::Node;

    fn resolve(
        &self,
        parent: Option<&Arc<Self::Node>>,
        level: &LevelSpec,
    ) -> Result<Resolution<Self::Node>> {
        (**self).resolve(parent, level)
    }
}
