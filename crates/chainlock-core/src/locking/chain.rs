//! Declarative lock chains
//!
//! A [`ChainDescriptor`] lists the resource levels one operation needs, each
//! tagged read or write. Levels are kept in [`ResourceKind::rank`] order and
//! every level's parent must be part of the chain, so an acquisition never
//! holds a child without holding the level it was resolved from.

use super::types::{LockMode, ResourceKind};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One level of a lock chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelSpec {
    kind: ResourceKind,
    mode: LockMode,
    id: Option<String>,
}

impl LevelSpec {
    pub fn new(kind: ResourceKind, mode: LockMode) -> Self {
        Self { kind, mode, id: None }
    }

    pub fn read(kind: ResourceKind) -> Self {
        Self::new(kind, LockMode::Read)
    }

    pub fn write(kind: ResourceKind) -> Self {
        Self::new(kind, LockMode::Write)
    }

    /// Attach the identifier used to look this level up inside its parent
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Short label used in logs and events, e.g. `entity:s-42`
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => format!("{}:{}", self.kind, id),
            None => self.kind.to_string(),
        }
    }
}

impl fmt::Display for LevelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.label(), self.mode)
    }
}

/// Ordered set of levels one operation must hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDescriptor {
    levels: Vec<LevelSpec>,
}

impl ChainDescriptor {
    /// Build a chain, sorting levels into acquisition order
    pub fn new(mut levels: Vec<LevelSpec>) -> Result<Self> {
        // Sort by rank so callers cannot introduce lock-order inversions
        levels.sort_by_key(|level| level.kind.rank());
        Self::validate(&levels)?;
        Ok(Self { levels })
    }

    /// Start a builder
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    pub fn levels(&self) -> &[LevelSpec] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LevelSpec> {
        self.levels.iter()
    }

    /// Find the level of the given kind
    pub fn get(&self, kind: ResourceKind) -> Option<&LevelSpec> {
        self.levels.iter().find(|level| level.kind == kind)
    }

    /// Whether any level is locked for writing
    pub fn writes(&self) -> bool {
        self.levels.iter().any(|level| level.mode == LockMode::Write)
    }

    fn validate(levels: &[LevelSpec]) -> Result<()> {
        if levels.is_empty() {
            return Err(Error::InvalidChain("chain has no levels".to_string()));
        }

        for pair in levels.windows(2) {
            if pair[0].kind == pair[1].kind {
                return Err(Error::InvalidChain(format!(
                    "{} appears more than once",
                    pair[0].kind
                )));
            }
        }

        for level in levels {
            if let Some(parent) = level.kind.parent() {
                if !levels.iter().any(|l| l.kind == parent) {
                    return Err(Error::InvalidChain(format!(
                        "{} requires its parent {} in the chain",
                        level.kind, parent
                    )));
                }
            }
            if level.kind == ResourceKind::Entity && level.id.is_none() {
                return Err(Error::InvalidChain(
                    "entity level requires an identifier".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl fmt::Display for ChainDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chain[")?;
        for (i, level) in self.levels.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{}", level)?;
        }
        write!(f, "]")
    }
}

/// Builder for [`ChainDescriptor`]
#[derive(Debug, Default, Clone)]
pub struct ChainBuilder {
    levels: Vec<LevelSpec>,
}

impl ChainBuilder {
    pub fn read(self, kind: ResourceKind) -> Self {
        self.level(LevelSpec::read(kind))
    }

    pub fn write(self, kind: ResourceKind) -> Self {
        self.level(LevelSpec::write(kind))
    }

    /// Read-lock the scenario with the given id
    pub fn read_entity(self, id: impl Into<String>) -> Self {
        self.level(LevelSpec::read(ResourceKind::Entity).with_id(id))
    }

    /// Write-lock the scenario with the given id
    pub fn write_entity(self, id: impl Into<String>) -> Self {
        self.level(LevelSpec::write(ResourceKind::Entity).with_id(id))
    }

    pub fn level(mut self, level: LevelSpec) -> Self {
        self.levels.push(level);
        self
    }

    pub fn build(self) -> Result<ChainDescriptor> {
        ChainDescriptor::new(self.levels)
    }
}
