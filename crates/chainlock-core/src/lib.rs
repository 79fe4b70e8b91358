//! Chainlock Core Library
//!
//! Hierarchical multi-resource locking for in-process object trees:
//! - Lock chains with a fixed acquisition order
//! - Contention detection with chain-wide restart and growing backoff
//! - Fairness queues and request coalescing
//! - Dedicated worker threads with optional UI-thread affinity
//! - Cancellation and auto-cancel deadlines
//! - Configuration with file persistence

pub mod config;
pub mod error;
pub mod locking;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::locking::{
        ChainDescriptor, ChainView, LevelSpec, LockCoordinator, LockHandle, LockMode, LockResult,
        LockStatus, RequestOptions, Resolution, ResourceKind, ResourceLock, ResourceResolver,
    };
}
