//! Hierarchical lock chains
//!
//! A request names the levels of the resource tree it needs (a
//! [`ChainDescriptor`]) and an action to run while all of them are held.
//! The [`LockCoordinator`] runs each request on its own worker thread and
//! reports a terminal [`LockResult`] through a [`LockHandle`].
//!
//! # Architecture
//!
//! - **Chains**: `LevelSpec`, `ChainDescriptor`, sorted into the fixed
//!   acquisition order of [`ResourceKind`]
//! - **Primitives**: the `ResourceLock` trait, with `TimedRwLock` as a
//!   writer-preferring reference implementation
//! - **Resolution**: the host maps levels to nodes through `ResourceResolver`
//! - **Acquisition**: level-by-level locking with contention restarts and
//!   growing timeouts (`BackoffPolicy`)
//! - **Coordination**: fairness queues (`OrderingRegistry`) and request
//!   coalescing (`ExclusivitySet`)
//! - **Dispatch**: dedicated worker threads, optional UI-thread affinity
//!
//! # Example
//!
//! ```ignore
//! use chainlock_core::locking::{ChainDescriptor, LockCoordinator, RequestOptions, ResourceKind};
//!
//! let coordinator = LockCoordinator::new(store);
//! let chain = ChainDescriptor::builder()
//!     .read(ResourceKind::Registry)
//!     .write_entity("s-1")
//!     .build()?;
//!
//! let handle = coordinator.submit(chain, RequestOptions::new().fairness_key("s-1"), |view| {
//!     let entity = view.require(ResourceKind::Entity)?;
//!     // mutate the entity...
//!     Ok(())
//! })?;
//!
//! let result = handle.await;
//! ```

pub mod backoff;
pub mod cancel;
pub mod chain;
pub mod dispatch;
mod engine;
pub mod event;
pub mod exclusivity;
pub mod guard;
pub mod observer;
pub mod ordering;
pub mod primitive;
mod request;
pub mod resolver;
pub mod status;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use backoff::{BackoffPolicy, BackoffState};
pub use cancel::CancelFlag;
pub use chain::{ChainBuilder, ChainDescriptor, LevelSpec};
pub use dispatch::{
    Canceller, CoordinationServices, LockCoordinator, LockCoordinatorBuilder, LockHandle,
    RequestOptions, ThreadExecutor, UiExecutor, UiJob,
};
pub use event::{LockEvent, LockEventType};
pub use exclusivity::{ExclusivityClaim, ExclusivitySet};
pub use guard::{ChainView, HeldChain, HeldLevel, LevelGuard};
pub use observer::{EventLog, LockObserver, TracingObserver};
pub use ordering::{OrderingRegistry, Ticket};
pub use primitive::{Contention, ResourceLock, TimedRwLock};
pub use request::Action;
pub use resolver::{Resolution, ResourceResolver};
pub use status::StatusTracker;
pub use types::{
    CancelReason, LockConfig, LockMode, LockResult, LockStatus, ResourceKind,
};
