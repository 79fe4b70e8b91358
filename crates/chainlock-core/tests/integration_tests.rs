//! Chainlock Core Integration Tests
//!
//! Runs the coordinator against a small in-memory tree whose nodes use the
//! reference `TimedRwLock`.

use chainlock_core::{
    Result,
    config::Config,
    locking::{
        BackoffPolicy, CancelReason, ChainDescriptor, ChainView, Contention, CoordinationServices,
        EventLog, LevelGuard, LevelSpec, LockConfig, LockCoordinator, LockEventType,
        LockObserver, LockStatus, RequestOptions, Resolution, ResourceKind, ResourceLock,
        ResourceResolver, TimedRwLock,
    },
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

struct Node {
    lock: TimedRwLock,
    children: Mutex<HashMap<String, Arc<Node>>>,
    value: AtomicI64,
}

impl Node {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: TimedRwLock::new(),
            children: Mutex::new(HashMap::new()),
            value: AtomicI64::new(0),
        })
    }

    fn child(&self, key: &str) -> Option<Arc<Node>> {
        self.children.lock().unwrap().get(key).cloned()
    }
}

impl ResourceLock for Node {
    fn is_write_held(&self) -> bool {
        self.lock.is_write_held()
    }

    fn try_read(&self, timeout: Duration) -> std::result::Result<LevelGuard, Contention> {
        self.lock.try_read(timeout)
    }

    fn try_write(&self, timeout: Duration) -> std::result::Result<LevelGuard, Contention> {
        self.lock.try_write(timeout)
    }
}

/// Registry -> entities -> per-entity detail nodes, plus a secondary root
struct Tree {
    registry: Arc<Node>,
    secondary: Arc<Node>,
}

impl Tree {
    fn with_entities(ids: &[&str]) -> Arc<Self> {
        let registry = Node::new();
        for id in ids {
            let entity = Node::new();
            for kind in [ResourceKind::EntityDetail, ResourceKind::EntityEvents] {
                entity
                    .children
                    .lock()
                    .unwrap()
                    .insert(kind.as_str().to_string(), Node::new());
            }
            registry
                .children
                .lock()
                .unwrap()
                .insert(id.to_string(), entity);
        }
        Arc::new(Self {
            registry,
            secondary: Node::new(),
        })
    }

    fn entity(&self, id: &str) -> Arc<Node> {
        self.registry.child(id).unwrap()
    }
}

impl ResourceResolver for Tree {
    type Node = Node;

    fn resolve(&self, parent: Option<&Arc<Node>>, level: &LevelSpec) -> Result<Resolution<Node>> {
        let found = match (level.kind(), parent) {
            (ResourceKind::Registry, _) => Some(Arc::clone(&self.registry)),
            (ResourceKind::SecondaryRegistry, _) => Some(Arc::clone(&self.secondary)),
            (ResourceKind::Entity, Some(registry)) => registry.child(level.id().unwrap_or("")),
            (kind, Some(entity)) => entity.child(kind.as_str()),
            (kind, None) => {
                return Err(chainlock_core::Error::resolve_failed(
                    level.label(),
                    format!("{} has no parent", kind),
                ));
            }
        };
        Ok(match found {
            Some(node) => Resolution::Found(node),
            None => Resolution::NotFound,
        })
    }
}

fn fast_config() -> LockConfig {
    LockConfig::default()
        .with_backoff(
            BackoffPolicy::default()
                .with_initial_timeout(Duration::from_millis(20))
                .with_timeout_step(Duration::from_millis(5))
                .with_max_timeout(Duration::from_millis(100)),
        )
        .with_fairness_poll_interval(Duration::from_millis(5))
        .with_cancel_poll_interval(Duration::from_millis(2))
}

fn coordinator(tree: &Arc<Tree>, log: &Arc<EventLog>) -> LockCoordinator<Arc<Tree>> {
    LockCoordinator::builder(Arc::clone(tree))
        .config(fast_config())
        .observer(Arc::clone(log) as Arc<dyn LockObserver>)
        .build()
}

fn entity_write(id: &str) -> ChainDescriptor {
    ChainDescriptor::builder()
        .read(ResourceKind::Registry)
        .write_entity(id)
        .build()
        .unwrap()
}

fn detail_read(id: &str) -> ChainDescriptor {
    ChainDescriptor::builder()
        .read(ResourceKind::Registry)
        .read_entity(id)
        .read(ResourceKind::EntityDetail)
        .build()
        .unwrap()
}

fn bump(view: &ChainView<Node>) -> anyhow::Result<()> {
    let entity = view.require(ResourceKind::Entity)?;
    let before = entity.value.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(2));
    entity.value.store(before + 1, Ordering::SeqCst);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_writers_are_serialized() {
    let tree = Tree::with_entities(&["s-1"]);
    let log = Arc::new(EventLog::new());
    let coordinator = coordinator(&tree, &log);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            coordinator
                .submit(entity_write("s-1"), RequestOptions::new(), bump)
                .unwrap()
        })
        .collect();

    for handle in handles {
        let result = handle.await;
        assert!(result.is_finished(), "unexpected result: {:?}", result);
    }
    assert_eq!(tree.entity("s-1").value.load(Ordering::SeqCst), 8);
    assert!(tree.registry.lock.is_idle());
    assert!(tree.entity("s-1").lock.is_idle());
}

#[tokio::test]
async fn test_readers_and_writers_mix() {
    let tree = Tree::with_entities(&["s-1", "s-2"]);
    let log = Arc::new(EventLog::new());
    let coordinator = coordinator(&tree, &log);

    let mut handles = Vec::new();
    for i in 0..12 {
        let id = if i % 2 == 0 { "s-1" } else { "s-2" };
        let handle = if i % 3 == 0 {
            coordinator.submit(entity_write(id), RequestOptions::new(), bump)
        } else {
            coordinator.submit(detail_read(id), RequestOptions::new(), |view| {
                view.require(ResourceKind::EntityDetail)?;
                thread::sleep(Duration::from_millis(3));
                Ok(())
            })
        };
        handles.push(handle.unwrap());
    }

    let results = await_all(handles).await;
    assert!(results.iter().all(|r| r.is_finished()));
    assert_eq!(log.count(LockEventType::RequestFinished), 12);

    let writes: i64 = ["s-1", "s-2"]
        .iter()
        .map(|id| tree.entity(id).value.load(Ordering::SeqCst))
        .sum();
    assert_eq!(writes, 4);
}

#[test]
fn test_pending_writer_forces_reader_restart() {
    let tree = Tree::with_entities(&["s-1"]);
    let log = Arc::new(EventLog::new());
    let coordinator = coordinator(&tree, &log);
    let entity = tree.entity("s-1");

    // An outside reader keeps the entity busy while a writer queues on it
    let outside = entity.lock.try_read(Duration::from_millis(10)).unwrap();
    let writer_lock = entity.lock.clone();
    let writer = thread::spawn(move || {
        let guard = writer_lock.try_write(Duration::from_secs(5));
        assert!(guard.is_ok());
    });
    while entity.lock.waiting_writers() == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    let handle = coordinator
        .submit(detail_read("s-1"), RequestOptions::new(), |_| Ok(()))
        .unwrap();
    thread::sleep(Duration::from_millis(120));
    drop(outside);

    let result = handle.wait();
    writer.join().unwrap();

    assert!(result.is_finished());
    assert!(log.count(LockEventType::ChainRestarted) >= 1);
    // Nothing above the contended level stays held across a restart
    assert!(tree.registry.lock.is_idle());
}

#[test]
fn test_busy_entity_reported() {
    let tree = Tree::with_entities(&["s-1"]);
    let log = Arc::new(EventLog::new());
    let coordinator = coordinator(&tree, &log);

    let held = tree
        .entity("s-1")
        .lock
        .try_write(Duration::from_millis(10))
        .unwrap();
    let handle = coordinator
        .submit(detail_read("s-1"), RequestOptions::new(), |_| Ok(()))
        .unwrap();
    thread::sleep(Duration::from_millis(60));
    drop(held);

    assert!(handle.wait().is_finished());
    assert!(log.count(LockEventType::ResourceBusy) >= 1);
}

#[test]
fn test_entity_removed_while_waiting() {
    let tree = Tree::with_entities(&["s-1"]);
    let log = Arc::new(EventLog::new());
    let coordinator = coordinator(&tree, &log);

    let remover = coordinator
        .submit(
            ChainDescriptor::builder()
                .write(ResourceKind::Registry)
                .build()
                .unwrap(),
            RequestOptions::new(),
            |view| {
                let registry = view.require(ResourceKind::Registry)?;
                registry.children.lock().unwrap().remove("s-1");
                thread::sleep(Duration::from_millis(80));
                Ok(())
            },
        )
        .unwrap();
    while remover.status() != LockStatus::Processing {
        thread::sleep(Duration::from_millis(1));
    }

    let reader = coordinator
        .submit(detail_read("s-1"), RequestOptions::new(), |_| {
            anyhow::bail!("must not run for a removed entity")
        })
        .unwrap();

    assert!(remover.wait().is_finished());
    let result = reader.wait();
    assert!(result.is_canceled());
    assert_eq!(
        result.cancel_reason,
        Some(CancelReason::TargetVanished {
            level: "entity:s-1".to_string()
        })
    );
    assert!(tree.registry.lock.is_idle());
}

#[test]
fn test_shared_services_order_across_coordinators() {
    let tree = Tree::with_entities(&["s-1"]);
    let log = Arc::new(EventLog::new());
    let services = CoordinationServices::new();
    let first = LockCoordinator::builder(Arc::clone(&tree))
        .config(fast_config())
        .services(services.clone())
        .observer(Arc::clone(&log) as Arc<dyn LockObserver>)
        .build();
    let second = LockCoordinator::builder(Arc::clone(&tree))
        .config(fast_config())
        .services(services.clone())
        .build();

    let order = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let coordinator = if i % 2 == 0 { &first } else { &second };
            let order = Arc::clone(&order);
            coordinator
                .submit(
                    entity_write("s-1"),
                    RequestOptions::new().fairness_key("s-1"),
                    move |_| {
                        order.lock().unwrap().push(i);
                        Ok(())
                    },
                )
                .unwrap()
        })
        .collect();

    for handle in handles {
        assert!(handle.wait().is_finished());
    }
    assert_eq!(*order.lock().unwrap(), (0..6).collect::<Vec<_>>());
    assert!(services.ordering.is_empty());
}

#[test]
fn test_config_drives_coordinator() {
    let mut config = Config::default();
    config.set("dispatch.thread_name_prefix", "sim-worker").unwrap();
    config.set("backoff.initial_timeout_ms", "15").unwrap();

    let tree = Tree::with_entities(&["s-1"]);
    let coordinator = LockCoordinator::builder(Arc::clone(&tree))
        .config(config.lock_config())
        .build();
    assert_eq!(
        coordinator.config().backoff.initial_timeout,
        Duration::from_millis(15)
    );

    let name = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&name);
    let result = coordinator
        .submit(entity_write("s-1"), RequestOptions::new(), move |_| {
            *seen.lock().unwrap() = thread::current().name().map(str::to_string);
            Ok(())
        })
        .unwrap()
        .wait();

    assert!(result.is_finished());
    assert!(name.lock().unwrap().as_deref().unwrap().starts_with("sim-worker-"));
}

async fn await_all(
    handles: Vec<chainlock_core::locking::LockHandle>,
) -> Vec<chainlock_core::locking::LockResult> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await);
    }
    results
}
