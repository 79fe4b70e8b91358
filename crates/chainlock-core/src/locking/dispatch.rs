//! Request submission and worker dispatch
//!
//! Each accepted request runs on its own named OS thread, since acquisition
//! blocks on lock primitives. Exclusivity claims and fairness tickets are
//! taken synchronously in [`LockCoordinator::submit`], so queue order is
//! submission order no matter when the worker thread gets scheduled.

use super::chain::ChainDescriptor;
use super::exclusivity::ExclusivitySet;
use super::guard::ChainView;
use super::observer::{LockObserver, TracingObserver};
use super::ordering::OrderingRegistry;
use super::request::{Action, LockRequest, RequestContext, RequestShared};
use super::resolver::ResourceResolver;
use super::types::{LockConfig, LockResult, LockStatus};
use crate::error::{Error, Result};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// A unit of work posted to the UI thread
pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on the host's single UI thread
///
/// Jobs must run in the order they are posted. An executor that drops a job
/// without running it fails the request waiting on it.
pub trait UiExecutor: Send + Sync {
    fn post(&self, job: UiJob);
}

/// [`UiExecutor`] backed by one dedicated thread draining a queue
pub struct ThreadExecutor {
    sender: Mutex<Option<mpsc::Sender<UiJob>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl ThreadExecutor {
    /// Start the executor thread
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<UiJob>();
        let name = name.into();
        trace!(thread = %name, "ui_executor.spawn");
        let handle = thread::Builder::new().name(name).spawn(move || {
            while let Ok(job) = receiver.recv() {
                job();
            }
        })?;
        let thread_id = handle.thread().id();
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Identity of the executor thread
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Stop accepting jobs, drain the queue and join the thread
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("UI executor thread panicked");
            }
        }
    }
}

impl UiExecutor for ThreadExecutor {
    fn post(&self, job: UiJob) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(job).is_err() {
                    warn!("UI executor thread is gone, dropping job");
                }
            }
            None => warn!("UI executor is shut down, dropping job"),
        }
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

/// Process-wide fairness and coalescing state
///
/// Coordinators built from clones of the same services share queues and
/// claims.
#[derive(Debug, Clone, Default)]
pub struct CoordinationServices {
    pub ordering: Arc<OrderingRegistry>,
    pub exclusivity: Arc<ExclusivitySet>,
}

impl CoordinationServices {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Requests sharing a fairness key acquire in submission order
    pub fairness_key: Option<String>,
    /// At most one request per exclusivity key is in flight; the rest skip
    pub exclusivity_key: Option<String>,
    /// Run the action on the UI executor instead of the worker thread
    pub ui_affine: bool,
    /// Cancel automatically once this much time has passed since submission
    pub auto_cancel: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fairness_key(mut self, key: impl Into<String>) -> Self {
        self.fairness_key = Some(key.into());
        self
    }

    pub fn exclusivity_key(mut self, key: impl Into<String>) -> Self {
        self.exclusivity_key = Some(key.into());
        self
    }

    pub fn on_ui_thread(mut self) -> Self {
        self.ui_affine = true;
        self
    }

    pub fn auto_cancel(mut self, after: Duration) -> Self {
        self.auto_cancel = Some(after);
        self
    }
}

/// Accepts lock requests and runs each on a dedicated worker thread
pub struct LockCoordinator<R: ResourceResolver> {
    context: Arc<RequestContext<R>>,
    services: CoordinationServices,
    ui: Option<Arc<dyn UiExecutor>>,
    next_worker: Arc<AtomicU64>,
}

impl<R: ResourceResolver> Clone for LockCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            services: self.services.clone(),
            ui: self.ui.clone(),
            next_worker: Arc::clone(&self.next_worker),
        }
    }
}

impl<R: ResourceResolver> fmt::Debug for LockCoordinator<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("config", &self.context.config)
            .field("services", &self.services)
            .field("ui_executor", &self.ui.is_some())
            .finish()
    }
}

impl<R: ResourceResolver> LockCoordinator<R> {
    /// Coordinator with default config, fresh services and tracing output
    pub fn new(resolver: R) -> Self {
        Self::builder(resolver).build()
    }

    pub fn builder(resolver: R) -> LockCoordinatorBuilder<R> {
        LockCoordinatorBuilder {
            resolver,
            config: LockConfig::default(),
            services: CoordinationServices::default(),
            observer: None,
            ui: None,
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.context.config
    }

    pub fn services(&self) -> &CoordinationServices {
        &self.services
    }

    pub fn resolver(&self) -> &R {
        &self.context.resolver
    }

    /// Submit a request to lock `chain` and run `action` while it is held.
    ///
    /// A request whose exclusivity key is already in flight is skipped: the
    /// returned handle is already complete and the action never runs.
    /// Errors here mean the request could not be started at all.
    pub fn submit<F>(
        &self,
        chain: ChainDescriptor,
        options: RequestOptions,
        action: F,
    ) -> Result<LockHandle>
    where
        F: FnOnce(&ChainView<R::Node>) -> anyhow::Result<()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let ui = if options.ui_affine {
            match &self.ui {
                Some(ui) => Some(Arc::clone(ui)),
                None => {
                    return Err(Error::DispatchFailed(
                        "request is UI-affine but no UI executor is configured".to_string(),
                    ));
                }
            }
        } else {
            None
        };

        let shared = Arc::new(RequestShared::default());
        if let Some(after) = options.auto_cancel {
            shared.cancel.set_deadline(after);
        }

        let claim = match options.exclusivity_key {
            Some(key) => match self.services.exclusivity.claim(key.clone()) {
                Some(claim) => Some(claim),
                None => {
                    debug!(request_id = %id, key = %key, "Exclusivity key in flight, skipping");
                    return Ok(self.skipped(id, shared));
                }
            },
            None => None,
        };
        let ticket = options
            .fairness_key
            .map(|key| self.services.ordering.enqueue_ticket(key));

        debug!(
            request_id = %id,
            chain = %chain,
            fairness_key = ticket.as_ref().map(|t| t.key()),
            ui_affine = ui.is_some(),
            "Submitting lock request"
        );

        let request = LockRequest {
            id,
            chain,
            ticket,
            claim,
            shared: Arc::clone(&shared),
            action: Some(Box::new(action) as Action<R::Node>),
            ui,
            context: Arc::clone(&self.context),
        };

        let (tx, rx) = oneshot::channel();
        let seq = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.context.config.thread_name_prefix, seq);
        trace!(thread = %name, "worker.spawn_named_thread");
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let result = request.run();
                // The caller may have dropped the handle; the result is still
                // reported to the observer.
                let _ = tx.send(result);
            })
            .map_err(|e| Error::DispatchFailed(format!("failed to spawn worker: {}", e)))?;

        Ok(LockHandle { id, shared, rx })
    }

    fn skipped(&self, id: Uuid, shared: Arc<RequestShared>) -> LockHandle {
        shared.status.transition(LockStatus::Skipped);
        let result = LockResult::skipped(id);
        self.context.observer.request_finished(&result);

        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        LockHandle { id, shared, rx }
    }
}

/// Builder for [`LockCoordinator`]
pub struct LockCoordinatorBuilder<R: ResourceResolver> {
    resolver: R,
    config: LockConfig,
    services: CoordinationServices,
    observer: Option<Arc<dyn LockObserver>>,
    ui: Option<Arc<dyn UiExecutor>>,
}

impl<R: ResourceResolver> LockCoordinatorBuilder<R> {
    pub fn config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    /// Share fairness queues and exclusivity claims with other coordinators
    pub fn services(mut self, services: CoordinationServices) -> Self {
        self.services = services;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LockObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn ui_executor(mut self, ui: Arc<dyn UiExecutor>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn build(self) -> LockCoordinator<R> {
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(TracingObserver));
        LockCoordinator {
            context: Arc::new(RequestContext {
                resolver: self.resolver,
                observer,
                config: self.config,
            }),
            services: self.services,
            ui: self.ui,
            next_worker: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Caller's view of a submitted request
///
/// Await the handle (or call [`LockHandle::wait`] from synchronous code) to
/// get the terminal [`LockResult`]. Dropping the handle does not cancel the
/// request.
#[derive(Debug)]
pub struct LockHandle {
    id: Uuid,
    shared: Arc<RequestShared>,
    rx: oneshot::Receiver<LockResult>,
}

impl LockHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current status; may lag the worker by one transition
    pub fn status(&self) -> LockStatus {
        self.shared.status.get()
    }

    /// Ask the request to stop; has no effect once the action is running
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Cancel automatically after `after` from now
    pub fn set_auto_cancel(&self, after: Duration) {
        self.shared.cancel.set_deadline(after);
    }

    /// Detached cancellation handle usable after this one is consumed
    pub fn canceller(&self) -> Canceller {
        Canceller {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block the current thread until the request is terminal.
    ///
    /// Must not be called from inside an async runtime; await the handle
    /// there instead.
    pub fn wait(self) -> LockResult {
        let LockHandle { id, shared, mut rx } = self;
        match rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => worker_lost(id, &shared),
        }
    }
}

impl Future for LockHandle {
    type Output = LockResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(worker_lost(self.id, &self.shared)),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn worker_lost(id: Uuid, shared: &RequestShared) -> LockResult {
    warn!(request_id = %id, "Worker exited without reporting a result");
    shared.status.transition(LockStatus::Error);
    LockResult::failed(id, Error::WorkerLost(id), Duration::ZERO)
}

/// Cancels a request without owning its handle
#[derive(Debug, Clone)]
pub struct Canceller {
    shared: Arc<RequestShared>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn set_auto_cancel(&self, after: Duration) {
        self.shared.cancel.set_deadline(after);
    }

    pub fn status(&self) -> LockStatus {
        self.shared.status.get()
    }
}
