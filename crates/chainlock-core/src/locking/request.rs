//! Lifecycle of a single lock request on its worker thread
//!
//! NotStarted -> Locking -> Processing -> Finished, with Canceled and Error
//! reachable from the middle states. Fairness tickets and exclusivity
//! claims are taken at submission; they are held here until the request is
//! terminal and released before the terminal status is published.

use super::cancel::CancelFlag;
use super::chain::ChainDescriptor;
use super::dispatch::UiExecutor;
use super::engine::{Acquisition, AcquisitionEngine};
use super::exclusivity::ExclusivityClaim;
use super::guard::ChainView;
use super::observer::LockObserver;
use super::ordering::Ticket;
use super::resolver::ResourceResolver;
use super::status::StatusTracker;
use super::types::{CancelReason, LockConfig, LockResult, LockStatus};
use crate::error::{Error, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::time::Instant;
use tracing::{debug, info_span, warn};
use uuid::Uuid;

/// Work run while the whole chain is held
pub type Action<N> = Box<dyn FnOnce(&ChainView<N>) -> anyhow::Result<()> + Send + 'static>;

/// State shared between a worker and the caller's handle
#[derive(Debug, Default)]
pub(crate) struct RequestShared {
    pub(crate) status: StatusTracker,
    pub(crate) cancel: CancelFlag,
}

/// Everything a coordinator hands to each of its requests
pub(crate) struct RequestContext<R: ResourceResolver> {
    pub(crate) resolver: R,
    pub(crate) observer: Arc<dyn LockObserver>,
    pub(crate) config: LockConfig,
}

enum Outcome {
    Finished,
    Canceled(CancelReason),
    Failed(Error),
}

pub(crate) struct LockRequest<R: ResourceResolver> {
    pub(crate) id: Uuid,
    pub(crate) chain: ChainDescriptor,
    pub(crate) ticket: Option<Ticket>,
    pub(crate) claim: Option<ExclusivityClaim>,
    pub(crate) shared: Arc<RequestShared>,
    pub(crate) action: Option<Action<R::Node>>,
    pub(crate) ui: Option<Arc<dyn UiExecutor>>,
    pub(crate) context: Arc<RequestContext<R>>,
}

impl<R: ResourceResolver> LockRequest<R> {
    /// Drive the request to a terminal status
    pub(crate) fn run(mut self) -> LockResult {
        let span = info_span!("lock_request", request_id = %self.id, chain = %self.chain);
        let _entered = span.enter();
        let started = Instant::now();

        let outcome = self.execute();

        // Queue position and coalescing slot go before anyone can observe
        // the terminal status.
        drop(self.ticket.take());
        drop(self.claim.take());

        let elapsed = started.elapsed();
        let result = match outcome {
            Outcome::Finished => LockResult::finished(self.id, elapsed),
            Outcome::Canceled(reason) => LockResult::canceled(self.id, reason, elapsed),
            Outcome::Failed(error) => LockResult::failed(self.id, error, elapsed),
        };

        if let Some(error) = &result.error {
            self.context.observer.request_failed(self.id, error);
        }
        if !self.shared.status.transition(result.status) {
            warn!(
                from = %self.shared.status.get(),
                to = %result.status,
                "Rejected terminal status transition"
            );
        }
        self.context.observer.request_finished(&result);
        result
    }

    fn execute(&mut self) -> Outcome {
        if !self.shared.status.transition(LockStatus::Locking) {
            return Outcome::Failed(Error::DispatchFailed(format!(
                "request {} started twice",
                self.id
            )));
        }

        if let Err(reason) = self.wait_for_turn() {
            debug!(reason = %reason, "Canceled while queued");
            return Outcome::Canceled(reason);
        }

        let context = Arc::clone(&self.context);
        let engine = AcquisitionEngine::new(
            self.id,
            &context.resolver,
            context.observer.as_ref(),
            &self.shared.cancel,
            context.config.cancel_poll_interval,
        );
        let mut backoff = context.config.backoff.start();
        let held = match engine.acquire(&self.chain, &mut backoff) {
            Acquisition::Acquired(held) => held,
            Acquisition::Canceled(reason) => return Outcome::Canceled(reason),
            Acquisition::Failed(error) => return Outcome::Failed(error),
        };

        self.shared.status.transition(LockStatus::Processing);
        context.observer.chain_acquired(self.id, &self.chain);

        let Some(action) = self.action.take() else {
            return Outcome::Failed(Error::DispatchFailed(
                "action was already consumed".to_string(),
            ));
        };
        let result = self.invoke(action, held.view());
        held.release();

        match result {
            Ok(()) => Outcome::Finished,
            Err(error) => Outcome::Failed(error),
        }
    }

    /// Block until this request is first in its fairness queue
    fn wait_for_turn(&self) -> std::result::Result<(), CancelReason> {
        let Some(ticket) = &self.ticket else {
            return Ok(());
        };
        let config = &self.context.config;
        let mut logged = false;
        loop {
            if let Some(reason) = self.shared.cancel.reason() {
                return Err(reason);
            }
            if ticket.is_turn() {
                return Ok(());
            }
            if !logged {
                debug!(key = ticket.key(), order = ticket.order(), "Waiting for turn");
                logged = true;
            }
            self.shared
                .cancel
                .sleep(config.fairness_poll_interval, config.cancel_poll_interval);
        }
    }

    fn invoke(&self, action: Action<R::Node>, view: ChainView<R::Node>) -> Result<()> {
        let Some(ui) = &self.ui else {
            return run_action(action, &view);
        };

        let (tx, rx) = mpsc::sync_channel(1);
        ui.post(Box::new(move || {
            // The receiver only disappears if this worker died.
            let _ = tx.send(run_action(action, &view));
        }));
        match rx.recv() {
            Ok(result) => result,
            Err(_) => Err(Error::DispatchFailed(
                "UI executor dropped the action without running it".to_string(),
            )),
        }
    }
}

/// Run an action, turning panics into errors
fn run_action<N>(action: Action<N>, view: &ChainView<N>) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| action(view))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(Error::ActionFailed(error)),
        Err(payload) => Err(Error::ActionPanicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::backoff::BackoffPolicy;
    use crate::locking::event::LockEventType;
    use crate::locking::observer::EventLog;
    use crate::locking::exclusivity::ExclusivitySet;
    use crate::locking::ordering::OrderingRegistry;
    use crate::locking::testing::{MockTree, ScriptedLock};
    use crate::locking::types::ResourceKind;
    use std::time::Duration;

    fn context(tree: Arc<MockTree>, log: Arc<EventLog>) -> Arc<RequestContext<Arc<MockTree>>> {
        let config = LockConfig::default()
            .with_backoff(BackoffPolicy::default().with_initial_timeout(Duration::from_millis(5)))
            .with_fairness_poll_interval(Duration::from_millis(5))
            .with_cancel_poll_interval(Duration::from_millis(1));
        Arc::new(RequestContext {
            resolver: tree,
            observer: log,
            config,
        })
    }

    fn request(
        context: &Arc<RequestContext<Arc<MockTree>>>,
        action: Action<ScriptedLock>,
    ) -> LockRequest<Arc<MockTree>> {
        LockRequest {
            id: Uuid::new_v4(),
            chain: ChainDescriptor::builder()
                .read(ResourceKind::Registry)
                .write_entity("s-1")
                .build()
                .unwrap(),
            ticket: None,
            claim: None,
            shared: Arc::new(RequestShared::default()),
            action: Some(action),
            ui: None,
            context: Arc::clone(context),
        }
    }

    #[test]
    fn test_run_finishes_and_releases() {
        let tree = Arc::new(MockTree::new());
        let log = Arc::new(EventLog::new());
        let ctx = context(Arc::clone(&tree), Arc::clone(&log));

        let probe = Arc::clone(&tree);
        let req = request(
            &ctx,
            Box::new(move |view| {
                assert_eq!(view.len(), 2);
                assert_eq!(probe.held(), 2);
                Ok(())
            }),
        );
        let shared = Arc::clone(&req.shared);
        let result = req.run();

        assert!(result.is_finished());
        assert_eq!(shared.status.get(), LockStatus::Finished);
        assert_eq!(tree.held(), 0);
        assert_eq!(log.count(LockEventType::ChainAcquired), 1);
        assert_eq!(log.count(LockEventType::RequestFinished), 1);
    }

    #[test]
    fn test_action_error_is_captured() {
        let tree = Arc::new(MockTree::new());
        let log = Arc::new(EventLog::new());
        let ctx = context(Arc::clone(&tree), Arc::clone(&log));

        let result = request(&ctx, Box::new(|_| Err(anyhow::anyhow!("disk full")))).run();

        assert_eq!(result.status, LockStatus::Error);
        let error = result.error.unwrap();
        assert_eq!(error.code(), "E300");
        assert!(error.to_string().contains("disk full"));
        assert_eq!(tree.held(), 0);
    }

    #[test]
    fn test_panicking_action_is_captured() {
        let tree = Arc::new(MockTree::new());
        let log = Arc::new(EventLog::new());
        let ctx = context(Arc::clone(&tree), Arc::clone(&log));

        let result = request(&ctx, Box::new(|_| panic!("exploded"))).run();

        assert_eq!(result.status, LockStatus::Error);
        match result.error {
            Some(Error::ActionPanicked(message)) => assert_eq!(message, "exploded"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(tree.held(), 0);
    }

    #[test]
    fn test_ticket_and_claim_released_before_result() {
        let tree = Arc::new(MockTree::new());
        let log = Arc::new(EventLog::new());
        let ctx = context(Arc::clone(&tree), Arc::clone(&log));
        let ordering = Arc::new(OrderingRegistry::new());
        let exclusivity = Arc::new(ExclusivitySet::new());

        let mut req = request(&ctx, Box::new(|_| Ok(())));
        req.ticket = Some(ordering.enqueue_ticket("k"));
        req.claim = exclusivity.claim("k");
        assert!(exclusivity.is_claimed("k"));

        assert!(req.run().is_finished());
        assert!(ordering.is_empty());
        assert!(!exclusivity.is_claimed("k"));
    }

    #[test]
    fn test_cancel_while_queued() {
        let tree = Arc::new(MockTree::new());
        let log = Arc::new(EventLog::new());
        let ctx = context(Arc::clone(&tree), Arc::clone(&log));
        let ordering = Arc::new(OrderingRegistry::new());
        let _first = ordering.enqueue_ticket("k");

        let mut req = request(&ctx, Box::new(|_| Ok(())));
        req.ticket = Some(ordering.enqueue_ticket("k"));
        req.shared.cancel.set_deadline(Duration::from_millis(20));

        let result = req.run();
        assert!(result.is_canceled());
        assert_eq!(result.cancel_reason, Some(CancelReason::DeadlineElapsed));
        assert_eq!(tree.attempts(), 0);
        assert_eq!(ordering.queued("k"), 1);
    }

    #[derive(Default)]
    struct FailureCounter {
        failed: std::sync::atomic::AtomicUsize,
        finished: std::sync::atomic::AtomicUsize,
    }

    impl LockObserver for FailureCounter {
        fn request_failed(&self, _request_id: Uuid, _error: &Error) {
            self.failed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn request_finished(&self, _result: &LockResult) {
            self.finished.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_failure_reported_once() {
        let tree = Arc::new(MockTree::new());
        tree.fail(ResourceKind::Entity);
        let counter = Arc::new(FailureCounter::default());
        let ctx = Arc::new(RequestContext {
            resolver: Arc::clone(&tree),
            observer: Arc::clone(&counter) as Arc<dyn LockObserver>,
            config: LockConfig::default(),
        });

        let result = request(&ctx, Box::new(|_| Ok(()))).run();

        assert_eq!(result.status, LockStatus::Error);
        assert_eq!(counter.failed.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(counter.finished.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(tree.held(), 0);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
