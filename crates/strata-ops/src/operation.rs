//! Cancellable operations
//!
//! A [`CancellableOperation`] wraps a unit of asynchronous work spawned on the
//! Tokio runtime. Exactly one of fulfil, reject or cancel moves it out of
//! `Pending`; whichever happens first wins and later attempts are ignored.
//!
//! Cancelling runs the cleanups the work function registered through
//! [`OnCancel`] exactly once, then aborts the spawned task. A result that
//! races in after cancellation is dropped, so observers only ever see
//! `Cancelled`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::{OperationError, OperationResult};

/// Lifecycle state of an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationState {
    Pending,
    Fulfilled,
    Rejected,
    Cancelled,
}

impl OperationState {
    #[inline]
    pub fn is_pending(self) -> bool {
        self == OperationState::Pending
    }

    #[inline]
    pub fn is_settled(self) -> bool {
        !self.is_pending()
    }
}

/// Final outcome of an operation
#[derive(Debug, PartialEq)]
pub enum Outcome<T> {
    Fulfilled(T),
    Rejected(OperationError),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn state(&self) -> OperationState {
        match self {
            Outcome::Fulfilled(_) => OperationState::Fulfilled,
            Outcome::Rejected(_) => OperationState::Rejected,
            Outcome::Cancelled => OperationState::Cancelled,
        }
    }

    pub fn into_result(self) -> OperationResult<T> {
        match self {
            Outcome::Fulfilled(value) => Ok(value),
            Outcome::Rejected(err) => Err(err),
            Outcome::Cancelled => Err(OperationError::Cancelled),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Fulfilled(value) => Outcome::Fulfilled(f(value)),
            Outcome::Rejected(err) => Outcome::Rejected(err),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }
}

impl<T> From<OperationResult<T>> for Outcome<T> {
    fn from(result: OperationResult<T>) -> Self {
        match result {
            Ok(value) => Outcome::Fulfilled(value),
            Err(OperationError::Cancelled) => Outcome::Cancelled,
            Err(err) => Outcome::Rejected(err),
        }
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// Cleanup registration handed to an operation's work function
#[derive(Default)]
pub struct OnCancel {
    cleanups: Vec<Cleanup>,
}

impl OnCancel {
    /// Register an action to run if the operation is cancelled while pending
    pub fn register(&mut self, cleanup: impl FnOnce() + Send + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }
}

struct Inner<T> {
    state: OperationState,
    outcome: Option<Outcome<T>>,
    cleanups: Vec<Cleanup>,
    task: Option<AbortHandle>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    state_tx: watch::Sender<OperationState>,
}

impl<T> Shared<T> {
    fn new(state: OperationState, outcome: Option<Outcome<T>>, cleanups: Vec<Cleanup>) -> Self {
        let (state_tx, _) = watch::channel(state);
        Shared {
            inner: Mutex::new(Inner {
                state,
                outcome,
                cleanups,
                task: None,
            }),
            state_tx,
        }
    }

    fn state(&self) -> OperationState {
        self.inner.lock().state
    }

    fn attach_task(&self, task: AbortHandle) {
        let mut inner = self.inner.lock();
        if inner.state.is_pending() {
            inner.task = Some(task);
        }
    }

    /// Move out of `Pending`; returns false if the operation already settled
    fn settle(&self, outcome: Outcome<T>) -> bool {
        let state = outcome.state();
        let (cleanups, task) = {
            let mut inner = self.inner.lock();
            if !inner.state.is_pending() {
                return false;
            }
            inner.state = state;
            inner.outcome = Some(outcome);
            (
                std::mem::take(&mut inner.cleanups),
                inner.task.take(),
            )
        };

        trace!(?state, cleanups = cleanups.len(), "operation settled");
        if state == OperationState::Cancelled {
            for cleanup in cleanups {
                cleanup();
            }
            if let Some(task) = task {
                task.abort();
            }
        }

        self.state_tx.send_replace(state);
        true
    }

    fn take_outcome(&self) -> Option<Outcome<T>> {
        self.inner.lock().outcome.take()
    }
}

/// Type-erased cancel capability, used to chain cancellation across operations
trait Cancel: Send + Sync {
    fn cancel(&self) -> bool;
}

impl<T: Send> Cancel for Shared<T> {
    fn cancel(&self) -> bool {
        self.settle(Outcome::Cancelled)
    }
}

/// Cancel handle detached from the operation's value type
#[derive(Clone)]
pub struct Canceller(Arc<dyn Cancel>);

impl Canceller {
    /// Cancel the underlying operation; false if it had already settled
    pub fn cancel(&self) -> bool {
        self.0.cancel()
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Canceller")
    }
}

/// Settles the operation when the spawned task finishes, or rejects it with
/// `Abandoned` if the task is dropped first (panic, runtime shutdown)
struct SettleGuard<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> SettleGuard<T> {
    fn finish(mut self, result: OperationResult<T>) {
        if let Some(shared) = self.shared.take() {
            shared.settle(result.into());
        }
    }
}

impl<T> Drop for SettleGuard<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            if shared.settle(Outcome::Rejected(OperationError::Abandoned)) {
                debug!("operation abandoned before finishing");
            }
        }
    }
}

/// A unit of asynchronous work with an explicit cancel signal
///
/// Handles are cheap to clone; all clones observe the same operation. Work is
/// spawned with [`tokio::spawn`], so operations must be created from within a
/// Tokio runtime.
pub struct CancellableOperation<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CancellableOperation<T> {
    fn clone(&self) -> Self {
        CancellableOperation {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> CancellableOperation<T> {
    /// Start an operation
    ///
    /// `work` runs immediately and receives the [`OnCancel`] registration; the
    /// future it returns is spawned and settles the operation when it
    /// completes. Returning `Err(OperationError::Cancelled)` from the future
    /// settles it as cancelled, cleanups included.
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: FnOnce(&mut OnCancel) -> Fut,
        Fut: Future<Output = OperationResult<T>> + Send + 'static,
    {
        let mut on_cancel = OnCancel::default();
        let future = work(&mut on_cancel);

        let shared = Arc::new(Shared::new(
            OperationState::Pending,
            None,
            on_cancel.cleanups,
        ));
        let guard = SettleGuard {
            shared: Some(Arc::clone(&shared)),
        };
        let task = tokio::spawn(async move {
            let result = future.await;
            guard.finish(result);
        });
        shared.attach_task(task.abort_handle());

        CancellableOperation { shared }
    }

    /// Wrap a future that needs no cleanup beyond being dropped
    pub fn from_future<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = OperationResult<T>> + Send + 'static,
    {
        Self::new(|_| future)
    }
}

impl<T> CancellableOperation<T> {
    /// An operation that is already fulfilled
    pub fn fulfilled(value: T) -> Self {
        Self::presettled(Outcome::Fulfilled(value))
    }

    /// An operation that is already rejected
    pub fn rejected(err: OperationError) -> Self {
        Self::presettled(Outcome::Rejected(err))
    }

    fn presettled(outcome: Outcome<T>) -> Self {
        CancellableOperation {
            shared: Arc::new(Shared::new(outcome.state(), Some(outcome), Vec::new())),
        }
    }

    #[inline]
    pub fn state(&self) -> OperationState {
        self.shared.state()
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state().is_pending()
    }

    /// Cancel the operation
    ///
    /// Runs the registered cleanups and aborts the work. Returns false, doing
    /// nothing, when the operation already settled.
    pub fn cancel(&self) -> bool {
        self.shared.settle(Outcome::Cancelled)
    }

    /// Wait until the operation leaves `Pending`
    pub async fn settled(&self) -> OperationState {
        let mut rx = self.shared.state_tx.subscribe();
        let state = match rx.wait_for(|state| state.is_settled()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// Take the outcome once settled; `None` while pending or once taken
    pub fn take_outcome(&self) -> Option<Outcome<T>> {
        self.shared.take_outcome()
    }

    /// Wait for the outcome
    pub async fn join(self) -> Outcome<T> {
        self.settled().await;
        self.take_outcome()
            .unwrap_or(Outcome::Rejected(OperationError::OutcomeTaken))
    }
}

impl<T: Send + 'static> CancellableOperation<T> {
    /// Type-erased cancel handle for this operation
    pub fn canceller(&self) -> Canceller {
        Canceller(self.shared.clone() as Arc<dyn Cancel>)
    }
}

impl<T> fmt::Debug for CancellableOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellableOperation")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let c = Arc::new(AtomicUsize::new(0));
        (c.clone(), c)
    }

    #[tokio::test]
    async fn test_fulfils() {
        let op = CancellableOperation::from_future(async { Ok(7) });
        assert!(op.is_pending());
        assert_eq!(op.settled().await, OperationState::Fulfilled);
        assert_eq!(op.take_outcome(), Some(Outcome::Fulfilled(7)));
        assert_eq!(op.take_outcome(), None);
    }

    #[tokio::test]
    async fn test_rejects() {
        let op: CancellableOperation<u8> =
            CancellableOperation::from_future(async { Err(OperationError::Failed("boom".into())) });
        assert_eq!(
            op.join().await,
            Outcome::Rejected(OperationError::Failed("boom".into()))
        );
    }

    #[tokio::test]
    async fn test_cancel_runs_cleanup_once() {
        let (cleanups, seen) = counter();
        let (_tx, rx) = oneshot::channel::<u8>();
        let op = CancellableOperation::new(move |on_cancel| {
            on_cancel.register(move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
            });
            async move { rx.await.map_err(|_| OperationError::Abandoned) }
        });

        assert!(op.cancel());
        assert!(!op.cancel());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(op.state(), OperationState::Cancelled);
        assert_eq!(op.join().await, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_wins_race_with_ready_result() {
        // On the current-thread runtime the spawned task has not been polled
        // yet, so its result is ready but not delivered.
        let op = CancellableOperation::from_future(async { Ok("late") });
        assert!(op.cancel());

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(op.state(), OperationState::Cancelled);
        assert_eq!(op.take_outcome(), Some(Outcome::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_after_settle_is_noop() {
        let (cleanups, seen) = counter();
        let op = CancellableOperation::new(move |on_cancel| {
            on_cancel.register(move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
            });
            async { Ok(1) }
        });

        op.settled().await;
        assert!(!op.cancel());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(op.state(), OperationState::Fulfilled);
    }

    #[tokio::test]
    async fn test_cancel_aborts_work() {
        let (polled, seen) = counter();
        let op = CancellableOperation::from_future(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            polled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        tokio::task::yield_now().await;
        op.cancel();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_work_is_abandoned() {
        let op: CancellableOperation<()> =
            CancellableOperation::from_future(async {
                let fail = true;
                if fail {
                    panic!("work failed");
                }
                Ok(())
            });
        assert_eq!(op.join().await, Outcome::Rejected(OperationError::Abandoned));
    }

    #[tokio::test]
    async fn test_canceller_chains_cancellation() {
        let (_tx, rx) = oneshot::channel::<u8>();
        let inner = CancellableOperation::from_future(async move {
            rx.await.map_err(|_| OperationError::Abandoned)
        });
        let inner_probe = inner.clone();
        let inner_cancel = inner.canceller();
        let outer = CancellableOperation::new(move |on_cancel| {
            on_cancel.register(move || {
                inner_cancel.cancel();
            });
            async move { inner.join().await.into_result() }
        });

        outer.cancel();
        assert_eq!(outer.state(), OperationState::Cancelled);
        assert_eq!(inner_probe.state(), OperationState::Cancelled);
    }

    #[tokio::test]
    async fn test_presettled_operations() {
        let ok = CancellableOperation::fulfilled(3);
        assert_eq!(ok.state(), OperationState::Fulfilled);
        assert!(!ok.cancel());
        assert_eq!(ok.join().await, Outcome::Fulfilled(3));

        let err: CancellableOperation<u8> = CancellableOperation::rejected(OperationError::Status(404));
        assert_eq!(err.settled().await, OperationState::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_waits_for_pending_work() {
        let op = CancellableOperation::from_future(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, OperationError>("done")
        });
        let waiter = op.clone();
        let waiting = tokio::spawn(async move { waiter.settled().await });

        assert!(op.is_pending());
        assert_eq!(waiting.await.unwrap(), OperationState::Fulfilled);
        assert_eq!(op.clone().join().await, Outcome::Fulfilled("done"));
        assert_eq!(
            op.join().await,
            Outcome::Rejected(OperationError::OutcomeTaken)
        );
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let (tx, rx) = oneshot::channel::<u8>();
        let op = CancellableOperation::from_future(async move {
            rx.await.map_err(|_| OperationError::Abandoned)
        });
        let observer = op.clone();

        tx.send(9).unwrap();
        assert_eq!(observer.settled().await, OperationState::Fulfilled);
        assert_eq!(op.join().await, Outcome::Fulfilled(9));
    }

    proptest::proptest! {
        /// Whatever the interleaving, one transition leaves Pending and
        /// cleanups run at most once, only for a cancel that won.
        #[test]
        fn prop_single_transition(cancels in 0usize..4, yields in 0usize..3, complete_first in proptest::bool::ANY) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async move {
                let (cleanups, seen) = counter();
                let (tx, rx) = oneshot::channel::<u8>();
                let op = CancellableOperation::new(move |on_cancel| {
                    on_cancel.register(move || {
                        cleanups.fetch_add(1, Ordering::SeqCst);
                    });
                    async move { rx.await.map_err(|_| OperationError::Abandoned) }
                });

                if complete_first {
                    let _ = tx.send(1);
                    op.settled().await;
                }
                for _ in 0..yields {
                    tokio::task::yield_now().await;
                }
                let won = (0..cancels).filter(|_| op.cancel()).count();

                assert!(won <= 1);
                assert_eq!(seen.load(Ordering::SeqCst), won);
                match op.state() {
                    OperationState::Cancelled => assert_eq!(won, 1),
                    OperationState::Fulfilled => assert!(complete_first && won == 0),
                    other => assert!(other.is_pending() && cancels == 0),
                }
            });
        }
    }
}
