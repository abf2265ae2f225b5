use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use tokio::runtime::Handle;
use tracing::Instrument;

use crate::stats::MemoStats;
use crate::utils::panic_message;
use crate::{Func, MemoError, MemoKey, MemoResult};

/// A pending or sealed cache entry.
///
/// The sending half is owned by the running computation. Sending the result seals the entry,
/// after which every clone of the channel resolves to that same result without blocking.
pub(crate) type ComputationChannel<V, E> = Shared<oneshot::Receiver<MemoResult<V, E>>>;

/// A computation that has been registered, but not started yet.
///
/// Splitting creation and spawning allows the channel to be registered while holding the map
/// lock, and the task to be spawned after the lock was released.
#[must_use = "a registered computation must be spawned, or its waiters are abandoned"]
pub(crate) struct Computation<K, V, E> {
    func: Func<K, V, E>,
    key: K,
    sender: oneshot::Sender<MemoResult<V, E>>,
    stats: Arc<MemoStats>,
}

impl<K, V, E> Computation<K, V, E>
where
    K: MemoKey,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Creates the computation of `func(key)` along with the channel its result is sent to.
    pub fn new(
        func: &Func<K, V, E>,
        key: K,
        stats: &Arc<MemoStats>,
    ) -> (ComputationChannel<V, E>, Self) {
        let (sender, receiver) = oneshot::channel();
        let computation = Self {
            func: Arc::clone(func),
            key,
            sender,
            stats: Arc::clone(stats),
        };
        (receiver.shared(), computation)
    }

    /// Runs the computation in a new task on `runtime`.
    ///
    /// The task outlives any individual caller, so a caller that stops waiting does not cancel
    /// the computation for everyone else waiting on the same key.
    pub fn spawn(self, runtime: &Handle) {
        let Self {
            func,
            key,
            sender,
            stats,
        } = self;

        let span = tracing::debug_span!("memo.compute", key = ?key);
        stats.record_computation();

        let computation = async move {
            // The function itself is called inside the guarded future, so a panic while creating
            // the future is caught just like one while polling it.
            let result = AssertUnwindSafe(async move { func(key).await })
                .catch_unwind()
                .await;

            let result = match result {
                Ok(Ok(value)) => Ok(Arc::new(value)),
                Ok(Err(err)) => Err(MemoError::Failed(Arc::new(err))),
                Err(payload) => {
                    let message = panic_message(&*payload);
                    tracing::warn!(panic = %message, "memoized function panicked");
                    Err(MemoError::Panicked(message.into()))
                }
            };

            if result.is_err() {
                stats.record_failure();
            }
            tracing::trace!("sealing memo entry");

            // All waiters may be gone already, the entry is sealed nevertheless.
            sender.send(result).ok();
        };

        runtime.spawn(computation.instrument(span));
    }
}

/// Waits for a computation channel to be sealed.
pub(crate) async fn resolve<V, E>(channel: ComputationChannel<V, E>) -> MemoResult<V, E> {
    channel
        .await
        .unwrap_or_else(|_canceled| Err(MemoError::Abandoned))
}

/// Calls `func(key)` in place, without any duplicate suppression or panic handling.
pub(crate) async fn call<K, V, E>(
    func: &Func<K, V, E>,
    key: K,
    stats: &MemoStats,
) -> MemoResult<V, E>
where
    K: MemoKey,
{
    stats.record_computation();
    let result = func(key).await;
    if result.is_err() {
        stats.record_failure();
    }
    result
        .map(Arc::new)
        .map_err(|err| MemoError::Failed(Arc::new(err)))
}
