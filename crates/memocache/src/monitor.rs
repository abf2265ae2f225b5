use std::collections::hash_map::Entry;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt};
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::computation::{self, Computation, ComputationChannel};
use crate::stats::MemoStats;
use crate::{Func, MemoError, MemoKey, MemoResult, Memoize, StatsSnapshot};

/// Number of requests that can be queued for the monitor before callers have to wait.
const REQUEST_QUEUE_SIZE: usize = 128;

/// A message requesting that the memoized function be applied to `key`.
struct Request<K, V, E> {
    key: K,
    /// The client wants a single result.
    response: oneshot::Sender<MemoResult<V, E>>,
}

/// A memoization of a [`Func`] whose entries are owned by a monitor task.
///
/// No lock guards the entries. They are confined to the monitor, which takes requests from a
/// queue one at a time. For the first request of a key the monitor spawns the computation, and
/// for every request it spawns a delivery that waits for the entry to be sealed and answers the
/// request. The monitor itself therefore never waits on a computation.
///
/// # Closing
///
/// [`close`](Self::close) stops the monitor:
///
/// - requests made after closing fail with [`MemoError::Closed`],
/// - requests still queued when the monitor stops fail with [`MemoError::Closed`],
/// - requests the monitor already took complete normally, and computations that are already
///   running finish.
///
/// The monitor also stops once every handle to the cache has been dropped.
pub struct MonitorMemo<K, V, E> {
    requests: mpsc::Sender<Request<K, V, E>>,
    shutdown: CancellationToken,
    stats: Arc<MemoStats>,
}

impl<K, V, E> Clone for MonitorMemo<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            shutdown: self.shutdown.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<K, V, E> fmt::Debug for MonitorMemo<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorMemo")
            .field("closed", &self.shutdown.is_cancelled())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl<K, V, E> MonitorMemo<K, V, E>
where
    K: MemoKey,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Creates a memoization of the asynchronous function `f` and starts its monitor.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self::from_func(crate::func::boxed(f))
    }

    /// Creates a memoization of an already boxed [`Func`] and starts its monitor.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn from_func(func: Func<K, V, E>) -> Self {
        let (requests, inbox) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let shutdown = CancellationToken::new();
        let stats = Arc::<MemoStats>::default();

        tokio::spawn(serve(func, inbox, shutdown.clone(), Arc::clone(&stats)));

        Self {
            requests,
            shutdown,
            stats,
        }
    }

    /// Returns the result of the memoized function for `key`.
    ///
    /// Sends the request to the monitor and waits for its response.
    pub async fn get(&self, key: K) -> MemoResult<V, E> {
        if self.shutdown.is_cancelled() {
            return Err(MemoError::Closed);
        }

        let (response, receiver) = oneshot::channel();
        if self.requests.send(Request { key, response }).await.is_err() {
            return Err(MemoError::Closed);
        }

        // The sender is dropped without an answer if the monitor stopped before taking the request.
        receiver.await.unwrap_or(Err(MemoError::Closed))
    }

    /// Stops the monitor. See the type level docs for what happens to pending requests.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Returns `true` once [`close`](Self::close) has been called on any handle.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Returns the usage counters of this cache.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl<K, V, E> Memoize<K, V, E> for MonitorMemo<K, V, E>
where
    K: MemoKey,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn get(&self, key: K) -> BoxFuture<'_, MemoResult<V, E>> {
        MonitorMemo::get(self, key).boxed()
    }

    fn stats(&self) -> StatsSnapshot {
        MonitorMemo::stats(self)
    }
}

/// The monitor loop. The entries are confined to this task.
async fn serve<K, V, E>(
    func: Func<K, V, E>,
    mut inbox: mpsc::Receiver<Request<K, V, E>>,
    shutdown: CancellationToken,
    stats: Arc<MemoStats>,
) where
    K: MemoKey,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let runtime = Handle::current();
    let mut entries: FxHashMap<K, ComputationChannel<V, E>> = FxHashMap::default();

    loop {
        let request = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            request = inbox.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let Request { key, response } = request;
        let channel = match entries.entry(key) {
            Entry::Occupied(entry) => {
                tracing::trace!(key = ?entry.key(), "memo hit");
                stats.record_request(true);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // This is the first request for this key.
                tracing::trace!(key = ?entry.key(), "memo miss");
                stats.record_request(false);
                let (channel, computation) =
                    Computation::new(&func, entry.key().clone(), &stats);
                computation.spawn(&runtime);
                entry.insert(channel).clone()
            }
        };

        runtime.spawn(deliver(channel, response));
    }

    tracing::debug!(entries = entries.len(), "memo monitor stopped");
}

/// Waits for the entry to be sealed and sends its result to the client.
async fn deliver<V, E>(
    channel: ComputationChannel<V, E>,
    response: oneshot::Sender<MemoResult<V, E>>,
) {
    let result = computation::resolve(channel).await;
    // The client may have stopped waiting.
    response.send(result).ok();
}
