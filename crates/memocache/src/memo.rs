use std::collections::hash_map::Entry;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;

use crate::computation::{self, Computation, ComputationChannel};
use crate::stats::MemoStats;
use crate::{Func, MemoKey, MemoResult, Memoize, StatsSnapshot};

type ComputationMap<K, V, E> = Arc<Mutex<FxHashMap<K, ComputationChannel<V, E>>>>;

/// A concurrency-safe, non-blocking memoization of a [`Func`].
///
/// Every key maps to a computation channel. The first request for a key registers the channel and
/// spawns the computation, every later request clones the channel and waits for it to be sealed.
/// The map lock is only held for that lookup, so requests for different keys proceed in
/// parallel, while concurrent requests for the same key share a single invocation of the
/// function.
///
/// Entries are never evicted. Errors are memoized like values, see the crate docs.
///
/// Cloning a `Memo` is cheap, clones share the same entries.
pub struct Memo<K, V, E> {
    func: Func<K, V, E>,

    /// Used for deduplicating computations, and holding on to their results.
    computations: ComputationMap<K, V, E>,

    stats: Arc<MemoStats>,
}

impl<K, V, E> Clone for Memo<K, V, E> {
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        Self {
            func: Arc::clone(&self.func),
            computations: Arc::clone(&self.computations),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<K, V, E> fmt::Debug for Memo<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .computations
            .try_lock()
            .map(|c| c.len())
            .unwrap_or_default();
        f.debug_struct("Memo")
            .field("entries", &entries)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl<K, V, E> Memo<K, V, E>
where
    K: MemoKey,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Creates a memoization of the asynchronous function `f`.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self::from_func(crate::func::boxed(f))
    }

    /// Creates a memoization of an already boxed [`Func`].
    pub fn from_func(func: Func<K, V, E>) -> Self {
        Self {
            func,
            computations: Default::default(),
            stats: Default::default(),
        }
    }

    /// Returns the result of the memoized function for `key`.
    ///
    /// The first request for a key spawns the computation, all requests for that key, including
    /// the first, then wait for it to finish and receive the same shared result.
    ///
    /// # Panics
    ///
    /// Panics when polled outside of a tokio runtime. The cache is left untouched in that case.
    pub async fn get(&self, key: K) -> MemoResult<V, E> {
        // Look up the runtime before registering, so a miss is never left without a computation.
        let runtime = Handle::current();

        let (channel, computation) = {
            let mut computations = self.computations.lock();
            match computations.entry(key) {
                Entry::Occupied(entry) => {
                    // A concurrent or earlier computation was deduplicated.
                    tracing::trace!(key = ?entry.key(), "memo hit");
                    self.stats.record_request(true);
                    (entry.get().clone(), None)
                }
                Entry::Vacant(entry) => {
                    tracing::trace!(key = ?entry.key(), "memo miss");
                    self.stats.record_request(false);
                    let (channel, computation) =
                        Computation::new(&self.func, entry.key().clone(), &self.stats);
                    entry.insert(channel.clone());
                    (channel, Some(computation))
                }
            }
        };

        if let Some(computation) = computation {
            computation.spawn(&runtime);
        }

        computation::resolve(channel).await
    }

    /// Returns the number of keys with a pending or sealed entry.
    pub fn len(&self) -> usize {
        self.computations.lock().len()
    }

    /// Returns `true` if no key has been requested yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the usage counters of this cache.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl<K, V, E> Memoize<K, V, E> for Memo<K, V, E>
where
    K: MemoKey,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn get(&self, key: K) -> BoxFuture<'_, MemoResult<V, E>> {
        Memo::get(self, key).boxed()
    }

    fn stats(&self) -> StatsSnapshot {
        Memo::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::MemoError;

    use super::*;

    #[tokio::test]
    async fn test_clones_share_entries() {
        memocache_test::setup();

        let calls = Arc::new(AtomicUsize::new(0));
        let memo = {
            let calls = Arc::clone(&calls);
            Memo::new(move |key: &'static str| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, ()>(key.len()) }
            })
        };
        let clone = memo.clone();

        assert_eq!(*memo.get("hello").await.unwrap(), 5);
        assert_eq!(*clone.get("hello").await.unwrap(), 5);
        assert_eq!(clone.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = memo.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.computations, 1);
    }

    #[tokio::test]
    async fn test_pending_entry_is_registered() {
        memocache_test::setup();

        let memo = Memo::new(|key: u32| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ()>(key)
        });
        assert!(memo.is_empty());

        let pending = tokio::spawn({
            let memo = memo.clone();
            async move { memo.get(7).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the entry exists before the computation is done
        assert_eq!(memo.len(), 1);
        assert_eq!(*pending.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_cancel_computation() {
        memocache_test::setup();

        let calls = Arc::new(AtomicUsize::new(0));
        let memo = {
            let calls = Arc::clone(&calls);
            Memo::new(move |key: u32| {
                let calls = Arc::clone(&calls);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(key + 1)
                }
            })
        };

        // the first caller gives up long before the computation finishes
        let first = tokio::time::timeout(Duration::from_millis(10), memo.get(1)).await;
        assert!(first.is_err());

        assert_eq!(*memo.get(1).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_is_memoized() {
        memocache_test::setup();

        let calls = Arc::new(AtomicUsize::new(0));
        let memo = {
            let calls = Arc::clone(&calls);
            Memo::new(move |key: &'static str| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if key == "bad" {
                        panic!("cannot compute {key}");
                    }
                    Ok::<_, ()>(key)
                }
            })
        };

        let results = futures::future::join_all((0..5).map(|_| memo.get("bad"))).await;
        for result in results {
            assert_eq!(result, Err(MemoError::Panicked("cannot compute bad".into())));
        }

        // waiters were released, and the key is not recomputed
        assert!(memo.get("bad").await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // other keys are unaffected
        assert_eq!(*memo.get("good").await.unwrap(), "good");
        assert_eq!(memo.stats().failures, 1);
    }

    #[test]
    fn test_get_outside_runtime_leaves_no_entry() {
        memocache_test::setup();

        let memo = Memo::new(|key: u32| async move { Ok::<_, ()>(key * 2) });

        let outside = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            futures::executor::block_on(memo.get(4))
        }));
        assert!(outside.is_err());
        assert!(memo.is_empty());
        assert_eq!(memo.stats().requests, 0);

        // the key is still computed normally once a runtime is available
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        assert_eq!(*runtime.block_on(memo.get(4)).unwrap(), 8);
        assert_eq!(memo.stats().computations, 1);
    }
}
