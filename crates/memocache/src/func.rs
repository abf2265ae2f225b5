use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::{MemoResult, StatsSnapshot};

/// Requirements on cache keys.
///
/// Keys are hashed into the map, cloned into the computation, and attached to log events.
pub trait MemoKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> MemoKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// The asynchronous function to memoize.
///
/// The caches call it at most once per distinct key over their lifetime, so it should be
/// idempotent. It may be slow and it may fail.
pub type Func<K, V, E> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<V, E>> + Send + Sync>;

/// The blocking function to memoize, see [`BlockingMemo`](crate::BlockingMemo).
pub type BlockingFunc<K, V, E> = Arc<dyn Fn(K) -> Result<V, E> + Send + Sync>;

/// Boxes a closure returning a future into a [`Func`].
pub(crate) fn boxed<K, V, E, F, Fut>(f: F) -> Func<K, V, E>
where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    Arc::new(move |key| f(key).boxed())
}

/// A concurrency-safe memoization of an asynchronous [`Func`].
///
/// This is the caller facing side shared by all memo caches that can be used from many tasks at
/// once, so drivers and tests can be written against any of them.
pub trait Memoize<K, V, E>: Send + Sync {
    /// Returns the result of the memoized function for `key`, computing it if needed.
    fn get(&self, key: K) -> BoxFuture<'_, MemoResult<V, E>>;

    /// Returns the usage counters of this cache.
    fn stats(&self) -> StatsSnapshot;
}

impl<M, K, V, E> Memoize<K, V, E> for Arc<M>
where
    M: Memoize<K, V, E> + ?Sized,
{
    fn get(&self, key: K) -> BoxFuture<'_, MemoResult<V, E>> {
        (**self).get(key)
    }

    fn stats(&self) -> StatsSnapshot {
        (**self).stats()
    }
}
