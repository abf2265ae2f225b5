//! Simpler memoization designs, for comparison with [`Memo`](crate::Memo).
//!
//! Each of these gives up one of the properties the target designs have:
//!
//! | Type | Safe to share | Duplicate work | Blocks unrelated keys |
//! |---|---|---|---|
//! | [`UnsyncMemo`] | no, needs `&mut self` | no | n/a |
//! | [`LockedMemo`] | yes | no | yes, while the function runs |
//! | [`DuplicatingMemo`] | yes | yes, on concurrent misses | no |
//!
//! None of them handle panics of the memoized function: the panic unwinds into the caller that
//! triggered the computation, and nothing is cached for the key.

use std::fmt;
use std::future::Future;

use futures::future::{BoxFuture, FutureExt};
use rustc_hash::FxHashMap;

use crate::computation::call;
use crate::stats::MemoStats;
use crate::{Func, MemoKey, MemoResult, Memoize, StatsSnapshot};

/// A memoization without any synchronization.
///
/// Lookups take `&mut self`, so the compiler only allows one caller at a time. Wrapping it in a
/// lock to share it turns it into a [`LockedMemo`].
pub struct UnsyncMemo<K, V, E> {
    func: Func<K, V, E>,
    cache: FxHashMap<K, MemoResult<V, E>>,
    stats: MemoStats,
}

impl<K, V, E> fmt::Debug for UnsyncMemo<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsyncMemo")
            .field("entries", &self.cache.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl<K: MemoKey, V, E> UnsyncMemo<K, V, E> {
    /// Creates a memoization of the asynchronous function `f`.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self {
            func: crate::func::boxed(f),
            cache: Default::default(),
            stats: Default::default(),
        }
    }

    /// Returns the result of the memoized function for `key`, computing it if needed.
    pub async fn get(&mut self, key: K) -> MemoResult<V, E> {
        if let Some(result) = self.cache.get(&key) {
            self.stats.record_request(true);
            return result.clone();
        }
        self.stats.record_request(false);

        let result = call(&self.func, key.clone(), &self.stats).await;
        self.cache.insert(key, result.clone());
        result
    }

    /// Returns the usage counters of this cache.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// A memoization that holds a single lock for the whole lookup, including the computation.
///
/// This is safe and never duplicates work, but every request waits for whatever computation is
/// currently running, no matter its key.
pub struct LockedMemo<K, V, E> {
    func: Func<K, V, E>,
    cache: tokio::sync::Mutex<FxHashMap<K, MemoResult<V, E>>>,
    stats: MemoStats,
}

impl<K, V, E> fmt::Debug for LockedMemo<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedMemo")
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl<K: MemoKey, V, E> LockedMemo<K, V, E> {
    /// Creates a memoization of the asynchronous function `f`.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self {
            func: crate::func::boxed(f),
            cache: Default::default(),
            stats: Default::default(),
        }
    }

    /// Returns the result of the memoized function for `key`, computing it if needed.
    pub async fn get(&self, key: K) -> MemoResult<V, E> {
        let mut cache = self.cache.lock().await;
        if let Some(result) = cache.get(&key) {
            self.stats.record_request(true);
            return result.clone();
        }
        self.stats.record_request(false);

        // The lock stays held while the function runs.
        let result = call(&self.func, key.clone(), &self.stats).await;
        cache.insert(key, result.clone());
        result
    }

    /// Returns the usage counters of this cache.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl<K, V, E> Memoize<K, V, E> for LockedMemo<K, V, E>
where
    K: MemoKey,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn get(&self, key: K) -> BoxFuture<'_, MemoResult<V, E>> {
        LockedMemo::get(self, key).boxed()
    }

    fn stats(&self) -> StatsSnapshot {
        LockedMemo::stats(self)
    }
}

/// A memoization that releases its lock while the function runs.
///
/// Unrelated keys no longer wait on each other, but between the lookup and the insert several
/// callers can miss the same key, and each of them calls the function. The last one to finish
/// overwrites the entry, and every caller returns the result it computed itself.
pub struct DuplicatingMemo<K, V, E> {
    func: Func<K, V, E>,
    cache: parking_lot::Mutex<FxHashMap<K, MemoResult<V, E>>>,
    stats: MemoStats,
}

impl<K, V, E> fmt::Debug for DuplicatingMemo<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplicatingMemo")
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl<K: MemoKey, V, E> DuplicatingMemo<K, V, E> {
    /// Creates a memoization of the asynchronous function `f`.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self {
            func: crate::func::boxed(f),
            cache: Default::default(),
            stats: Default::default(),
        }
    }

    /// Returns the result of the memoized function for `key`, computing it if needed.
    pub async fn get(&self, key: K) -> MemoResult<V, E> {
        let cached = self.cache.lock().get(&key).cloned();
        if let Some(result) = cached {
            self.stats.record_request(true);
            return result;
        }
        self.stats.record_request(false);

        // Between the two critical sections, several callers may race to compute the same key.
        let result = call(&self.func, key.clone(), &self.stats).await;
        self.cache.lock().insert(key, result.clone());
        result
    }

    /// Returns the usage counters of this cache.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl<K, V, E> Memoize<K, V, E> for DuplicatingMemo<K, V, E>
where
    K: MemoKey,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn get(&self, key: K) -> BoxFuture<'_, MemoResult<V, E>> {
        DuplicatingMemo::get(self, key).boxed()
    }

    fn stats(&self) -> StatsSnapshot {
        DuplicatingMemo::stats(self)
    }
}
