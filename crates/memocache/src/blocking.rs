use std::collections::hash_map::Entry;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::stats::MemoStats;
use crate::utils::panic_message;
use crate::{BlockingFunc, MemoError, MemoKey, MemoResult, StatsSnapshot};

/// A pending entry is an empty cell, setting the cell seals it.
type Slot<V, E> = Arc<OnceCell<MemoResult<V, E>>>;

/// A concurrency-safe, non-blocking memoization of a blocking function, for use from threads.
///
/// This is the same design as [`Memo`](crate::Memo): the map lock is only held while the entry
/// for a key is looked up or registered. The thread that registers an entry calls the function,
/// every other thread asking for that key blocks on that entry alone until it is sealed.
pub struct BlockingMemo<K, V, E> {
    func: BlockingFunc<K, V, E>,
    slots: Mutex<FxHashMap<K, Slot<V, E>>>,
    stats: MemoStats,
}

impl<K, V, E> fmt::Debug for BlockingMemo<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.slots.try_lock().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("BlockingMemo")
            .field("entries", &entries)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl<K, V, E> BlockingMemo<K, V, E>
where
    K: MemoKey,
{
    /// Creates a memoization of the blocking function `f`.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(K) -> Result<V, E> + Send + Sync + 'static,
    {
        Self::from_func(Arc::new(f))
    }

    /// Creates a memoization of an already boxed [`BlockingFunc`].
    pub fn from_func(func: BlockingFunc<K, V, E>) -> Self {
        Self {
            func,
            slots: Default::default(),
            stats: Default::default(),
        }
    }

    /// Returns the result of the memoized function for `key`, blocking the current thread until
    /// it is available.
    pub fn get(&self, key: K) -> MemoResult<V, E> {
        let (slot, key) = {
            let mut slots = self.slots.lock();
            match slots.entry(key) {
                Entry::Occupied(entry) => {
                    tracing::trace!(key = ?entry.key(), "memo hit");
                    self.stats.record_request(true);
                    (Arc::clone(entry.get()), None)
                }
                Entry::Vacant(entry) => {
                    tracing::trace!(key = ?entry.key(), "memo miss");
                    self.stats.record_request(false);
                    let key = entry.key().clone();
                    let slot = Arc::clone(entry.insert(Default::default()));
                    (slot, Some(key))
                }
            }
        };

        match key {
            // This thread registered the entry and is responsible for sealing it.
            Some(key) => slot.get_or_init(|| self.compute(key)).clone(),
            None => slot.wait().clone(),
        }
    }

    /// Calls the function, turning a panic into a sealed [`MemoError::Panicked`].
    fn compute(&self, key: K) -> MemoResult<V, E> {
        let _span = tracing::debug_span!("memo.compute", key = ?key).entered();
        self.stats.record_computation();

        let result = match panic::catch_unwind(AssertUnwindSafe(|| (self.func)(key))) {
            Ok(Ok(value)) => Ok(Arc::new(value)),
            Ok(Err(err)) => Err(MemoError::Failed(Arc::new(err))),
            Err(payload) => {
                let message = panic_message(&*payload);
                tracing::warn!(panic = %message, "memoized function panicked");
                Err(MemoError::Panicked(message.into()))
            }
        };

        if result.is_err() {
            self.stats.record_failure();
        }
        result
    }

    /// Returns the number of keys with a pending or sealed entry.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
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
