use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use memocache::naive::{DuplicatingMemo, LockedMemo};
use memocache::{Func, MemoKey, Memo, Memoize, MonitorMemo};
use memocache_test::Counter;

pub type DynMemo<K, V, E> = Arc<dyn Memoize<K, V, E>>;

/// The caches that never call the function twice for a key.
pub const DUPLICATE_SUPPRESSING: [&str; 3] = ["memo", "monitor", "locked"];

/// The caches whose unrelated keys do not wait on each other.
pub const PARALLEL: [&str; 3] = ["memo", "monitor", "duplicating"];

/// Creates the named cache, boxed behind [`Memoize`].
pub fn build<K, V, E>(variant: &str, func: Func<K, V, E>) -> DynMemo<K, V, E>
where
    K: MemoKey,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    match variant {
        "memo" => Arc::new(Memo::from_func(func)),
        "monitor" => Arc::new(MonitorMemo::from_func(func)),
        "locked" => Arc::new(LockedMemo::new(move |key: K| func(key))),
        "duplicating" => Arc::new(DuplicatingMemo::new(move |key: K| func(key))),
        _ => panic!("unknown variant {variant}"),
    }
}

/// A slow function that returns a fresh value on every call, counting its calls.
///
/// Two callers can only see the same value if they share a single call.
pub fn slow_unique(counter: &Counter, delay: Duration) -> Func<u64, (u64, usize), ()> {
    let counter = counter.clone();
    Arc::new(move |key| {
        let call = counter.hit();
        async move {
            tokio::time::sleep(delay).await;
            Ok((key, call))
        }
        .boxed()
    })
}
