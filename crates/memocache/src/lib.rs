//! Concurrent memoization of slow, keyed computations.
//!
//! The caches in this crate wrap a user supplied function `f(key) -> Result<V, E>` and remember
//! its result per key. They guarantee that `f` runs at most once per key, even when many callers
//! ask for the same key at the same time, and that callers asking for *different* keys never
//! wait on each other's computation.
//!
//! There are two equivalent target designs:
//!
//! - [`Memo`] keeps a map of per-key computation channels behind a mutex. The mutex is held only
//!   while an entry is looked up or registered, never while `f` runs.
//! - [`MonitorMemo`] confines the map to a single monitor task. Callers talk to it through a
//!   request queue and receive their result over a per-request response channel.
//!
//! [`BlockingMemo`] is the mutex based design for plain OS threads.
//!
//! The [`naive`] module contains the simpler designs these grew out of. They are kept because
//! their failure modes (serialization of unrelated keys, duplicated work) are useful to observe
//! side by side with the real thing.
//!
//! # Errors are memoized
//!
//! A failed computation is cached just like a successful one. Every later caller for that key
//! gets the very same [`MemoError::Failed`] value, and `f` is never retried. A panic inside `f` is
//! sealed in the same way as [`MemoError::Panicked`], so nobody waits forever on a computation
//! that will never finish.

#![warn(missing_docs)]

mod blocking;
mod computation;
mod error;
mod func;
mod memo;
mod monitor;
pub mod naive;
mod stats;
mod utils;

pub use blocking::BlockingMemo;
pub use error::{MemoError, MemoResult};
pub use func::{BlockingFunc, Func, MemoKey, Memoize};
pub use memo::Memo;
pub use monitor::MonitorMemo;
pub use stats::StatsSnapshot;
