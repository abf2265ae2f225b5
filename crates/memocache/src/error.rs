use std::sync::Arc;

use thiserror::Error;

/// The outcome of a memoized computation, as handed out to every caller of a key.
///
/// Values are shared behind an [`Arc`], so all callers of one key observe the same allocation.
pub type MemoResult<V, E> = Result<Arc<V>, MemoError<E>>;

/// An error returned from a memoized lookup.
///
/// Apart from [`Closed`](Self::Closed), every variant is sealed into the cache entry for its key
/// and replayed verbatim to all current and future callers of that key.
#[derive(Debug, Error, PartialEq)]
pub enum MemoError<E> {
    /// The memoized function returned an error.
    ///
    /// This is exactly the error value produced by the function, never wrapped or interpreted.
    #[error("computation failed: {0}")]
    Failed(Arc<E>),

    /// The memoized function panicked. Contains the panic message.
    #[error("computation panicked: {0}")]
    Panicked(Arc<str>),

    /// The computation was dropped before it produced a result, for instance because the
    /// runtime it was spawned on shut down.
    #[error("computation was dropped before it completed")]
    Abandoned,

    /// The cache was closed before the request was served.
    #[error("memo cache was closed")]
    Closed,
}

impl<E> MemoError<E> {
    /// Returns the error of the memoized function, if that is what this is.
    pub fn failure(&self) -> Option<&Arc<E>> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

// Not derived, `E` itself does not need to be `Clone`.
impl<E> Clone for MemoError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Failed(err) => Self::Failed(Arc::clone(err)),
            Self::Panicked(message) => Self::Panicked(Arc::clone(message)),
            Self::Abandoned => Self::Abandoned,
            Self::Closed => Self::Closed,
        }
    }
}
