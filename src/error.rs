//! Typed error kinds that callers branch on.
//!
//! Most fallible paths in codectx propagate `anyhow::Error` with context
//! attached at each seam. The variants here exist for the handful of cases
//! where behavior depends on the *kind* of failure rather than its message:
//!
//! - search converts [`CoreError::CollectionNotFound`] into empty results;
//! - insert rejects [`CoreError::DimensionMismatch`] immediately, without retry;
//! - the embedding retry loop only re-drives errors classified as retryable.
//!
//! Wrap a variant in `anyhow::Error` as usual and recover it with
//! `err.downcast_ref::<CoreError>()` where the kind matters.

use thiserror::Error;

/// Error kinds with behavioral significance.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing or invalid configuration, including unresolved `[VAR]`
    /// environment references. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A vector's length does not match the collection dimension.
    #[error("dimension mismatch: vector has {actual} dimensions, collection expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Attempt to create a collection that already exists.
    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    /// Operation referenced a collection that does not exist.
    #[error("collection '{0}' does not exist")]
    CollectionNotFound(String),

    /// BM25 vector generation was requested before the model was trained.
    #[error("BM25 model is not trained")]
    NotTrained,

    /// Internal invariant violated (bug-level; surfaces immediately).
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl CoreError {
    /// True when `err`'s chain bottoms out in a missing-collection error.
    pub fn is_collection_not_found(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::CollectionNotFound(_))
        )
    }
}
