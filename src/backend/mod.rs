//! Adapters that put external stores behind the cache traits.
//!
//! [`StorageCache`] turns a string-keyed, string-valued [`Storage`] into a
//! synchronous [`Cache`](crate::Cache). [`KvCache`] turns an asynchronous
//! [`KvStore`] with per-entry expiry into an [`AsyncCache`](crate::AsyncCache).
//! Both derive keys with a [`Normalizer`](crate::Normalizer) and encode values
//! with a [`Serializer`](crate::Serializer).

mod kv;
mod storage;

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::codec::CodecError;

pub use self::kv::{Expiry, KvCache, KvStore};
pub use self::storage::{MemoryStorage, Storage, StorageCache};

/// A failure of a backend adapter.
///
/// Cloneable, so that it can be shared by every caller of a deduplicated
/// async call.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// A value could not be encoded or decoded.
    #[error("failed to encode or decode a cached value")]
    Codec(#[source] Arc<CodecError>),
    /// The underlying store failed.
    #[error("cache store failed")]
    Store(#[source] Arc<dyn StdError + Send + Sync>),
}

impl BackendError {
    /// Wrap a store's own error.
    pub fn store(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Store(Arc::new(err))
    }
}

impl From<CodecError> for BackendError {
    fn from(err: CodecError) -> Self {
        Self::Codec(Arc::new(err))
    }
}

/// Two backend errors are equal if they are the same failure, as seen by the
/// callers of one shared async call.
impl PartialEq for BackendError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Codec(a), Self::Codec(b)) => Arc::ptr_eq(a, b),
            (Self::Store(a), Self::Store(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_clones_are_the_same_failure() {
        let err = BackendError::store(io::Error::other("connection reset"));
        assert_eq!(err, err.clone());
        assert_ne!(err, BackendError::store(io::Error::other("connection reset")));

        let codec = BackendError::from(CodecError::Malformed("[".into()));
        assert_eq!(codec, codec.clone());
        assert_ne!(codec, err);
    }
}
