use std::error::Error as StdError;
use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::BackendError;
use crate::cache::AsyncCache;
use crate::codec::{Serializer, SmartSerializer};
use crate::key::{Normalizer, SmartNormalizer};
use crate::value::Nullish;

/// An asynchronous key/value database with per-entry expiry.
pub trait KvStore: Send + Sync {
    /// The store's failure type.
    type Error: StdError + Send + Sync + 'static;

    /// Read the value under `key`.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, Self::Error>>;

    /// Write `value` under `key`. The entry expires after `expiry`, if given.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        expiry: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), Self::Error>>;

    /// Remove the value under `key`, if any.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), Self::Error>>;
}

/// How long an entry written by a [`KvCache`] lives.
pub enum Expiry<A: ?Sized, R> {
    /// Entries live until removed.
    Never,
    /// Every entry expires after a fixed time.
    After(Duration),
    /// The expiry is derived from the result and its arguments. `None` means
    /// the entry never expires.
    With(Box<dyn Fn(&R, &A) -> Option<Duration> + Send + Sync>),
}

impl<A: ?Sized, R> Expiry<A, R> {
    /// Expire every entry after `millis` milliseconds.
    pub fn millis(millis: u64) -> Self {
        Self::After(Duration::from_millis(millis))
    }

    /// Derive each entry's expiry with a function.
    pub fn with(f: impl Fn(&R, &A) -> Option<Duration> + Send + Sync + 'static) -> Self {
        Self::With(Box::new(f))
    }

    fn resolve(&self, result: &R, args: &A) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::After(ttl) => Some(*ttl),
            Self::With(f) => f(result, args),
        }
    }
}

impl<A: ?Sized, R> Default for Expiry<A, R> {
    fn default() -> Self {
        Self::Never
    }
}

impl<A: ?Sized, R> Debug for Expiry<A, R> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Never => f.pad("Never"),
            Self::After(ttl) => f.debug_tuple("After").field(ttl).finish(),
            Self::With(_) => f.pad("With(..)"),
        }
    }
}

/// An [`AsyncCache`] on top of a [`KvStore`].
pub struct KvCache<A: ?Sized, R, K, N = SmartNormalizer, Z = SmartSerializer> {
    store: K,
    prefix: String,
    expiry: Expiry<A, R>,
    normalizer: N,
    serializer: Z,
}

impl<A: ?Sized, R, K> KvCache<A, R, K> {
    /// Store entries in `store` under keys starting with `prefix`. Entries
    /// never expire unless an [`Expiry`] is configured.
    pub fn new(store: K, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            expiry: Expiry::Never,
            normalizer: SmartNormalizer,
            serializer: SmartSerializer,
        }
    }
}

impl<A: ?Sized, R, K, N, Z> KvCache<A, R, K, N, Z> {
    /// Set the expiry policy.
    pub fn expiry(mut self, expiry: Expiry<A, R>) -> Self {
        self.expiry = expiry;
        self
    }

    /// Derive keys with a custom normalizer.
    pub fn with_normalizer<M>(self, normalizer: M) -> KvCache<A, R, K, M, Z> {
        KvCache {
            store: self.store,
            prefix: self.prefix,
            expiry: self.expiry,
            normalizer,
            serializer: self.serializer,
        }
    }

    /// Encode values with a custom serializer.
    pub fn with_serializer<Y>(self, serializer: Y) -> KvCache<A, R, K, N, Y> {
        KvCache {
            store: self.store,
            prefix: self.prefix,
            expiry: self.expiry,
            normalizer: self.normalizer,
            serializer,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &K {
        &self.store
    }

    fn key(&self, args: &A) -> String
    where
        N: Normalizer<A>,
    {
        let mut key = self.prefix.clone();
        key.push_str(&self.normalizer.normalize(args));
        key
    }
}

impl<A: ?Sized, R, K: Debug, N, Z> Debug for KvCache<A, R, K, N, Z> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("KvCache")
            .field("store", &self.store)
            .field("prefix", &self.prefix)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl<A, R, K, N, Z> AsyncCache<A, R> for KvCache<A, R, K, N, Z>
where
    A: ?Sized + Sync,
    R: Nullish + Send,
    K: KvStore,
    N: Normalizer<A> + Send + Sync,
    Z: Serializer<R> + Send + Sync,
{
    type Error = BackendError;

    fn get<'a>(&'a self, key: &'a A) -> BoxFuture<'a, Result<Option<R>, BackendError>> {
        let key = self.key(key);
        async move {
            let text = self.store.get(&key).await.map_err(BackendError::store)?;
            let value = text.map(|text| self.serializer.parse(&text)).transpose()?;
            Ok::<_, BackendError>(value.filter(|value| !value.is_nullish()))
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a A, value: R) -> BoxFuture<'a, Result<(), BackendError>> {
        let expiry = self.expiry.resolve(&value, key);
        let text = self.serializer.stringify(&value);
        let key = self.key(key);
        async move {
            let text = text?;
            self.store.set(&key, text, expiry).await.map_err(BackendError::store)
        }
        .boxed()
    }

    fn delete<'a>(&'a self, key: &'a A) -> BoxFuture<'a, Result<(), BackendError>> {
        let key = self.key(key);
        async move { self.store.delete(&key).await.map_err(BackendError::store) }.boxed()
    }
}
