use std::convert::Infallible;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;

use crate::hash::hash;
use crate::key::{Normalizer, SmartNormalizer};
use crate::passthroughhasher::KeyMap;

/// A synchronous store of memoized results.
///
/// Keys are the raw argument tuples. Turning them into lookup keys is the
/// backend's business. `None` is the only way to report a missing entry, and
/// [`set`](Self::set) is never called with a nullish result.
pub trait Cache<A: ?Sized, R> {
    /// The backend's failure type.
    type Error;

    /// Look up the entry for `key`.
    fn get(&self, key: &A) -> Result<Option<R>, Self::Error>;

    /// Store `value` as the entry for `key`.
    fn set(&self, key: &A, value: R) -> Result<(), Self::Error>;

    /// Remove the entry for `key`. Removing a missing entry is not an error.
    fn delete(&self, key: &A) -> Result<(), Self::Error>;
}

impl<A, R, C> Cache<A, R> for &C
where
    A: ?Sized,
    C: Cache<A, R> + ?Sized,
{
    type Error = C::Error;

    fn get(&self, key: &A) -> Result<Option<R>, Self::Error> {
        (**self).get(key)
    }

    fn set(&self, key: &A, value: R) -> Result<(), Self::Error> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &A) -> Result<(), Self::Error> {
        (**self).delete(key)
    }
}

impl<A, R, C> Cache<A, R> for Arc<C>
where
    A: ?Sized,
    C: Cache<A, R> + ?Sized,
{
    type Error = C::Error;

    fn get(&self, key: &A) -> Result<Option<R>, Self::Error> {
        (**self).get(key)
    }

    fn set(&self, key: &A, value: R) -> Result<(), Self::Error> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &A) -> Result<(), Self::Error> {
        (**self).delete(key)
    }
}

/// An asynchronous store of memoized results.
///
/// Same contract as [`Cache`], except that every operation may suspend.
/// Synchronous caches can be used where an `AsyncCache` is expected by
/// wrapping them in [`Ready`].
pub trait AsyncCache<A: ?Sized, R>: Send + Sync {
    /// The backend's failure type.
    type Error;

    /// Look up the entry for `key`.
    fn get<'a>(&'a self, key: &'a A) -> BoxFuture<'a, Result<Option<R>, Self::Error>>;

    /// Store `value` as the entry for `key`.
    fn set<'a>(&'a self, key: &'a A, value: R) -> BoxFuture<'a, Result<(), Self::Error>>;

    /// Remove the entry for `key`. Removing a missing entry is not an error.
    fn delete<'a>(&'a self, key: &'a A) -> BoxFuture<'a, Result<(), Self::Error>>;
}

impl<A, R, C> AsyncCache<A, R> for Arc<C>
where
    A: ?Sized,
    C: AsyncCache<A, R> + ?Sized,
{
    type Error = C::Error;

    fn get<'a>(&'a self, key: &'a A) -> BoxFuture<'a, Result<Option<R>, Self::Error>> {
        (**self).get(key)
    }

    fn set<'a>(&'a self, key: &'a A, value: R) -> BoxFuture<'a, Result<(), Self::Error>> {
        (**self).set(key, value)
    }

    fn delete<'a>(&'a self, key: &'a A) -> BoxFuture<'a, Result<(), Self::Error>> {
        (**self).delete(key)
    }
}

/// Adapts a synchronous [`Cache`] into an [`AsyncCache`] whose operations
/// complete immediately.
#[derive(Debug, Default, Clone)]
pub struct Ready<C>(pub C);

impl<A, R, C> AsyncCache<A, R> for Ready<C>
where
    A: ?Sized + Sync,
    R: Send + 'static,
    C: Cache<A, R> + Send + Sync,
    C::Error: Send + 'static,
{
    type Error = C::Error;

    fn get<'a>(&'a self, key: &'a A) -> BoxFuture<'a, Result<Option<R>, Self::Error>> {
        future::ready(self.0.get(key)).boxed()
    }

    fn set<'a>(&'a self, key: &'a A, value: R) -> BoxFuture<'a, Result<(), Self::Error>> {
        future::ready(self.0.set(key, value)).boxed()
    }

    fn delete<'a>(&'a self, key: &'a A) -> BoxFuture<'a, Result<(), Self::Error>> {
        future::ready(self.0.delete(key)).boxed()
    }
}

/// The default backend: an in-process table of memoized results.
///
/// Entries are stored under the 128-bit hash of their normalized key. The
/// table never evicts on its own; call [`clear`](Self::clear) to drop
/// everything.
pub struct MemoryCache<R, N = SmartNormalizer> {
    /// Maps from key hashes to memoized results.
    entries: Mutex<KeyMap<R>>,
    /// Turns argument tuples into key text.
    normalizer: N,
}

impl<R> MemoryCache<R> {
    /// Create an empty cache with the default normalizer.
    pub fn new() -> Self {
        Self::with_normalizer(SmartNormalizer)
    }
}

impl<R, N> MemoryCache<R, N> {
    /// Create an empty cache with a custom normalizer.
    pub fn with_normalizer(normalizer: N) -> Self {
        Self { entries: Mutex::new(KeyMap::default()), normalizer }
    }

    /// The number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let evicted = std::mem::take(&mut *self.entries.lock());
        drop(evicted);
    }

    fn key<A: ?Sized>(&self, args: &A) -> u128
    where
        N: Normalizer<A>,
    {
        hash(&self.normalizer.normalize(args))
    }
}

impl<R> Default for MemoryCache<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, N> Debug for MemoryCache<R, N> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("MemoryCache").field("len", &self.len()).finish_non_exhaustive()
    }
}

impl<A, R, N> Cache<A, R> for MemoryCache<R, N>
where
    A: ?Sized,
    R: Clone,
    N: Normalizer<A>,
{
    type Error = Infallible;

    fn get(&self, key: &A) -> Result<Option<R>, Infallible> {
        let key = self.key(key);
        Ok(self.entries.lock().get(&key).cloned())
    }

    fn set(&self, key: &A, value: R) -> Result<(), Infallible> {
        let key = self.key(key);
        let replaced = self.entries.lock().insert(key, value);
        drop(replaced);
        Ok(())
    }

    fn delete(&self, key: &A) -> Result<(), Infallible> {
        let key = self.key(key);
        // Drop the removed entry only after the lock is released: dropping
        // an in-flight handle may re-enter this cache.
        let removed = self.entries.lock().remove(&key);
        drop(removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_cache() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get(&("a", 1)), Ok(None));
        cache.set(&("a", 1), "a1".to_owned()).unwrap();
        assert_eq!(cache.get(&("a", 1)), Ok(Some("a1".to_owned())));
        assert_eq!(cache.get(&("a", 2)), Ok(None));
        assert_eq!(cache.len(), 1);

        cache.delete(&("a", 1)).unwrap();
        cache.delete(&("a", 1)).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_memory_cache_custom_normalizer() {
        let cache = MemoryCache::with_normalizer(|args: &(i32, i32)| (args.0 + args.1).to_string());
        cache.set(&(1, 2), 3).unwrap();
        assert_eq!(cache.get(&(2, 1)), Ok(Some(3)));
        cache.clear();
        assert_eq!(cache.get(&(1, 2)), Ok(None));
    }

    #[test]
    fn test_ready_adapter() {
        let cache = Ready(MemoryCache::new());
        futures::executor::block_on(async {
            AsyncCache::set(&cache, &(7,), 49).await.unwrap();
            assert_eq!(AsyncCache::get(&cache, &(7,)).await, Ok(Some(49)));
            AsyncCache::delete(&cache, &(7,)).await.unwrap();
            assert_eq!(AsyncCache::get(&cache, &(7,)).await, Ok(None));
        });
    }
}
