use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Formatter};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::BackendError;
use crate::cache::Cache;
use crate::codec::{Serializer, SmartSerializer};
use crate::key::{Normalizer, SmartNormalizer};
use crate::value::Nullish;

/// A string-keyed, string-valued store in the style of web storage.
pub trait Storage {
    /// The store's failure type.
    type Error: StdError + Send + Sync + 'static;

    /// Read the item under `key`.
    fn get_item(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Write `value` under `key`, replacing any previous item.
    fn set_item(&self, key: &str, value: &str) -> Result<(), Self::Error>;

    /// Remove the item under `key`, if any.
    fn remove_item(&self, key: &str) -> Result<(), Self::Error>;
}

impl<S: Storage + ?Sized> Storage for &S {
    type Error = S::Error;

    fn get_item(&self, key: &str) -> Result<Option<String>, Self::Error> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), Self::Error> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), Self::Error> {
        (**self).remove_item(key)
    }
}

/// An in-process [`Storage`].
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<FxHashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Whether no item is stored.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// All stored keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }
}

impl Debug for MemoryStorage {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("MemoryStorage").field("len", &self.len()).finish()
    }
}

impl Storage for MemoryStorage {
    type Error = Infallible;

    fn get_item(&self, key: &str) -> Result<Option<String>, Infallible> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), Infallible> {
        self.items.write().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), Infallible> {
        self.items.write().remove(key);
        Ok(())
    }
}

/// A [`Cache`] on top of a [`Storage`].
///
/// Items are stored under the prefix followed by the normalized key, holding
/// the serialized result.
pub struct StorageCache<S, N = SmartNormalizer, Z = SmartSerializer> {
    storage: S,
    prefix: String,
    normalizer: N,
    serializer: Z,
}

impl<S> StorageCache<S> {
    /// Store entries in `storage` under keys starting with `prefix`.
    pub fn new(storage: S, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            normalizer: SmartNormalizer,
            serializer: SmartSerializer,
        }
    }
}

impl<S, N, Z> StorageCache<S, N, Z> {
    /// Derive keys with a custom normalizer.
    pub fn with_normalizer<M>(self, normalizer: M) -> StorageCache<S, M, Z> {
        StorageCache {
            storage: self.storage,
            prefix: self.prefix,
            normalizer,
            serializer: self.serializer,
        }
    }

    /// Encode values with a custom serializer.
    pub fn with_serializer<Y>(self, serializer: Y) -> StorageCache<S, N, Y> {
        StorageCache {
            storage: self.storage,
            prefix: self.prefix,
            normalizer: self.normalizer,
            serializer,
        }
    }

    /// The underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn key<A: ?Sized>(&self, args: &A) -> String
    where
        N: Normalizer<A>,
    {
        let mut key = self.prefix.clone();
        key.push_str(&self.normalizer.normalize(args));
        key
    }
}

impl<S: Debug, N, Z> Debug for StorageCache<S, N, Z> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("StorageCache")
            .field("storage", &self.storage)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl<A, R, S, N, Z> Cache<A, R> for StorageCache<S, N, Z>
where
    A: ?Sized,
    R: Nullish,
    S: Storage,
    N: Normalizer<A>,
    Z: Serializer<R>,
{
    type Error = BackendError;

    fn get(&self, key: &A) -> Result<Option<R>, BackendError> {
        let text = self.storage.get_item(&self.key(key)).map_err(BackendError::store)?;
        let value = text.map(|text| self.serializer.parse(&text)).transpose()?;
        Ok(value.filter(|value| !value.is_nullish()))
    }

    fn set(&self, key: &A, value: R) -> Result<(), BackendError> {
        let text = self.serializer.stringify(&value)?;
        self.storage.set_item(&self.key(key), &text).map_err(BackendError::store)
    }

    fn delete(&self, key: &A) -> Result<(), BackendError> {
        self.storage.remove_item(&self.key(key)).map_err(BackendError::store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_prefixed_keys() {
        let cache = StorageCache::new(MemoryStorage::new(), "memo:");
        cache.set(&("a", 1), Value::from("a1")).unwrap();
        assert_eq!(cache.storage().keys(), vec![r#"memo:["a",1.0]"#.to_owned()]);
        assert_eq!(cache.get(&("a", 1)).unwrap(), Some(Value::from("a1")));

        cache.delete(&("a", 1)).unwrap();
        cache.delete(&("a", 1)).unwrap();
        assert!(cache.storage().is_empty());
    }

    #[test]
    fn test_stored_null_is_a_miss() {
        let storage = MemoryStorage::new();
        storage.set_item("[1.0]", "null").unwrap();

        let cache = StorageCache::new(&storage, "");
        assert_eq!(cache.get(&(1,)).unwrap(), None::<Value>);
    }

    #[test]
    fn test_corrupt_item_is_a_codec_error() {
        let storage = MemoryStorage::new();
        storage.set_item("[1.0]", "{not json").unwrap();

        let cache = StorageCache::new(&storage, "");
        let result: Result<Option<Value>, _> = cache.get(&(1,));
        assert!(matches!(result, Err(BackendError::Codec(_))));
    }
}
