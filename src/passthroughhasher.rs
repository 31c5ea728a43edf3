use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};

/// A map keyed by 128-bit key hashes that reuses the key as its own hash.
pub(crate) type KeyMap<V> = HashMap<u128, V, BuildKeyHasher>;

#[derive(Copy, Clone, Default)]
pub(crate) struct BuildKeyHasher;

impl BuildHasher for BuildKeyHasher {
    type Hasher = KeyHasher;

    #[inline]
    fn build_hasher(&self) -> KeyHasher {
        KeyHasher::default()
    }
}

/// Truncates an already well-distributed `u128` to the table's hash.
#[derive(Default)]
pub(crate) struct KeyHasher {
    value: u64,
}

impl Hasher for KeyHasher {
    #[inline(always)]
    fn finish(&self) -> u64 {
        self.value
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        // Only reached for non-`u128` keys, which the map never has.
        for &byte in bytes {
            self.value = self.value.rotate_left(8) ^ u64::from(byte);
        }
    }

    #[inline]
    fn write_u128(&mut self, i: u128) {
        self.value = i as u64;
    }
}
