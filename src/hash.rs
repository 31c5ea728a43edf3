use std::hash::Hash;

use siphasher::sip128::{Hasher128, SipHasher13};

/// Produce the 128-bit hash of a normalized key.
///
/// Backends that keep entries in process memory store them under this hash
/// instead of the full key text.
#[inline]
pub fn hash<T: Hash + ?Sized>(value: &T) -> u128 {
    let mut state = SipHasher13::new();
    value.hash(&mut state);
    state.finish128().as_u128()
}
