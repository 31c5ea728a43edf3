//! Memoization of sync and async functions behind pluggable caches.
//!
//! - [`memoize`] and [`memoize_with`] wrap a function of an argument tuple so
//!   that repeated calls with equivalent arguments reuse a stored result.
//!   Results are `Option`s: `None` is never cached.
//! - [`memoize_async`] and [`memoize_async_with`] do the same for async
//!   functions and additionally make concurrent calls with equivalent
//!   arguments share one computation.
//! - [`Cache`] and [`AsyncCache`] are the storage contracts.
//!   [`MemoryCache`] is the in-process default, and the [`backend`] module
//!   adapts string stores and key/value databases.
//! - Arguments are compared by their [normalized key](normalize). Results
//!   that leave the process go through a [`Serializer`].
//!
//! ```
//! use std::convert::Infallible;
//!
//! let greet = memoria::memoize(|(name,): &(&str,)| {
//!     Ok::<_, Infallible>(Some(format!("Hello, {name}!")))
//! });
//!
//! assert_eq!(greet.call(&("world",)), Ok(Some("Hello, world!".into())));
//! assert_eq!(greet.cache().len(), 1);
//! ```

pub mod backend;

mod cache;
mod codec;
mod future;
mod hash;
mod key;
mod memoize;
mod passthroughhasher;
#[cfg(feature = "testing")]
mod testing;
mod value;

pub use crate::cache::{AsyncCache, Cache, MemoryCache, Ready};
pub use crate::codec::{
    CodecError, JsonSerializer, Serializer, SmartSerializer, parse, stringify,
};
pub use crate::future::{
    AsyncOptions, AsyncPolicy, InFlight, MemoizedAsync, Outcome, PromiseCache, Spawner,
    memoize_async, memoize_async_with,
};
pub use crate::key::{Normalizer, SmartNormalizer, normalize};
pub use crate::memoize::{MemoError, Memoized, Options, Policy, memoize, memoize_with};
pub use crate::value::{Nullish, RegExp, ToValue, Token, TypedArray, Value};

#[cfg(feature = "macros")]
pub use memoria_macros::memoize;

/// These are implementation details. Do not rely on them!
#[doc(hidden)]
pub mod internal {
    pub use crate::memoize::{assert_key, cached, cached_option};

    #[cfg(feature = "testing")]
    pub use crate::testing::last_was_hit;
}
