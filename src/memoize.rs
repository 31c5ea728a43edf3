use std::convert::Infallible;
use std::fmt::{self, Debug, Formatter};

use thiserror::Error;

use crate::cache::{Cache, MemoryCache};
use crate::value::{Nullish, ToValue};

/// A caller-supplied decision over a result and the arguments that produced it.
pub type Policy<A, R> = Box<dyn Fn(&R, &A) -> bool + Send + Sync>;

/// The error of a memoized call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoError<E, C> {
    /// The wrapped function failed. Carries its error unchanged.
    #[error(transparent)]
    Compute(E),
    /// The cache backend failed.
    #[error("cache backend failed")]
    Cache(#[source] C),
}

impl<E, C> MemoError<E, C> {
    /// The wrapped function's error, if that is what failed.
    pub fn into_compute(self) -> Option<E> {
        match self {
            Self::Compute(err) => Some(err),
            Self::Cache(_) => None,
        }
    }
}

/// Configuration of a [`Memoized`] function.
///
/// Unset policies fall back to their defaults when the wrapper is built:
/// cached results are always trusted and non-nullish results are always
/// admitted.
pub struct Options<A, R, C = MemoryCache<R>> {
    /// Where results are stored.
    pub cache: C,
    /// Decides whether a cached result is discarded and recomputed.
    pub should_recalculate: Option<Policy<A, R>>,
    /// Decides whether a freshly computed result is admitted to the cache.
    pub should_cache: Option<Policy<A, R>>,
}

impl<A, R, C> Options<A, R, C> {
    /// Configure memoization into the given cache.
    pub fn with_cache(cache: C) -> Self {
        Self { cache, should_recalculate: None, should_cache: None }
    }

    /// Set the recalculation policy.
    pub fn should_recalculate(
        mut self,
        policy: impl Fn(&R, &A) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_recalculate = Some(Box::new(policy));
        self
    }

    /// Set the admission policy.
    pub fn should_cache(mut self, policy: impl Fn(&R, &A) -> bool + Send + Sync + 'static) -> Self {
        self.should_cache = Some(Box::new(policy));
        self
    }
}

impl<A, R> Default for Options<A, R> {
    fn default() -> Self {
        Self::with_cache(MemoryCache::new())
    }
}

/// A memoized function.
///
/// The wrapped function has the shape `Fn(&A) -> Result<Option<R>, E>`, where
/// `A` is the argument tuple. `Ok(None)` and a result that is
/// [nullish](Nullish) are never cached.
pub struct Memoized<F, A, R, C = MemoryCache<R>> {
    func: F,
    cache: C,
    should_recalculate: Policy<A, R>,
    should_cache: Policy<A, R>,
}

/// Memoize a function into a fresh in-memory cache.
pub fn memoize<F, A, R, E>(func: F) -> Memoized<F, A, R>
where
    F: Fn(&A) -> Result<Option<R>, E>,
    A: ToValue,
    R: Clone + Nullish,
{
    memoize_with(func, Options::default())
}

/// Memoize a function with explicit options.
pub fn memoize_with<F, A, R, E, C>(func: F, options: Options<A, R, C>) -> Memoized<F, A, R, C>
where
    F: Fn(&A) -> Result<Option<R>, E>,
    C: Cache<A, R>,
{
    // By default, every cached result is trusted ...
    let should_recalculate: Policy<A, R> = match options.should_recalculate {
        Some(policy) => policy,
        None => Box::new(|_: &R, _: &A| false),
    };

    // ... and every non-nullish result is admitted.
    let should_cache: Policy<A, R> = match options.should_cache {
        Some(policy) => policy,
        None => Box::new(|_: &R, _: &A| true),
    };

    Memoized { func, cache: options.cache, should_recalculate, should_cache }
}

impl<F, A, R, C> Memoized<F, A, R, C>
where
    C: Cache<A, R>,
    R: Clone + Nullish,
{
    /// Call the function, trying to use a cached result for it.
    ///
    /// A cached result is returned without calling the function unless the
    /// recalculation policy rejects it. A fresh result is stored if it is
    /// non-nullish and admitted. Otherwise any stored entry is removed.
    /// Errors are never cached and the call is never retried.
    ///
    /// If storing or removing the entry fails after the function succeeded,
    /// the call fails with [`MemoError::Cache`] and the fresh result is
    /// dropped. The entry for these arguments is then in whatever state the
    /// backend left it, and calling again recomputes unless it holds a result.
    pub fn call<E>(&self, args: &A) -> Result<Option<R>, MemoError<E, C::Error>>
    where
        F: Fn(&A) -> Result<Option<R>, E>,
    {
        let (output, _hit) = self.lookup(args)?;

        #[cfg(feature = "testing")]
        crate::testing::record(_hit);

        Ok(output)
    }

    /// Like [`call`](Self::call), but reports whether the result was a hit
    /// instead of recording it.
    pub(crate) fn lookup<E>(&self, args: &A) -> Result<(Option<R>, bool), MemoError<E, C::Error>>
    where
        F: Fn(&A) -> Result<Option<R>, E>,
    {
        // Check if there is a cached output. A stored null marker is a miss.
        let cached = self.cache.get(args).map_err(MemoError::Cache)?;
        if let Some(cached) = cached.filter(|cached| !cached.is_nullish()) {
            if !(self.should_recalculate)(&cached, args) {
                tracing::trace!("memoized call hit");
                return Ok((Some(cached), true));
            }

            tracing::trace!("discarding cached result");
        }

        let output = (self.func)(args).map_err(MemoError::Compute)?;

        match &output {
            Some(value) if !value.is_nullish() && (self.should_cache)(value, args) => {
                tracing::trace!("storing memoized result");
                self.cache.set(args, value.clone())
            }
            _ => {
                tracing::trace!("removing memoized result");
                self.cache.delete(args)
            }
        }
        .map_err(MemoError::Cache)?;

        Ok((output, false))
    }
}

impl<F, A, R, C> Memoized<F, A, R, C> {
    /// The cache that backs this function.
    pub fn cache(&self) -> &C {
        &self.cache
    }
}

impl<F, A, R, C: Debug> Debug for Memoized<F, A, R, C> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Memoized").field("cache", &self.cache).finish_non_exhaustive()
    }
}

/// Ensure a type is suitable as a `#[memoize]` argument.
pub fn assert_key<T: ToValue + Clone>() {}

/// Execute a function that never returns a nullish result, trying to use a
/// cached result for it.
pub fn cached<A, R, F>(cache: &MemoryCache<R>, args: A, func: F) -> R
where
    A: ToValue + Clone,
    R: Clone + Nullish,
    F: Fn(A) -> R + Copy,
{
    let memoized = memoize_with(
        move |args: &A| Ok::<_, Infallible>(Some(func(args.clone()))),
        Options::with_cache(cache),
    );

    match memoized.call(&args) {
        // The wrapper never produces `None`, but recomputing is still correct.
        Ok(output) => output.unwrap_or_else(|| func(args)),
        Err(MemoError::Compute(never) | MemoError::Cache(never)) => match never {},
    }
}

/// Execute a function whose `None` result is nullish, trying to use a cached
/// result for it.
pub fn cached_option<A, R, F>(cache: &MemoryCache<R>, args: A, func: F) -> Option<R>
where
    A: ToValue + Clone,
    R: Clone + Nullish,
    F: Fn(A) -> Option<R>,
{
    let memoized = memoize_with(
        |args: &A| Ok::<_, Infallible>(func(args.clone())),
        Options::with_cache(cache),
    );

    match memoized.call(&args) {
        Ok(output) => output,
        Err(MemoError::Compute(never) | MemoError::Cache(never)) => match never {},
    }
}
