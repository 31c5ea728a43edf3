use std::convert::Infallible;
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use parking_lot::Mutex;

use crate::cache::{AsyncCache, Cache, MemoryCache, Ready};
use crate::memoize::{MemoError, Memoized, Options, memoize_with};
use crate::value::{Nullish, ToValue};

/// The settled outcome of a memoized async call.
pub type Outcome<R, E, CE> = Result<Option<R>, MemoError<E, CE>>;

/// A pending memoized call, shared by every caller with equivalent arguments.
///
/// The underlying computation is handed to a [`Spawner`] when it starts, so it
/// settles even if every handle is dropped. Awaiting a handle also drives it.
pub type InFlight<R, E, CE> = Shared<BoxFuture<'static, Outcome<R, E, CE>>>;

impl<Fut: Future> Nullish for Shared<Fut> {}

/// The synchronous store that deduplicates concurrent calls.
///
/// It only holds handles to computations that have not settled yet, so it
/// lives in process memory and cannot fail.
pub type PromiseCache<A, R, E, CE> =
    Arc<dyn Cache<A, InFlight<R, E, CE>, Error = Infallible> + Send + Sync>;

/// An asynchronous decision over a result and the arguments that produced it.
pub type AsyncPolicy<A, R> = Arc<dyn Fn(&R, &A) -> BoxFuture<'static, bool> + Send + Sync>;

/// Runs a started computation independently of the callers waiting on it.
pub type Spawner = Arc<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>;

/// The type-erased wrapped function.
type Compute<A, R, E> = Box<dyn Fn(A) -> BoxFuture<'static, Result<Option<R>, E>> + Send + Sync>;

/// Starts a deduplicated computation for a set of arguments.
type Start<A, R, E, CE> =
    Box<dyn Fn(&A) -> Result<Option<InFlight<R, E, CE>>, Infallible> + Send + Sync>;

/// Configuration of a [`MemoizedAsync`] function.
///
/// Policies may be plain or asynchronous predicates. Unset policies, an unset
/// promise cache and an unset spawner fall back to their defaults when the
/// wrapper is built.
pub struct AsyncOptions<A, R, E, C = Ready<MemoryCache<R>>>
where
    C: AsyncCache<A, R>,
{
    /// Where results are stored.
    pub cache: C,
    /// Where pending calls are registered. Defaults to a [`MemoryCache`].
    pub promise_cache: Option<PromiseCache<A, R, E, C::Error>>,
    /// Decides whether a cached result is discarded and recomputed.
    pub should_recalculate: Option<AsyncPolicy<A, R>>,
    /// Decides whether a freshly computed result is admitted to the cache.
    pub should_cache: Option<AsyncPolicy<A, R>>,
    /// Drives started computations. Defaults to spawning onto the current
    /// tokio runtime.
    pub spawner: Option<Spawner>,
}

impl<A, R, E, C> AsyncOptions<A, R, E, C>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    C: AsyncCache<A, R>,
{
    /// Configure memoization into the given asynchronous cache.
    pub fn with_cache(cache: C) -> Self {
        Self {
            cache,
            promise_cache: None,
            should_recalculate: None,
            should_cache: None,
            spawner: None,
        }
    }

    /// Replace the store used to deduplicate concurrent calls.
    pub fn promise_cache(
        mut self,
        cache: impl Cache<A, InFlight<R, E, C::Error>, Error = Infallible> + Send + Sync + 'static,
    ) -> Self {
        self.promise_cache = Some(Arc::new(cache));
        self
    }

    /// Set the recalculation policy.
    pub fn should_recalculate(
        mut self,
        policy: impl Fn(&R, &A) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_recalculate = Some(immediate(policy));
        self
    }

    /// Set an asynchronous recalculation policy.
    pub fn should_recalculate_async<P, Fut>(mut self, policy: P) -> Self
    where
        P: Fn(R, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.should_recalculate = Some(awaited(policy));
        self
    }

    /// Set the admission policy.
    pub fn should_cache(mut self, policy: impl Fn(&R, &A) -> bool + Send + Sync + 'static) -> Self {
        self.should_cache = Some(immediate(policy));
        self
    }

    /// Set an asynchronous admission policy.
    pub fn should_cache_async<P, Fut>(mut self, policy: P) -> Self
    where
        P: Fn(R, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.should_cache = Some(awaited(policy));
        self
    }

    /// Replace how started computations are driven.
    pub fn spawner(
        mut self,
        spawner: impl Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
    ) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }
}

impl<A, R, E> Default for AsyncOptions<A, R, E>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    Ready<MemoryCache<R>>: AsyncCache<A, R>,
{
    fn default() -> Self {
        Self::with_cache(Ready(MemoryCache::new()))
    }
}

/// Lift a plain predicate into an [`AsyncPolicy`].
fn immediate<A, R>(policy: impl Fn(&R, &A) -> bool + Send + Sync + 'static) -> AsyncPolicy<A, R> {
    Arc::new(move |result: &R, args: &A| future::ready(policy(result, args)).boxed())
}

/// Lift an asynchronous predicate into an [`AsyncPolicy`].
fn awaited<A, R, P, Fut>(policy: P) -> AsyncPolicy<A, R>
where
    A: Clone,
    R: Clone,
    P: Fn(R, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    Arc::new(move |result: &R, args: &A| policy(result.clone(), args.clone()).boxed())
}

/// Spawn onto the current tokio runtime.
///
/// Outside of a runtime nothing is spawned and the computation runs when a
/// caller first polls its handle.
fn spawn_on_runtime(task: BoxFuture<'static, ()>) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(task);
        }
        Err(_) => tracing::trace!("no runtime, computation waits for its first poll"),
    }
}

/// The memoization algorithm, with every step awaited.
struct Pipeline<A, R, E, C> {
    func: Compute<A, R, E>,
    cache: C,
    should_recalculate: AsyncPolicy<A, R>,
    should_cache: AsyncPolicy<A, R>,
}

impl<A, R, E, C> Pipeline<A, R, E, C>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + Nullish + Send + Sync + 'static,
    C: AsyncCache<A, R>,
{
    async fn run(self: Arc<Self>, args: A) -> Outcome<R, E, C::Error> {
        // Check if there is a cached output. A stored null marker is a miss.
        let cached = self.cache.get(&args).await.map_err(MemoError::Cache)?;
        if let Some(cached) = cached.filter(|cached| !cached.is_nullish()) {
            if !(self.should_recalculate)(&cached, &args).await {
                tracing::trace!("memoized async call hit");
                return Ok(Some(cached));
            }

            tracing::trace!("discarding cached result");
        }

        let output = (self.func)(args.clone()).await.map_err(MemoError::Compute)?;

        let admit = match &output {
            Some(value) if !value.is_nullish() => (self.should_cache)(value, &args).await,
            _ => false,
        };

        match &output {
            Some(value) if admit => {
                tracing::trace!("storing memoized result");
                self.cache.set(&args, value.clone()).await
            }
            _ => {
                tracing::trace!("removing memoized result");
                self.cache.delete(&args).await
            }
        }
        .map_err(MemoError::Cache)?;

        Ok(output)
    }
}

/// Guard that runs a closure when dropped.
struct DeferGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// Defers a closure until the returned guard is dropped.
fn defer<F: FnOnce()>(f: F) -> DeferGuard<F> {
    DeferGuard(Some(f))
}

struct Inner<A, R, E, C>
where
    C: AsyncCache<A, R>,
{
    /// Makes the dedup layer's lookup and registration one atomic step.
    lock: Mutex<()>,
    /// The synchronous core, memoizing in-flight handles by arguments.
    calls: Memoized<
        Start<A, R, E, C::Error>,
        A,
        InFlight<R, E, C::Error>,
        PromiseCache<A, R, E, C::Error>,
    >,
    /// The handle started by the current lookup, if any. Only touched under
    /// `lock`.
    fresh: Arc<Mutex<Option<InFlight<R, E, C::Error>>>>,
    spawner: Spawner,
    pipeline: Arc<Pipeline<A, R, E, C>>,
}

/// A memoized async function.
///
/// Concurrent calls with equivalent arguments share one computation. Once
/// that computation settles, its registration is removed, so later calls go
/// through the result cache again.
pub struct MemoizedAsync<A, R, E, C = Ready<MemoryCache<R>>>
where
    C: AsyncCache<A, R>,
{
    inner: Arc<Inner<A, R, E, C>>,
}

impl<A, R, E, C> Clone for MemoizedAsync<A, R, E, C>
where
    C: AsyncCache<A, R>,
{
    fn clone(&self) -> Self {
        // Deriving would require all type parameters to be `Clone`.
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<A, R, E, C> Debug for MemoizedAsync<A, R, E, C>
where
    C: AsyncCache<A, R>,
{
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.pad("MemoizedAsync(..)")
    }
}

/// Memoize an async function into a fresh in-memory cache.
pub fn memoize_async<F, Fut, A, R, E>(func: F) -> MemoizedAsync<A, R, E>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<R>, E>> + Send + 'static,
    A: ToValue + Clone + Send + Sync + 'static,
    R: Clone + Nullish + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    memoize_async_with(func, AsyncOptions::default())
}

/// Memoize an async function with explicit options.
pub fn memoize_async_with<F, Fut, A, R, E, C>(
    func: F,
    options: AsyncOptions<A, R, E, C>,
) -> MemoizedAsync<A, R, E, C>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<R>, E>> + Send + 'static,
    A: ToValue + Clone + Send + Sync + 'static,
    R: Clone + Nullish + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    C: AsyncCache<A, R> + 'static,
    C::Error: Clone + Send + Sync + 'static,
{
    let should_recalculate = match options.should_recalculate {
        Some(policy) => policy,
        None => immediate(|_: &R, _: &A| false),
    };

    let should_cache = match options.should_cache {
        Some(policy) => policy,
        None => immediate(|_: &R, _: &A| true),
    };

    let pipeline = Arc::new(Pipeline {
        func: Box::new(move |args: A| func(args).boxed()),
        cache: options.cache,
        should_recalculate,
        should_cache,
    });

    let promises: PromiseCache<A, R, E, C::Error> = match options.promise_cache {
        Some(cache) => cache,
        None => Arc::new(MemoryCache::new()),
    };

    let spawner: Spawner = match options.spawner {
        Some(spawner) => spawner,
        None => Arc::new(spawn_on_runtime),
    };

    let fresh = Arc::new(Mutex::new(None));
    let begin: Start<A, R, E, C::Error> = {
        let pipeline = Arc::clone(&pipeline);
        let promises = Arc::clone(&promises);
        let fresh = Arc::clone(&fresh);
        Box::new(move |args: &A| {
            let handle = start(&pipeline, &promises, args);
            *fresh.lock() = Some(handle.clone());
            Ok::<_, Infallible>(Some(handle))
        })
    };

    MemoizedAsync {
        inner: Arc::new(Inner {
            lock: Mutex::new(()),
            calls: memoize_with(begin, Options::with_cache(promises)),
            fresh,
            spawner,
            pipeline,
        }),
    }
}

/// Start a computation whose registration in `promises` is removed as soon
/// as it settles, whether it succeeds, fails or panics.
fn start<A, R, E, C>(
    pipeline: &Arc<Pipeline<A, R, E, C>>,
    promises: &PromiseCache<A, R, E, C::Error>,
    args: &A,
) -> InFlight<R, E, C::Error>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + Nullish + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    C: AsyncCache<A, R> + 'static,
    C::Error: Clone + Send + Sync + 'static,
{
    tracing::trace!("starting memoized async computation");

    let pipeline = Arc::clone(pipeline);
    let promises = Arc::clone(promises);
    let key = args.clone();
    let args = args.clone();

    async move {
        let _cleanup = defer(move || {
            tracing::trace!("releasing settled computation");
            let Ok(()) = Cache::delete(&promises, &key);
        });

        pipeline.run(args).await
    }
    .boxed()
    .shared()
}

impl<A, R, E, C> MemoizedAsync<A, R, E, C>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + Nullish + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    C: AsyncCache<A, R> + 'static,
    C::Error: Clone + Send + Sync + 'static,
{
    /// Call the function, attaching to an equivalent pending call if there is
    /// one.
    ///
    /// The returned handle resolves to the same outcome for every caller that
    /// shares it, including the same error. Dropping a handle does not cancel
    /// the computation.
    pub fn call(&self, args: A) -> InFlight<R, E, C::Error> {
        let inner = &*self.inner;
        let (registered, fresh) = {
            let _guard = inner.lock.lock();
            (inner.calls.lookup(&args), inner.fresh.lock().take())
        };

        // The fresh handle is registered by now, so it may settle and release
        // its registration at any point after this.
        if let Some(fresh) = &fresh {
            self.drive(fresh);
        }

        match registered {
            Ok((Some(handle), _)) => handle,
            // The starter always produces a handle.
            Ok((None, _)) => {
                let handle = start(&inner.pipeline, inner.calls.cache(), &args);
                self.drive(&handle);
                handle
            }
            Err(MemoError::Compute(never) | MemoError::Cache(never)) => match never {},
        }
    }

    /// Hand a started computation to the spawner.
    fn drive(&self, handle: &InFlight<R, E, C::Error>) {
        (self.inner.spawner)(handle.clone().map(drop).boxed());
    }

    /// The cache that holds settled results.
    pub fn cache(&self) -> &C {
        &self.inner.pipeline.cache
    }
}
