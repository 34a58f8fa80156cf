use crate::config::CacheConfig;
use crate::core::CoreCache;
use crate::decorated::{DecoratedCache, Weigher};
use crate::entry::EntrySnapshot;
use crate::error::{BoxError, BuildError};
use crate::eviction::{clock_segment_factory, SegmentFactory};
use crate::expiry::{ExpiryMode, ExpiryPolicy, ExpiryRule};
use crate::handle::Cache;
use crate::listener::{EntryListener, ListenerSet};
use crate::loader::{AdvancedLoadFn, AsyncLoadFn, Loader};
use crate::plan::{PlanInput, SegmentPlan, MAX_SEGMENT_COUNT};
use crate::registry::CacheRegistry;
use crate::runtime::TaskSpawner;
use crate::task::dispatcher::AsyncEventDispatcher;
use crate::task::executor::{default_listener_executor, ListenerExecutor};
use crate::writer::CacheWriter;

use std::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of generated cache names.
static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// The loader role chosen on the builder. Only the last one set is kept.
enum LoaderRole<K, V> {
  Advanced(AdvancedLoadFn<K, V>),
  Async(AsyncLoadFn<K, V>),
}

/// Which optional capabilities a builder carries.
///
/// Decides, once and at assembly time, whether the cache gets a decorator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
  pub loader: bool,
  pub writer: bool,
  pub listeners: bool,
  pub weigher: bool,
  pub expiry_policy: bool,
}

impl Capabilities {
  /// True when any capability is present. Without one, the bare
  /// `CoreCache` is handed out and no event, loader or writer is ever
  /// involved.
  pub fn needs_decorator(&self) -> bool {
    self.loader || self.writer || self.listeners || self.weigher || self.expiry_policy
  }
}

/// A builder for `Cache` instances.
///
/// Scalar options live in a [`CacheConfig`]; capabilities are given as
/// closures or trait objects. Nothing can be changed after `build`.
pub struct CacheBuilder<K, V, H = ahash::RandomState> {
  config: CacheConfig,
  hasher: H,
  loader: Option<LoaderRole<K, V>>,
  writer: Option<Arc<dyn CacheWriter<K, V>>>,
  weigher: Option<Weigher<K, V>>,
  expiry_policy: Option<Arc<dyn ExpiryPolicy<K, V>>>,
  listeners: Vec<EntryListener<K, V>>,
  async_listeners: Vec<EntryListener<K, V>>,
  executor: Option<Arc<dyn ListenerExecutor>>,
  owns_executor: bool,
  spawner: Option<Arc<dyn TaskSpawner>>,
  segment_factory: Option<SegmentFactory<K, V>>,
  available_processors: Option<usize>,
}

impl<K, V, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("config", &self.config)
      .field("capabilities", &self.capabilities())
      .field("async_listeners", &self.async_listeners.len())
      .field("owns_executor", &self.owns_executor)
      .field("available_processors", &self.available_processors)
      .finish_non_exhaustive()
  }
}

// --- Scalar configuration ---
impl<K, V, H> CacheBuilder<K, V, H> {
  /// Sets the name the cache is registered under.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.config.name = Some(name.into());
    self
  }

  /// Sets the maximum number of entries, `-1` for no entry bound.
  ///
  /// When neither an entry capacity nor a maximum weight is set, the cache
  /// holds at most `DEFAULT_ENTRY_CAPACITY` entries.
  pub fn entry_capacity(mut self, capacity: i64) -> Self {
    self.config.entry_capacity = capacity;
    self
  }

  /// Sets the maximum total weight, `-1` for no weight bound.
  pub fn maximum_weight(mut self, weight: i64) -> Self {
    self.config.maximum_weight = weight;
    self
  }

  /// Uses a single segment, so eviction follows one global order.
  pub fn strict_eviction(mut self, strict: bool) -> Self {
    self.config.strict_eviction = strict;
    self
  }

  pub fn boost_concurrency(mut self, boost: bool) -> Self {
    self.config.boost_concurrency = boost;
    self
  }

  /// Forces the number of segments. Rounded up to a power of two; `0`
  /// restores the automatic choice.
  pub fn segment_count(mut self, count: usize) -> Self {
    self.config.segment_count_override = count;
    self
  }

  /// Serves expired values while a reload runs in the background.
  /// Requires a loader.
  pub fn refresh_ahead(mut self, enabled: bool) -> Self {
    self.config.refresh_ahead = enabled;
    self
  }

  /// Expires every entry `ttl` after it was written.
  pub fn expire_after_write(mut self, ttl: Duration) -> Self {
    self.config.expiry = ExpiryMode::AfterWrite(ttl);
    self
  }

  pub fn expiry(mut self, mode: ExpiryMode) -> Self {
    self.config.expiry = mode;
    self
  }

  /// Sets the number of map shards. Rounded up to a power of two.
  pub fn shards(mut self, shards: usize) -> Self {
    self.config.shards = shards;
    self
  }

  /// Overrides the processor count the segment planner sees.
  pub fn available_processors(mut self, processors: usize) -> Self {
    self.available_processors = Some(processors);
    self
  }

  /// Sets the pool async listeners run on. Defaults to the shared pool of
  /// `default_listener_executor`.
  pub fn listener_executor(mut self, executor: Arc<dyn ListenerExecutor>) -> Self {
    self.executor = Some(executor);
    self
  }

  /// Shuts the executor given to `listener_executor` down when the cache is
  /// dropped.
  pub fn owns_executor(mut self, owns: bool) -> Self {
    self.owns_executor = owns;
    self
  }

  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  pub fn capabilities(&self) -> Capabilities {
    Capabilities {
      loader: self.loader.is_some(),
      writer: self.writer.is_some(),
      listeners: self.listeners.iter().chain(&self.async_listeners).any(|l| !l.is_empty()),
      weigher: self.weigher.is_some(),
      expiry_policy: matches!(self.config.expiry, ExpiryMode::PolicyDriven) && self.expiry_policy.is_some(),
    }
  }
}

// --- Default constructors ---
impl<K, V, H: BuildHasher + Default> CacheBuilder<K, V, H> {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self::from_config(CacheConfig::default())
  }

  /// Creates a builder seeded with a scalar configuration, for example one
  /// read from a file.
  pub fn from_config(config: CacheConfig) -> Self {
    Self {
      config,
      hasher: H::default(),
      loader: None,
      writer: None,
      weigher: None,
      expiry_policy: None,
      listeners: Vec::new(),
      async_listeners: Vec::new(),
      executor: None,
      owns_executor: false,
      spawner: None,
      segment_factory: None,
      available_processors: None,
    }
  }
}

impl<K, V> Default for CacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Capabilities and build ---
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Sets the hasher for the cache.
  pub fn hasher(mut self, hasher: H) -> Self {
    self.hasher = hasher;
    self
  }

  /// Sets a loader called with the key on a miss.
  ///
  /// Replaces any loader set before. A failure is cached like a value and
  /// returned to every read until the entry expires.
  pub fn loader<F, E>(mut self, load: F) -> Self
  where
    F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    E: Into<BoxError>,
  {
    let load: AdvancedLoadFn<K, V> =
      Arc::new(move |key: &K, _start: Instant, _current: Option<&EntrySnapshot<K, V>>| load(key).map_err(Into::into));
    self.loader = Some(LoaderRole::Advanced(load));
    self
  }

  /// Sets a loader that also receives the load start time and the entry
  /// being replaced, such as an expired entry under refresh.
  pub fn advanced_loader<F, E>(mut self, load: F) -> Self
  where
    F: Fn(&K, Instant, Option<&EntrySnapshot<K, V>>) -> Result<V, E> + Send + Sync + 'static,
    E: Into<BoxError>,
  {
    let load: AdvancedLoadFn<K, V> =
      Arc::new(move |key: &K, start: Instant, current: Option<&EntrySnapshot<K, V>>| {
        load(key, start, current).map_err(Into::into)
      });
    self.loader = Some(LoaderRole::Advanced(load));
    self
  }

  /// Sets an asynchronous loader. It runs on the configured `TaskSpawner`,
  /// or on the current tokio runtime.
  pub fn async_loader<F, Fut, E>(mut self, load: F) -> Self
  where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    let load: AsyncLoadFn<K, V> = Arc::new(move |key: K| {
      let loading = load(key);
      Box::pin(async move { loading.await.map_err(Into::into) })
        as Pin<Box<dyn Future<Output = Result<V, BoxError>> + Send>>
    });
    self.loader = Some(LoaderRole::Async(load));
    self
  }

  /// Sets the write-through writer, called before a value is stored or
  /// removed.
  pub fn writer(mut self, writer: impl CacheWriter<K, V>) -> Self {
    self.writer = Some(Arc::new(writer));
    self
  }

  /// Sets the function computing each entry's weight. Without one every
  /// entry weighs 1.
  pub fn weigher(mut self, weigher: impl Fn(&K, &V) -> u64 + Send + Sync + 'static) -> Self {
    self.weigher = Some(Arc::new(weigher));
    self
  }

  /// Sets a per-entry expiry policy and switches to policy driven expiry.
  pub fn expiry_policy(mut self, policy: impl ExpiryPolicy<K, V>) -> Self {
    self.expiry_policy = Some(Arc::new(policy));
    self.config.expiry = ExpiryMode::PolicyDriven;
    self
  }

  /// Adds a listener run on the mutating thread, after locks are released.
  pub fn listener(mut self, listener: EntryListener<K, V>) -> Self {
    self.listeners.push(listener);
    self
  }

  /// Adds a listener run on the listener executor. Events of one key are
  /// delivered in order; events of different keys may run concurrently.
  pub fn async_listener(mut self, listener: EntryListener<K, V>) -> Self {
    self.async_listeners.push(listener);
    self
  }

  /// Replaces the eviction segment implementation.
  pub fn segment_factory(mut self, factory: SegmentFactory<K, V>) -> Self {
    self.segment_factory = Some(factory);
    self
  }

  /// Builds the cache.
  pub fn build(self) -> Result<Cache<K, V, H>, BuildError> {
    self.assemble()
  }

  /// Builds the cache and registers it in `registry` under its name.
  pub fn build_in(self, registry: &CacheRegistry) -> Result<Cache<K, V, H>, BuildError> {
    if let Some(name) = &self.config.name {
      if registry.contains(name) {
        return Err(BuildError::DuplicateName(name.clone()));
      }
    }
    let cache = self.assemble()?;
    registry.register(&cache)?;
    Ok(cache)
  }

  fn validate(&self) -> Result<(), BuildError> {
    if self.config.refresh_ahead && self.loader.is_none() {
      return Err(BuildError::RefreshAheadWithoutLoader);
    }
    if matches!(self.config.expiry, ExpiryMode::PolicyDriven) && self.expiry_policy.is_none() {
      return Err(BuildError::MissingExpiryPolicy);
    }
    if self.config.segment_count_override > MAX_SEGMENT_COUNT {
      return Err(BuildError::SegmentCountTooLarge(self.config.segment_count_override));
    }
    Ok(())
  }

  fn plan(&self) -> SegmentPlan {
    SegmentPlan::compute(PlanInput {
      entry_capacity: self.config.entry_capacity,
      maximum_weight: self.config.maximum_weight,
      strict_eviction: self.config.strict_eviction,
      boost_concurrency: self.config.boost_concurrency,
      available_processors: self.available_processors.unwrap_or_else(num_cpus::get),
      segment_count_override: self.config.segment_count_override,
    })
  }

  fn resolve_loader(&mut self) -> Result<Option<Loader<K, V>>, BuildError> {
    match self.loader.take() {
      None => Ok(None),
      Some(LoaderRole::Advanced(load)) => Ok(Some(Loader::Advanced(load))),
      Some(LoaderRole::Async(load)) => {
        let spawner = match self.spawner.take() {
          Some(spawner) => spawner,
          None => current_spawner().ok_or(BuildError::SpawnerRequired)?,
        };
        Ok(Some(Loader::Async { load, spawner }))
      }
    }
  }

  fn assemble(mut self) -> Result<Cache<K, V, H>, BuildError> {
    self.validate()?;
    let capabilities = self.capabilities();
    let plan = self.plan();
    let name = self
      .config
      .name
      .take()
      .unwrap_or_else(|| format!("cache-{}", NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed)));
    let shards = self.config.resolved_shards();
    let time_to_live = match self.config.expiry {
      ExpiryMode::AfterWrite(ttl) => Some(ttl),
      _ => None,
    };
    let factory = self.segment_factory.take().unwrap_or_else(clock_segment_factory);
    let core = CoreCache::new(
      name.clone(),
      plan,
      shards,
      self.hasher.clone(),
      &factory,
      time_to_live,
    );

    let decorated = capabilities.needs_decorator();
    tracing::debug!(
      cache = %name,
      segments = plan.segment_count,
      per_segment_capacity = plan.per_segment_capacity,
      per_segment_weight = plan.per_segment_weight,
      decorated,
      "cache assembled"
    );
    if !decorated {
      return Ok(Cache::Core(Arc::new(core)));
    }

    let loader = self.resolve_loader()?;
    let expiry = match self.config.expiry {
      ExpiryMode::Eternal => ExpiryRule::Eternal,
      ExpiryMode::AfterWrite(ttl) => ExpiryRule::AfterWrite(ttl),
      ExpiryMode::PolicyDriven => match self.expiry_policy.take() {
        Some(policy) => ExpiryRule::Policy(policy),
        None => return Err(BuildError::MissingExpiryPolicy),
      },
    };

    let mut listeners = ListenerSet::new();
    for listener in self.listeners.drain(..) {
      listeners.add_sync(listener);
    }
    let async_listeners: Vec<_> = self.async_listeners.drain(..).filter(|l| !l.is_empty()).collect();
    let mut dispatcher = None;
    let mut owned_executor = None;
    if !async_listeners.is_empty() {
      let supplied = self.executor.take();
      let executor = supplied.clone().unwrap_or_else(default_listener_executor);
      if self.owns_executor {
        owned_executor = supplied;
      }
      let queue = Arc::new(AsyncEventDispatcher::new(
        name.clone(),
        executor,
        Arc::clone(core.metrics_ref()),
      ));
      for listener in async_listeners {
        listeners.add_async(listener, &queue);
      }
      dispatcher = Some(queue);
    }

    let (pending, pending_hasher) = DecoratedCache::<K, V, H>::pending_table(shards);
    Ok(Cache::Decorated(Arc::new(DecoratedCache {
      core,
      listeners,
      loader,
      writer: self.writer.take(),
      weigher: self.weigher.take(),
      expiry,
      refresh_ahead: self.config.refresh_ahead,
      pending,
      pending_hasher,
      dispatcher,
      owned_executor,
    })))
  }
}

#[cfg(feature = "tokio")]
fn current_spawner() -> Option<Arc<dyn TaskSpawner>> {
  crate::runtime::TokioSpawner::try_current().map(|spawner| Arc::new(spawner) as Arc<dyn TaskSpawner>)
}

#[cfg(not(feature = "tokio"))]
fn current_spawner() -> Option<Arc<dyn TaskSpawner>> {
  None
}
