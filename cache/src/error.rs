use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// The error type loaders and writers return from user code.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur when assembling a cache.
///
/// These are configuration errors: they are reported once, at build time,
/// and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
  /// Refresh-ahead was requested, but no loader of any kind is configured.
  #[error("refresh ahead enabled, but no loader defined")]
  RefreshAheadWithoutLoader,
  /// Expiry is configured as policy driven, but no `ExpiryPolicy` was given.
  #[error("expiry is not eternal, but no expiry policy is configured")]
  MissingExpiryPolicy,
  /// An async loader was provided, but no `TaskSpawner` was configured and
  /// no tokio runtime is available.
  #[error("an async loader requires a task spawner or a running tokio runtime")]
  SpawnerRequired,
  /// The registry already holds a cache under this name.
  #[error("a cache named `{0}` is already registered")]
  DuplicateName(String),
  /// The segment count override is above `MAX_SEGMENT_COUNT`.
  #[error("segment count {0} exceeds the maximum of {max}", max = crate::plan::MAX_SEGMENT_COUNT)]
  SegmentCountTooLarge(usize),
}

/// A loader failure, cached in place of a value.
///
/// The cause is shared, so every read within the freshness window of the
/// failed entry observes the very same cause.
#[derive(Clone, thiserror::Error)]
#[error("loader failed: {cause}")]
pub struct LoaderError {
  #[source]
  cause: Arc<dyn StdError + Send + Sync + 'static>,
}

impl LoaderError {
  pub(crate) fn new(cause: BoxError) -> Self {
    Self {
      cause: Arc::from(cause),
    }
  }

  /// The error originally returned by the loader.
  pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
    &*self.cause
  }

  /// Returns `true` if both errors share the same underlying cause instance.
  pub fn same_cause(&self, other: &LoaderError) -> bool {
    Arc::ptr_eq(&self.cause, &other.cause)
  }
}

impl fmt::Debug for LoaderError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoaderError")
      .field("cause", &self.cause.to_string())
      .finish()
  }
}

/// A writer failure. The in-memory state is unchanged when this is returned.
#[derive(Debug, Clone, thiserror::Error)]
#[error("writer failed: {cause}")]
pub struct WriterError {
  #[source]
  cause: Arc<dyn StdError + Send + Sync + 'static>,
}

impl WriterError {
  pub(crate) fn new(cause: BoxError) -> Self {
    Self {
      cause: Arc::from(cause),
    }
  }

  /// The error originally returned by the writer.
  pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
    &*self.cause
  }
}

/// The error returned by fallible cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
  #[error(transparent)]
  Loader(#[from] LoaderError),
  #[error(transparent)]
  Writer(#[from] WriterError),
}

/// The listener executor refused to accept a task.
///
/// Reported through `tracing` and the dispatch-rejection metric; it is never
/// returned from the cache operation that produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchRejected {
  #[error("listener executor queue is full")]
  Saturated,
  #[error("listener executor is shut down")]
  ShutDown,
}
