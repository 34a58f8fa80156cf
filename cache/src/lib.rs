//! An embedded, segmented, concurrent cache.
//!
//! # Features
//! - **Segmented eviction**: capacity and weight budgets are split across
//!   independently locked segments, planned from the processor count.
//! - **Null-overhead core**: without loaders, writers, listeners or a weigher
//!   the bare `CoreCache` is handed out and nothing else is consulted.
//! - **Loaders**: simple, advanced and async loaders, with shared in-flight
//!   loads and cached failures.
//! - **Write-through**: a `CacheWriter` sees every store and removal before
//!   it commits.
//! - **Listeners**: synchronous listeners, and async listeners delivered in
//!   per-key order on a bounded worker pool.
//! - **Observability**: counters exposed as `MetricsSnapshot`s.
//!
//! ```
//! use fibre_segcache::CacheBuilder;
//!
//! let cache = CacheBuilder::<String, u64>::new().entry_capacity(100).build().unwrap();
//! cache.put("answer".to_string(), 42).unwrap();
//! assert_eq!(cache.get(&"answer".to_string()).unwrap().as_deref(), Some(&42));
//! assert!(!cache.is_decorated());
//! ```

// Public modules that form the API
pub mod builder;
pub mod config;
pub mod core;
pub mod decorated;
pub mod error;
pub mod eviction;
pub mod expiry;
pub mod handle;
pub mod listener;
pub mod metrics;
pub mod plan;
pub mod registry;
pub mod runtime;
pub mod writer;

// Internal, crate-only modules
mod entry;
mod loader;
mod store;
mod task;
mod time;

pub use builder::{CacheBuilder, Capabilities};
pub use config::CacheConfig;
pub use self::core::{CoreCache, Iter};
pub use decorated::DecoratedCache;
pub use entry::{CacheEntry, EntrySnapshot};
pub use error::{BoxError, BuildError, CacheError, DispatchRejected, LoaderError, WriterError};
pub use eviction::{
  clock_segment_factory, ClockSegment, EvictionListener, EvictionSegment, SegmentBounds, SegmentFactory,
  SegmentedEviction,
};
pub use expiry::{Expiry, ExpiryMode, ExpiryPolicy};
pub use handle::Cache;
pub use listener::{EntryHandler, EntryListener, EventKind, UpdateHandler};
pub use loader::{LoadHandle, LoadResult};
pub use metrics::MetricsSnapshot;
pub use plan::{
  PlanInput, SegmentPlan, DEFAULT_ENTRY_CAPACITY, MAX_SEGMENT_COUNT, MIN_SEGMENTED_CAPACITY, UNBOUNDED,
};
pub use registry::CacheRegistry;
pub use runtime::TaskSpawner;
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
pub use writer::CacheWriter;
pub use task::executor::{default_listener_executor, ListenerExecutor, Task, WorkerPool, DEFAULT_QUEUE_CAPACITY};
