//! Self-refreshing caches for expensive, fallible data sources.
//!
//! [`TimedCache`] holds one value produced by a supplier and refreshes it on
//! demand: when it is older than the refresh duration, or when it does not
//! satisfy the caller's validity predicate and the shorter retry duration has
//! passed. Supplier failures can be cached and replayed, and a
//! [`ComputeGate`] bounds how many supplier calls run concurrently.
//!
//! [`TimedMap`] and [`TimedSet`] specialize it for collections, and
//! [`CacheRegistry`] keeps one lazily created cache per external id.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod map;
pub mod registry;
pub mod tracker;

pub use cache::{CacheBuilder, TimedCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use error::{ConfigError, CreateError, SharedError};
pub use gate::{ComputeGate, GatePermit};
pub use map::{TimedMap, TimedSet};
pub use registry::CacheRegistry;
pub use tracker::{RefreshSummary, RefreshTracker};
