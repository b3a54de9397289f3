//! Fare refresh engine: query generation, bounded fan-out, top-K retention
//! and snapshot publishing.

pub mod generator;
pub mod limiter;
pub mod orchestrator;
pub mod retention;
pub mod snapshot;

pub use generator::{generate, GenerationError, MAX_WINDOW_MONTHS};
pub use limiter::ConcurrencyLimiter;
pub use orchestrator::{RefreshError, RefreshOrchestrator, RefreshPhase, RefreshSettings};
pub use retention::{CacheEntry, Offer, RetentionCache};
pub use snapshot::{CacheSnapshot, CycleStats, SnapshotStore};
