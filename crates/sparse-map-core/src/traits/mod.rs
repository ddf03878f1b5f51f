//! Collaborator contracts consumed by the storage client.

mod cache;
mod listener;
mod stats;

pub use cache::{CacheHolder, DirectCacheAccess, MemoryCache};
pub use listener::StorageClientListener;
pub use stats::{NoopStatsService, StatsService};
