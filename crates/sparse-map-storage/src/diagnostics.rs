//! Leak-detecting resource counters.
//!
//! Every statement and cursor the client opens takes a [`CounterGuard`] under
//! a named counter; dropping the guard releases it. A counter that climbs past
//! [`LEAK_THRESHOLD`] outstanding resources is logged as a probable leak.
//! Counters are diagnostics only: nothing is refused when they run high.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Outstanding count above which a counter is reported as leaking.
pub const LEAK_THRESHOLD: usize = 10;

/// Counter names used by the storage client.
pub mod counter {
    pub const STATEMENT: &str = "statement";
    pub const CACHED_STATEMENT: &str = "cachedStatement";
    pub const CURSOR: &str = "cursor";
    pub const STREAM: &str = "stream";
}

/// Shared per-name counters of outstanding resources.
#[derive(Clone, Default)]
pub struct LeakCounters {
    inner: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl LeakCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one resource as outstanding until the guard drops.
    pub fn acquire(&self, name: &'static str) -> CounterGuard {
        let outstanding = {
            let mut counters = self.inner.lock();
            let entry = counters.entry(name).or_insert(0);
            *entry += 1;
            *entry
        };
        if outstanding > LEAK_THRESHOLD {
            warn!(
                "Counter {} leaking {}, please investigate, this will eventually exhaust resources",
                name, outstanding
            );
        }
        CounterGuard {
            counters: self.clone(),
            name,
        }
    }

    /// Current outstanding count for `name`.
    pub fn outstanding(&self, name: &str) -> usize {
        self.inner.lock().get(name).copied().unwrap_or(0)
    }

    /// Snapshot of every non-zero counter.
    pub fn snapshot(&self) -> HashMap<String, usize> {
        self.inner
            .lock()
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(k, n)| (k.to_string(), *n))
            .collect()
    }

    fn release(&self, name: &'static str) {
        let mut counters = self.inner.lock();
        match counters.get_mut(name) {
            Some(n) if *n > 0 => *n -= 1,
            _ => warn!("Counter {} released but never acquired", name),
        }
    }
}

impl fmt::Debug for LeakCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakCounters")
            .field("outstanding", &self.snapshot())
            .finish()
    }
}

/// Releases one outstanding count on drop.
pub struct CounterGuard {
    counters: LeakCounters,
    name: &'static str,
}

impl CounterGuard {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for CounterGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CounterGuard").field(&self.name).finish()
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.counters.release(self.name);
    }
}
