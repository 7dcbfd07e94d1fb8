//! Named counters shared between the processing path and any reporting path.
//!
//! Counters are atomics, so they can be incremented by a stage while being read concurrently
//! through [`Stats::snapshot`]. Every increment is also forwarded to the [`metrics`] facade,
//! which makes the counters visible to whatever exporter the embedding process installs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A cloneable handle to a single named counter.
#[derive(Clone)]
pub struct Counter {
    value: Arc<AtomicU64>,
    exported: metrics::Counter,
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter").field("value", &self.get()).finish()
    }
}

impl Counter {
    pub fn incr(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
        self.exported.increment(n);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Registry of named counters. Cloning yields a handle onto the same counters.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    prefix: String,
    counters: Arc<Mutex<HashMap<String, Arc<AtomicU64>>>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle whose counter names are prefixed with `prefix.`.
    ///
    /// # Examples
    ///
    /// ```
    /// use flowstage::stats::Stats;
    /// let stats = Stats::new();
    /// stats.scoped("processor").scoped("redis").counter("count").incr(1);
    /// assert_eq!(stats.get("processor.redis.count"), Some(1));
    /// ```
    pub fn scoped(&self, prefix: &str) -> Stats {
        Stats {
            prefix: self.full_name(prefix),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Returns the counter called `name` under this handle's prefix, creating it at zero.
    pub fn counter(&self, name: &str) -> Counter {
        let full_name = self.full_name(name);
        let value = {
            let mut counters = self
                .counters
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(counters.entry(full_name.clone()).or_default())
        };
        Counter {
            value,
            exported: metrics::counter!(full_name),
        }
    }

    /// Current value of a counter by its full name.
    pub fn get(&self, full_name: &str) -> Option<u64> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(full_name)
            .map(|value| value.load(Ordering::Relaxed))
    }

    /// Point in time copy of every counter, ordered by name.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(name, value)| (name.clone(), value.load(Ordering::Relaxed)))
            .collect()
    }

    fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }
}
