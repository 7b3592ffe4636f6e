//! Prepared statement cache
//!
//! Preparing a statement costs a round trip, so prepared handles are kept by
//! statement text. Once the configured entry or byte bound is reached the
//! least recently used handle goes first. Prepared ids go stale when the
//! cluster changes, so the whole cache can be dropped at once.
//!
//! # Example
//!
//! ```
//! use cql_dao::cache::{StatementCache, StatementCacheConfig};
//! use cql_dao::driver::PreparedHandle;
//!
//! let cache = StatementCache::new(StatementCacheConfig::builder().max_entries(10).build());
//!
//! let query = "SELECT * FROM users WHERE id = ?";
//! cache.insert(query, PreparedHandle::new(vec![1], query));
//!
//! assert!(cache.get(query).is_some());
//! assert_eq!(cache.stats().hits, 1);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Deserialize;

use crate::driver::PreparedHandle;

/// Default bound on the number of prepared handles kept
pub const DEFAULT_MAX_ENTRIES: usize = 150;

/// Bounds of a [`StatementCache`]
///
/// Deserialized values go through the same clamping as the builder.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "CacheConfigFields")]
pub struct StatementCacheConfig {
    max_entries: usize,
    max_bytes: Option<usize>,
    enabled: bool,
}

#[derive(Deserialize)]
#[serde(default)]
struct CacheConfigFields {
    max_entries: usize,
    max_bytes: Option<usize>,
    enabled: bool,
}

impl Default for CacheConfigFields {
    fn default() -> Self {
        let config = StatementCacheConfig::default();
        Self {
            max_entries: config.max_entries,
            max_bytes: config.max_bytes,
            enabled: config.enabled,
        }
    }
}

impl From<CacheConfigFields> for StatementCacheConfig {
    fn from(fields: CacheConfigFields) -> Self {
        Self {
            max_entries: fields.max_entries.max(1),
            max_bytes: fields.max_bytes,
            enabled: fields.enabled,
        }
    }
}

impl Default for StatementCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: None,
            enabled: true,
        }
    }
}

impl StatementCacheConfig {
    /// The default bounds
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache that keeps nothing; every statement is prepared again
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Builder starting from the default bounds
    pub fn builder() -> StatementCacheConfigBuilder {
        StatementCacheConfigBuilder {
            config: Self::default(),
        }
    }

    /// Bound on the number of cached handles, at least one
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Bound on the summed size of cached handles, if any
    pub fn max_bytes(&self) -> Option<usize> {
        self.max_bytes
    }

    /// Whether handles are kept at all
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// Builder for [`StatementCacheConfig`]
#[derive(Debug)]
pub struct StatementCacheConfigBuilder {
    config: StatementCacheConfig,
}

impl StatementCacheConfigBuilder {
    /// Keep at most `max` handles; at least one
    pub fn max_entries(mut self, max: usize) -> Self {
        self.config.max_entries = max.max(1);
        self
    }

    /// Bound the summed size of cached handles
    pub fn max_bytes(mut self, max: usize) -> Self {
        self.config.max_bytes = Some(max);
        self
    }

    /// Drop the byte bound
    pub fn no_byte_limit(mut self) -> Self {
        self.config.max_bytes = None;
        self
    }

    /// Turn caching on or off
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Finish the config
    pub fn build(self) -> StatementCacheConfig {
        self.config
    }
}

fn footprint(query: &str, handle: &PreparedHandle) -> usize {
    query.len() + handle.query().len() + handle.id().len()
}

struct Slot {
    handle: PreparedHandle,
    tick: u64,
    bytes: usize,
}

/// Handles by query, plus the queries ordered by last use
#[derive(Default)]
struct Slots {
    by_query: HashMap<String, Slot>,
    by_recency: BTreeMap<u64, String>,
    bytes: usize,
    next_tick: u64,
}

impl Slots {
    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn touch(&mut self, query: &str) -> Option<PreparedHandle> {
        let tick = self.tick();
        let slot = self.by_query.get_mut(query)?;
        let previous = std::mem::replace(&mut slot.tick, tick);
        let handle = slot.handle.clone();
        if let Some(key) = self.by_recency.remove(&previous) {
            self.by_recency.insert(tick, key);
        }
        Some(handle)
    }

    fn remove(&mut self, query: &str) -> Option<Slot> {
        let slot = self.by_query.remove(query)?;
        self.by_recency.remove(&slot.tick);
        self.bytes -= slot.bytes;
        Some(slot)
    }

    fn pop_oldest(&mut self) -> bool {
        let Some((_, query)) = self.by_recency.pop_first() else {
            return false;
        };
        if let Some(slot) = self.by_query.remove(&query) {
            self.bytes -= slot.bytes;
        }
        true
    }

    fn push(&mut self, query: String, handle: PreparedHandle) {
        let tick = self.tick();
        let bytes = footprint(&query, &handle);
        self.bytes += bytes;
        self.by_recency.insert(tick, query.clone());
        self.by_query.insert(query, Slot { handle, tick, bytes });
    }

    fn clear(&mut self) {
        self.by_query.clear();
        self.by_recency.clear();
        self.bytes = 0;
    }
}

/// Least-recently-used cache of prepared handles keyed by statement text
pub struct StatementCache {
    config: StatementCacheConfig,
    slots: Mutex<Slots>,
    counters: Counters,
}

impl StatementCache {
    /// An empty cache with the given bounds
    pub fn new(config: StatementCacheConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(Slots::default()),
            counters: Counters::default(),
        }
    }

    /// An empty cache with the default bounds
    pub fn with_defaults() -> Self {
        Self::new(StatementCacheConfig::default())
    }

    /// The bounds this cache was created with
    pub fn config(&self) -> &StatementCacheConfig {
        &self.config
    }

    /// Counters since creation
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.counters.snapshot()
    }

    /// The cached handle of `query`, marking it as recently used
    pub fn get(&self, query: &str) -> Option<PreparedHandle> {
        if !self.config.enabled {
            return None;
        }

        let found = self.slots.lock().ok()?.touch(query);
        let counter = if found.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Cache the handle of `query`
    ///
    /// A handle already cached for the same text is replaced. Two tasks
    /// preparing the same statement concurrently both insert; the later one
    /// wins.
    pub fn insert(&self, query: &str, handle: PreparedHandle) {
        if !self.config.enabled {
            return;
        }
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };

        let replaced = slots.remove(query).is_some();
        let incoming = footprint(query, &handle);
        let mut evicted = 0;
        loop {
            let over_count = slots.by_query.len() >= self.config.max_entries;
            let over_bytes = self
                .config
                .max_bytes
                .is_some_and(|max| slots.bytes + incoming > max);
            if !(over_count || over_bytes) || !slots.pop_oldest() {
                break;
            }
            evicted += 1;
        }
        slots.push(query.to_string(), handle);

        self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        if !replaced {
            self.counters.insertions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether `query` is cached; does not count as a lookup
    pub fn contains(&self, query: &str) -> bool {
        self.config.enabled
            && self
                .slots
                .lock()
                .map(|s| s.by_query.contains_key(query))
                .unwrap_or(false)
    }

    /// Number of cached handles
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.by_query.len()).unwrap_or(0)
    }

    /// Whether no handle is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached handle
    pub fn invalidate_all(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.clear();
        }
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementCache")
            .field("config", &self.config)
            .field("len", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    insertions: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CacheStatsSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheStatsSnapshot {
            hits: read(&self.hits),
            misses: read(&self.misses),
            evictions: read(&self.evictions),
            insertions: read(&self.insertions),
            invalidations: read(&self.invalidations),
        }
    }
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Lookups that found a handle
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Handles dropped to stay within bounds
    pub evictions: u64,
    /// New statement texts cached
    pub insertions: u64,
    /// Wholesale drops
    pub invalidations: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of lookups that hit, `0.0` before any lookup
    pub fn hit_rate(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            lookups => self.hits as f64 / lookups as f64,
        }
    }
}
