//! Snapshot cache for collected directory resources
//!
//! Entries are keyed by (tenant, resource type, resource id). An entry younger
//! than `ttl` is fresh, younger than `grace` is stale but still servable, and
//! anything older reads as missing until `evict_expired` removes it.
//!
//! Writes to one key are serialized by the map shard; the entry with the newest
//! fetched-at timestamp always wins. Admission of new keys is serialized so the
//! capacity check and any eviction it triggers happen as one step.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{Freshness, ResourceType, SnapshotKey};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Age up to which an entry is fresh
    pub ttl: Duration,
    /// Age up to which an entry is still servable as stale. Must be >= ttl.
    pub grace: Duration,
    /// Soft bound on the number of entries
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15 * 60),
            grace: Duration::from_secs(24 * 60 * 60),
            capacity: 50_000,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    fetched_at: DateTime<Utc>,
    /// Logical access clock value, for LRU ordering
    last_access: u64,
    invalidated: bool,
}

/// A cached payload together with when it was fetched
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSnapshot {
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Fresh(CachedSnapshot),
    Stale(CachedSnapshot),
    Missing,
}

impl CacheLookup {
    pub fn freshness(&self) -> Freshness {
        match self {
            CacheLookup::Fresh(_) => Freshness::Fresh,
            CacheLookup::Stale(_) => Freshness::Stale,
            CacheLookup::Missing => Freshness::Missing,
        }
    }

    pub fn snapshot(&self) -> Option<&CachedSnapshot> {
        match self {
            CacheLookup::Fresh(snapshot) | CacheLookup::Stale(snapshot) => Some(snapshot),
            CacheLookup::Missing => None,
        }
    }
}

/// One servable resource of a (tenant, type) pair
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResource {
    pub resource_id: String,
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
    pub freshness: Freshness,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Percentage of lookups served from cache, fresh or stale
    pub hit_rate: f64,
}

pub struct ResultCache {
    entries: DashMap<SnapshotKey, CacheEntry>,
    config: CacheConfig,
    access_clock: AtomicU64,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    admission: Mutex<()>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        let config = if config.grace < config.ttl {
            warn!(
                ttl_secs = config.ttl.as_secs(),
                grace_secs = config.grace.as_secs(),
                "cache grace window shorter than ttl, raising it to ttl"
            );
            CacheConfig {
                grace: config.ttl,
                ..config
            }
        } else {
            config
        };

        Self {
            entries: DashMap::new(),
            config,
            access_clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            admission: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed)
    }

    fn age(entry: &CacheEntry, now: DateTime<Utc>) -> Duration {
        (now - entry.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Only entries past their TTL may be evicted, invalidated or not
    fn past_ttl(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        Self::age(entry, now) >= self.config.ttl
    }

    fn classify(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Freshness {
        let age = Self::age(entry, now);
        if age >= self.config.grace {
            Freshness::Missing
        } else if entry.invalidated || age >= self.config.ttl {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    pub fn get(&self, key: &SnapshotKey) -> CacheLookup {
        self.get_at(key, Utc::now())
    }

    /// Look up `key` as of `now`
    pub fn get_at(&self, key: &SnapshotKey, now: DateTime<Utc>) -> CacheLookup {
        let lookup = match self.entries.get_mut(key) {
            Some(mut entry) => {
                let freshness = self.classify(&entry, now);
                if freshness.is_servable() {
                    entry.last_access = self.tick();
                }
                let snapshot = CachedSnapshot {
                    payload: entry.payload.clone(),
                    fetched_at: entry.fetched_at,
                };
                match freshness {
                    Freshness::Fresh => CacheLookup::Fresh(snapshot),
                    Freshness::Stale => CacheLookup::Stale(snapshot),
                    Freshness::Missing => CacheLookup::Missing,
                }
            }
            None => CacheLookup::Missing,
        };

        match lookup.freshness() {
            Freshness::Fresh => self.hits.fetch_add(1, Ordering::Relaxed),
            Freshness::Stale => self.stale_hits.fetch_add(1, Ordering::Relaxed),
            Freshness::Missing => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        debug!(key = %key, freshness = ?lookup.freshness(), "cache lookup");

        lookup
    }

    pub fn put(&self, key: SnapshotKey, payload: Value) -> bool {
        self.put_at(key, payload, Utc::now())
    }

    /// Store `payload` fetched at `fetched_at`, resetting the freshness clock
    ///
    /// Returns false when a newer write for the same key already landed.
    pub fn put_at(&self, key: SnapshotKey, payload: Value, fetched_at: DateTime<Utc>) -> bool {
        // Held until the entry lands so concurrent writers cannot overshoot
        let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.entries.contains_key(&key) {
            self.evict_for_capacity(fetched_at);
        }

        let entry = CacheEntry {
            payload,
            fetched_at,
            last_access: self.tick(),
            invalidated: false,
        };

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().fetched_at > fetched_at {
                    debug!(key = %occupied.key(), "dropping cache write older than current entry");
                    return false;
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        true
    }

    /// Force an entry to stale. It stays servable until its grace window ends.
    pub fn invalidate(&self, key: &SnapshotKey) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.invalidated = true;
                true
            }
            None => false,
        }
    }

    /// Evict least recently used entries past their TTL until there is room
    /// for one more
    fn evict_for_capacity(&self, now: DateTime<Utc>) {
        while self.entries.len() >= self.config.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|item| self.past_ttl(item.value(), now))
                .min_by_key(|item| item.value().last_access)
                .map(|item| item.key().clone());

            let Some(key) = victim else {
                warn!(
                    capacity = self.config.capacity,
                    entries = self.entries.len(),
                    "cache over capacity with every entry inside its ttl"
                );
                return;
            };

            if self
                .entries
                .remove_if(&key, |_, entry| self.past_ttl(entry, now))
                .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "evicted expired cache entry for capacity");
            }
        }
    }

    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    /// Remove entries past their grace window
    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| self.classify(entry, now) != Freshness::Missing);
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn snapshots_for(&self, tenant_id: &str, resource_type: ResourceType) -> Vec<CachedResource> {
        self.snapshots_for_at(tenant_id, resource_type, Utc::now())
    }

    /// Servable entries of one resource type, ordered by resource id
    pub fn snapshots_for_at(
        &self,
        tenant_id: &str,
        resource_type: ResourceType,
        now: DateTime<Utc>,
    ) -> Vec<CachedResource> {
        let mut resources: Vec<CachedResource> = self
            .entries
            .iter()
            .filter(|item| {
                item.key().tenant_id == tenant_id && item.key().resource_type == resource_type
            })
            .filter_map(|item| {
                let freshness = self.classify(item.value(), now);
                freshness.is_servable().then(|| CachedResource {
                    resource_id: item.key().resource_id.clone(),
                    payload: item.value().payload.clone(),
                    fetched_at: item.value().fetched_at,
                    freshness,
                })
            })
            .collect();

        resources.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        resources
    }

    /// Drop every entry (administrative)
    pub fn clear(&self) {
        self.entries.clear();
        warn!("result cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let stale_hits = self.stale_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + stale_hits + misses;
        let hit_rate = if total > 0 {
            (hits + stale_hits) as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        CacheStats {
            entries: self.entries.len(),
            hits,
            stale_hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}
