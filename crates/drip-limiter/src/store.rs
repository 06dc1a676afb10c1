//! Tracked-entry store: concurrent map from tracking key to counter record.
//!
//! # Design
//!
//! Records live in a sharded [`DashMap`]. [`EntryStore::with_record`] runs a
//! caller-supplied closure while holding the shard's write lock for that key,
//! so lookup-or-create, the window arithmetic and the counter increment form
//! one atomic step. Two concurrent first requests for the same key therefore
//! see a single record, and no two callers can both observe the last free
//! slot.
//!
//! Records are never removed on the request path. Idle records are dropped by
//! [`EntryStore::evict_expired`], which the sweeper calls on a timer.

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::clock::Timestamp;
use crate::key::{KeyKind, TrackingKey};

/// Counter state for one tracking key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingRecord {
    /// Requests observed in the current window.
    pub hits: u32,
    /// When the current window began.
    pub window_start: Timestamp,
    /// Most recent request; only used for eviction.
    pub last_seen: Timestamp,
    /// While in the future, every request for the key is denied.
    pub blocked_until: Option<Timestamp>,
}

impl TrackingRecord {
    /// A fresh record with an empty window starting at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            hits: 0,
            window_start: now,
            last_seen: now,
            blocked_until: None,
        }
    }

    /// Start a new window at `now` counting one request.
    pub fn restart(&mut self, now: Timestamp) {
        self.hits = 1;
        self.window_start = now;
        self.blocked_until = None;
    }

    pub fn is_blocked(&self, now: Timestamp) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }
}

/// Introspection snapshot of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub tracked_keys: usize,
    pub ip_keys: usize,
    pub wallet_keys: usize,
    pub global_keys: usize,
}

/// Concurrent-safe mapping from [`TrackingKey`] to [`TrackingRecord`].
#[derive(Debug, Default)]
pub struct EntryStore {
    records: DashMap<TrackingKey, TrackingRecord>,
}

impl EntryStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Run `f` on the record for `key`, creating a fresh one first if absent.
    ///
    /// The key's shard stays write-locked for the duration of `f`. `f` must
    /// not call back into this store.
    pub fn with_record<R>(
        &self,
        key: &TrackingKey,
        now: Timestamp,
        f: impl FnOnce(&mut TrackingRecord) -> R,
    ) -> R {
        let mut entry = self
            .records
            .entry(key.clone())
            .or_insert_with(|| TrackingRecord::new(now));
        f(entry.value_mut())
    }

    /// Copy of the record for `key`, if tracked. Never creates one.
    pub fn get(&self, key: &TrackingKey) -> Option<TrackingRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Remove the record for `key`. Returns `true` if one existed.
    pub fn remove(&self, key: &TrackingKey) -> bool {
        self.records.remove(key).is_some()
    }

    /// Drop every record. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let count = self.records.len();
        self.records.clear();
        count
    }

    /// Delete records idle for longer than `max_age` ms. Returns how many went.
    pub fn evict_expired(&self, max_age: u64, now: Timestamp) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| now.saturating_sub(record.last_seen) <= max_age);
        let evicted = before.saturating_sub(self.records.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.records.len(), "store: evicted idle records");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for entry in self.records.iter() {
            stats.tracked_keys += 1;
            match entry.key().kind() {
                KeyKind::Ip => stats.ip_keys += 1,
                KeyKind::Wallet => stats.wallet_keys += 1,
                KeyKind::Global => stats.global_keys += 1,
            }
        }
        stats
    }
}
