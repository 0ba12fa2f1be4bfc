//! Statement cache bookkeeping.
//!
//! The compiled statements live in the connection's prepared-statement LRU
//! (`prepare_cached`). This ledger follows that LRU entry for entry so the
//! use-count and in-use state of every compiled statement can be inspected:
//!
//! - checking a statement out removes it from the LRU, so a second query on
//!   the same SQL while the first is leased compiles a separate statement;
//! - returning a statement keeps at most one idle statement per SQL text and
//!   evicts the least recently returned one once `capacity` idle statements
//!   are held.

use crate::options::DEFAULT_STATEMENT_CACHE_CAPACITY;
use std::collections::HashMap;
use tracing::trace;

/// Normalize SQL text into a cache key.
pub fn normalize_sql(sql: &str) -> &str {
    sql.trim()
}

/// One compiled statement known to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementEntry {
    pub id: u64,
    pub sql: String,
    pub use_count: u64,
    pub in_use: bool,
    returned_at: u64,
}

/// Proof of exclusive use of a cache entry. Hand it back with
/// [`StatementCache::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct StatementLease {
    id: u64,
    sql: String,
}

impl StatementLease {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Map of SQL text to cached statement entries.
#[derive(Debug)]
pub struct StatementCache {
    entries: HashMap<String, Vec<StatementEntry>>,
    capacity: usize,
    next_id: u64,
    clock: u64,
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_STATEMENT_CACHE_CAPACITY)
    }
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `capacity` idle statements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            next_id: 0,
            clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, evicting idle entries that no longer fit.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict();
    }

    /// Lease the idle entry for `sql`, recording a new one when there is
    /// none.
    pub fn acquire(&mut self, sql: &str) -> StatementLease {
        let key = normalize_sql(sql);
        let entries = self.entries.entry(key.to_string()).or_default();

        if let Some(entry) = entries.iter_mut().find(|e| !e.in_use) {
            entry.in_use = true;
            entry.use_count += 1;
            trace!(id = entry.id, use_count = entry.use_count, "Reusing cached statement");
            return StatementLease {
                id: entry.id,
                sql: entry.sql.clone(),
            };
        }

        let id = self.next_id;
        self.next_id += 1;
        entries.push(StatementEntry {
            id,
            sql: key.to_string(),
            use_count: 1,
            in_use: true,
            returned_at: 0,
        });
        trace!(id, sql = %key, "Cached new statement");
        StatementLease {
            id,
            sql: key.to_string(),
        }
    }

    /// Return a leased entry. An older idle entry for the same SQL is
    /// replaced, and the least recently returned idle entries are evicted
    /// beyond capacity. Returns false when the entry was evicted while
    /// leased.
    pub fn release(&mut self, lease: StatementLease) -> bool {
        self.clock += 1;
        let clock = self.clock;
        let Some(entries) = self.entries.get_mut(&lease.sql) else {
            return false;
        };
        let Some(entry) = entries.iter_mut().find(|e| e.id == lease.id) else {
            return false;
        };
        entry.in_use = false;
        entry.returned_at = clock;
        entries.retain(|e| e.in_use || e.id == lease.id);
        self.evict();
        true
    }

    fn evict(&mut self) {
        while self.idle() > self.capacity {
            let oldest = self
                .entries
                .values()
                .flatten()
                .filter(|e| !e.in_use)
                .min_by_key(|e| e.returned_at)
                .map(|e| (e.sql.clone(), e.id));
            let Some((sql, id)) = oldest else {
                break;
            };
            trace!(id, sql = %sql, "Evicted cached statement");
            self.remove(&sql, id);
        }
    }

    fn remove(&mut self, sql: &str, id: u64) {
        if let Some(entries) = self.entries.get_mut(sql) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                self.entries.remove(sql);
            }
        }
    }

    /// Evict every idle entry. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let before = self.len();
        for entries in self.entries.values_mut() {
            entries.retain(|e| e.in_use);
        }
        self.entries.retain(|_, entries| !entries.is_empty());
        before - self.len()
    }

    /// Total number of entries, leased or idle.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries waiting to be reused.
    pub fn idle(&self) -> usize {
        self.entries.values().flatten().filter(|e| !e.in_use).count()
    }

    /// Entries recorded for `sql`.
    pub fn entries(&self, sql: &str) -> &[StatementEntry] {
        self.entries
            .get(normalize_sql(sql))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sum of use-counts across the entries for `sql`.
    pub fn use_count(&self, sql: &str) -> u64 {
        self.entries(sql).iter().map(|e| e.use_count).sum()
    }

    /// Number of entries for `sql` currently leased.
    pub fn in_use(&self, sql: &str) -> usize {
        self.entries(sql).iter().filter(|e| e.in_use).count()
    }
}
