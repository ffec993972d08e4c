//! In-memory table of live phase entries.
//!
//! The table owns every live [`PhaseMemoryEntry`] keyed by (phase, entry id)
//! and keeps a running byte estimate so the coordinator can ask the safety
//! validator about projected occupancy without re-serializing everything.
//! Removal (expiry, eviction, overwrite) drops the entry entirely.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::types::{EntryKey, PhaseMemoryEntry};

#[derive(Debug, Clone)]
struct Slot {
    entry: PhaseMemoryEntry,
    size: u64,
}

/// Number of entries removed by one pressure eviction: 10% rounded up, at least one.
pub fn eviction_batch_size(live_entries: usize) -> usize {
    if live_entries == 0 {
        0
    } else {
        live_entries.div_ceil(10).max(1)
    }
}

#[derive(Debug, Default)]
pub struct EntryTable {
    slots: HashMap<EntryKey, Slot>,
    total_bytes: u64,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Estimated bytes held by live entries.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Recorded size of a live entry.
    pub fn size_of(&self, key: &EntryKey) -> Option<u64> {
        self.slots.get(key).map(|slot| slot.size)
    }

    /// Insert or atomically replace an entry. Returns the replaced entry.
    pub fn insert(&mut self, entry: PhaseMemoryEntry, size: u64) -> Option<PhaseMemoryEntry> {
        let key = entry.key();
        self.total_bytes += size;
        let previous = self.slots.insert(key, Slot { entry, size });
        previous.map(|slot| {
            self.total_bytes -= slot.size;
            slot.entry
        })
    }

    /// Record an access and return a snapshot of the entry.
    pub fn touch(&mut self, key: &EntryKey, now: DateTime<Utc>) -> Option<PhaseMemoryEntry> {
        self.slots.get_mut(key).map(|slot| {
            slot.entry.record_access(now);
            slot.entry.clone()
        })
    }

    /// Read an entry without updating its access bookkeeping.
    pub fn peek(&self, key: &EntryKey) -> Option<&PhaseMemoryEntry> {
        self.slots.get(key).map(|slot| &slot.entry)
    }

    pub fn remove(&mut self, key: &EntryKey) -> Option<PhaseMemoryEntry> {
        self.slots.remove(key).map(|slot| {
            self.total_bytes -= slot.size;
            slot.entry
        })
    }

    /// Remove every entry whose TTL has elapsed at `now`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<EntryKey> {
        let expired: Vec<EntryKey> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired
    }

    /// Remove up to `count` entries, least recently accessed first.
    pub fn evict_lru(&mut self, count: usize) -> Vec<EntryKey> {
        let mut candidates: Vec<(DateTime<Utc>, EntryKey)> = self
            .slots
            .iter()
            .map(|(key, slot)| (slot.entry.last_accessed, key.clone()))
            .collect();

        // Oldest first; key order breaks ties deterministically
        candidates.sort();

        let victims: Vec<EntryKey> = candidates
            .into_iter()
            .take(count)
            .map(|(_, key)| key)
            .collect();

        for key in &victims {
            self.remove(key);
        }
        victims
    }

    /// Live entry count per phase.
    pub fn phase_distribution(&self) -> BTreeMap<String, usize> {
        let mut distribution = BTreeMap::new();
        for key in self.slots.keys() {
            *distribution.entry(key.phase.clone()).or_insert(0) += 1;
        }
        distribution
    }

    /// Snapshot of a phase's entries, ordered by entry id.
    pub fn entries_for_phase(&self, phase: &str) -> Vec<PhaseMemoryEntry> {
        let mut entries: Vec<PhaseMemoryEntry> = self
            .slots
            .values()
            .filter(|slot| slot.entry.phase == phase)
            .map(|slot| slot.entry.clone())
            .collect();
        entries.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));
        entries
    }

    /// Snapshot of entries carrying `tag`, ordered by key.
    pub fn entries_with_tag(&self, tag: &str) -> Vec<PhaseMemoryEntry> {
        let mut entries: Vec<PhaseMemoryEntry> = self
            .slots
            .values()
            .filter(|slot| slot.entry.tags.contains(tag))
            .map(|slot| slot.entry.clone())
            .collect();
        entries.sort_by_key(|e| e.key());
        entries
    }

    /// Access counters of every live entry.
    pub fn access_counts(&self) -> Vec<u64> {
        self.slots.values().map(|slot| slot.entry.access_count).collect()
    }
}
