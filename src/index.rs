//! An in-memory ordered map from `(bucket, key)` to a record locator,
//! in either `RAM` or `Mapped` mode.
//!
//! Each bucket is a `BTreeMap<Vec<u8>, IndexEntry>` ordered by raw
//! byte comparison, giving O(log n) point lookup and in-order range
//! traversal.

use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, HashMap};

use crate::{
    record::{Entry, Flag},
    segment::SegmentId,
};

/// Selects whether [IndexEntry] caches the value inline (`Ram`) or
/// only the value's on-disk location (`Mapped`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryIdxMode {
    Ram,
    Mapped,
}

/// In-memory locator for one live (bucket, key). `value` is populated
/// in [EntryIdxMode::Ram], `None` in [EntryIdxMode::Mapped] (the value
/// is then fetched through `Segment::read_at` using
/// `segment_id`/`value_offset`/`value_size`).
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub segment_id: SegmentId,
    pub offset: u64,
    pub size: u32,
    pub value_offset: u64,
    pub value_size: u32,
    pub timestamp: u64,
    pub ttl: u32,
    pub value: Option<Vec<u8>>,
}

impl IndexEntry {
    pub fn is_expired(&self, now: u64) -> bool {
        self.ttl > 0 && now >= self.timestamp + self.ttl as u64
    }
}

type Bucket = BTreeMap<Vec<u8>, IndexEntry>;

/// The live-record index for an entire database.
pub(crate) struct Index {
    mode: EntryIdxMode,
    buckets: HashMap<Vec<u8>, Bucket>,
}

impl Index {
    pub(crate) fn new(mode: EntryIdxMode) -> Index {
        Index { mode, buckets: HashMap::new() }
    }

    pub(crate) fn mode(&self) -> EntryIdxMode {
        self.mode
    }

    /// Names of all buckets currently holding at least one live
    /// entry.
    pub(crate) fn buckets(&self) -> Vec<Vec<u8>> {
        self.buckets.keys().cloned().collect()
    }

    pub(crate) fn get(&mut self, bucket: &[u8], key: &[u8], now: u64) -> Option<IndexEntry> {
        let expired = match self.buckets.get(bucket).and_then(|b| b.get(key)) {
            Some(e) if e.is_expired(now) => true,
            Some(e) => return Some(e.clone()),
            None => return None,
        };
        if expired {
            self.buckets.get_mut(bucket).unwrap().remove(key);
        }
        None
    }

    /// Apply one decoded on-disk record to the index: a live `Put`
    /// inserts/overwrites, a `Delete` removes.
    pub(crate) fn apply(
        &mut self,
        segment_id: SegmentId,
        offset: u64,
        size: u32,
        entry: &Entry,
        now: u64,
    ) {
        match entry.flag {
            Flag::Delete => {
                if let Some(b) = self.buckets.get_mut(&entry.bucket) {
                    b.remove(&entry.key);
                }
            }
            Flag::Put if entry.is_expired(now) => {
                if let Some(b) = self.buckets.get_mut(&entry.bucket) {
                    b.remove(&entry.key);
                }
            }
            Flag::Put => {
                let value_offset = offset
                    + (crate::record::HEADER_SIZE as u64)
                    + entry.bucket.len() as u64
                    + entry.key.len() as u64;
                let ie = IndexEntry {
                    segment_id,
                    offset,
                    size,
                    value_offset,
                    value_size: entry.value.len() as u32,
                    timestamp: entry.timestamp,
                    ttl: entry.ttl,
                    value: match self.mode {
                        EntryIdxMode::Ram => Some(entry.value.clone()),
                        EntryIdxMode::Mapped => None,
                    },
                };
                self.buckets.entry(entry.bucket.clone()).or_default().insert(entry.key.clone(), ie);
            }
        }
    }

    /// Repoint a live entry's locator after [crate::merge] rewrites it
    /// into a fresh segment. The cached value (if any) and metadata
    /// are untouched — only where the bytes now live changes.
    pub(crate) fn relocate(&mut self, bucket: &[u8], key: &[u8], segment_id: SegmentId, offset: u64, size: u32) {
        if let Some(ie) = self.buckets.get_mut(bucket).and_then(|b| b.get_mut(key)) {
            ie.value_offset = offset
                + crate::record::HEADER_SIZE as u64
                + bucket.len() as u64
                + key.len() as u64;
            ie.segment_id = segment_id;
            ie.offset = offset;
            ie.size = size;
        }
    }

    pub(crate) fn remove(&mut self, bucket: &[u8], key: &[u8]) {
        if let Some(b) = self.buckets.get_mut(bucket) {
            b.remove(key);
        }
    }

    /// Entries whose key starts with `prefix`, in key order, capped at
    /// `limit` (0 means unlimited). Expired entries encountered along
    /// the way are lazily dropped.
    pub(crate) fn prefix_scan(
        &mut self,
        bucket: &[u8],
        prefix: &[u8],
        limit: usize,
        now: u64,
    ) -> Vec<(Vec<u8>, IndexEntry)> {
        let mut expired = Vec::new();
        let mut out = Vec::new();
        if let Some(b) = self.buckets.get(bucket) {
            for (k, v) in b.range(prefix.to_vec()..) {
                if !k.starts_with(prefix) {
                    break;
                }
                if v.is_expired(now) {
                    expired.push(k.clone());
                    continue;
                }
                out.push((k.clone(), v.clone()));
                if limit != 0 && out.len() >= limit {
                    break;
                }
            }
        }
        self.drop_expired(bucket, expired);
        out
    }

    /// Entries with `start <= key <= end`, in key order, inclusive on
    /// both bounds.
    pub(crate) fn range_scan(
        &mut self,
        bucket: &[u8],
        start: &[u8],
        end: &[u8],
        now: u64,
    ) -> Vec<(Vec<u8>, IndexEntry)> {
        let mut expired = Vec::new();
        let mut out = Vec::new();
        if let Some(b) = self.buckets.get(bucket) {
            for (k, v) in b.range(start.to_vec()..=end.to_vec()) {
                if v.is_expired(now) {
                    expired.push(k.clone());
                    continue;
                }
                out.push((k.clone(), v.clone()));
            }
        }
        self.drop_expired(bucket, expired);
        out
    }

    /// Flatten every live, non-expired entry across all buckets into a
    /// single ordered map keyed by `(bucket, key)`. Used by [Tx::begin]
    /// to build a transaction's point-in-time read view.
    pub(crate) fn snapshot(&self, now: u64) -> BTreeMap<(Vec<u8>, Vec<u8>), IndexEntry> {
        let mut out = BTreeMap::new();
        for (bucket, entries) in &self.buckets {
            for (key, ie) in entries {
                if !ie.is_expired(now) {
                    out.insert((bucket.clone(), key.clone()), ie.clone());
                }
            }
        }
        out
    }

    fn drop_expired(&mut self, bucket: &[u8], keys: Vec<Vec<u8>>) {
        if keys.is_empty() {
            return;
        }
        if let Some(b) = self.buckets.get_mut(bucket) {
            for k in keys {
                b.remove(&k);
            }
        }
    }
}

#[cfg(test)]
#[path = "index_test.rs"]
mod index_test;
