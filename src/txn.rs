//! Transaction manager: serializes write transactions, gives every
//! transaction a consistent read view, buffers pending mutations, and
//! commits them atomically to the log and the Index.
//!
//! Writes accumulate in an in-memory buffer, then a single call drives
//! them through the codec, the log, and the durability barrier in one
//! protocol, spread across [Tx::commit]'s numbered steps.

use std::{
    collections::BTreeMap,
    sync::MutexGuard,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{db::Db, err_at, index::{EntryIdxMode, IndexEntry}, record::{Entry, Flag, HEADER_SIZE}, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Active,
    Committed,
    RolledBack,
}

#[derive(Clone)]
enum Buffered {
    Put { value: Vec<u8>, ttl: u32 },
    Delete,
}

/// A key scoped to its bucket, used internally to key the write buffer
/// and the read snapshot.
type BucketKey = (Vec<u8>, Vec<u8>);

/// A handle through which reads and writes against one [crate::Db]
/// are issued. Dropping a still-`Active` `Tx` rolls it back, so a host
/// that discards a handle without closing it cannot leak the writer
/// lock.
pub struct Tx<'db> {
    db: &'db Db,
    writable: bool,
    state: State,
    /// Held only for writable transactions, for their entire lifetime —
    /// this is what makes writers mutually exclusive.
    writer_guard: Option<MutexGuard<'db, ()>>,
    /// Snapshot of the Index as of `begin`, keyed by (bucket, key).
    /// Cloning up front is the simplest correct way to give every
    /// transaction a point-in-time view without holding the Index
    /// lock for the transaction's whole lifetime.
    snapshot: BTreeMap<BucketKey, IndexEntry>,
    /// Mutations buffered by a writable transaction, shadowing the
    /// snapshot until commit.
    buffer: BTreeMap<BucketKey, Buffered>,
    /// True for a read-only transaction opened while the Index is in
    /// `Mapped` mode: such a transaction's snapshot may hold locators
    /// into segments a concurrent merge would otherwise unlink, so its
    /// lifetime is reported to `db` and released on drop.
    pinned: bool,
}

impl<'db> Tx<'db> {
    pub(crate) fn begin(db: &'db Db, writable: bool) -> Result<Tx<'db>> {
        let guard = if writable {
            Some(err_at!(Fatal, db.writer_lock().lock())?)
        } else {
            None
        };
        let snapshot = db.snapshot_index();
        let pinned = !writable && db.index_mode() == EntryIdxMode::Mapped;
        if pinned {
            db.mark_reader_open();
        }
        Ok(Tx {
            db,
            writable,
            state: State::Active,
            writer_guard: guard,
            snapshot,
            buffer: BTreeMap::new(),
            pinned,
        })
    }

    fn check_active(&self) -> Result<()> {
        match self.state {
            State::Active => Ok(()),
            _ => err_at!(TransactionClosed, msg: "transaction is not active"),
        }
    }

    /// Read as of this transaction's snapshot, shadowed by this
    /// transaction's own buffered mutations, if any.
    pub fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Entry> {
        self.check_active()?;
        let bk = (bucket.to_vec(), key.to_vec());

        if let Some(buffered) = self.buffer.get(&bk) {
            return match buffered {
                Buffered::Put { value, ttl } => Ok(Entry {
                    bucket: bucket.to_vec(),
                    key: key.to_vec(),
                    value: value.clone(),
                    timestamp: now_secs(),
                    ttl: *ttl,
                    flag: Flag::Put,
                }),
                Buffered::Delete => err_at!(NotFound, msg: "{:?}/{:?}", bucket, key),
            };
        }

        match self.snapshot.get(&bk) {
            Some(ie) => {
                let value = match &ie.value {
                    Some(v) => v.clone(),
                    None => self.db.read_value(ie)?,
                };
                Ok(Entry {
                    bucket: bucket.to_vec(),
                    key: key.to_vec(),
                    value,
                    timestamp: ie.timestamp,
                    ttl: ie.ttl,
                    flag: Flag::Put,
                })
            }
            None => err_at!(NotFound, msg: "{:?}/{:?}", bucket, key),
        }
    }

    /// Buffer a Put. Fails if this transaction is read-only, or if
    /// `value` is too large to ever fit in a segment.
    pub fn put(&mut self, bucket: &[u8], key: &[u8], value: &[u8], ttl: u32) -> Result<()> {
        self.check_active()?;
        if !self.writable {
            return err_at!(ReadOnly, msg: "put on read-only transaction");
        }
        if bucket.is_empty() || key.is_empty() {
            return err_at!(InvalidArgument, msg: "bucket and key must be non-empty");
        }
        let max_value = self.db.options().segment_size.saturating_sub(HEADER_SIZE as u64);
        if value.len() as u64 > max_value {
            return err_at!(
                InvalidArgument,
                msg: "value size {} exceeds segment size minus header ({})",
                value.len(),
                max_value
            );
        }
        let bk = (bucket.to_vec(), key.to_vec());
        self.buffer.insert(bk, Buffered::Put { value: value.to_vec(), ttl });
        Ok(())
    }

    /// Buffer a Delete. Fails if no visible entry exists for this
    /// (bucket, key) as of the snapshot plus this transaction's own
    /// prior buffered writes.
    pub fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<()> {
        self.check_active()?;
        if !self.writable {
            return err_at!(ReadOnly, msg: "delete on read-only transaction");
        }
        if self.get(bucket, key).is_err() {
            return err_at!(NotFound, msg: "delete {:?}/{:?}", bucket, key);
        }
        let bk = (bucket.to_vec(), key.to_vec());
        self.buffer.insert(bk, Buffered::Delete);
        Ok(())
    }

    /// Keys in `bucket` starting with `prefix`, in order, merging this
    /// transaction's buffer over the snapshot.
    pub fn prefix_scan(&self, bucket: &[u8], prefix: &[u8], limit: usize) -> Vec<(Vec<u8>, Entry)> {
        self.merged_range(bucket, |k| k.starts_with(prefix))
            .into_iter()
            .take(if limit == 0 { usize::MAX } else { limit })
            .collect()
    }

    /// Keys in `bucket` with `start <= key <= end`, inclusive, merging
    /// this transaction's buffer over the snapshot.
    pub fn range_scan(&self, bucket: &[u8], start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Entry)> {
        self.merged_range(bucket, |k| k.as_slice() >= start && k.as_slice() <= end)
    }

    fn merged_range<F: Fn(&[u8]) -> bool>(&self, bucket: &[u8], keep: F) -> Vec<(Vec<u8>, Entry)> {
        let mut out: BTreeMap<Vec<u8>, Entry> = BTreeMap::new();

        for ((b, k), ie) in self.snapshot.range((bucket.to_vec(), vec![])..) {
            if b.as_slice() != bucket {
                break;
            }
            if !keep(k) {
                continue;
            }
            let value = match &ie.value {
                Some(v) => v.clone(),
                None => self.db.read_value(ie).unwrap_or_default(),
            };
            out.insert(
                k.clone(),
                Entry { bucket: bucket.to_vec(), key: k.clone(), value, timestamp: ie.timestamp, ttl: ie.ttl, flag: Flag::Put },
            );
        }
        for ((b, k), buffered) in self.buffer.range((bucket.to_vec(), vec![])..) {
            if b.as_slice() != bucket {
                break;
            }
            if !keep(k) {
                continue;
            }
            match buffered {
                Buffered::Put { value, ttl } => {
                    out.insert(
                        k.clone(),
                        Entry { bucket: bucket.to_vec(), key: k.clone(), value: value.clone(), timestamp: now_secs(), ttl: *ttl, flag: Flag::Put },
                    );
                }
                Buffered::Delete => {
                    out.remove(k);
                }
            }
        }
        out.into_iter().collect()
    }

    /// Writer commit protocol. A no-op buffer commit (no puts/deletes
    /// issued) still advances the transaction to `Committed` without
    /// touching the log. The transaction is closed afterward: further
    /// calls on this handle return `TransactionClosed`.
    pub fn commit(&mut self) -> Result<()> {
        self.check_active()?;
        if !self.writable || self.buffer.is_empty() {
            self.finish(State::Committed);
            return Ok(());
        }

        let timestamp = now_secs(); // step 1: one timestamp for the whole commit
        let buffer = std::mem::take(&mut self.buffer);

        let mut encoded = Vec::with_capacity(buffer.len());
        for ((bucket, key), mutation) in &buffer {
            let entry = match mutation {
                Buffered::Put { value, ttl } => Entry {
                    bucket: bucket.clone(),
                    key: key.clone(),
                    value: value.clone(),
                    timestamp,
                    ttl: *ttl,
                    flag: Flag::Put,
                },
                Buffered::Delete => Entry {
                    bucket: bucket.clone(),
                    key: key.clone(),
                    value: vec![],
                    timestamp,
                    ttl: 0,
                    flag: Flag::Delete,
                },
            };
            let bytes = entry.encode()?; // step 2
            encoded.push((entry, bytes));
        }

        let locations = self.db.append_commit(&encoded)?; // step 3 (+ rollover)
        self.db.barrier()?; // step 4, CommitFailed on error
        self.db.apply_commit(&encoded, &locations, timestamp); // step 5

        log::debug!(target: "txn   ", "committed {} record(s) at ts={}", encoded.len(), timestamp);
        self.finish(State::Committed);
        Ok(()) // step 6: writer lock released right here, not at scope exit
    }

    /// Discard the buffer and release the writer lock, if held. The
    /// transaction is closed afterward: further calls on this handle
    /// return `TransactionClosed`. Calling this on an already-closed
    /// transaction is a no-op.
    pub fn rollback(&mut self) {
        if self.state != State::Active {
            return;
        }
        if !self.buffer.is_empty() {
            log::debug!(target: "txn   ", "rolled back {} buffered mutation(s)", self.buffer.len());
        }
        self.buffer.clear();
        self.finish(State::RolledBack);
    }

    /// Move to `state`, release the writer lock immediately rather than
    /// waiting for `self` to drop, and unpin this transaction's
    /// snapshot if it was pinning retired segments.
    fn finish(&mut self, state: State) {
        self.state = state;
        self.writer_guard = None;
        if self.pinned {
            self.pinned = false;
            self.db.mark_reader_closed();
        }
    }
}

impl<'db> Drop for Tx<'db> {
    fn drop(&mut self) {
        // A handle discarded without commit()/rollback() is treated as
        // rolled back; this also releases the writer lock and any
        // reader pin still held.
        if self.state == State::Active {
            self.finish(State::RolledBack);
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
#[path = "txn_test.rs"]
mod txn_test;
