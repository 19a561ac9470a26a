//! The top-level handle tying every component together: `Open`,
//! `Close`, `Begin`, `View`/`Update`, `Merge`, `Backup`.
//!
//! An index-holding struct plus a thin directory-level advisory lock,
//! collapsed into one `Db` since this crate has a single index
//! implementation rather than a pluggable index trait.

use fs2::FileExt;

use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, RwLock,
    },
};

use crate::{
    backup, err_at,
    index::{EntryIdxMode, Index, IndexEntry},
    merge, recovery,
    record::Entry,
    segment::SegmentId,
    segment_set::SegmentSet,
    txn::{now_secs, Tx},
    Options, Result,
};

/// An open, embeddable key/value store.
pub struct Db {
    options: Options,
    index: RwLock<Index>,
    segments: Mutex<SegmentSet>,
    writer: Mutex<()>,
    lock_file: fs::File,
    /// Count of currently open read transactions in `Mapped` mode.
    /// Segments retired by [crate::merge] while this is non-zero are
    /// parked rather than unlinked; see [crate::segment_set::SegmentSet].
    mapped_readers: AtomicU64,
}

impl Db {
    /// Open the database at `options.dir`, creating it if absent. Runs
    /// recovery to rebuild the Index from whatever segments are on
    /// disk.
    pub fn open(options: Options) -> Result<Db> {
        options.validate()?;
        let lock_file = acquire_lock(&options.dir)?;

        let mut segments = SegmentSet::open(&options.dir, options.segment_size)?;
        let mut index = Index::new(options.entry_idx_mode);
        recovery::recover(&mut segments, &mut index)?;

        log::info!(target: "db    ", "opened {:?}, active segment {}", options.dir, segments.active().id());
        Ok(Db {
            options,
            index: RwLock::new(index),
            segments: Mutex::new(segments),
            writer: Mutex::new(()),
            lock_file,
            mapped_readers: AtomicU64::new(0),
        })
    }

    /// Create a fresh database at `options.dir`, purging any segment
    /// files already present there rather than running recovery over
    /// them. Use [Db::open] to reattach to an existing database
    /// instead.
    pub fn create(options: Options) -> Result<Db> {
        options.validate()?;
        let lock_file = acquire_lock(&options.dir)?;

        let segments = SegmentSet::create(&options.dir, options.segment_size)?;
        let index = Index::new(options.entry_idx_mode);

        log::info!(target: "db    ", "created {:?}", options.dir);
        Ok(Db {
            options,
            index: RwLock::new(index),
            segments: Mutex::new(segments),
            writer: Mutex::new(()),
            lock_file,
            mapped_readers: AtomicU64::new(0),
        })
    }

    /// Release the directory lock and drop the handle. Buffered OS
    /// writes for the active segment are already durable by commit
    /// time; this does not issue an extra barrier.
    pub fn close(self) -> Result<()> {
        log::info!(target: "db    ", "closing {:?}", self.options.dir);
        err_at!(IoError, self.lock_file.unlock())
    }

    /// Begin a transaction. `writable = true` blocks until the
    /// exclusive writer lock is available.
    pub fn begin(&self, writable: bool) -> Result<Tx<'_>> {
        Tx::begin(self, writable)
    }

    /// Run `f` inside a fresh read-only transaction, discarding it
    /// afterward regardless of `f`'s outcome.
    pub fn view<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Tx) -> Result<R>,
    {
        let mut tx = self.begin(false)?;
        let result = f(&mut tx);
        tx.rollback();
        result
    }

    /// Run `f` inside a fresh write transaction: commits on `Ok`, rolls
    /// back on `Err`.
    pub fn update<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Tx) -> Result<R>,
    {
        let mut tx = self.begin(true)?;
        match f(&mut tx) {
            Ok(r) => {
                tx.commit()?;
                Ok(r)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Compact sealed segments. Blocks until the writer lock is
    /// available. Segments retired by the merge are only unlinked
    /// immediately if no `Mapped`-mode reader is currently open;
    /// otherwise their removal is deferred until the last such reader
    /// closes.
    pub fn merge(&self) -> Result<()> {
        let _guard = err_at!(Fatal, self.writer.lock())?;
        let mut segments = err_at!(Fatal, self.segments.lock())?;
        let mut index = err_at!(Fatal, self.index.write())?;
        let before = segments.total_size();
        let defer_unlink = self.mapped_readers.load(Ordering::SeqCst) > 0;
        merge::merge(&self.options, &mut segments, &mut index, defer_unlink)?;
        log::info!(target: "merge ", "reclaimed {} bytes", before.saturating_sub(segments.total_size()));
        Ok(())
    }

    /// Copy a consistent snapshot of the database directory to `dir`.
    pub fn backup<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let segments = err_at!(Fatal, self.segments.lock())?;
        log::info!(target: "backup", "backing up {:?} to {:?}", self.options.dir, dir.as_ref());
        backup::backup_dir(&segments, dir.as_ref())
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn writer_lock(&self) -> &Mutex<()> {
        &self.writer
    }

    pub(crate) fn index_mode(&self) -> EntryIdxMode {
        self.index.read().expect("index lock poisoned").mode()
    }

    /// Record that a `Mapped`-mode read transaction has begun, pinning
    /// any segment a concurrent merge would otherwise retire.
    pub(crate) fn mark_reader_open(&self) {
        self.mapped_readers.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that a `Mapped`-mode read transaction has ended. Once the
    /// last one closes, any segment merge had parked is unlinked.
    pub(crate) fn mark_reader_closed(&self) {
        if self.mapped_readers.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Ok(mut segments) = self.segments.lock() {
                let _ = segments.release_retired();
            }
        }
    }

    pub(crate) fn snapshot_index(&self) -> std::collections::BTreeMap<(Vec<u8>, Vec<u8>), IndexEntry> {
        let index = self.index.read().expect("index lock poisoned");
        index.snapshot(now_secs())
    }

    pub(crate) fn read_value(&self, ie: &IndexEntry) -> Result<Vec<u8>> {
        let segments = err_at!(Fatal, self.segments.lock())?;
        match segments.get(ie.segment_id) {
            Some(seg) => seg.read_at(ie.value_offset, ie.value_size),
            None => err_at!(Fatal, msg: "missing segment {}", ie.segment_id),
        }
    }

    /// Step 3 of the commit protocol: append every encoded record to
    /// the active segment, rolling over as needed.
    pub(crate) fn append_commit(&self, encoded: &[(Entry, Vec<u8>)]) -> Result<Vec<(SegmentId, u64)>> {
        let mut segments = err_at!(Fatal, self.segments.lock())?;
        let mut locations = Vec::with_capacity(encoded.len());
        for (_, bytes) in encoded {
            locations.push(segments.append(bytes)?);
        }
        Ok(locations)
    }

    /// Step 4: the durability barrier.
    pub(crate) fn barrier(&self) -> Result<()> {
        if !self.options.sync_enable {
            return Ok(());
        }
        let mut segments = err_at!(Fatal, self.segments.lock())?;
        err_at!(CommitFailed, segments.sync_active())
    }

    /// Step 5: apply the now-durable commit to the Index.
    pub(crate) fn apply_commit(&self, encoded: &[(Entry, Vec<u8>)], locations: &[(SegmentId, u64)], timestamp: u64) {
        let mut index = self.index.write().expect("index lock poisoned");
        for ((entry, bytes), (segment_id, offset)) in encoded.iter().zip(locations.iter()) {
            index.apply(*segment_id, *offset, bytes.len() as u32, entry, timestamp);
        }
    }
}

fn acquire_lock(dir: &Path) -> Result<fs::File> {
    err_at!(IoError, fs::create_dir_all(dir))?;
    let path = dir.join("LOCK");
    let file = err_at!(IoError, fs::OpenOptions::new().create(true).write(true).open(&path))?;
    err_at!(IoError, file.try_lock_exclusive(), "database at {:?} is already open", dir)?;
    Ok(file)
}
