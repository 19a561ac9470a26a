//! A bounded append-only file holding a sequence of
//! [crate::record::Entry] records.
//!
//! A segment is either active (the writable tail segment) or sealed
//! (immutable, eligible for [crate::merge]).

use std::{
    convert::TryInto,
    fs, io,
    path::{Path, PathBuf},
};

use crate::{err_at, record::Entry, util, Result};

/// 64-bit segment id, encoded as a 20-digit zero-padded decimal file
/// name with a `.seg` extension.
pub type SegmentId = u64;

pub(crate) fn segment_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(format!("{}.seg", util::zpad_id(id)))
}

/// Parse a segment id out of a file name produced by [segment_path].
/// Returns `None` for any file that does not match the `NNNN....seg`
/// shape, so a directory scan can silently skip unrelated files (the
/// `LOCK` file, a backup-in-progress directory, `.toml` config files).
pub(crate) fn parse_segment_file(name: &str) -> Option<SegmentId> {
    let stem = name.strip_suffix(".seg")?;
    if stem.len() != 20 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

enum Inner {
    Active { file: fs::File, size: u64 },
    Sealed { size: u64 },
}

/// One append-only segment file.
pub struct Segment {
    id: SegmentId,
    path: PathBuf,
    limit: u64,
    inner: Inner,
}

impl Segment {
    /// Create a brand new, empty active segment.
    pub(crate) fn create(dir: &Path, id: SegmentId, limit: u64) -> Result<Segment> {
        let path = segment_path(dir, id);
        let file = util::create_file_a(&path)?;
        Ok(Segment {
            id,
            path,
            limit,
            inner: Inner::Active { file, size: 0 },
        })
    }

    /// Open an existing segment file. `writable` marks it as the
    /// active (tail) segment; anything else is opened sealed.
    pub(crate) fn open(dir: &Path, id: SegmentId, limit: u64, writable: bool) -> Result<Segment> {
        let path = segment_path(dir, id);
        let size = err_at!(IoError, fs::metadata(&path))?.len();
        let inner = if writable {
            Inner::Active {
                file: util::open_file_a(&path)?,
                size,
            }
        } else {
            Inner::Sealed { size }
        };
        Ok(Segment { id, path, limit, inner })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn size(&self) -> u64 {
        match &self.inner {
            Inner::Active { size, .. } => *size,
            Inner::Sealed { size } => *size,
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self.inner, Inner::Sealed { .. })
    }

    /// Would appending `n` bytes exceed this segment's configured
    /// limit? A record whose encoded size exactly fills the remaining
    /// space is allowed; one byte more rolls over.
    pub fn would_exceed(&self, n: u64) -> bool {
        self.size().saturating_add(n) > self.limit
    }

    /// Append `data` to the active segment. Fails with
    /// [crate::Error::Fatal] if called on a sealed segment or if
    /// appending would exceed the configured limit — callers are
    /// expected to check [Segment::would_exceed] and seal/roll over
    /// first. The write is not synced; call [Segment::sync] to make it
    /// durable.
    pub(crate) fn append(&mut self, data: &[u8]) -> Result<u64> {
        match &mut self.inner {
            Inner::Active { file, size } => {
                let n: u64 = err_at!(FailConvert, data.len().try_into())?;
                if size.saturating_add(n) > self.limit {
                    return err_at!(Fatal, msg: "append would exceed segment limit");
                }
                let offset = *size;
                util::write_buffer(file, data)?;
                *size += n;
                Ok(offset)
            }
            Inner::Sealed { .. } => {
                err_at!(Fatal, msg: "append on sealed segment {}", self.id)
            }
        }
    }

    /// Flush the active segment's pending writes to durable storage.
    /// A no-op on sealed segments, whose bytes are already durable.
    pub(crate) fn sync(&mut self) -> Result<()> {
        if let Inner::Active { file, .. } = &mut self.inner {
            err_at!(IoError, file.sync_all())?;
        }
        Ok(())
    }

    /// Random access read, safe on sealed or active segments.
    pub fn read_at(&self, offset: u64, size: u32) -> Result<Vec<u8>> {
        let mut fd = util::open_file_r(&self.path)?;
        util::read_buffer(&mut fd, offset, size as usize, &format!("segment {} @ {}", self.id, offset))
    }

    /// Seal this segment: further appends fail, and it becomes
    /// eligible for [crate::merge].
    pub(crate) fn seal(&mut self) -> Result<()> {
        if let Inner::Active { file, size } = &mut self.inner {
            err_at!(IoError, file.sync_all())?;
            self.inner = Inner::Sealed { size: *size };
        }
        Ok(())
    }

    /// Lazily scan records from offset 0. Stops (without erroring)
    /// at the first [crate::Error::InvalidRecord], yielding the
    /// offset recovery/merge should truncate at.
    pub fn scan(&self) -> Result<SegmentScan> {
        let mut fd = util::open_file_r(&self.path)?;
        let mut buf = Vec::new();
        err_at!(IoError, io::Read::read_to_end(&mut fd, &mut buf))?;
        Ok(SegmentScan { buf, offset: 0, done: false })
    }

    pub(crate) fn remove(self) -> Result<()> {
        err_at!(IoError, fs::remove_file(&self.path))
    }

    /// Truncate the underlying file at `offset`, discarding everything
    /// from the first invalid record onward. Safe to call on either an
    /// active or sealed segment: a sealed segment holds no open file
    /// handle, so this reopens the path directly.
    pub(crate) fn truncate(&mut self, offset: u64) -> Result<()> {
        let file = util::open_file_a(&self.path)?;
        err_at!(IoError, file.set_len(offset))?;
        err_at!(IoError, file.sync_all())?;
        match &mut self.inner {
            Inner::Active { size, .. } => *size = offset,
            Inner::Sealed { size } => *size = offset,
        }
        Ok(())
    }

    /// Copy this segment's bytes, up to `upto` (clamped to its current
    /// size), into `dst`. Used by [crate::backup] to snapshot a
    /// consistent prefix of the active segment.
    pub(crate) fn copy_upto(&self, dst: &Path, upto: u64) -> Result<()> {
        let n = upto.min(self.size());
        let data = self.read_at(0, n as u32)?;
        let mut out = err_at!(IoError, fs::File::create(dst))?;
        err_at!(IoError, io::Write::write_all(&mut out, &data))?;
        err_at!(IoError, out.sync_all())
    }
}

/// One item yielded by [Segment::scan]: either a decoded entry with
/// its on-disk location, or the first invalid offset encountered.
pub enum ScanItem {
    Valid { offset: u64, entry: Entry, len: u32 },
    Invalid { offset: u64 },
}

pub struct SegmentScan {
    buf: Vec<u8>,
    offset: usize,
    done: bool,
}

impl Iterator for SegmentScan {
    type Item = ScanItem;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.buf.len() {
            return None;
        }
        match Entry::decode(&self.buf, self.offset) {
            Ok((entry, next)) => {
                let item = ScanItem::Valid {
                    offset: self.offset as u64,
                    len: (next - self.offset) as u32,
                    entry,
                };
                self.offset = next;
                Some(item)
            }
            Err(_) => {
                self.done = true;
                Some(ScanItem::Invalid { offset: self.offset as u64 })
            }
        }
    }
}

#[cfg(test)]
#[path = "segment_test.rs"]
mod segment_test;
