//! The ordered collection of all segment files on disk, tracking the
//! single active (tail) segment and the sealed segments eligible for
//! [crate::merge].
//!
//! A segment retired by merge is not always safe to unlink right
//! away: a `Mapped`-mode reader that began before the merge may still
//! hold a locator pointing into it. Retired segments whose files can't
//! yet be removed are parked in `retiring` until [crate::db::Db]
//! reports that every such reader has closed.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    err_at,
    segment::{self, Segment, SegmentId},
    Result,
};

/// All segments belonging to one database directory.
pub(crate) struct SegmentSet {
    dir: PathBuf,
    limit: u64,
    sealed: BTreeMap<SegmentId, Segment>,
    /// Segments merge has already rewritten and would normally delete,
    /// but couldn't because a pre-merge `Mapped`-mode reader might
    /// still read through them. Still readable via [SegmentSet::get].
    retiring: BTreeMap<SegmentId, Segment>,
    active: Segment,
}

impl SegmentSet {
    /// Scan `dir` for existing segment files and open them: every id
    /// but the highest is sealed, the highest is opened active. If
    /// `dir` has no segment files yet, a fresh segment with id 1 is
    /// created.
    pub(crate) fn open(dir: &Path, limit: u64) -> Result<SegmentSet> {
        err_at!(IoError, fs::create_dir_all(dir))?;

        let mut ids: Vec<SegmentId> = Vec::new();
        for item in err_at!(IoError, fs::read_dir(dir))? {
            let item = err_at!(IoError, item)?;
            let name = item.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = segment::parse_segment_file(&name) {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let (sealed_ids, active_id) = match ids.split_last() {
            Some((last, rest)) => (rest.to_vec(), *last),
            None => (vec![], 1),
        };

        let mut sealed = BTreeMap::new();
        for id in sealed_ids {
            sealed.insert(id, Segment::open(dir, id, limit, false)?);
        }

        let active = if ids.is_empty() {
            Segment::create(dir, active_id, limit)?
        } else {
            Segment::open(dir, active_id, limit, true)?
        };

        Ok(SegmentSet { dir: dir.to_path_buf(), limit, sealed, retiring: BTreeMap::new(), active })
    }

    /// Remove every existing segment file under `dir` and start with a
    /// fresh, empty active segment.
    pub(crate) fn create(dir: &Path, limit: u64) -> Result<SegmentSet> {
        err_at!(IoError, fs::create_dir_all(dir))?;
        for item in err_at!(IoError, fs::read_dir(dir))? {
            let item = err_at!(IoError, item)?;
            let name = item.file_name();
            if segment::parse_segment_file(&name.to_string_lossy()).is_some() {
                err_at!(IoError, fs::remove_file(item.path()))?;
            }
        }
        Ok(SegmentSet {
            dir: dir.to_path_buf(),
            limit,
            sealed: BTreeMap::new(),
            retiring: BTreeMap::new(),
            active: Segment::create(dir, 1, limit)?,
        })
    }

    pub(crate) fn active(&self) -> &Segment {
        &self.active
    }

    pub(crate) fn active_mut(&mut self) -> &mut Segment {
        &mut self.active
    }

    /// Look up a segment by id, searching the active segment, the
    /// sealed set, and finally segments merge has retired but not yet
    /// unlinked (see [SegmentSet::retiring]).
    pub(crate) fn get(&self, id: SegmentId) -> Option<&Segment> {
        if id == self.active.id() {
            Some(&self.active)
        } else {
            self.sealed.get(&id).or_else(|| self.retiring.get(&id))
        }
    }

    /// Mutable access to a segment by id, active or sealed — used by
    /// recovery to truncate a corrupted tail.
    pub(crate) fn get_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        if id == self.active.id() {
            Some(&mut self.active)
        } else {
            self.sealed.get_mut(&id)
        }
    }

    /// Segment ids in ascending order, sealed first, then active —
    /// the order recovery must scan in.
    pub(crate) fn ids_ascending(&self) -> Vec<SegmentId> {
        let mut ids: Vec<SegmentId> = self.sealed.keys().copied().collect();
        ids.push(self.active.id());
        ids
    }

    pub(crate) fn sealed_ids(&self) -> Vec<SegmentId> {
        self.sealed.keys().copied().collect()
    }

    /// Seal the active segment and open a fresh one with the next id.
    pub(crate) fn roll_active(&mut self) -> Result<()> {
        self.active.seal()?;
        let next_id = self.active.id() + 1;
        log::debug!(target: "segment", "sealing segment {}, rolling to {}", self.active.id(), next_id);
        let sealed = std::mem::replace(&mut self.active, Segment::create(&self.dir, next_id, self.limit)?);
        self.sealed.insert(sealed.id(), sealed);
        Ok(())
    }

    /// Append `data` to the active segment, rolling over to a new
    /// segment first if it would not fit. Returns the segment id and
    /// offset the bytes landed at.
    pub(crate) fn append(&mut self, data: &[u8]) -> Result<(SegmentId, u64)> {
        let n = data.len() as u64;
        if self.active.would_exceed(n) && self.active.size() > 0 {
            self.roll_active()?;
        }
        let offset = self.active.append(data)?;
        Ok((self.active.id(), offset))
    }

    pub(crate) fn sync_active(&mut self) -> Result<()> {
        self.active.sync()
    }

    /// Replace the current sealed set with `new_sealed` (fresh
    /// segments written by [crate::merge]) and retire the segments
    /// listed in `retiring`. If `defer_unlink` is true (a `Mapped`-mode
    /// reader was open when the merge started), the retired segments'
    /// files are kept on disk and stay servable through
    /// [SegmentSet::get] until [SegmentSet::release_retired] is called;
    /// otherwise they're unlinked immediately.
    pub(crate) fn swap_after_merge(
        &mut self,
        retiring: Vec<SegmentId>,
        new_sealed: Vec<Segment>,
        defer_unlink: bool,
    ) -> Result<()> {
        for seg in new_sealed {
            self.sealed.insert(seg.id(), seg);
        }
        for id in retiring {
            if let Some(seg) = self.sealed.remove(&id) {
                if defer_unlink {
                    self.retiring.insert(id, seg);
                } else {
                    seg.remove()?;
                }
            }
        }
        Ok(())
    }

    /// Unlink every segment parked in `retiring`. Called once
    /// [crate::db::Db] observes that no `Mapped`-mode reader is open
    /// anymore, so the deferral from [SegmentSet::swap_after_merge] no
    /// longer applies.
    pub(crate) fn release_retired(&mut self) -> Result<()> {
        for (_, seg) in std::mem::take(&mut self.retiring) {
            seg.remove()?;
        }
        Ok(())
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Length, in bytes, of every segment file still on disk: sealed,
    /// active, and anything parked in `retiring` awaiting release.
    pub(crate) fn total_size(&self) -> u64 {
        self.sealed.values().map(Segment::size).sum::<u64>()
            + self.retiring.values().map(Segment::size).sum::<u64>()
            + self.active.size()
    }
}

#[cfg(test)]
#[path = "segment_set_test.rs"]
mod segment_set_test;
