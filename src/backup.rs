//! Copy a consistent snapshot of the database directory elsewhere,
//! without blocking readers or writers beyond the brief moment it
//! takes to read each segment's current length.
//!
//! Sealed segments are immutable and safe to copy lock-free; only the
//! active segment's *current* length needs to be pinned down first.

use std::path::Path;

use crate::{err_at, segment::segment_path, segment_set::SegmentSet, Result};

/// Copy every segment in `segments` into `dst`, each truncated to the
/// length it had at the moment this function observed it. Caller holds
/// the segment-set lock for the duration, so that instant is
/// well-defined.
pub(crate) fn backup_dir(segments: &SegmentSet, dst: &Path) -> Result<()> {
    err_at!(IoError, std::fs::create_dir_all(dst))?;

    for id in segments.sealed_ids() {
        let seg = segments.get(id).expect("sealed id came from sealed_ids");
        seg.copy_upto(&segment_path(dst, id), seg.size())?;
    }

    let active = segments.active();
    active.copy_upto(&segment_path(dst, active.id()), active.size())?;

    Ok(())
}

#[cfg(test)]
#[path = "backup_test.rs"]
mod backup_test;
