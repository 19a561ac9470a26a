//! On open, rebuild the Index from whatever is durably on disk,
//! truncating the first corrupted tail it finds.
//!
//! Replays every segment file in id order and stops replaying a file
//! at its first bad entry rather than erroring the whole open.

use crate::{
    index::Index,
    segment::ScanItem,
    segment_set::SegmentSet,
    txn::now_secs,
    Result,
};

/// Scan every segment in ascending id order and apply each valid
/// record to `index`. The first invalid record found in a segment
/// truncates that segment's file at that offset and stops scanning it;
/// scanning continues with the next segment.
pub(crate) fn recover(segments: &mut SegmentSet, index: &mut Index) -> Result<()> {
    let now = now_secs();
    let ids = segments.ids_ascending();
    log::info!(target: "recovery", "scanning {} segment(s)", ids.len());

    for id in ids {
        let mut truncate_at = None;
        {
            let seg = segments.get(id).expect("id came from ids_ascending");
            for item in seg.scan()? {
                match item {
                    ScanItem::Valid { offset, entry, len } => {
                        index.apply(id, offset, len, &entry, now);
                    }
                    ScanItem::Invalid { offset } => {
                        truncate_at = Some(offset);
                        break;
                    }
                }
            }
        }
        if let Some(offset) = truncate_at {
            log::warn!(target: "recovery", "truncating segment {} at offset {}", id, offset);
            let seg = segments.get_mut(id).expect("id came from ids_ascending");
            seg.truncate(offset)?;
        }
    }
    // The highest id is already the active segment by construction of
    // SegmentSet::open.
    Ok(())
}

#[cfg(test)]
#[path = "recovery_test.rs"]
mod recovery_test;
