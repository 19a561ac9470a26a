//! Rewrites live records out of sealed segments into fresh segments
//! and retires the originals.
//!
//! The replacement segments are written fully and fsynced (sealing a
//! segment fsyncs it) before anything they replace is retired, so a
//! crash mid-merge leaves recovery with either the old segments, the
//! new ones, or — at worst — both, never neither.

use std::collections::HashSet;

use crate::{
    index::Index,
    record::{Entry, Flag},
    segment::{Segment, SegmentId},
    segment_set::SegmentSet,
    txn::now_secs,
    Options, Result,
};

/// Acquire the writer lock before calling this (enforced by
/// [crate::db::Db::merge]). `defer_unlink` should be true whenever a
/// `Mapped`-mode reader might still be open; see
/// [crate::segment_set::SegmentSet::swap_after_merge].
pub(crate) fn merge(
    options: &Options,
    segments: &mut SegmentSet,
    index: &mut Index,
    defer_unlink: bool,
) -> Result<()> {
    let sealed_ids: HashSet<SegmentId> = segments.sealed_ids().into_iter().collect();
    if sealed_ids.is_empty() {
        return Ok(());
    }
    log::info!(target: "merge ", "merging {} sealed segment(s)", sealed_ids.len());

    let now = now_secs();
    let dir = segments.dir().to_path_buf();
    let limit = options.segment_size;
    let mut next_id = segments.ids_ascending().into_iter().max().unwrap_or(0) + 1;

    // Every live locator that currently points into a segment we're
    // about to retire. Buckets are walked in a stable order so Merge
    // output is reproducible across runs given the same Index state.
    let mut buckets = index.buckets();
    buckets.sort();
    let mut live: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    for bucket in &buckets {
        for (key, ie) in index.prefix_scan(bucket, b"", 0, now) {
            if sealed_ids.contains(&ie.segment_id) {
                live.push((bucket.clone(), key));
            }
        }
    }

    let mut new_segments: Vec<Segment> = Vec::new();
    let mut current: Option<Segment> = None;
    let mut relocations: Vec<(Vec<u8>, Vec<u8>, SegmentId, u64, u32)> = Vec::new();

    for (bucket, key) in live {
        let ie = match index.get(&bucket, &key, now) {
            Some(ie) if sealed_ids.contains(&ie.segment_id) => ie,
            _ => continue, // expired, deleted or already relocated since the scan above
        };
        let value = match ie.value {
            Some(v) => v,
            None => {
                let src = segments.get(ie.segment_id).expect("sealed segment still present");
                src.read_at(ie.value_offset, ie.value_size)?
            }
        };
        let entry = Entry { bucket: bucket.clone(), key: key.clone(), value, timestamp: ie.timestamp, ttl: ie.ttl, flag: Flag::Put };
        let bytes = entry.encode()?;

        if current.is_none() {
            current = Some(Segment::create(&dir, next_id, limit)?);
            next_id += 1;
        }
        if current.as_ref().unwrap().would_exceed(bytes.len() as u64) && current.as_ref().unwrap().size() > 0 {
            let mut sealed = current.take().unwrap();
            sealed.seal()?;
            new_segments.push(sealed);
            current = Some(Segment::create(&dir, next_id, limit)?);
            next_id += 1;
        }

        let seg = current.as_mut().unwrap();
        let offset = seg.append(&bytes)?;
        relocations.push((bucket, key, seg.id(), offset, bytes.len() as u32));
    }

    if let Some(mut seg) = current {
        seg.seal()?;
        new_segments.push(seg);
    }

    for (bucket, key, segment_id, offset, size) in relocations {
        index.relocate(&bucket, &key, segment_id, offset, size);
    }

    segments.swap_after_merge(sealed_ids.into_iter().collect(), new_segments, defer_unlink)
}

#[cfg(test)]
#[path = "merge_test.rs"]
mod merge_test;
