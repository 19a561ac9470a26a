use super::*;
use crate::{index::EntryIdxMode, segment_set::SegmentSet};

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("kivik-merge-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    for item in std::fs::read_dir(&dir).unwrap() {
        std::fs::remove_file(item.unwrap().path()).ok();
    }
    dir
}

fn opts(dir: &std::path::Path) -> Options {
    let mut o = Options::new(dir);
    o.set_segment_size(200);
    o
}

#[test]
fn test_merge_no_sealed_segments_is_a_no_op() {
    let dir = scratch_dir("no-sealed");
    let mut segments = SegmentSet::open(&dir, 4096).unwrap();
    let mut index = Index::new(EntryIdxMode::Ram);
    let before = segments.total_size();
    merge(&opts(&dir), &mut segments, &mut index, false).unwrap();
    assert_eq!(segments.total_size(), before);
    assert!(segments.sealed_ids().is_empty());
}

#[test]
fn test_merge_reclaims_space_and_preserves_live_values() {
    let dir = scratch_dir("reclaim");
    let options = opts(&dir);
    let mut segments = SegmentSet::open(&dir, options.segment_size).unwrap();
    let mut index = Index::new(EntryIdxMode::Ram);

    // Fill several segments with overwrites and a delete so there's
    // plenty of dead weight for Merge to reclaim.
    let now = now_secs();
    let mut ts = now;
    let mut apply_put = |segments: &mut SegmentSet, index: &mut Index, key: &[u8], value: &[u8]| {
        let e = Entry { bucket: b"b1".to_vec(), key: key.to_vec(), value: value.to_vec(), timestamp: ts, ttl: 0, flag: Flag::Put };
        let bytes = e.encode().unwrap();
        let (id, offset) = segments.append(&bytes).unwrap();
        index.apply(id, offset, bytes.len() as u32, &e, ts);
        ts += 1;
    };
    let mut apply_delete = |segments: &mut SegmentSet, index: &mut Index, key: &[u8]| {
        let e = Entry { bucket: b"b1".to_vec(), key: key.to_vec(), value: vec![], timestamp: ts, ttl: 0, flag: Flag::Delete };
        let bytes = e.encode().unwrap();
        let (id, offset) = segments.append(&bytes).unwrap();
        index.apply(id, offset, bytes.len() as u32, &e, ts);
        ts += 1;
    };

    apply_put(&mut segments, &mut index, b"k1", &vec![b'x'; 40]);
    apply_put(&mut segments, &mut index, b"k2", &vec![b'y'; 40]);
    apply_put(&mut segments, &mut index, b"k1", &vec![b'z'; 40]); // overwrite, orphaning the first record
    apply_delete(&mut segments, &mut index, b"k2"); // tombstone, orphaning k2's live value
    apply_put(&mut segments, &mut index, b"k3", &vec![b'w'; 40]);

    segments.roll_active().unwrap(); // seal everything written so far
    apply_put(&mut segments, &mut index, b"k4", &vec![b'v'; 40]); // lives in the new active segment

    let before = segments.total_size();
    assert!(!segments.sealed_ids().is_empty());

    merge(&options, &mut segments, &mut index, false).unwrap();

    assert!(segments.total_size() < before, "merge should reclaim dead space");

    let now = now_secs();
    assert_eq!(index.get(b"b1", b"k1", now).unwrap().value.unwrap(), vec![b'z'; 40]);
    assert!(index.get(b"b1", b"k2", now).is_none());
    assert_eq!(index.get(b"b1", b"k3", now).unwrap().value.unwrap(), vec![b'w'; 40]);
    assert_eq!(index.get(b"b1", b"k4", now).unwrap().value.unwrap(), vec![b'v'; 40]);
}

#[test]
fn test_merge_never_touches_active_segment() {
    let dir = scratch_dir("active-untouched");
    let options = opts(&dir);
    let mut segments = SegmentSet::open(&dir, options.segment_size).unwrap();
    let mut index = Index::new(EntryIdxMode::Ram);

    let e = Entry { bucket: b"b1".to_vec(), key: b"k1".to_vec(), value: vec![b'a'; 10], timestamp: now_secs(), ttl: 0, flag: Flag::Put };
    let bytes = e.encode().unwrap();
    let (id, offset) = segments.append(&bytes).unwrap();
    index.apply(id, offset, bytes.len() as u32, &e, now_secs());

    let active_id_before = segments.active().id();
    merge(&options, &mut segments, &mut index, false).unwrap();
    assert_eq!(segments.active().id(), active_id_before);
    assert!(segments.sealed_ids().is_empty());
}
