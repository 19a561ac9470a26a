use super::*;
use crate::Error;

fn sample(flag: Flag) -> Entry {
    Entry {
        bucket: b"b1".to_vec(),
        key: b"foo".to_vec(),
        value: b"bar".to_vec(),
        timestamp: 1_700_000_000,
        ttl: 0,
        flag,
    }
}

#[test]
fn test_round_trip() {
    let entry = sample(Flag::Put);
    let buf = entry.encode().unwrap();
    let (decoded, next) = Entry::decode(&buf, 0).unwrap();
    assert_eq!(decoded, entry);
    assert_eq!(next, buf.len());
}

#[test]
fn test_round_trip_empty_value() {
    let mut entry = sample(Flag::Delete);
    entry.value = vec![];
    let buf = entry.encode().unwrap();
    let (decoded, _) = Entry::decode(&buf, 0).unwrap();
    assert_eq!(decoded, entry);
}

#[test]
fn test_multiple_records_in_buffer() {
    let e1 = sample(Flag::Put);
    let mut e2 = sample(Flag::Put);
    e2.key = b"zoo".to_vec();

    let mut buf = e1.encode().unwrap();
    buf.extend(e2.encode().unwrap());

    let (d1, off) = Entry::decode(&buf, 0).unwrap();
    assert_eq!(d1, e1);
    let (d2, off2) = Entry::decode(&buf, off).unwrap();
    assert_eq!(d2, e2);
    assert_eq!(off2, buf.len());
}

#[test]
fn test_crc_mismatch_is_invalid_record() {
    let entry = sample(Flag::Put);
    let mut buf = entry.encode().unwrap();
    let last = buf.len() - 1;
    buf[last] ^= 0xff;
    let err = Entry::decode(&buf, 0).unwrap_err();
    assert!(matches!(err, Error::InvalidRecord(_, _)));
}

#[test]
fn test_truncated_tail_is_invalid_record() {
    let entry = sample(Flag::Put);
    let buf = entry.encode().unwrap();
    let truncated = &buf[..buf.len() - 3];
    let err = Entry::decode(truncated, 0).unwrap_err();
    assert!(matches!(err, Error::InvalidRecord(_, _)));
}

#[test]
fn test_is_expired() {
    let mut entry = sample(Flag::Put);
    entry.ttl = 10;
    entry.timestamp = 100;
    assert!(!entry.is_expired(109));
    assert!(entry.is_expired(110));
    assert!(entry.is_expired(111));
}

#[test]
fn test_ttl_zero_never_expires() {
    let entry = sample(Flag::Put);
    assert!(!entry.is_expired(u64::MAX));
}
