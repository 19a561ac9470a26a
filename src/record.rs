//! Encodes and decodes a single log record to and from a contiguous
//! byte buffer.
//!
//! Wire format, little-endian, fixed 32-byte header:
//!
//! ```text
//! crc32(u32) timestamp(u64) key_size(u32) value_size(u32)
//! flag(u16) ttl(u32) bucket_size(u32) reserved(u16) | bucket | key | value
//! ```
//!
//! `reserved` pads the header out to 32 bytes; it is written as zero
//! and ignored on decode, leaving room for a future header field
//! without shifting the body offset.
//!
//! The CRC is computed over every byte after the crc field, using the
//! IEEE polynomial (`crc32fast`).

use crc32fast::Hasher;

use std::convert::TryInto;

use crate::{err_at, Result};

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 4 + 8 + 4 + 4 + 2 + 4 + 4 + 2;

/// Whether an [Entry] is a live value or a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Put = 0,
    Delete = 1,
}

impl Flag {
    fn from_u16(v: u16) -> Result<Flag> {
        match v {
            0 => Ok(Flag::Put),
            1 => Ok(Flag::Delete),
            _ => err_at!(InvalidRecord, msg: "unknown flag {}", v),
        }
    }
}

/// A timestamped, ttl-bearing key/value pair scoped to a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub bucket: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: u64,
    pub ttl: u32,
    pub flag: Flag,
}

impl Entry {
    pub fn is_expired(&self, now: u64) -> bool {
        self.ttl > 0 && now >= self.timestamp + self.ttl as u64
    }

    /// Encode this entry into a freshly allocated contiguous buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let key_size: u32 = err_at!(FailConvert, self.key.len().try_into())?;
        let value_size: u32 = err_at!(FailConvert, self.value.len().try_into())?;
        let bucket_size: u32 = err_at!(FailConvert, self.bucket.len().try_into())?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + self.bucket.len() + self.key.len() + self.value.len());

        buf.extend_from_slice(&0u32.to_le_bytes()); // crc placeholder
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&key_size.to_le_bytes());
        buf.extend_from_slice(&value_size.to_le_bytes());
        buf.extend_from_slice(&(self.flag as u16).to_le_bytes());
        buf.extend_from_slice(&self.ttl.to_le_bytes());
        buf.extend_from_slice(&bucket_size.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // reserved
        buf.extend_from_slice(&self.bucket);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let mut hasher = Hasher::new();
        hasher.update(&buf[4..]);
        let crc = hasher.finalize();
        buf[0..4].copy_from_slice(&crc.to_le_bytes());

        Ok(buf)
    }

    /// Decode one record starting at `offset` in `buf`. Returns the
    /// entry and the offset immediately following it.
    ///
    /// A checksum mismatch, or a header/payload that runs past the end
    /// of `buf`, is reported as [crate::Error::InvalidRecord] rather
    /// than panicking: recovery and compaction rely on this to find
    /// the last valid offset in a possibly-truncated segment tail.
    pub fn decode(buf: &[u8], offset: usize) -> Result<(Entry, usize)> {
        if buf.len() < offset + HEADER_SIZE {
            return err_at!(InvalidRecord, msg: "truncated header at {}", offset);
        }
        let h = &buf[offset..offset + HEADER_SIZE];

        let crc = u32::from_le_bytes(h[0..4].try_into().unwrap());
        let timestamp = u64::from_le_bytes(h[4..12].try_into().unwrap());
        let key_size = u32::from_le_bytes(h[12..16].try_into().unwrap()) as usize;
        let value_size = u32::from_le_bytes(h[16..20].try_into().unwrap()) as usize;
        let flag = u16::from_le_bytes(h[20..22].try_into().unwrap());
        let ttl = u32::from_le_bytes(h[22..26].try_into().unwrap());
        let bucket_size = u32::from_le_bytes(h[26..30].try_into().unwrap()) as usize;
        // h[30..32] is reserved, ignored on decode.

        let body_len = bucket_size + key_size + value_size;
        let body_start = offset + HEADER_SIZE;
        if buf.len() < body_start + body_len {
            return err_at!(InvalidRecord, msg: "truncated body at {}", offset);
        }

        let mut hasher = Hasher::new();
        hasher.update(&h[4..]);
        hasher.update(&buf[body_start..body_start + body_len]);
        if hasher.finalize() != crc {
            return err_at!(InvalidRecord, msg: "crc mismatch at {}", offset);
        }

        let bucket = buf[body_start..body_start + bucket_size].to_vec();
        let key_start = body_start + bucket_size;
        let key = buf[key_start..key_start + key_size].to_vec();
        let value_start = key_start + key_size;
        let value = buf[value_start..value_start + value_size].to_vec();

        let entry = Entry {
            bucket,
            key,
            value,
            timestamp,
            ttl,
            flag: Flag::from_u16(flag)?,
        };
        Ok((entry, body_start + body_len))
    }

    /// Size this entry would occupy on disk once encoded.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.bucket.len() + self.key.len() + self.value.len()
    }
}

#[cfg(test)]
#[path = "record_test.rs"]
mod record_test;
