//! File-system helpers shared by [crate::segment] and [crate::options].
//!
//! Files are opened through small named helpers rather than ad hoc
//! `OpenOptions` calls scattered through the codebase. Syncing to disk
//! is never implicit here: callers that need durability call
//! `sync_all` themselves at the point that matters.

use serde::de::DeserializeOwned;

use std::{
    fs,
    io::{Read, Seek, Write},
    path,
};

use crate::{err_at, Result};

/// Create `file` for append-only writing. Any existing file at that
/// path is removed first.
pub(crate) fn create_file_a(file: &path::Path) -> Result<fs::File> {
    fs::remove_file(file).ok();
    if let Some(parent) = file.parent() {
        err_at!(IoError, fs::create_dir_all(parent))?;
    }
    let mut opts = fs::OpenOptions::new();
    err_at!(IoError, opts.append(true).create_new(true).open(file))
}

/// Open an existing file in append mode for writing.
pub(crate) fn open_file_a(file: &path::Path) -> Result<fs::File> {
    let mut opts = fs::OpenOptions::new();
    err_at!(IoError, opts.append(true).open(file))
}

/// Open a file read-only.
pub(crate) fn open_file_r(file: &path::Path) -> Result<fs::File> {
    let mut opts = fs::OpenOptions::new();
    err_at!(IoError, opts.read(true).open(file))
}

/// Write `data` to `file`. Does not sync; the caller decides when (and
/// whether) a durability barrier is needed.
pub(crate) fn write_buffer(file: &mut fs::File, data: &[u8]) -> Result<usize> {
    let n = err_at!(IoError, file.write(data))?;
    if n != data.len() {
        err_at!(IoError, msg: "partial write {}/{}", n, data.len())?;
    }
    Ok(n)
}

/// Read exactly `n` bytes starting at `fpos`.
pub(crate) fn read_buffer(fd: &mut fs::File, fpos: u64, n: usize, msg: &str) -> Result<Vec<u8>> {
    err_at!(IoError, fd.seek(std::io::SeekFrom::Start(fpos)), "seek for {}", msg)?;
    let mut buf = vec![0; n];
    let got = err_at!(IoError, fd.read(&mut buf), "read for {}", msg)?;
    if got != n {
        err_at!(IoError, msg: "partial read {}/{} for {}", got, n, msg)?;
    }
    Ok(buf)
}

/// Load a TOML file into `T`.
pub(crate) fn load_toml<P, T>(loc: P) -> Result<T>
where
    P: AsRef<path::Path>,
    T: DeserializeOwned,
{
    use std::str::from_utf8;

    let ploc: &path::Path = loc.as_ref();
    let data = err_at!(IoError, fs::read(ploc))?;
    let s = err_at!(FailConvert, from_utf8(&data), "not utf8 for {:?}", ploc)?;
    err_at!(FailConvert, toml::from_str(s), "file:{:?}", ploc)
}

/// Zero-pad `id` into a 20-digit decimal string, lexicographically
/// sortable in the same order as the numeric value.
pub(crate) fn zpad_id(id: u64) -> String {
    format!("{:020}", id)
}
