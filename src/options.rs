//! Options recognized at open: a plain struct with a small builder,
//! loadable from a TOML file via [crate::util::load_toml].

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{err_at, index::EntryIdxMode, util, Result};

/// Default segment size, 64 MiB.
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration accepted by [crate::Db::open] / [crate::Db::create].
///
/// `Dir` and `SegmentSize` are immutable for the lifetime of a database
/// directory: `SegmentSize` is fixed at first create and is not
/// re-read on subsequent opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Database directory. Required.
    pub dir: PathBuf,
    /// Maximum size in bytes of any segment file. Immutable after
    /// first create.
    pub segment_size: u64,
    /// Index value-caching mode, see [EntryIdxMode].
    pub entry_idx_mode: EntryIdxMode,
    /// If true, every commit issues the durability barrier before
    /// returning. If false, the barrier is deferred to OS discretion.
    pub sync_enable: bool,
}

impl Options {
    /// Start building [Options] for a database at `dir`, with
    /// defaults: 64 MiB segments, RAM index mode, sync enabled.
    pub fn new<P: AsRef<Path>>(dir: P) -> Options {
        Options {
            dir: dir.as_ref().to_path_buf(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            entry_idx_mode: EntryIdxMode::Ram,
            sync_enable: true,
        }
    }

    pub fn set_segment_size(&mut self, segment_size: u64) -> &mut Self {
        self.segment_size = segment_size;
        self
    }

    pub fn set_entry_idx_mode(&mut self, mode: EntryIdxMode) -> &mut Self {
        self.entry_idx_mode = mode;
        self
    }

    pub fn set_sync_enable(&mut self, enable: bool) -> &mut Self {
        self.sync_enable = enable;
        self
    }

    /// Load options from a TOML file, as written by a host-process
    /// configuration layer.
    pub fn load_toml<P: AsRef<Path>>(loc: P) -> Result<Options> {
        let opts: Options = util::load_toml(loc)?;
        opts.validate()?;
        Ok(opts)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            err_at!(InvalidArgument, msg: "segment_size must be non-zero")?;
        }
        Ok(())
    }
}
