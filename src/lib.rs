//! `kivik` is an embeddable, persistent, ordered key/value store with
//! serializable transactions.
//!
//! The store keeps its data as a sequence of append-only
//! [segment::Segment] files under a single directory (the "log"), and
//! maintains an in-memory [index::Index] over the live records so that
//! point lookups, prefix scans and range scans run without touching
//! disk (in `RAM` mode) or with a single positional read (in `Mapped`
//! mode).
//!
//! Writes are serialized through a single writer lock and committed
//! atomically: every record in a commit is appended to the active
//! segment, the affected segment is synced, and only then is the
//! in-memory index updated. A process crash can lose at most the tail
//! of un-barriered writes; every barriered commit survives.
//!
//! Start with [Options] to configure a database directory, then
//! [Db::open] it. Issue reads and writes through [Db::view] and
//! [Db::update], or drive [Tx] directly with [Db::begin].

#[macro_use]
mod error;

mod backup;
mod db;
mod index;
mod merge;
mod options;
mod record;
mod recovery;
mod segment;
mod segment_set;
mod txn;
mod util;

pub use crate::db::Db;
pub use crate::error::{Error, Result};
pub use crate::index::EntryIdxMode;
pub use crate::options::Options;
pub use crate::record::{Entry, Flag};
pub use crate::txn::Tx;
