//! Error type for the store, and the `err_at!` helper macro used
//! throughout this crate to tag every fallible call with its origin.

use std::{fmt, result};

/// Result type returned by every fallible operation in this crate.
pub type Result<T> = result::Result<T, Error>;

/// Error variants returned by this crate.
///
/// Every variant carries a `(location, message)` pair, where `location`
/// is a `"file:line"` string captured by [err_at] at the point the
/// error was raised.
#[derive(Debug, Clone)]
pub enum Error {
    /// Underlying file-system or I/O failure.
    IoError(String, String),
    /// A numeric or type conversion failed (e.g. a size did not fit
    /// the target integer type).
    FailConvert(String, String),
    /// An invariant the store relies on was violated; these should
    /// never happen and indicate a bug rather than bad input.
    Fatal(String, String),
    /// A file on disk did not match the naming/layout this crate
    /// expects (segment file name, lock file, config file).
    InvalidFile(String, String),
    /// An empty bucket/key, or a value too large for the configured
    /// segment size, was passed to a write operation.
    InvalidArgument(String, String),
    /// No visible entry for the given (bucket, key).
    NotFound(String, String),
    /// An entry existed but its ttl has elapsed; treated as
    /// [Error::NotFound] by most callers.
    Expired(String, String),
    /// A mutation was attempted through a read-only transaction.
    ReadOnly(String, String),
    /// An operation was attempted on a transaction that already
    /// committed or rolled back.
    TransactionClosed(String, String),
    /// Checksum mismatch or truncation while decoding a record.
    InvalidRecord(String, String),
    /// The durability barrier failed after records were appended;
    /// the index was not updated and the next open must run recovery.
    CommitFailed(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(p, m) => write!(f, "{} io-error: {}", p, m),
            Error::FailConvert(p, m) => write!(f, "{} fail-convert: {}", p, m),
            Error::Fatal(p, m) => write!(f, "{} fatal: {}", p, m),
            Error::InvalidFile(p, m) => write!(f, "{} invalid-file: {}", p, m),
            Error::InvalidArgument(p, m) => write!(f, "{} invalid-argument: {}", p, m),
            Error::NotFound(p, m) => write!(f, "{} not-found: {}", p, m),
            Error::Expired(p, m) => write!(f, "{} expired: {}", p, m),
            Error::ReadOnly(p, m) => write!(f, "{} read-only: {}", p, m),
            Error::TransactionClosed(p, m) => write!(f, "{} transaction-closed: {}", p, m),
            Error::InvalidRecord(p, m) => write!(f, "{} invalid-record: {}", p, m),
            Error::CommitFailed(p, m) => write!(f, "{} commit-failed: {}", p, m),
        }
    }
}

impl std::error::Error for Error {}

#[doc(hidden)]
pub fn at_prefix(file: &str, line: u32) -> String {
    format!("{}:{}", file, line)
}

/// Tag an expression, or a formatted message, with the call site and
/// wrap it into this crate's [Error]/[Result] types.
///
/// ```ignore
/// err_at!(IoError, fs::metadata(&path))?;
/// err_at!(IoError, fs::metadata(&path), "stat {:?}", path)?;
/// err_at!(Fatal, msg: "unreachable state for {:?}", path)?;
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = $crate::error::at_prefix(file!(), line!());
        Err($crate::Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = $crate::error::at_prefix(file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = $crate::error::at_prefix(file!(), line!());
                let msg = format!($($arg),+);
                Err($crate::Error::$v(prefix, format!("{}, {}", msg, err)))
            }
        }
    }};
}
