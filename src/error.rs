//! Crate-wide error type.
//!
//! The core surfaces a small, closed set of error kinds to its caller (see
//! the consumer-facing API): duplicate key, key not found, key too long,
//! row too big, I/O error, corrupted page, plus a couple of
//! configuration/locking kinds that only arise at `Store::open`.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// The database file is already open (held) by another process.
    Locked(String),
    /// A page failed to parse: short read, bad header, invalid slot offsets.
    Corruption(String),
    /// A `StoreConfig` violated one of its own invariants.
    Config(String),
    /// Insert found an existing cell with the same search key.
    DuplicateKey,
    /// Update/delete addressed a key absent from the tree.
    KeyNotFound,
    KeyTooLong {
        got: usize,
        max: usize,
    },
    RowTooBig {
        got: usize,
        max: usize,
    },
    /// The cache is full and every entry is dirty; `D < C` should make this
    /// unreachable in practice, but callers get an error rather than a panic.
    CacheExhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Locked(msg) => write!(f, "database locked: {}", msg),
            Error::Corruption(msg) => write!(f, "corrupted page: {}", msg),
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
            Error::DuplicateKey => write!(f, "duplicate key"),
            Error::KeyNotFound => write!(f, "key not found"),
            Error::KeyTooLong { got, max } => {
                write!(f, "key too long: {} bytes (max {})", got, max)
            }
            Error::RowTooBig { got, max } => {
                write!(f, "row too big: {} bytes (max {})", got, max)
            }
            Error::CacheExhausted => write!(f, "page cache exhausted: no evictable page"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Build an `Error` variant with a formatted message.
#[macro_export]
macro_rules! err {
    ($variant:ident, $($arg:tt)*) => {
        $crate::error::Error::$variant(format!($($arg)*))
    };
}
