use thiserror::Error;

/// Error type for the cache.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A caller-supplied argument was invalid (bad key, non-positive `maxSize`/`V`).
    #[error("{0}")]
    IllegalArgument(String),
    /// An operation was attempted against state that forbids it (closed
    /// cache, finished editor, editor/entry mismatch).
    #[error("{0}")]
    IllegalState(String),
    /// The on-disk journal is corrupt. Never escapes `Cache::open`: the
    /// directory is wiped and reinitialized instead.
    #[error("corrupt journal: {0}")]
    Corrupt(String),
}

/// Custom result type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
