//! Crate-wide error type.
//!
//! Follows the error kinds from the transaction engine's contract: most
//! variants are programmer-error signals raised synchronously at the
//! offending call (`AlreadyCommitted`, `AlreadyExists`, `NotFound`), two are
//! detected only inside `commit` and surfaced through a `CommitResult`
//! rather than this type (`Conflict`, `AncestorCommitted` — see
//! `crate::core::result`), and `Backend` wraps whatever the adapter
//! returned, verbatim, as text.

use std::fmt;

/// Convenience alias used throughout the crate.
pub type CResult<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A mutating or read operation was attempted on a closed transaction.
    AlreadyCommitted,

    /// `create(k, ..)` was called but `k` already has a value visible to
    /// this scope.
    AlreadyExists,

    /// `write`/`delete` was called on a key this scope can't see.
    NotFound,

    /// The backend adapter failed; the message is the adapter error's
    /// `Display` output, since the engine is generic over the adapter and
    /// can't name its concrete error type.
    Backend(String),

    /// Anything else internal to the engine (corrupt on-disk state for a
    /// concrete backend adapter, lock poisoning, etc).
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AlreadyCommitted => write!(f, "transaction is already committed or rolled back"),
            Error::AlreadyExists => write!(f, "key already exists"),
            Error::NotFound => write!(f, "key not found"),
            Error::Backend(msg) => write!(f, "backend error: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
