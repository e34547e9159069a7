//! Typed errors surfaced by the retrieval core
//!
//! Every failure crosses the core boundary as one of these kinds; the
//! HTTP adapter maps each kind to a status code. Nothing is swallowed
//! inside the core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An image blob could not be decoded by the external decoder.
    #[error("image decode error: {0}")]
    Decode(String),

    /// A request argument was missing or malformed (bad hash length,
    /// channel plane of the wrong size, and the like).
    #[error("{0}")]
    Param(String),

    /// The requested post is not in the database.
    #[error("post #{0} not found")]
    NotFound(u64),

    /// The persistent store failed. The caller may retry; the server
    /// keeps running.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// An internal invariant was violated. Not recoverable; the process
    /// should log and exit.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether the process can keep serving after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}
