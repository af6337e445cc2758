// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while encoding, decoding, indexing or querying CAR
/// archives.
///
/// Format errors are terminal: byte offsets after a malformed length prefix
/// are unrecoverable, so a single bad frame aborts the whole read. Lookup
/// misses are *not* errors — `get` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed varint: {0}")]
    MalformedVarint(&'static str),
    #[error("unsupported CAR version {0}, only version 1 is supported")]
    UnsupportedVersion(u64),
    #[error("malformed CAR header: {0}")]
    MalformedHeader(String),
    #[error("malformed CAR block frame: {0}")]
    MalformedBlock(String),
    #[error("truncated CAR archive: unexpected end of stream inside a frame")]
    TruncatedArchive,
    #[error("store is read-only")]
    ReadOnlyStore,
    #[error("operation is not supported in this store mode")]
    UnsupportedOperation,
    #[error("roots have already been written")]
    RootsAlreadySet,
    #[error("roots must be set before any block is written")]
    RootsNotSet,
    #[error("store is closed")]
    StoreClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cid::Error> for Error {
    fn from(err: cid::Error) -> Self {
        match err {
            cid::Error::Io(io_error) => Error::Io(io_error),
            other => Error::MalformedBlock(other.to_string()),
        }
    }
}
