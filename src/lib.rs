// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! CARv1 content-addressable archive toolkit.
//!
//! A CAR archive is a sealed, append-only sequence of varint frames: one
//! DagCBOR header declaring the root [`Cid`](cid::Cid)s, followed by zero or
//! more records of a CID and the payload bytes it addresses. This crate
//! covers the full lifecycle:
//!
//! - [`CarStream`]: lazy one-pass decoding of archives of unbounded size,
//!   from any async reader or chunk stream.
//! - [`CarIndexer`]: the same pass yielding byte locations instead of
//!   payload copies, for building external indexes.
//! - [`CarWriter`]: sequential archive production with the
//!   roots-before-blocks protocol enforced at runtime.
//! - [`AnyCar`], [`MemoryCar`], [`IndexedCar`]: read-only datastore façades
//!   over finished archives, fully materialized or lazily indexed over a
//!   random-access source.
//!
//! Payloads are treated as opaque bytes; CIDs are never recomputed or
//! checked against the data they claim to name.

mod car_stream;
mod error;
mod indexer;
mod store;
#[cfg(test)]
mod test_utils;
mod varint;
mod writer;

pub use car_stream::{
    BlockFrameCodec, CarBlock, CarHeader, CarStream, MAX_FRAME_LEN, decode_header, encode_header,
};
pub use error::{Error, Result};
pub use indexer::{CarIndexer, IndexEntry};
pub use store::{
    AnyCar, IndexedCar, MemoryCar, QueryEntry, QueryOptions, RandomAccessFile,
    RandomAccessFileReader,
};
pub use writer::CarWriter;
