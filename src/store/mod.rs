// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Store façades over CAR archives.
//!
//! [`AnyCar`] unifies the read-side backing modes behind one surface:
//! [`MemoryCar`] holds a fully-materialized index (built from bytes or from a
//! one-pass stream), [`IndexedCar`] defers to seeked reads against a
//! random-access source. Operations a mode cannot honor return a typed error
//! rather than being resolved by runtime type checks. The write mode is
//! [`CarWriter`](crate::CarWriter).

mod indexed;
mod memory;

pub use indexed::{IndexedCar, RandomAccessFile};
pub use memory::MemoryCar;

use crate::error::{Error, Result};
use bytes::Bytes;
use cid::Cid;
use futures::Stream;
use indexmap::IndexMap;
use itertools::Either;
use positioned_io::{ReadAt, Size};
use std::io;
use std::path::Path;
use tokio::io::AsyncRead;

pub trait RandomAccessFileReader: ReadAt + Size + Send + Sync + 'static {}
impl<X: ReadAt + Size + Send + Sync + 'static> RandomAccessFileReader for X {}

/// Insertion-ordered CID map. A later insert of the same CID overwrites the
/// payload but keeps the first-seen position, which is what gives duplicate
/// records their overwrite-in-place semantics.
pub(crate) type CidMap<V> = IndexMap<Cid, V, ahash::RandomState>;

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Yield [`QueryEntry::Key`] entries, skipping payload materialization
    /// entirely.
    pub keys_only: bool,
}

/// One result of [`AnyCar::query`]. Keys-only queries carry no payload field
/// at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEntry {
    Key(Cid),
    Pair { key: Cid, value: Vec<u8> },
}

impl QueryEntry {
    pub fn key(&self) -> &Cid {
        match self {
            QueryEntry::Key(key) | QueryEntry::Pair { key, .. } => key,
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            QueryEntry::Key(_) => None,
            QueryEntry::Pair { value, .. } => Some(value),
        }
    }
}

/// A read-only store over a CAR archive, backed by either a fully
/// materialized in-memory index or an indexed random-access source.
pub enum AnyCar<ReaderT = RandomAccessFile> {
    Memory(MemoryCar),
    Indexed(IndexedCar<ReaderT>),
}

impl<ReaderT: RandomAccessFileReader> AnyCar<ReaderT> {
    pub fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        match self {
            AnyCar::Memory(store) => store.get(cid),
            AnyCar::Indexed(store) => store.get(cid),
        }
    }

    pub fn has(&self, cid: &Cid) -> Result<bool> {
        match self {
            AnyCar::Memory(store) => store.has(cid),
            AnyCar::Indexed(store) => store.has(cid),
        }
    }

    /// The roots declared in the header, in header order.
    pub fn roots(&self) -> Vec<Cid> {
        match self {
            AnyCar::Memory(store) => store.roots(),
            AnyCar::Indexed(store) => store.roots(),
        }
    }

    /// Lazily iterate over the archive's records in first-seen order.
    /// Repeated queries see identical results; the header is never decoded
    /// again.
    pub fn query(
        &self,
        options: QueryOptions,
    ) -> Result<impl Iterator<Item = Result<QueryEntry>> + '_> {
        match self {
            AnyCar::Memory(store) => Ok(Either::Left(store.query(options))),
            AnyCar::Indexed(store) => Ok(Either::Right(store.query(options)?)),
        }
    }

    /// Stores reconstructed from a sealed archive are immutable.
    pub fn put(&self, _cid: Cid, _data: &[u8]) -> Result<()> {
        Err(Error::ReadOnlyStore)
    }

    /// See [`AnyCar::put`].
    pub fn delete(&self, _cid: &Cid) -> Result<()> {
        Err(Error::ReadOnlyStore)
    }

    /// See [`AnyCar::put`].
    pub fn set_roots(&self, _roots: Vec<Cid>) -> Result<()> {
        Err(Error::ReadOnlyStore)
    }
}

impl AnyCar {
    /// Open an archive file for random access. Only the header is read;
    /// the index is built on first lookup.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(AnyCar::Indexed(IndexedCar::new(RandomAccessFile::open(
            path,
        )?)?))
    }

    /// Decode an in-memory archive into a fully materialized store.
    pub async fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(AnyCar::Memory(MemoryCar::from_bytes(bytes).await?))
    }

    /// Consume a one-pass byte stream completely and materialize it. The
    /// source cannot be replayed; queries answer from the captured state.
    pub async fn read_stream_complete(reader: impl AsyncRead + Unpin) -> Result<Self> {
        Ok(AnyCar::Memory(MemoryCar::from_reader(reader).await?))
    }

    /// Like [`AnyCar::read_stream_complete`] for a lazy sequence of chunks.
    pub async fn from_chunk_stream<S>(chunks: S) -> Result<Self>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        Ok(AnyCar::Memory(MemoryCar::from_chunk_stream(chunks).await?))
    }
}

impl<ReaderT> From<MemoryCar> for AnyCar<ReaderT> {
    fn from(store: MemoryCar) -> Self {
        AnyCar::Memory(store)
    }
}

impl<ReaderT> From<IndexedCar<ReaderT>> for AnyCar<ReaderT> {
    fn from(store: IndexedCar<ReaderT>) -> Self {
        AnyCar::Indexed(store)
    }
}
