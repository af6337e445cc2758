// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{CidMap, QueryEntry, QueryOptions, RandomAccessFileReader};
use crate::car_stream::CarHeader;
use crate::error::{Error, Result};
use crate::indexer::{read_header, read_index_entry_and_skip};
use cid::Cid;
use parking_lot::Mutex;
use positioned_io::{ReadAt, Size};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// Positioned file handle that also knows its size.
/// [`positioned_io::RandomAccessFile`] alone does not implement
/// [`positioned_io::Size`], and the index build relies on the size to bound
/// every frame against the end of the archive.
pub struct RandomAccessFile {
    file: positioned_io::RandomAccessFile,
    size: Option<u64>,
}

impl RandomAccessFile {
    /// Opens the file and caches its size up front. Directories are rejected.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<RandomAccessFile> {
        let file = File::open(path)?;
        let size = file.size()?;
        let file = positioned_io::RandomAccessFile::try_new(file)?;
        Ok(Self { file, size })
    }
}

impl Size for RandomAccessFile {
    fn size(&self) -> std::io::Result<Option<u64>> {
        Ok(self.size)
    }
}

impl ReadAt for RandomAccessFile {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read_at(pos, buf)
    }

    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact_at(pos, buf)
    }
}

/// Location of a payload within the archive, CID excluded.
#[derive(Debug, Clone, Copy)]
struct PayloadLocation {
    offset: u64,
    length: u64,
}

/// A CAR archive backed by a random-access source. Construction decodes the
/// header only; the CID index is built on first lookup by skip-scanning the
/// archive, reading each frame's CID and seeking over its payload. Payloads
/// stay on disk and are fetched with positioned reads, so concurrent `get`s
/// need no seek coordination.
pub struct IndexedCar<ReaderT> {
    reader: ReaderT,
    header: CarHeader,
    // byte offset of the first block frame
    data_offset: u64,
    index: Mutex<Option<Arc<CidMap<PayloadLocation>>>>,
}

impl<ReaderT: RandomAccessFileReader> IndexedCar<ReaderT> {
    /// To avoid wasting memory, the constructor only decodes the header. Use
    /// [`IndexedCar::get`] or [`IndexedCar::query`] to access the blocks.
    pub fn new(reader: ReaderT) -> Result<Self> {
        let mut cursor = positioned_io::Cursor::new(&reader);
        let header = read_header(&mut cursor)?;
        let data_offset = cursor.position();
        debug!(num_roots = header.roots.len(), "opened indexed CAR");
        Ok(IndexedCar {
            reader,
            header,
            data_offset,
            index: Mutex::new(None),
        })
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    pub fn roots(&self) -> Vec<Cid> {
        self.header.roots.clone()
    }

    /// Consumes the store and returns the underlying reader.
    pub fn into_inner(self) -> ReaderT {
        self.reader
    }

    /// The memoized CID index. Built once, on the first call; later calls and
    /// repeated queries share the same `Arc`.
    fn index(&self) -> Result<Arc<CidMap<PayloadLocation>>> {
        let mut guard = self.index.lock();
        if let Some(index) = guard.as_ref() {
            return Ok(Arc::clone(index));
        }

        let size = self.reader.size()?;
        let mut cursor = positioned_io::Cursor::new_pos(&self.reader, self.data_offset);
        let mut index = CidMap::default();
        while let Some(entry) = read_index_entry_and_skip(&mut cursor)? {
            // seeking past the end of a file is silent, catch it here
            if let Some(size) = size {
                if entry.offset.saturating_add(entry.length) > size {
                    return Err(Error::TruncatedArchive);
                }
            }
            index.insert(
                entry.cid,
                PayloadLocation {
                    offset: entry.payload_offset(),
                    length: entry.payload_length(),
                },
            );
        }
        debug!(num_blocks = index.len(), "indexed CAR");
        let index = Arc::new(index);
        *guard = Some(Arc::clone(&index));
        Ok(index)
    }

    fn read_payload(&self, location: PayloadLocation) -> Result<Vec<u8>> {
        let length = usize::try_from(location.length)
            .map_err(|_| Error::MalformedBlock("payload too large for this platform".into()))?;
        let mut data = vec![0; length];
        self.reader.read_exact_at(location.offset, &mut data)?;
        Ok(data)
    }

    pub fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        match self.index()?.get(cid) {
            Some(location) => {
                trace!(%cid, "fetching payload from disk");
                Ok(Some(self.read_payload(*location)?))
            }
            None => {
                trace!(%cid, "not found in index");
                Ok(None)
            }
        }
    }

    pub fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.index()?.contains_key(cid))
    }

    pub fn query(
        &self,
        options: QueryOptions,
    ) -> Result<impl Iterator<Item = Result<QueryEntry>> + '_> {
        let index = self.index()?;
        let mut position = 0;
        Ok(std::iter::from_fn(move || {
            let (key, location) = index.get_index(position)?;
            position += 1;
            Some(if options.keys_only {
                Ok(QueryEntry::Key(*key))
            } else {
                self.read_payload(*location).map(|value| QueryEntry::Pair {
                    key: *key,
                    value,
                })
            })
        }))
    }

    pub fn put(&self, _cid: Cid, _data: &[u8]) -> Result<()> {
        Err(Error::ReadOnlyStore)
    }

    pub fn delete(&self, _cid: &Cid) -> Result<()> {
        Err(Error::ReadOnlyStore)
    }

    pub fn set_roots(&self, _roots: Vec<Cid>) -> Result<()> {
        Err(Error::ReadOnlyStore)
    }
}
