// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{CidMap, QueryEntry, QueryOptions};
use crate::car_stream::CarStream;
use crate::error::{Error, Result};
use bytes::Bytes;
use cid::Cid;
use futures::{Stream, TryStreamExt};
use std::io;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

/// A CAR archive fully materialized in memory. Construction drains the
/// source in one pass; afterwards every lookup is a map access. A duplicate
/// CID overwrites the earlier payload while keeping its first-seen position.
pub struct MemoryCar {
    roots: Vec<Cid>,
    blocks: CidMap<Vec<u8>>,
}

impl MemoryCar {
    /// Consume `reader` to the end of the archive.
    pub async fn from_reader(reader: impl AsyncRead + Unpin) -> Result<Self> {
        let mut stream = CarStream::new(reader).await?;
        let roots = stream.roots().to_vec();
        let mut blocks = CidMap::default();
        while let Some(block) = stream.try_next().await? {
            blocks.insert(block.cid, block.data);
        }
        debug!(num_roots = roots.len(), num_blocks = blocks.len(), "loaded CAR into memory");
        Ok(MemoryCar { roots, blocks })
    }

    pub async fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(bytes).await
    }

    /// Materialize from a lazy sequence of chunks of arbitrary sizes.
    pub async fn from_chunk_stream<S>(chunks: S) -> Result<Self>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        Self::from_reader(StreamReader::new(chunks)).await
    }

    pub fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        Ok(self.blocks.get(cid).cloned())
    }

    pub fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blocks.contains_key(cid))
    }

    pub fn roots(&self) -> Vec<Cid> {
        self.roots.clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn query(&self, options: QueryOptions) -> impl Iterator<Item = Result<QueryEntry>> + '_ {
        self.blocks.iter().map(move |(key, value)| {
            Ok(if options.keys_only {
                QueryEntry::Key(*key)
            } else {
                QueryEntry::Pair {
                    key: *key,
                    value: value.clone(),
                }
            })
        })
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
