// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use bytes::Bytes;
use car_datastore::{
    AnyCar, CarStream, CarWriter, Error, IndexedCar, MemoryCar, QueryOptions, RandomAccessFile,
};
use cid::Cid;
use futures::TryStreamExt;
use multihash_codetable::{Code, MultihashDigest};
use std::io;

const IPLD_RAW: u64 = 0x55;

fn cid_of(data: &[u8]) -> Cid {
    Cid::new_v1(IPLD_RAW, Code::Blake2b256.digest(data))
}

async fn write_archive(entries: &[(Cid, Vec<u8>)], roots: Vec<Cid>) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut writer = CarWriter::new(&mut buffer);
    writer.set_roots(roots).await?;
    for (cid, data) in entries {
        writer.put(*cid, data).await?;
    }
    writer.close().await?;
    Ok(buffer)
}

/// Write an archive with a single root record, then read it back through
/// every supported mode.
#[tokio::test]
async fn lifecycle_roundtrip() -> anyhow::Result<()> {
    let payload = b"random meaningless bytes".to_vec();
    let root = cid_of(&payload);
    let extra = b"some more bytes".to_vec();
    let extra_cid = cid_of(&extra);
    let car = write_archive(
        &[(root, payload.clone()), (extra_cid, extra.clone())],
        vec![root],
    )
    .await?;

    // streaming decode
    let stream = CarStream::new(car.as_slice()).await?;
    assert_eq!(stream.roots(), [root]);
    let blocks: Vec<_> = stream.try_collect().await?;
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].cid, root);
    assert_eq!(blocks[0].data, payload);

    // materialized store, contiguous bytes
    let memory = MemoryCar::from_bytes(&car).await?;
    assert_eq!(memory.roots(), vec![root]);
    assert_eq!(memory.get(&root)?, Some(payload.clone()));
    assert_eq!(memory.get(&extra_cid)?, Some(extra.clone()));

    // materialized store, chunked one-pass source
    let chunks: Vec<io::Result<Bytes>> = car
        .chunks(7)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let chunked = AnyCar::from_chunk_stream(futures::stream::iter(chunks)).await?;
    assert_eq!(chunked.roots(), vec![root]);
    assert_eq!(chunked.get(&root)?, Some(payload.clone()));

    // file-backed indexed store
    let file = tempfile::NamedTempFile::new()?;
    std::fs::write(file.path(), &car)?;
    let indexed = AnyCar::open_file(file.path())?;
    assert_eq!(indexed.roots(), vec![root]);
    assert_eq!(indexed.get(&root)?, Some(payload.clone()));
    assert!(indexed.has(&extra_cid)?);
    assert_eq!(indexed.get(&cid_of(b"absent"))?, None);

    Ok(())
}

#[tokio::test]
async fn stores_are_read_only() -> anyhow::Result<()> {
    let payload = b"immutable".to_vec();
    let root = cid_of(&payload);
    let car = write_archive(&[(root, payload.clone())], vec![root]).await?;

    let file = tempfile::NamedTempFile::new()?;
    std::fs::write(file.path(), &car)?;

    let stores: Vec<AnyCar<RandomAccessFile>> = vec![
        MemoryCar::from_bytes(&car).await?.into(),
        IndexedCar::new(RandomAccessFile::open(file.path())?)?.into(),
    ];
    for store in &stores {
        assert!(matches!(
            store.put(root, b"overwrite"),
            Err(Error::ReadOnlyStore)
        ));
        assert!(matches!(store.delete(&root), Err(Error::ReadOnlyStore)));
        assert!(matches!(
            store.set_roots(vec![root]),
            Err(Error::ReadOnlyStore)
        ));
        // the rejected writes must not disturb the stored state
        assert_eq!(store.get(&root)?, Some(payload.clone()));
    }
    Ok(())
}

#[tokio::test]
async fn queries_are_stable_across_repeats() -> anyhow::Result<()> {
    let entries: Vec<(Cid, Vec<u8>)> = (0u8..4)
        .map(|i| {
            let data = vec![i; 10];
            (cid_of(&data), data)
        })
        .collect();
    let car = write_archive(&entries, vec![entries[0].0]).await?;
    let store = AnyCar::from_bytes(&car).await?;

    let first: Vec<_> = store
        .query(QueryOptions::default())?
        .collect::<Result<_, _>>()?;
    let second: Vec<_> = store
        .query(QueryOptions::default())?
        .collect::<Result<_, _>>()?;
    assert_eq!(first, second);
    assert_eq!(first.len(), entries.len());
    for (entry, (cid, data)) in first.iter().zip(&entries) {
        assert_eq!(entry.key(), cid);
        assert_eq!(entry.value(), Some(data.as_slice()));
    }

    let keys: Vec<_> = store
        .query(QueryOptions { keys_only: true })?
        .collect::<Result<_, _>>()?;
    assert!(keys.iter().all(|entry| entry.value().is_none()));
    Ok(())
}

#[tokio::test]
async fn truncated_file_fails_cleanly() -> anyhow::Result<()> {
    let payload = b"cut short".to_vec();
    let root = cid_of(&payload);
    let mut car = write_archive(&[(root, payload)], vec![root]).await?;
    car.truncate(car.len() - 3);

    let result = async {
        let stream = CarStream::new(car.as_slice()).await?;
        stream.try_collect::<Vec<_>>().await
    }
    .await;
    assert!(matches!(result, Err(Error::TruncatedArchive)));

    let file = tempfile::NamedTempFile::new()?;
    std::fs::write(file.path(), &car)?;
    let store = AnyCar::open_file(file.path())?;
    assert!(matches!(store.get(&root), Err(Error::TruncatedArchive)));
    Ok(())
}
