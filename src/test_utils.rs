// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::car_stream::CarBlock;
use crate::writer::CarWriter;
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use quickcheck::{Arbitrary, Gen};

pub const DAG_CBOR: u64 = 0x71;
pub const IPLD_RAW: u64 = 0x55;

impl Arbitrary for CarBlock {
    fn arbitrary(g: &mut Gen) -> CarBlock {
        let data = Vec::<u8>::arbitrary(g);
        let encoding = *g.choose(&[DAG_CBOR, IPLD_RAW]).unwrap();
        let code = *g.choose(&[Code::Blake2b256, Code::Sha2_256]).unwrap();
        let cid = Cid::new_v1(encoding, code.digest(&data));
        CarBlock { cid, data }
    }
}

pub fn test_cid(data: &[u8]) -> Cid {
    Cid::new_v1(IPLD_RAW, Code::Blake2b256.digest(data))
}

/// Build an in-memory archive; no test fixture files are checked in.
pub async fn encode_car(roots: Vec<Cid>, blocks: &[CarBlock]) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut writer = CarWriter::new(&mut buffer);
    writer.set_roots(roots).await.unwrap();
    for block in blocks {
        writer.put(block.cid, &block.data).await.unwrap();
    }
    writer.close().await.unwrap();
    buffer
}

/// Drive a future from a sync test body (quickcheck properties are sync).
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}
