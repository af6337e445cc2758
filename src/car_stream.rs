// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Streaming CARv1 codec.
//!
//! A CAR archive is a concatenation of _varint frames_: an unsigned varint
//! body length followed by the frame body. The first frame holds the
//! DagCBOR-encoded [`CarHeader`]; every subsequent frame is a [`CarBlock`],
//! the concatenation of a [`Cid`] and the payload bytes it addresses.
//!
//! ```text
//! block frame ►│
//! body offset  │  =body length
//!              │◄────────────►│
//!  ┌───────────┼───┬──────────┤
//!  │body length│cid│block data│
//!  └───────────┴───┼──────────┤
//!                  │◄────────►│
//!                  │  =block data length
//! ```
//!
//! The body length covers CID and payload combined — the payload length is
//! never stored on the wire and must be recovered by decoding the CID and
//! subtracting its encoded size.

use crate::error::{Error, Result};
use crate::varint;
use bytes::{Buf, Bytes, BytesMut};
use cid::Cid;
use futures::{Stream, StreamExt};
use integer_encoding::VarInt;
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;

/// Upper bound on a single frame body. A hostile length prefix must not be
/// able to trigger an unbounded allocation.
pub const MAX_FRAME_LEN: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CarHeader {
    pub roots: Vec<Cid>,
    pub version: u64,
}

impl From<Vec<Cid>> for CarHeader {
    fn from(roots: Vec<Cid>) -> Self {
        Self { roots, version: 1 }
    }
}

/// Decode a header frame body. The `roots` sequence may be empty.
pub fn decode_header(bytes: &[u8]) -> Result<CarHeader> {
    let header: CarHeader = serde_ipld_dagcbor::from_slice(bytes)
        .map_err(|e| Error::MalformedHeader(e.to_string()))?;
    if header.version != 1 {
        return Err(Error::UnsupportedVersion(header.version));
    }
    Ok(header)
}

/// Encode a header frame body (without the length prefix).
pub fn encode_header(header: &CarHeader) -> Result<Vec<u8>> {
    serde_ipld_dagcbor::to_vec(header).map_err(|e| Error::MalformedHeader(e.to_string()))
}

/// A single key-value record: a [`Cid`] and the opaque payload it names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CarBlock {
    pub cid: Cid,
    pub data: Vec<u8>,
}

impl CarBlock {
    /// Write a varint frame containing the CID and the payload.
    pub fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        let body_length = self.cid.encoded_len() + self.data.len();
        writer.write_all(&body_length.encode_var_vec())?;
        self.cid
            .write_bytes(&mut *writer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writer.write_all(&self.data)?;
        Ok(())
    }

    /// Decode a frame body. The CID is self-delimiting; whatever follows it
    /// is the payload.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<CarBlock> {
        let bytes: Bytes = bytes.into();
        let mut cursor = bytes.reader();
        let cid =
            Cid::read_bytes(&mut cursor).map_err(|e| Error::MalformedBlock(e.to_string()))?;
        let bytes = cursor.into_inner();
        Ok(CarBlock {
            cid,
            data: bytes.to_vec(),
        })
    }
}

/// Splits a byte stream into varint frame bodies, tolerating frames cut at
/// arbitrary chunk boundaries. EOF inside a frame is
/// [`Error::TruncatedArchive`]; EOF between frames is a clean end of stream.
#[derive(Debug, Default)]
pub struct BlockFrameCodec;

impl Decoder for BlockFrameCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let Some((body_length, prefix_length)) = varint::decode_u64(src)? else {
            return Ok(None);
        };
        if body_length > MAX_FRAME_LEN {
            return Err(Error::MalformedBlock(format!(
                "frame body of {body_length} bytes exceeds the {MAX_FRAME_LEN} byte limit"
            )));
        }
        let frame_length = prefix_length + body_length as usize;
        if src.len() < frame_length {
            src.reserve(frame_length - src.len());
            return Ok(None);
        }
        src.advance(prefix_length);
        Ok(Some(src.split_to(body_length as usize).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(Error::TruncatedArchive),
        }
    }
}

pin_project! {
    /// Lazy, pull-based stream of [`CarBlock`]s. The header is parsed on
    /// construction; blocks are decoded one frame at a time as the consumer
    /// polls, so archives never need to be memory-resident. Dropping the
    /// stream before the end is safe and releases the reader.
    pub struct CarStream<ReaderT> {
        #[pin]
        frames: FramedRead<ReaderT, BlockFrameCodec>,
        header: CarHeader,
    }
}

impl<ReaderT: AsyncRead + Unpin> CarStream<ReaderT> {
    pub async fn new(reader: ReaderT) -> Result<Self> {
        let mut frames = FramedRead::new(reader, BlockFrameCodec);
        let header = match frames.next().await {
            Some(frame) => decode_header(&frame?)?,
            None => return Err(Error::TruncatedArchive),
        };
        Ok(CarStream { frames, header })
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    pub fn roots(&self) -> &[Cid] {
        &self.header.roots
    }

    /// Consumes the stream and returns the underlying reader. Any buffered
    /// but undecoded bytes are discarded.
    pub fn into_inner(self) -> ReaderT {
        self.frames.into_inner()
    }
}

impl<S> CarStream<StreamReader<S, Bytes>>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    /// Decode from a lazy sequence of chunks of arbitrary, independent sizes.
    /// The sequence is consumed exactly once.
    pub async fn from_chunks(chunks: S) -> Result<Self> {
        CarStream::new(StreamReader::new(chunks)).await
    }
}

impl<ReaderT: AsyncRead> Stream for CarStream<ReaderT> {
    type Item = Result<CarBlock>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = futures::ready!(this.frames.poll_next(cx));
        Poll::Ready(item.map(|frame| frame.and_then(CarBlock::from_bytes)))
    }
}
