// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! CID→byte-range indexing.
//!
//! The indexer walks the same varint-frame grammar as
//! [`CarStream`](crate::CarStream) but never materializes payload bytes: once
//! the CID at the head of a frame body has been decoded, the remaining
//! payload is skipped (streaming input) or seeked over (file input). This is
//! how a random-access index is built for archives too large to hold in
//! memory.

use crate::car_stream::{CarHeader, MAX_FRAME_LEN, decode_header};
use crate::error::{Error, Result};
use crate::varint;
use bytes::{Buf, Bytes, BytesMut};
use cid::Cid;
use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;
use std::io::{self, Read, Seek, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;

/// Location of one record within an archive: `offset` is the byte offset of
/// the frame body (i.e. of the CID) from the start of the archive, `length`
/// the body length, CID and payload combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub cid: Cid,
    pub offset: u64,
    pub length: u64,
}

impl IndexEntry {
    /// Byte offset of the payload (the bytes after the CID).
    pub fn payload_offset(&self) -> u64 {
        self.offset + self.cid.encoded_len() as u64
    }

    /// Payload length in bytes.
    pub fn payload_length(&self) -> u64 {
        self.length - self.cid.encoded_len() as u64
    }
}

/// No real-world CID comes close to this; a frame whose head cannot be
/// decoded as a CID within this many bytes is malformed.
const MAX_CID_LEN: u64 = 1024;

#[derive(Debug)]
enum IndexItem {
    Header(CarHeader),
    Entry(IndexEntry),
}

#[derive(Debug)]
enum IndexState {
    /// Waiting for the complete header frame.
    Header,
    /// Waiting for the length prefix of the next block frame.
    FrameLength,
    /// Length known; waiting for enough bytes to decode the CID.
    Cid { body_offset: u64, body_length: u64 },
    /// CID decoded and the entry emitted; discarding payload bytes.
    Skip { remaining: u64 },
}

/// Same state machine as [`BlockFrameCodec`](crate::car_stream::BlockFrameCodec)
/// except that payload bytes are advanced past, never copied. Yields the
/// header once, then one [`IndexEntry`] per record.
#[derive(Debug)]
struct IndexCodec {
    state: IndexState,
    /// Absolute offset of the first unconsumed byte.
    offset: u64,
}

impl IndexCodec {
    fn new() -> Self {
        IndexCodec {
            state: IndexState::Header,
            offset: 0,
        }
    }
}

impl Decoder for IndexCodec {
    type Item = IndexItem;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<IndexItem>> {
        loop {
            match self.state {
                IndexState::Header => {
                    let Some((body_length, prefix_length)) = varint::decode_u64(src)? else {
                        return Ok(None);
                    };
                    if body_length > MAX_FRAME_LEN {
                        return Err(Error::MalformedHeader(format!(
                            "header frame of {body_length} bytes exceeds the {MAX_FRAME_LEN} byte limit"
                        )));
                    }
                    let frame_length = prefix_length + body_length as usize;
                    if src.len() < frame_length {
                        src.reserve(frame_length - src.len());
                        return Ok(None);
                    }
                    src.advance(prefix_length);
                    let header = decode_header(&src.split_to(body_length as usize))?;
                    self.offset += frame_length as u64;
                    self.state = IndexState::FrameLength;
                    return Ok(Some(IndexItem::Header(header)));
                }
                IndexState::FrameLength => {
                    let Some((body_length, prefix_length)) = varint::decode_u64(src)? else {
                        return Ok(None);
                    };
                    if body_length > MAX_FRAME_LEN {
                        return Err(Error::MalformedBlock(format!(
                            "frame body of {body_length} bytes exceeds the {MAX_FRAME_LEN} byte limit"
                        )));
                    }
                    src.advance(prefix_length);
                    self.offset += prefix_length as u64;
                    self.state = IndexState::Cid {
                        body_offset: self.offset,
                        body_length,
                    };
                }
                IndexState::Cid {
                    body_offset,
                    body_length,
                } => {
                    let mut cursor = io::Cursor::new(&src[..]);
                    let cid = match Cid::read_bytes(&mut cursor) {
                        Ok(cid) => cid,
                        // an incomplete CID is indistinguishable from a
                        // malformed one until enough of the body is buffered
                        Err(_) if (src.len() as u64) < body_length.min(MAX_CID_LEN) => {
                            src.reserve(1);
                            return Ok(None);
                        }
                        Err(e) => return Err(Error::MalformedBlock(e.to_string())),
                    };
                    let cid_length = cursor.position();
                    if cid_length > body_length {
                        return Err(Error::MalformedBlock(format!(
                            "CID of {cid_length} bytes overruns its {body_length} byte frame"
                        )));
                    }
                    src.advance(cid_length as usize);
                    self.offset += cid_length;
                    self.state = IndexState::Skip {
                        remaining: body_length - cid_length,
                    };
                    return Ok(Some(IndexItem::Entry(IndexEntry {
                        cid,
                        offset: body_offset,
                        length: body_length,
                    })));
                }
                IndexState::Skip { remaining } => {
                    let discard = remaining.min(src.len() as u64);
                    src.advance(discard as usize);
                    self.offset += discard;
                    if discard < remaining {
                        self.state = IndexState::Skip {
                            remaining: remaining - discard,
                        };
                        return Ok(None);
                    }
                    self.state = IndexState::FrameLength;
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<IndexItem>> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if matches!(self.state, IndexState::FrameLength) && src.is_empty() => Ok(None),
            None => Err(Error::TruncatedArchive),
        }
    }
}

pin_project! {
    /// Lazy stream of [`IndexEntry`] items for an archive read sequentially.
    /// The header is parsed on construction; payload bytes are discarded as
    /// they arrive.
    pub struct CarIndexer<ReaderT> {
        #[pin]
        frames: FramedRead<ReaderT, IndexCodec>,
        header: CarHeader,
    }
}

impl<ReaderT: AsyncRead + Unpin> CarIndexer<ReaderT> {
    pub async fn new(reader: ReaderT) -> Result<Self> {
        let mut frames = FramedRead::new(reader, IndexCodec::new());
        let header = match frames.next().await {
            Some(Ok(IndexItem::Header(header))) => header,
            Some(Ok(IndexItem::Entry(_))) => {
                unreachable!("codec yields the header before any entry")
            }
            Some(Err(e)) => return Err(e),
            None => return Err(Error::TruncatedArchive),
        };
        Ok(CarIndexer { frames, header })
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    pub fn roots(&self) -> &[Cid] {
        &self.header.roots
    }
}

impl<S> CarIndexer<StreamReader<S, Bytes>>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    /// Index from a lazy sequence of chunks of arbitrary, independent sizes.
    pub async fn from_chunks(chunks: S) -> Result<Self> {
        CarIndexer::new(StreamReader::new(chunks)).await
    }
}

impl<ReaderT: AsyncRead> Stream for CarIndexer<ReaderT> {
    type Item = Result<IndexEntry>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = futures::ready!(this.frames.poll_next(cx));
        Poll::Ready(item.map(|item| {
            item.map(|item| match item {
                IndexItem::Entry(entry) => entry,
                IndexItem::Header(_) => unreachable!("the header was consumed in new()"),
            })
        }))
    }
}

/// Read the header frame from the front of a seekable source.
pub(crate) fn read_header(mut reader: impl Read) -> Result<CarHeader> {
    let body_length = varint::read_frame_len(&mut reader)?.ok_or(Error::TruncatedArchive)?;
    if body_length > MAX_FRAME_LEN {
        return Err(Error::MalformedHeader(format!(
            "header frame of {body_length} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    let mut buffer = vec![0; body_length as usize];
    reader
        .read_exact(&mut buffer)
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::TruncatedArchive,
            _ => Error::Io(e),
        })?;
    decode_header(&buffer)
}

/// Read the CID of the next block frame and seek over its payload, leaving
/// the reader at the next frame. `Ok(None)` on clean EOF.
pub(crate) fn read_index_entry_and_skip(
    mut reader: impl Read + Seek,
) -> Result<Option<IndexEntry>> {
    let Some(body_length) = varint::read_frame_len(&mut reader)? else {
        return Ok(None);
    };
    if body_length > MAX_FRAME_LEN {
        return Err(Error::MalformedBlock(format!(
            "frame body of {body_length} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    let body_offset = reader.stream_position()?;
    // counting the CID bytes as they are read saves a syscall per record
    let mut counted = CountRead::new(&mut reader);
    let cid = Cid::read_bytes(&mut counted).map_err(|e| match e {
        cid::Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => Error::TruncatedArchive,
        other => Error::MalformedBlock(other.to_string()),
    })?;
    let cid_length = counted.bytes_read() as u64;
    if cid_length > body_length {
        return Err(Error::MalformedBlock(format!(
            "CID of {cid_length} bytes overruns its {body_length} byte frame"
        )));
    }
    reader.seek(SeekFrom::Start(body_offset + body_length))?;
    Ok(Some(IndexEntry {
        cid,
        offset: body_offset,
        length: body_length,
    }))
}

/// A reader that keeps track of how many bytes it has read. Needed to
/// recover the encoded CID length, which the wire format never stores.
struct CountRead<ReadT> {
    inner: ReadT,
    count: usize,
}

impl<ReadT> CountRead<ReadT> {
    fn new(inner: ReadT) -> Self {
        Self { inner, count: 0 }
    }

    fn bytes_read(&self) -> usize {
        self.count
    }
}

impl<ReadT: Read> Read for CountRead<ReadT> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n;
        Ok(n)
    }
}
