// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::car_stream::{CarHeader, encode_header};
use crate::error::{Error, Result};
use cid::Cid;
use integer_encoding::VarIntAsyncWriter;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Writes a CARv1 archive to an async sink.
///
/// The protocol is enforced at runtime: [`set_roots`](CarWriter::set_roots)
/// must be called exactly once before the first [`put`](CarWriter::put), and
/// nothing may be written after [`close`](CarWriter::close). There is no
/// record-level transactionality — a failure mid-write leaves the sink with a
/// valid prefix followed by a partial frame, which a later decode reports as
/// [`Error::TruncatedArchive`].
#[derive(Debug)]
pub struct CarWriter<W> {
    writer: W,
    cid_buffer: Vec<u8>,
    roots_written: bool,
    closed: bool,
}

impl<W> CarWriter<W>
where
    W: AsyncWrite + Send + Unpin,
{
    pub fn new(writer: W) -> Self {
        CarWriter {
            writer,
            cid_buffer: Vec::new(),
            roots_written: false,
            closed: false,
        }
    }

    /// Write the header frame declaring `roots`. Allowed exactly once, before
    /// any block is written.
    pub async fn set_roots(&mut self, roots: Vec<Cid>) -> Result<()> {
        if self.closed {
            return Err(Error::StoreClosed);
        }
        if self.roots_written {
            return Err(Error::RootsAlreadySet);
        }
        let header_bytes = encode_header(&CarHeader::from(roots))?;
        self.writer.write_varint_async(header_bytes.len()).await?;
        self.writer.write_all(&header_bytes).await?;
        self.roots_written = true;
        Ok(())
    }

    /// Write one block frame. The header must already have been written.
    pub async fn put<T: AsRef<[u8]>>(&mut self, cid: Cid, data: T) -> Result<()> {
        if self.closed {
            return Err(Error::StoreClosed);
        }
        if !self.roots_written {
            return Err(Error::RootsNotSet);
        }

        self.cid_buffer.clear();
        cid.write_bytes(&mut self.cid_buffer)?;

        let data = data.as_ref();
        let body_length = self.cid_buffer.len() + data.len();
        self.writer.write_varint_async(body_length).await?;
        self.writer.write_all(&self.cid_buffer).await?;
        self.writer.write_all(data).await?;
        Ok(())
    }

    /// Flush and shut down the sink. A second `close` is a no-op; mutating
    /// calls after `close` fail with [`Error::StoreClosed`].
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        self.closed = true;
        Ok(())
    }

    /// Consumes the writer and returns the underlying sink.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// A write handle cannot read back blocks; always fails with
    /// [`Error::UnsupportedOperation`].
    pub fn get(&self, _cid: &Cid) -> Result<Option<Vec<u8>>> {
        Err(Error::UnsupportedOperation)
    }

    /// See [`CarWriter::get`].
    pub fn has(&self, _cid: &Cid) -> Result<bool> {
        Err(Error::UnsupportedOperation)
    }

    /// Written frames cannot be unwritten; always fails with
    /// [`Error::UnsupportedOperation`].
    pub fn delete(&self, _cid: &Cid) -> Result<()> {
        Err(Error::UnsupportedOperation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{block_on, test_cid};

    #[test]
    fn put_before_set_roots() {
        block_on(async {
            let mut writer = CarWriter::new(Vec::new());
            let cid = test_cid(b"a");
            assert!(matches!(
                writer.put(cid, b"a").await,
                Err(Error::RootsNotSet)
            ));
            // the failed put must not have poisoned the writer
            writer.set_roots(vec![cid]).await.unwrap();
            writer.put(cid, b"a").await.unwrap();
        });
    }

    #[test]
    fn roots_can_only_be_set_once() {
        block_on(async {
            let mut writer = CarWriter::new(Vec::new());
            let cid = test_cid(b"a");
            writer.set_roots(vec![cid]).await.unwrap();
            assert!(matches!(
                writer.set_roots(vec![cid]).await,
                Err(Error::RootsAlreadySet)
            ));
        });
    }

    #[test]
    fn closed_writer_rejects_mutation() {
        block_on(async {
            let mut writer = CarWriter::new(Vec::new());
            let cid = test_cid(b"a");
            writer.set_roots(vec![cid]).await.unwrap();
            writer.close().await.unwrap();
            assert!(matches!(
                writer.put(cid, b"a").await,
                Err(Error::StoreClosed)
            ));
            assert!(matches!(
                writer.set_roots(vec![cid]).await,
                Err(Error::StoreClosed)
            ));
            // close is idempotent
            writer.close().await.unwrap();
        });
    }

    #[test]
    fn read_operations_are_unsupported() {
        let writer = CarWriter::new(Vec::new());
        let cid = test_cid(b"a");
        assert!(matches!(writer.get(&cid), Err(Error::UnsupportedOperation)));
        assert!(matches!(writer.has(&cid), Err(Error::UnsupportedOperation)));
        assert!(matches!(
            writer.delete(&cid),
            Err(Error::UnsupportedOperation)
        ));
    }
}
