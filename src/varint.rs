// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Unsigned varint length prefixes, decodable across arbitrary chunk
//! boundaries. Encoding goes through [`integer_encoding::VarInt`]; the
//! decoders here exist because a streaming parser must be able to say "need
//! more input" instead of failing when a prefix is split between chunks.

use crate::error::{Error, Result};
use integer_encoding::VarInt;
use std::io::Read;

/// A `u64` varint is at most 10 bytes. Anything longer is either corrupt or
/// hostile.
pub const MAX_VARINT_LEN: usize = 10;

const CONTINUATION_BIT: u8 = 0x80;

/// Decode an unsigned varint from the front of `buf`.
///
/// Returns `Ok(Some((value, encoded_len)))` on success and `Ok(None)` when
/// `buf` ends mid-varint, so the caller can buffer more bytes and retry from
/// the same offset.
pub fn decode_u64(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    for (i, byte) in buf.iter().enumerate().take(MAX_VARINT_LEN) {
        if byte & CONTINUATION_BIT == 0 {
            let (value, len) = u64::decode_var(&buf[..=i])
                .ok_or(Error::MalformedVarint("value overflows u64"))?;
            return Ok(Some((value, len)));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        return Err(Error::MalformedVarint("length prefix exceeds 10 bytes"));
    }
    Ok(None)
}

/// Read the body length of the next varint frame from `reader`.
///
/// `Ok(None)` on a clean EOF at a frame boundary. EOF in the middle of a
/// varint is [`Error::TruncatedArchive`].
pub fn read_frame_len(mut reader: impl Read) -> Result<Option<u64>> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    for i in 0..=MAX_VARINT_LEN {
        let taken = &buf[..i];
        if let Some((value, len)) = decode_u64(taken)? {
            debug_assert_eq!(len, i);
            return Ok(Some(value));
        }
        let mut byte = [0u8; 1];
        match reader.read(&mut byte)? {
            0 if i == 0 => return Ok(None),
            0 => return Err(Error::TruncatedArchive),
            _ => buf[i] = byte[0],
        }
    }
    // 10 continuation bytes were read, decode_u64 rejects on the next pass
    unreachable!("decode_u64 fails before an 11th byte is requested")
}
