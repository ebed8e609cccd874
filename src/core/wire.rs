//! Big-endian primitives for the message envelope.
//!
//! Every multi-byte integer is a fixed-width big-endian `i32`; enumerations are a
//! single byte, except punishment kinds which travel as 4-character ASCII tags.
//! Strings are an `i32` byte length followed by that many raw bytes.
//!
//! [`WireReader`] distinguishes *truncation* (more bytes may still arrive) from
//! other malformations so the streaming codec can wait instead of failing.

use crate::error::{constants, ProtocolError, Result};
use bytes::{BufMut, BytesMut};

/// Width of a type code / punishment tag
pub const TAG_LEN: usize = 4;

/// Width of an encoded `i32`
pub const INT_LEN: usize = 4;

/// Write a big-endian `i32`
#[inline]
pub fn put_i32(dst: &mut BytesMut, value: i32) {
    dst.put_i32(value);
}

/// Write a single enumeration byte
#[inline]
pub fn put_u8(dst: &mut BytesMut, value: u8) {
    dst.put_u8(value);
}

/// Write a 4-byte ASCII tag
#[inline]
pub fn put_tag(dst: &mut BytesMut, tag: &[u8; TAG_LEN]) {
    dst.put_slice(tag);
}

/// Write a length-prefixed string.
///
/// Field lengths are bounded at construction (names, 250-character bodies), so the
/// byte length always fits an `i32`.
pub fn put_string(dst: &mut BytesMut, value: &str) {
    dst.reserve(INT_LEN + value.len());
    dst.put_i32(value.len() as i32);
    dst.put_slice(value.as_bytes());
}

/// Cursor over an encoded message
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(INT_LEN)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_tag(&mut self) -> Result<[u8; TAG_LEN]> {
        let bytes = self.take(TAG_LEN)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Read a length, rejecting negative values outright
    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(ProtocolError::MalformedMessage(format!(
                "{}: {len}",
                constants::ERR_NEGATIVE_LENGTH
            )));
        }
        Ok(len as usize)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Read a length-prefixed string
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ProtocolError::MalformedMessage(format!("String field not UTF-8: {e}")))
    }
}
