//! Wire format constants and primitive readers/writers.
//!
//! A framed message on the stream looks like:
//! ```text
//! ┌──────────────┬────────────┬──────────────────────────────┐
//! │ Msg length   │ Frame kind │ Kind-specific body           │
//! │ 4 bytes u32LE│ 1 byte     │ (name + value / value / msg) │
//! └──────────────┴────────────┴──────────────────────────────┘
//! ```
//!
//! All multi-byte integers and floats are Little Endian.

use crate::error::{RpcError, Result};

/// Size of the stream-level message length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of every in-frame length or count field.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Default maximum size of one framed message (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum `Struct` nesting accepted by the decoder.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Frame kind byte values.
pub mod frame_kind {
    /// Request from client to server.
    pub const REQUEST: u8 = 1;
    /// Successful reply carrying a value.
    pub const REPLY_OK: u8 = 2;
    /// Error reply carrying a message.
    pub const REPLY_ERROR: u8 = 3;
}

/// Tagged value kind byte values.
pub mod value_tag {
    pub const NONE: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT32: u8 = 2;
    pub const FLOAT32: u8 = 3;
    pub const STRING: u8 = 4;
    pub const STRUCT: u8 = 5;
}

/// Bounds-checked cursor over an input slice.
///
/// Every read checks the remaining length first, so decoding never
/// indexes past the end of the slice.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(RpcError::malformed(format!(
                "{} needs {} bytes, only {} remain",
                what,
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    pub(crate) fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn i32(&mut self, what: &str) -> Result<i32> {
        let b = self.take(4, what)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn f32(&mut self, what: &str) -> Result<f32> {
        let b = self.take(4, what)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Length-prefixed UTF-8 string, copied out of the input.
    pub(crate) fn string(&mut self, what: &str) -> Result<String> {
        let len = self.u32(what)? as usize;
        let bytes = self.take(len, what)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| RpcError::malformed(format!("{} is not valid UTF-8: {}", what, e)))
    }

    pub(crate) fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(RpcError::malformed(format!(
                "{} trailing bytes after frame",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Cursor over an output slice that has already been sized.
///
/// Callers check the total encoded length up front, so writes here
/// cannot run out of room.
pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    pub(crate) fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    pub(crate) fn string(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.put(s.as_bytes());
    }
}

/// Encoded size of a length-prefixed string.
#[inline]
pub(crate) fn string_len(s: &str) -> usize {
    LENGTH_FIELD_SIZE + s.len()
}

/// Encode a stream-level length prefix.
#[inline]
pub fn encode_length_prefix(len: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    len.to_le_bytes()
}

/// Decode a stream-level length prefix.
///
/// Returns `None` if the buffer is too short.
#[inline]
pub fn decode_length_prefix(buf: &[u8]) -> Option<u32> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    Some(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix_little_endian() {
        let bytes = encode_length_prefix(0x0403_0201);
        assert_eq!(bytes, [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(decode_length_prefix(&bytes), Some(0x0403_0201));
    }

    #[test]
    fn test_length_prefix_too_short() {
        assert!(decode_length_prefix(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_reader_rejects_overrun() {
        let mut reader = Reader::new(&[1, 2]);
        let err = reader.u32("count").unwrap_err();
        assert!(err.to_string().contains("count needs 4 bytes"));
    }

    #[test]
    fn test_reader_string_declared_length_past_end() {
        // Declares 100 bytes, carries 2.
        let buf = [100, 0, 0, 0, b'h', b'i'];
        let mut reader = Reader::new(&buf);
        assert!(matches!(reader.string("name"), Err(RpcError::Malformed(_))));
    }

    #[test]
    fn test_reader_string_invalid_utf8() {
        let buf = [2, 0, 0, 0, 0xC3, 0x28];
        let mut reader = Reader::new(&buf);
        let err = reader.string("name").unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_reader_finish_detects_trailing_bytes() {
        let mut reader = Reader::new(&[7, 8]);
        reader.u8("kind").unwrap();
        assert!(reader.finish().is_err());
        reader.u8("kind").unwrap();
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_writer_string_layout() {
        let mut buf = [0u8; 7];
        let mut writer = Writer::new(&mut buf);
        writer.string("abc");
        assert_eq!(writer.position(), 7);
        assert_eq!(buf, [3, 0, 0, 0, b'a', b'b', b'c']);
    }
}
