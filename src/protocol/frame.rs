//! Request and reply frames.
//!
//! ```text
//! Request:    [1][u32 name len][name bytes][tagged value]
//! ReplyOk:    [2][tagged value]
//! ReplyError: [3][u32 msg len][msg bytes]
//! ```
//!
//! # Example
//!
//! ```
//! use localrpc::protocol::{Frame, TaggedValue};
//!
//! let frame = Frame::request("INCREMENT", TaggedValue::Int32(3));
//! let mut buf = [0u8; 64];
//! let n = frame.encode(&mut buf).unwrap();
//! assert_eq!(Frame::decode(&buf[..n]).unwrap(), frame);
//! ```

use super::value::TaggedValue;
use super::wire_format::{frame_kind, string_len, Reader, Writer};
use crate::error::{RpcError, Result};

/// Kind of a frame, read from its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    ReplyOk,
    ReplyError,
}

impl FrameKind {
    /// Wire byte for this kind.
    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            FrameKind::Request => frame_kind::REQUEST,
            FrameKind::ReplyOk => frame_kind::REPLY_OK,
            FrameKind::ReplyError => frame_kind::REPLY_ERROR,
        }
    }

    /// Parse a wire byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            frame_kind::REQUEST => Ok(FrameKind::Request),
            frame_kind::REPLY_OK => Ok(FrameKind::ReplyOk),
            frame_kind::REPLY_ERROR => Ok(FrameKind::ReplyError),
            other => Err(RpcError::malformed(format!("unknown frame kind {}", other))),
        }
    }

    /// Check if this is one of the reply kinds.
    #[inline]
    pub fn is_reply(self) -> bool {
        !matches!(self, FrameKind::Request)
    }
}

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request { name: String, value: TaggedValue },
    ReplyOk { value: TaggedValue },
    ReplyError { message: String },
}

impl Frame {
    /// Create a request frame.
    pub fn request(name: impl Into<String>, value: TaggedValue) -> Self {
        Frame::Request {
            name: name.into(),
            value,
        }
    }

    /// Create a successful reply frame.
    pub fn reply_ok(value: TaggedValue) -> Self {
        Frame::ReplyOk { value }
    }

    /// Create an error reply frame.
    pub fn reply_error(message: impl Into<String>) -> Self {
        Frame::ReplyError {
            message: message.into(),
        }
    }

    /// Get the frame kind.
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Request { .. } => FrameKind::Request,
            Frame::ReplyOk { .. } => FrameKind::ReplyOk,
            Frame::ReplyError { .. } => FrameKind::ReplyError,
        }
    }

    /// Number of bytes this frame occupies on the wire (without the
    /// stream length prefix).
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Frame::Request { name, value } => string_len(name) + value.encoded_len(),
            Frame::ReplyOk { value } => value.encoded_len(),
            Frame::ReplyError { message } => string_len(message),
        }
    }

    /// Encode this frame into `buf`.
    ///
    /// Returns the number of bytes written, or `BufferTooSmall` without
    /// touching `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let required = self.encoded_len();
        if buf.len() < required {
            return Err(RpcError::BufferTooSmall {
                required,
                capacity: buf.len(),
            });
        }

        let mut w = Writer::new(buf);
        self.write_to(&mut w);
        Ok(w.position())
    }

    /// Encode into a freshly allocated vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        let mut w = Writer::new(&mut buf);
        self.write_to(&mut w);
        buf
    }

    /// Write into a writer sized from `encoded_len`.
    fn write_to(&self, w: &mut Writer<'_>) {
        w.u8(self.kind().as_byte());
        match self {
            Frame::Request { name, value } => {
                w.string(name);
                value.write_to(w);
            }
            Frame::ReplyOk { value } => value.write_to(w),
            Frame::ReplyError { message } => w.string(message),
        }
    }

    /// Decode one frame occupying all of `buf`.
    ///
    /// Never reads past `buf.len()`; declared lengths that overrun,
    /// unknown kind tags, and invalid UTF-8 yield `Malformed`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let kind = FrameKind::from_byte(r.u8("frame kind")?)?;
        let frame = match kind {
            FrameKind::Request => {
                let name = r.string("request name")?;
                let value = TaggedValue::read_from(&mut r, 0)?;
                Frame::Request { name, value }
            }
            FrameKind::ReplyOk => Frame::ReplyOk {
                value: TaggedValue::read_from(&mut r, 0)?,
            },
            FrameKind::ReplyError => Frame::ReplyError {
                message: r.string("error message")?,
            },
        };
        r.finish()?;
        Ok(frame)
    }
}

/// Classify a frame by its first byte without decoding the rest.
pub fn peek_frame_kind(buf: &[u8]) -> Result<FrameKind> {
    match buf.first() {
        Some(&byte) => FrameKind::from_byte(byte),
        None => Err(RpcError::malformed("empty frame")),
    }
}

/// Encode a request into `buf`.
pub fn build_request(buf: &mut [u8], name: &str, value: &TaggedValue) -> Result<usize> {
    let required = 1 + string_len(name) + value.encoded_len();
    if buf.len() < required {
        return Err(RpcError::BufferTooSmall {
            required,
            capacity: buf.len(),
        });
    }
    let mut w = Writer::new(buf);
    w.u8(frame_kind::REQUEST);
    w.string(name);
    value.write_to(&mut w);
    Ok(w.position())
}

/// Decode a request frame into its name and value.
pub fn parse_request(buf: &[u8]) -> Result<(String, TaggedValue)> {
    match Frame::decode(buf)? {
        Frame::Request { name, value } => Ok((name, value)),
        other => Err(RpcError::malformed(format!(
            "expected request, got {:?}",
            other.kind()
        ))),
    }
}

/// Encode a successful reply into `buf`.
pub fn build_reply_ok(buf: &mut [u8], value: &TaggedValue) -> Result<usize> {
    let required = 1 + value.encoded_len();
    if buf.len() < required {
        return Err(RpcError::BufferTooSmall {
            required,
            capacity: buf.len(),
        });
    }
    let mut w = Writer::new(buf);
    w.u8(frame_kind::REPLY_OK);
    value.write_to(&mut w);
    Ok(w.position())
}

/// Encode an error reply into `buf`.
pub fn build_reply_error(buf: &mut [u8], message: &str) -> Result<usize> {
    Frame::reply_error(message).encode(buf)
}

/// Outcome carried by a reply frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The handler returned a value.
    Ok(TaggedValue),
    /// The handler (or the dispatcher) declined the request.
    Error(String),
}

impl Reply {
    /// Convert into a plain `Result`.
    pub fn into_result(self) -> std::result::Result<TaggedValue, String> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Error(message) => Err(message),
        }
    }

    /// Check if this is an error reply.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl From<std::result::Result<TaggedValue, String>> for Reply {
    fn from(result: std::result::Result<TaggedValue, String>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value),
            Err(message) => Reply::Error(message),
        }
    }
}

impl From<Reply> for Frame {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Ok(value) => Frame::ReplyOk { value },
            Reply::Error(message) => Frame::ReplyError { message },
        }
    }
}

/// Decode a reply frame.
pub fn parse_reply(buf: &[u8]) -> Result<Reply> {
    match Frame::decode(buf)? {
        Frame::ReplyOk { value } => Ok(Reply::Ok(value)),
        Frame::ReplyError { message } => Ok(Reply::Error(message)),
        Frame::Request { .. } => Err(RpcError::malformed("expected reply, got request")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_byte_layout() {
        let frame = Frame::request("ab", TaggedValue::Int32(1));
        assert_eq!(
            frame.to_vec(),
            vec![1, 2, 0, 0, 0, b'a', b'b', 2, 1, 0, 0, 0]
        );
    }

    #[test]
    fn test_reply_error_byte_layout() {
        let frame = Frame::reply_error("no");
        assert_eq!(frame.to_vec(), vec![3, 2, 0, 0, 0, b'n', b'o']);
    }

    #[test]
    fn test_frame_roundtrip_all_kinds() {
        let frames = [
            Frame::request("INCREMENT", TaggedValue::Int32(3)),
            Frame::request("", TaggedValue::None),
            Frame::reply_ok(TaggedValue::from_pairs([("ok", TaggedValue::Bool(true))])),
            Frame::reply_error("request handler not found"),
        ];
        for frame in frames {
            let decoded = Frame::decode(&frame.to_vec()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_encode_buffer_too_small_leaves_buffer_untouched() {
        let frame = Frame::request("INCREMENT", TaggedValue::Int32(3));
        let mut buf = [0xAAu8; 8];
        let err = frame.encode(&mut buf).unwrap_err();
        match err {
            RpcError::BufferTooSmall { required, capacity } => {
                assert_eq!(required, frame.encoded_len());
                assert_eq!(capacity, 8);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(buf, [0xAA; 8]);
    }

    #[test]
    fn test_encode_exact_capacity() {
        let frame = Frame::reply_ok(TaggedValue::from("exact"));
        let mut buf = vec![0u8; frame.encoded_len()];
        assert_eq!(frame.encode(&mut buf).unwrap(), buf.len());
    }

    #[test]
    fn test_to_vec_matches_encode() {
        let frames = [
            Frame::request("INCREMENT", TaggedValue::Struct(vec![TaggedValue::Int32(3)])),
            Frame::reply_ok(TaggedValue::Float32(0.5)),
            Frame::reply_error("request handler not found"),
        ];
        for frame in frames {
            let mut buf = vec![0xEEu8; frame.encoded_len()];
            frame.encode(&mut buf).unwrap();
            assert_eq!(frame.to_vec(), buf);
        }
    }

    #[test]
    fn test_build_and_parse_request() {
        let mut buf = [0u8; 128];
        let value = TaggedValue::Struct(vec![TaggedValue::from("k"), TaggedValue::Float32(0.5)]);
        let n = build_request(&mut buf, "set-volume", &value).unwrap();
        let (name, parsed) = parse_request(&buf[..n]).unwrap();
        assert_eq!(name, "set-volume");
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_build_request_too_small() {
        let mut buf = [0u8; 4];
        assert!(matches!(
            build_request(&mut buf, "name", &TaggedValue::None),
            Err(RpcError::BufferTooSmall { .. })
        ));
        assert_eq!(buf, [0; 4]);
    }

    #[test]
    fn test_build_and_parse_replies() {
        let mut buf = [0u8; 64];
        let n = build_reply_ok(&mut buf, &TaggedValue::Int32(4)).unwrap();
        assert_eq!(peek_frame_kind(&buf[..n]).unwrap(), FrameKind::ReplyOk);
        assert_eq!(parse_reply(&buf[..n]).unwrap(), Reply::Ok(TaggedValue::Int32(4)));

        let n = build_reply_error(&mut buf, "error message").unwrap();
        assert_eq!(peek_frame_kind(&buf[..n]).unwrap(), FrameKind::ReplyError);
        assert_eq!(
            parse_reply(&buf[..n]).unwrap(),
            Reply::Error("error message".to_string())
        );
    }

    #[test]
    fn test_parse_request_rejects_reply() {
        let bytes = Frame::reply_ok(TaggedValue::None).to_vec();
        assert!(parse_request(&bytes).is_err());
        let bytes = Frame::request("x", TaggedValue::None).to_vec();
        assert!(parse_reply(&bytes).is_err());
    }

    #[test]
    fn test_decode_unknown_frame_kind() {
        let err = Frame::decode(&[9, 0]).unwrap_err();
        assert!(err.to_string().contains("unknown frame kind 9"));
    }

    #[test]
    fn test_decode_empty() {
        assert!(Frame::decode(&[]).is_err());
        assert!(peek_frame_kind(&[]).is_err());
    }

    #[test]
    fn test_decode_name_length_overrun() {
        // Name length says 50 bytes, buffer carries 3.
        let buf = [1, 50, 0, 0, 0, b'a', b'b', b'c'];
        assert!(matches!(Frame::decode(&buf), Err(RpcError::Malformed(_))));
    }

    #[test]
    fn test_decode_every_truncation_fails_cleanly() {
        let bytes = Frame::request(
            "nested",
            TaggedValue::Struct(vec![TaggedValue::from("a"), TaggedValue::Int32(-7)]),
        )
        .to_vec();
        for len in 0..bytes.len() {
            assert!(Frame::decode(&bytes[..len]).is_err(), "len {len} decoded");
        }
        assert!(Frame::decode(&bytes).is_ok());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = Frame::reply_ok(TaggedValue::None).to_vec();
        bytes.push(0);
        assert!(Frame::decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_invalid_utf8_message() {
        let buf = [3, 1, 0, 0, 0, 0xFF];
        assert!(matches!(Frame::decode(&buf), Err(RpcError::Malformed(_))));
    }

    #[test]
    fn test_reply_conversions() {
        let ok: Reply = Ok::<_, String>(TaggedValue::Int32(1)).into();
        assert!(!ok.is_error());
        assert_eq!(Frame::from(ok.clone()), Frame::reply_ok(TaggedValue::Int32(1)));
        assert_eq!(ok.into_result(), Ok(TaggedValue::Int32(1)));

        let err: Reply = Err::<TaggedValue, _>("nope".to_string()).into();
        assert!(err.is_error());
        assert_eq!(err.into_result(), Err("nope".to_string()));
    }
}
