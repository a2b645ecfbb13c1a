//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for splitting the byte stream into
//! length-prefixed messages:
//! - `WaitingForLength`: Need at least 4 bytes
//! - `WaitingForBody`: Length parsed, need N more bytes
//!
//! # Example
//!
//! ```
//! use localrpc::protocol::{encode_message, Frame, FrameBuffer, TaggedValue};
//!
//! let mut buffer = FrameBuffer::new();
//! let wire = encode_message(&Frame::reply_ok(TaggedValue::Int32(4))).unwrap();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&wire[..3]).unwrap().is_empty());
//! let messages = buffer.push(&wire[3..]).unwrap();
//! assert_eq!(messages.len(), 1);
//! ```

use bytes::{Bytes, BytesMut};

use super::frame::Frame;
use super::wire_format::{
    decode_length_prefix, encode_length_prefix, DEFAULT_MAX_MESSAGE_SIZE, LENGTH_PREFIX_SIZE,
};
use crate::error::{RpcError, Result};

/// State machine for message parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the complete length prefix.
    WaitingForLength,
    /// Length parsed, waiting for body bytes.
    WaitingForBody { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
///
/// Each extracted message is the frame bytes without the length prefix.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed message size.
    max_message_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 8KB, max message: 16MB.
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a new frame buffer with custom max message size.
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForLength,
            max_message_size,
        }
    }

    /// Push data into the buffer and extract all complete messages.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns `MessageTooLarge` if a length prefix exceeds the maximum.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        while let Some(message) = self.try_extract_one()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Try to extract a single message from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(message))` if a complete message was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the length prefix is over the limit
    pub fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    let Some(len) = decode_length_prefix(&self.buffer) else {
                        return Ok(None);
                    };
                    let len = len as usize;
                    if len > self.max_message_size {
                        return Err(RpcError::MessageTooLarge {
                            size: len,
                            max: self.max_message_size,
                        });
                    }
                    let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
                    self.state = State::WaitingForBody { remaining: len };
                }
                State::WaitingForBody { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }
                    let message = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForLength;
                    return Ok(Some(message));
                }
            }
        }
    }

    /// Change the message size limit, keeping any buffered bytes.
    ///
    /// The new limit applies to length prefixes not yet parsed.
    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.max_message_size = max_message_size;
    }

    /// Get the message size limit.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Append data to the buffer without extracting messages.
    ///
    /// Pair with [`FrameBuffer::try_extract_one`] to pull messages one
    /// at a time.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True when no partially received message is pending.
    pub fn is_at_boundary(&self) -> bool {
        matches!(self.state, State::WaitingForLength) && self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix frame bytes with their length, ready for the stream.
pub fn frame_message(frame_bytes: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(frame_bytes.len()).map_err(|_| RpcError::MessageTooLarge {
        size: frame_bytes.len(),
        max: u32::MAX as usize,
    })?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + frame_bytes.len());
    out.extend_from_slice(&encode_length_prefix(len));
    out.extend_from_slice(frame_bytes);
    Ok(out)
}

/// Encode a frame with its length prefix in a single buffer.
pub fn encode_message(frame: &Frame) -> Result<Vec<u8>> {
    let body_len = frame.encoded_len();
    let len = u32::try_from(body_len).map_err(|_| RpcError::MessageTooLarge {
        size: body_len,
        max: u32::MAX as usize,
    })?;
    let mut out = vec![0u8; LENGTH_PREFIX_SIZE + body_len];
    out[..LENGTH_PREFIX_SIZE].copy_from_slice(&encode_length_prefix(len));
    frame.encode(&mut out[LENGTH_PREFIX_SIZE..])?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TaggedValue;

    fn message(body: &[u8]) -> Vec<u8> {
        frame_message(body).unwrap()
    }

    #[test]
    fn test_single_complete_message() {
        let mut buffer = FrameBuffer::new();
        let messages = buffer.push(&message(b"hello")).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"hello");
        assert!(buffer.is_empty());
        assert!(buffer.is_at_boundary());
    }

    #[test]
    fn test_multiple_messages_in_one_push() {
        let mut buffer = FrameBuffer::new();
        let mut combined = message(b"first");
        combined.extend(message(b"second"));
        combined.extend(message(b"third"));

        let messages = buffer.push(&combined).unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(&messages[0][..], b"first");
        assert_eq!(&messages[1][..], b"second");
        assert_eq!(&messages[2][..], b"third");
    }

    #[test]
    fn test_fragmented_length_prefix() {
        let mut buffer = FrameBuffer::new();
        let bytes = message(b"test");

        assert!(buffer.push(&bytes[..2]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForLength");

        let messages = buffer.push(&bytes[2..]).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"test");
    }

    #[test]
    fn test_fragmented_body() {
        let mut buffer = FrameBuffer::new();
        let body = b"this is a longer body that will be fragmented";
        let bytes = message(body);

        let partial = LENGTH_PREFIX_SIZE + 10;
        assert!(buffer.push(&bytes[..partial]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForBody");
        assert!(!buffer.is_at_boundary());

        let messages = buffer.push(&bytes[partial..]).unwrap();
        assert_eq!(&messages[0][..], body);
    }

    #[test]
    fn test_empty_message() {
        let mut buffer = FrameBuffer::new();
        let messages = buffer.push(&message(b"")).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_empty());
    }

    #[test]
    fn test_max_message_size() {
        let mut buffer = FrameBuffer::with_max_message_size(100);
        let result = buffer.push(&encode_length_prefix(1000));
        assert!(matches!(
            result,
            Err(RpcError::MessageTooLarge {
                size: 1000,
                max: 100
            })
        ));
    }

    #[test]
    fn test_set_max_message_size_keeps_buffered_bytes() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = message(b"kept");
        bytes.extend(message(&[0u8; 64]));

        buffer.extend(&bytes[..LENGTH_PREFIX_SIZE + 2]);
        buffer.set_max_message_size(16);
        assert_eq!(buffer.max_message_size(), 16);

        buffer.extend(&bytes[LENGTH_PREFIX_SIZE + 2..]);
        assert_eq!(&buffer.try_extract_one().unwrap().unwrap()[..], b"kept");
        assert!(matches!(
            buffer.try_extract_one(),
            Err(RpcError::MessageTooLarge { size: 64, max: 16 })
        ));
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = message(b"hi");

        let mut all = Vec::new();
        for byte in &bytes {
            all.extend(buffer.push(&[*byte]).unwrap());
        }
        assert_eq!(all.len(), 1);
        assert_eq!(&all[0][..], b"hi");
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = message(b"test");
        buffer.push(&bytes[..LENGTH_PREFIX_SIZE + 1]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForBody");

        buffer.clear();
        assert_eq!(buffer.state_name(), "WaitingForLength");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_encode_message_prefix_matches_body() {
        let frame = Frame::request("INCREMENT", TaggedValue::Int32(3));
        let wire = encode_message(&frame).unwrap();
        assert_eq!(
            decode_length_prefix(&wire),
            Some(frame.encoded_len() as u32)
        );
        assert_eq!(&wire[LENGTH_PREFIX_SIZE..], &frame.to_vec()[..]);

        let mut buffer = FrameBuffer::new();
        let messages = buffer.push(&wire).unwrap();
        assert_eq!(Frame::decode(&messages[0]).unwrap(), frame);
    }
}
