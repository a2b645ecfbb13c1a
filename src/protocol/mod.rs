//! Protocol module - wire codec, values, and stream framing.
//!
//! This module implements the binary protocol:
//! - Tagged value encoding/decoding
//! - Request / reply frames
//! - Length-prefixed framing over a byte stream

mod frame;
mod frame_buffer;
mod value;
mod wire_format;

pub use frame::{
    build_reply_error, build_reply_ok, build_request, parse_reply, parse_request,
    peek_frame_kind, Frame, FrameKind, Reply,
};
pub use frame_buffer::{encode_message, frame_message, FrameBuffer};
pub use value::{TaggedValue, ValueKind};
pub use wire_format::{
    decode_length_prefix, encode_length_prefix, frame_kind, value_tag, DEFAULT_MAX_MESSAGE_SIZE,
    LENGTH_FIELD_SIZE, LENGTH_PREFIX_SIZE, MAX_NESTING_DEPTH,
};
