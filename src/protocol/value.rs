//! Tagged values carried in requests and successful replies.
//!
//! Encoding is `[1-byte tag][payload]`:
//! - `None`: no payload
//! - `Bool`: 1 byte (0/1)
//! - `Int32` / `Float32`: 4 bytes LE
//! - `String`: u32 LE byte length + UTF-8 bytes
//! - `Struct`: u32 LE element count + that many nested values
//!
//! Decoded values own their data; nothing borrows the input buffer.

use std::fmt;

use super::wire_format::{
    string_len, value_tag, Reader, Writer, LENGTH_FIELD_SIZE, MAX_NESTING_DEPTH,
};
use crate::error::{RpcError, Result};

/// Kind of a [`TaggedValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    None,
    Bool,
    Int32,
    Float32,
    String,
    Struct,
}

/// A self-describing value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TaggedValue {
    /// Absence of a value.
    #[default]
    None,
    Bool(bool),
    Int32(i32),
    Float32(f32),
    String(String),
    /// Ordered sequence of nested values.
    ///
    /// By convention key/value argument lists are stored as alternating
    /// `String` keys and values, see [`TaggedValue::from_pairs`].
    Struct(Vec<TaggedValue>),
}

impl TaggedValue {
    /// Get the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            TaggedValue::None => ValueKind::None,
            TaggedValue::Bool(_) => ValueKind::Bool,
            TaggedValue::Int32(_) => ValueKind::Int32,
            TaggedValue::Float32(_) => ValueKind::Float32,
            TaggedValue::String(_) => ValueKind::String,
            TaggedValue::Struct(_) => ValueKind::Struct,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            TaggedValue::None => value_tag::NONE,
            TaggedValue::Bool(_) => value_tag::BOOL,
            TaggedValue::Int32(_) => value_tag::INT32,
            TaggedValue::Float32(_) => value_tag::FLOAT32,
            TaggedValue::String(_) => value_tag::STRING,
            TaggedValue::Struct(_) => value_tag::STRUCT,
        }
    }

    /// Number of bytes this value occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            TaggedValue::None => 0,
            TaggedValue::Bool(_) => 1,
            TaggedValue::Int32(_) | TaggedValue::Float32(_) => 4,
            TaggedValue::String(s) => string_len(s),
            TaggedValue::Struct(items) => {
                LENGTH_FIELD_SIZE + items.iter().map(TaggedValue::encoded_len).sum::<usize>()
            }
        }
    }

    /// Encode this value into `buf`.
    ///
    /// Returns the number of bytes written. On `BufferTooSmall` the
    /// buffer is left untouched.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let required = self.encoded_len();
        if buf.len() < required {
            return Err(RpcError::BufferTooSmall {
                required,
                capacity: buf.len(),
            });
        }
        let mut writer = Writer::new(buf);
        self.write_to(&mut writer);
        Ok(writer.position())
    }

    /// Encode into a freshly allocated vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        let mut writer = Writer::new(&mut buf);
        self.write_to(&mut writer);
        buf
    }

    /// Decode exactly one value occupying all of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let value = Self::read_from(&mut reader, 0)?;
        reader.finish()?;
        Ok(value)
    }

    pub(crate) fn write_to(&self, w: &mut Writer<'_>) {
        w.u8(self.tag());
        match self {
            TaggedValue::None => {}
            TaggedValue::Bool(b) => w.u8(u8::from(*b)),
            TaggedValue::Int32(i) => w.put(&i.to_le_bytes()),
            TaggedValue::Float32(f) => w.put(&f.to_le_bytes()),
            TaggedValue::String(s) => w.string(s),
            TaggedValue::Struct(items) => {
                w.u32(items.len() as u32);
                for item in items {
                    item.write_to(w);
                }
            }
        }
    }

    pub(crate) fn read_from(r: &mut Reader<'_>, depth: usize) -> Result<Self> {
        let tag = r.u8("value tag")?;
        match tag {
            value_tag::NONE => Ok(TaggedValue::None),
            value_tag::BOOL => match r.u8("bool")? {
                0 => Ok(TaggedValue::Bool(false)),
                1 => Ok(TaggedValue::Bool(true)),
                other => Err(RpcError::malformed(format!("invalid bool byte {}", other))),
            },
            value_tag::INT32 => Ok(TaggedValue::Int32(r.i32("int32")?)),
            value_tag::FLOAT32 => Ok(TaggedValue::Float32(r.f32("float32")?)),
            value_tag::STRING => Ok(TaggedValue::String(r.string("string")?)),
            value_tag::STRUCT => {
                if depth >= MAX_NESTING_DEPTH {
                    return Err(RpcError::malformed(format!(
                        "struct nesting exceeds {}",
                        MAX_NESTING_DEPTH
                    )));
                }
                let count = r.u32("struct count")? as usize;
                // Every element takes at least its tag byte.
                if count > r.remaining() {
                    return Err(RpcError::malformed(format!(
                        "struct declares {} elements, only {} bytes remain",
                        count,
                        r.remaining()
                    )));
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(Self::read_from(r, depth + 1)?);
                }
                Ok(TaggedValue::Struct(items))
            }
            other => Err(RpcError::malformed(format!("unknown value tag {}", other))),
        }
    }

    /// Build a key/value `Struct` of alternating string keys and values.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, TaggedValue)>,
    {
        let mut items = Vec::new();
        for (key, value) in pairs {
            items.push(TaggedValue::String(key.into()));
            items.push(value);
        }
        TaggedValue::Struct(items)
    }

    /// Iterate `(key, value)` pairs of a key/value `Struct`.
    ///
    /// Yields nothing for non-struct values; stops at the first entry
    /// whose key is not a string.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &TaggedValue)> {
        let items: &[TaggedValue] = match self {
            TaggedValue::Struct(items) => items,
            _ => &[],
        };
        items
            .chunks_exact(2)
            .map_while(|pair| pair[0].as_str().map(|key| (key, &pair[1])))
    }

    /// Look up a value by key in a key/value `Struct`.
    pub fn lookup(&self, key: &str) -> Option<&TaggedValue> {
        self.pairs().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, TaggedValue::None)
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TaggedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            TaggedValue::Int32(i) => Some(*i),
            _ => None,
        }
    }

    #[inline]
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            TaggedValue::Float32(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TaggedValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_struct(&self) -> Option<&[TaggedValue]> {
        match self {
            TaggedValue::Struct(items) => Some(items),
            _ => None,
        }
    }
}

impl From<()> for TaggedValue {
    fn from(_: ()) -> Self {
        TaggedValue::None
    }
}

impl From<bool> for TaggedValue {
    fn from(v: bool) -> Self {
        TaggedValue::Bool(v)
    }
}

impl From<i32> for TaggedValue {
    fn from(v: i32) -> Self {
        TaggedValue::Int32(v)
    }
}

impl From<f32> for TaggedValue {
    fn from(v: f32) -> Self {
        TaggedValue::Float32(v)
    }
}

impl From<&str> for TaggedValue {
    fn from(v: &str) -> Self {
        TaggedValue::String(v.to_owned())
    }
}

impl From<String> for TaggedValue {
    fn from(v: String) -> Self {
        TaggedValue::String(v)
    }
}

impl From<Vec<TaggedValue>> for TaggedValue {
    fn from(v: Vec<TaggedValue>) -> Self {
        TaggedValue::Struct(v)
    }
}

impl fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaggedValue::None => f.write_str("none"),
            TaggedValue::Bool(b) => write!(f, "{}", b),
            TaggedValue::Int32(i) => write!(f, "{}", i),
            TaggedValue::Float32(v) => write!(f, "{}", v),
            TaggedValue::String(s) => write!(f, "{:?}", s),
            TaggedValue::Struct(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("}")
            }
        }
    }
}
