//! OSC argument values and their type tags.

use std::fmt;

/// One OSC argument.
///
/// The four no-value kinds (`True`, `False`, `Nil`, `Impulse`) exist only
/// in the type-tag string and contribute zero bytes to the argument
/// section.
#[derive(Debug, Clone, PartialEq)]
pub enum OscValue {
    /// 32-bit signed integer, big-endian on the wire (`i`).
    Int(i32),
    /// 32-bit IEEE float, big-endian on the wire (`f`).
    Float(f32),
    /// NUL-terminated, 4-byte-padded UTF-8 string (`s`).
    Str(String),
    /// Length-prefixed opaque bytes, 4-byte-padded (`b`).
    Blob(Vec<u8>),
    /// Boolean true (`T`), tag-only.
    True,
    /// Boolean false (`F`), tag-only.
    False,
    /// Nil / no value (`N`), tag-only.
    Nil,
    /// Impulse / trigger (`I`), tag-only.
    Impulse,
}

impl OscValue {
    /// The type-tag character for this value.
    pub fn type_tag(&self) -> char {
        match self {
            OscValue::Int(_) => 'i',
            OscValue::Float(_) => 'f',
            OscValue::Str(_) => 's',
            OscValue::Blob(_) => 'b',
            OscValue::True => 'T',
            OscValue::False => 'F',
            OscValue::Nil => 'N',
            OscValue::Impulse => 'I',
        }
    }

    /// Returns `true` for the tag-only kinds that carry no argument bytes.
    pub fn is_tag_only(&self) -> bool {
        matches!(
            self,
            OscValue::True | OscValue::False | OscValue::Nil | OscValue::Impulse
        )
    }
}

impl fmt::Display for OscValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscValue::Int(v) => write!(f, "{v}"),
            OscValue::Float(v) => write!(f, "{v}"),
            OscValue::Str(s) => write!(f, "{s:?}"),
            OscValue::Blob(b) => write!(f, "blob[{}]", b.len()),
            OscValue::True => write!(f, "true"),
            OscValue::False => write!(f, "false"),
            OscValue::Nil => write!(f, "nil"),
            OscValue::Impulse => write!(f, "impulse"),
        }
    }
}

impl From<i32> for OscValue {
    fn from(v: i32) -> Self {
        OscValue::Int(v)
    }
}

impl From<f32> for OscValue {
    fn from(v: f32) -> Self {
        OscValue::Float(v)
    }
}

impl From<&str> for OscValue {
    fn from(v: &str) -> Self {
        OscValue::Str(v.to_string())
    }
}

impl From<String> for OscValue {
    fn from(v: String) -> Self {
        OscValue::Str(v)
    }
}

impl From<Vec<u8>> for OscValue {
    fn from(v: Vec<u8>) -> Self {
        OscValue::Blob(v)
    }
}

impl From<bool> for OscValue {
    fn from(v: bool) -> Self {
        if v { OscValue::True } else { OscValue::False }
    }
}
