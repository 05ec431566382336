//! OSC 1.0 wire codec.
//!
//! Pure and stateless: [`encode`] turns an (address, arguments) pair into
//! a 4-byte-aligned datagram, [`decode`] is its exact inverse. No I/O
//! happens here; transport is the engine link's job.

pub mod address;
mod decode;
mod encode;
mod value;

pub use decode::decode;
pub use encode::encode;
pub use value::OscValue;

use crate::error::{DecodeError, EncodeError};

/// A logical OSC message: an address pattern plus typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    /// Hierarchical address pattern, must begin with `/`.
    pub address: String,
    /// Ordered argument list.
    pub args: Vec<OscValue>,
}

impl OscMessage {
    /// Create a message with no arguments.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument (builder style).
    pub fn with_arg(mut self, arg: impl Into<OscValue>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self)
    }

    /// Decode from wire bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        decode(buf)
    }
}
