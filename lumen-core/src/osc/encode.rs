//! OSC message encoder.
//!
//! Pure function over its inputs; never performs I/O. Every produced
//! buffer is a multiple of 4 bytes.

use crate::error::EncodeError;
use crate::osc::{OscMessage, OscValue};

/// Encode a message into its OSC 1.0 wire representation.
///
/// Layout: padded address, padded type-tag string (`,` + one tag per
/// argument), then each argument in order. `Int`/`Float` are 4 big-endian
/// bytes, strings are NUL-terminated and padded, blobs are length-prefixed
/// and padded, and the tag-only kinds contribute nothing.
pub fn encode(msg: &OscMessage) -> Result<Vec<u8>, EncodeError> {
    if !msg.address.starts_with('/') {
        return Err(EncodeError::AddressSyntax(msg.address.clone()));
    }
    if msg.address.contains('\0') {
        return Err(EncodeError::EmbeddedNul);
    }

    let mut out = Vec::with_capacity(64 + msg.address.len());
    write_padded_str(&mut out, &msg.address);

    let mut tags = String::with_capacity(msg.args.len() + 1);
    tags.push(',');
    for arg in &msg.args {
        tags.push(arg.type_tag());
    }
    write_padded_str(&mut out, &tags);

    for arg in &msg.args {
        match arg {
            OscValue::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscValue::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscValue::Str(s) => {
                if s.contains('\0') {
                    return Err(EncodeError::EmbeddedNul);
                }
                write_padded_str(&mut out, s);
            }
            OscValue::Blob(b) => {
                let len = i32::try_from(b.len()).map_err(|_| EncodeError::BlobTooLarge(b.len()))?;
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(b);
                pad(&mut out);
            }
            OscValue::True | OscValue::False | OscValue::Nil | OscValue::Impulse => {}
        }
    }

    debug_assert_eq!(out.len() % 4, 0);
    Ok(out)
}

/// Append `s`, a NUL terminator, and padding up to the next 4-byte boundary.
///
/// Fields always begin 4-aligned, so padding the whole buffer is
/// equivalent to padding the field.
fn write_padded_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    pad(out);
}

fn pad(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_without_slash_rejected() {
        let msg = OscMessage::new("composition/layers/1");
        assert_eq!(
            encode(&msg),
            Err(EncodeError::AddressSyntax("composition/layers/1".into()))
        );
    }

    #[test]
    fn interior_nul_rejected() {
        let msg = OscMessage::new("/a").with_arg("bad\0string");
        assert_eq!(encode(&msg), Err(EncodeError::EmbeddedNul));

        let msg = OscMessage::new("/a\0b");
        assert_eq!(encode(&msg), Err(EncodeError::EmbeddedNul));
    }

    #[test]
    fn minimal_message_layout() {
        // "/a" -> 2 bytes + NUL + 1 pad; "," -> 1 byte + NUL + 2 pad.
        let buf = encode(&OscMessage::new("/a")).unwrap();
        assert_eq!(buf, b"/a\0\0,\0\0\0");
    }

    #[test]
    fn int_is_big_endian() {
        let buf = encode(&OscMessage::new("/i").with_arg(0x0102_0304)).unwrap();
        assert_eq!(&buf[8..12], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn blob_is_length_prefixed_and_padded() {
        let buf = encode(&OscMessage::new("/b").with_arg(vec![1u8, 2, 3, 4, 5])).unwrap();
        // address (4) + ",b" tags (4) + length prefix (4) + 5 bytes + 3 pad
        assert_eq!(buf.len(), 4 + 4 + 4 + 8);
        assert_eq!(&buf[8..12], &5i32.to_be_bytes());
        assert_eq!(&buf[12..17], &[1, 2, 3, 4, 5]);
        assert_eq!(&buf[17..20], &[0, 0, 0]);
    }

    #[test]
    fn tag_only_values_contribute_no_bytes() {
        let with_tags = encode(
            &OscMessage::new("/t")
                .with_arg(OscValue::True)
                .with_arg(OscValue::Nil)
                .with_arg(OscValue::Impulse),
        )
        .unwrap();
        let without = encode(&OscMessage::new("/t")).unwrap();
        // ",TNI" still fits in one padded 8-byte tag field like ",".
        assert_eq!(with_tags.len(), without.len());
    }

    #[test]
    fn padding_invariant_across_lengths() {
        for text_len in 0..17 {
            let text = "x".repeat(text_len);
            let buf = encode(&OscMessage::new("/pad/test").with_arg(text.as_str())).unwrap();
            assert_eq!(buf.len() % 4, 0, "text_len={text_len}");
        }
    }
}
