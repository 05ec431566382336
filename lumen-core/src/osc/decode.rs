//! OSC message decoder.
//!
//! Exact inverse of [`encode`](crate::osc::encode): strict about
//! alignment, padding bytes, and declared lengths, so that
//! `decode(encode(m)) == m` and nothing else decodes successfully.

use crate::error::DecodeError;
use crate::osc::{OscMessage, OscValue};

/// Decode an OSC 1.0 wire buffer into a message.
///
/// Rejects buffers whose length is not a multiple of 4, truncated
/// fields, blob lengths that overrun the buffer, and unknown type
/// tags, each with a distinct [`DecodeError`] variant.
pub fn decode(buf: &[u8]) -> Result<OscMessage, DecodeError> {
    if buf.is_empty() || buf.len() % 4 != 0 {
        return Err(DecodeError::Unaligned { len: buf.len() });
    }

    let mut cur = Cursor { buf, pos: 0 };

    let address = cur.read_padded_str()?.to_owned();
    if !address.starts_with('/') {
        return Err(DecodeError::AddressSyntax(address));
    }

    if cur.remaining() == 0 {
        return Err(DecodeError::MissingTypeTags);
    }
    let tags = cur.read_padded_str()?;
    let Some(arg_tags) = tags.strip_prefix(',') else {
        return Err(DecodeError::MissingTypeTags);
    };

    let mut args = Vec::with_capacity(arg_tags.len());
    for tag in arg_tags.chars() {
        let value = match tag {
            'i' => OscValue::Int(i32::from_be_bytes(cur.read_word()?)),
            'f' => OscValue::Float(f32::from_be_bytes(cur.read_word()?)),
            's' => OscValue::Str(cur.read_padded_str()?.to_owned()),
            'b' => OscValue::Blob(cur.read_blob()?.to_vec()),
            'T' => OscValue::True,
            'F' => OscValue::False,
            'N' => OscValue::Nil,
            'I' => OscValue::Impulse,
            other => return Err(DecodeError::UnknownTypeTag(other)),
        };
        args.push(value);
    }

    if cur.remaining() != 0 {
        return Err(DecodeError::TrailingBytes(cur.remaining()));
    }

    Ok(OscMessage { address, args })
}

// ── Cursor ───────────────────────────────────────────────────────

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read a NUL-terminated string field and consume its padding.
    fn read_padded_str(&mut self) -> Result<&'a str, DecodeError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::UnterminatedString)?;
        let s = std::str::from_utf8(&rest[..nul])?;

        // Field occupies (nul + 1) bytes rounded up to a 4-byte boundary.
        let field_len = (nul + 1).div_ceil(4) * 4;
        if field_len > rest.len() {
            return Err(DecodeError::Truncated {
                needed: field_len - rest.len(),
            });
        }
        if rest[nul + 1..field_len].iter().any(|&b| b != 0) {
            return Err(DecodeError::BadPadding);
        }
        self.pos += field_len;
        Ok(s)
    }

    fn read_word(&mut self) -> Result<[u8; 4], DecodeError> {
        if self.remaining() < 4 {
            return Err(DecodeError::Truncated {
                needed: 4 - self.remaining(),
            });
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(word)
    }

    fn read_blob(&mut self) -> Result<&'a [u8], DecodeError> {
        let declared = i32::from_be_bytes(self.read_word()?);
        if declared < 0 {
            return Err(DecodeError::NegativeBlobLength(declared));
        }
        let len = declared as usize;
        if len > self.remaining() {
            return Err(DecodeError::BlobOverrun {
                declared: len,
                remaining: self.remaining(),
            });
        }
        let padded = len.div_ceil(4) * 4;
        if padded > self.remaining() {
            return Err(DecodeError::Truncated {
                needed: padded - self.remaining(),
            });
        }
        let data = &self.buf[self.pos..self.pos + len];
        if self.buf[self.pos + len..self.pos + padded]
            .iter()
            .any(|&b| b != 0)
        {
            return Err(DecodeError::BadPadding);
        }
        self.pos += padded;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::encode;

    fn roundtrip(msg: OscMessage) {
        let buf = encode(&msg).unwrap();
        assert_eq!(buf.len() % 4, 0);
        assert_eq!(decode(&buf).unwrap(), msg);
    }

    #[test]
    fn roundtrip_every_value_kind() {
        roundtrip(
            OscMessage::new("/all/kinds")
                .with_arg(-42)
                .with_arg(3.5f32)
                .with_arg("text payload")
                .with_arg(vec![0u8, 1, 2, 254, 255])
                .with_arg(OscValue::True)
                .with_arg(OscValue::False)
                .with_arg(OscValue::Nil)
                .with_arg(OscValue::Impulse),
        );
    }

    #[test]
    fn roundtrip_empty_string_and_blob() {
        roundtrip(OscMessage::new("/edge").with_arg("").with_arg(Vec::new()));
    }

    #[test]
    fn scenario_basic_send() {
        let addr = "/composition/layers/1/clips/2/video/source/text";
        let buf = encode(&OscMessage::new(addr).with_arg("Hello World")).unwrap();
        let msg = decode(&buf).unwrap();
        assert_eq!(msg.address, addr);
        assert_eq!(msg.args, vec![OscValue::Str("Hello World".into())]);
    }

    #[test]
    fn scenario_trigger_no_args() {
        let addr = "/composition/layers/1/clips/2/connect";
        let buf = encode(&OscMessage::new(addr)).unwrap();
        assert_eq!(buf.len() % 4, 0);
        assert!(buf.len() >= 8);
        let msg = decode(&buf).unwrap();
        assert_eq!(msg.address, addr);
        assert!(msg.args.is_empty());
    }

    #[test]
    fn scenario_truncated_blob_rejected() {
        let mut buf = encode(&OscMessage::new("/b").with_arg(vec![9u8; 16])).unwrap();
        // Drop one 4-byte word so the declared blob length overruns.
        buf.truncate(buf.len() - 4);
        assert!(matches!(
            decode(&buf),
            Err(DecodeError::BlobOverrun { .. })
        ));
    }

    #[test]
    fn unaligned_buffer_rejected() {
        let buf = encode(&OscMessage::new("/x")).unwrap();
        assert_eq!(
            decode(&buf[..buf.len() - 1]),
            Err(DecodeError::Unaligned { len: 7 })
        );
        assert_eq!(decode(&[]), Err(DecodeError::Unaligned { len: 0 }));
    }

    #[test]
    fn unknown_type_tag_rejected() {
        // ",q" is not a recognized tag.
        let buf = b"/a\0\0,q\0\0";
        assert_eq!(decode(buf), Err(DecodeError::UnknownTypeTag('q')));
    }

    #[test]
    fn missing_type_tags_rejected() {
        // Address only, no tag string at all.
        assert_eq!(decode(b"/a\0\0"), Err(DecodeError::MissingTypeTags));
        // Second field present but not starting with ','.
        assert_eq!(decode(b"/a\0\0x\0\0\0"), Err(DecodeError::MissingTypeTags));
    }

    #[test]
    fn bad_address_rejected() {
        let buf = b"abc\0,\0\0\0";
        assert_eq!(decode(buf), Err(DecodeError::AddressSyntax("abc".into())));
    }

    #[test]
    fn nonzero_padding_rejected() {
        // "/a" NUL then a non-zero pad byte.
        let buf = b"/a\0X,\0\0\0";
        assert_eq!(decode(buf), Err(DecodeError::BadPadding));
    }

    #[test]
    fn truncated_int_rejected() {
        let buf = b"/a\0\0,i\0\0";
        assert_eq!(decode(buf), Err(DecodeError::Truncated { needed: 4 }));
    }

    #[test]
    fn negative_blob_length_rejected() {
        let mut buf = b"/a\0\0,b\0\0".to_vec();
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        assert_eq!(decode(&buf), Err(DecodeError::NegativeBlobLength(-1)));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut buf = encode(&OscMessage::new("/x")).unwrap();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(decode(&buf), Err(DecodeError::TrailingBytes(4)));
    }
}
