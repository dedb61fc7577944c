//! Minimal OSC 1.0 codec.
//!
//! Covers what parameter traffic uses: messages carrying `i` (int32), `f`
//! (float32), `s` (string), `T` and `F` (booleans without payload) arguments,
//! and bundles of such messages. Only the first argument of a message is
//! surfaced as its value.
//!
//! # Wire layout
//!
//! ```text
//! message: address-string  type-tag-string  argument*
//! bundle:  "#bundle\0"  timetag(u64)  (size(i32) element)*
//! string:  utf-8 bytes, NUL terminated, padded with NULs to a multiple of 4
//! numbers: big-endian
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::parameter::ParameterValue;

const BUNDLE_TAG: &[u8] = b"#bundle\0";

/// Errors raised while decoding a datagram.
#[derive(Debug, Error, PartialEq)]
#[allow(missing_docs)]
pub enum OscError {
    #[error("Packet truncated")]
    Truncated,

    #[error("String is not NUL terminated")]
    UnterminatedString,

    #[error("String is not valid UTF-8")]
    InvalidUtf8,

    #[error("Address must start with '/': {0:?}")]
    InvalidAddress(String),

    #[error("Missing type tag string")]
    MissingTypeTags,

    #[error("Unsupported argument type '{0}'")]
    UnsupportedType(char),

    #[error("Message has no arguments")]
    NoArguments,

    #[error("Bundle element size {0} is invalid")]
    InvalidElementSize(i32),
}

/// A decoded message: OSC address (with its leading `/`) and first argument.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    /// OSC address pattern
    pub address: String,
    /// First argument
    pub value: ParameterValue,
}

/// Encode a single message.
pub fn encode_message(address: &str, value: &ParameterValue) -> Bytes {
    let mut buf = BytesMut::with_capacity(address.len() + 16);
    put_string(&mut buf, address);

    match value {
        ParameterValue::Bool(true) => put_string(&mut buf, ",T"),
        ParameterValue::Bool(false) => put_string(&mut buf, ",F"),
        ParameterValue::Int(v) => {
            put_string(&mut buf, ",i");
            buf.put_i32(*v);
        }
        ParameterValue::Float(v) => {
            put_string(&mut buf, ",f");
            buf.put_f32(*v);
        }
        ParameterValue::String(v) => {
            put_string(&mut buf, ",s");
            put_string(&mut buf, v);
        }
    }
    buf.freeze()
}

/// Decode a datagram into its messages, flattening nested bundles.
pub fn decode_packet(packet: &[u8]) -> Result<Vec<OscMessage>, OscError> {
    let mut out = Vec::new();
    decode_into(packet, &mut out)?;
    Ok(out)
}

fn decode_into(packet: &[u8], out: &mut Vec<OscMessage>) -> Result<(), OscError> {
    if packet.starts_with(BUNDLE_TAG) {
        let mut buf = &packet[BUNDLE_TAG.len()..];
        if buf.remaining() < 8 {
            return Err(OscError::Truncated);
        }
        buf.advance(8); // timetag: elements are applied immediately

        while buf.has_remaining() {
            if buf.remaining() < 4 {
                return Err(OscError::Truncated);
            }
            let size = buf.get_i32();
            let len = usize::try_from(size).map_err(|_| OscError::InvalidElementSize(size))?;
            if len % 4 != 0 {
                return Err(OscError::InvalidElementSize(size));
            }
            if buf.remaining() < len {
                return Err(OscError::Truncated);
            }
            decode_into(&buf[..len], out)?;
            buf.advance(len);
        }
        return Ok(());
    }

    out.push(decode_message(packet)?);
    Ok(())
}

fn decode_message(packet: &[u8]) -> Result<OscMessage, OscError> {
    let mut buf = packet;

    let address = get_string(&mut buf)?;
    if !address.starts_with('/') {
        return Err(OscError::InvalidAddress(address));
    }

    if !buf.has_remaining() {
        return Err(OscError::MissingTypeTags);
    }
    let tags = get_string(&mut buf)?;
    let mut tags = tags.chars();
    if tags.next() != Some(',') {
        return Err(OscError::MissingTypeTags);
    }

    let tag = tags.next().ok_or(OscError::NoArguments)?;
    let value = match tag {
        'T' => ParameterValue::Bool(true),
        'F' => ParameterValue::Bool(false),
        'i' => {
            if buf.remaining() < 4 {
                return Err(OscError::Truncated);
            }
            ParameterValue::Int(buf.get_i32())
        }
        'f' => {
            if buf.remaining() < 4 {
                return Err(OscError::Truncated);
            }
            ParameterValue::Float(buf.get_f32())
        }
        's' => ParameterValue::String(get_string(&mut buf)?),
        other => return Err(OscError::UnsupportedType(other)),
    };

    Ok(OscMessage { address, value })
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    let pad = 4 - (s.len() % 4);
    buf.put_bytes(0, pad);
}

fn get_string(buf: &mut &[u8]) -> Result<String, OscError> {
    let nul = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or(OscError::UnterminatedString)?;
    let s = std::str::from_utf8(&buf[..nul])
        .map_err(|_| OscError::InvalidUtf8)?
        .to_string();

    let padded = (nul / 4 + 1) * 4;
    if buf.remaining() < padded {
        return Err(OscError::Truncated);
    }
    buf.advance(padded);
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_int_layout() {
        let bytes = encode_message("/a", &ParameterValue::Int(1));
        assert_eq!(
            bytes.as_ref(),
            &[b'/', b'a', 0, 0, b',', b'i', 0, 0, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_encode_bool_has_no_payload() {
        let bytes = encode_message("/abc", &ParameterValue::Bool(true));
        // "/abc" needs a full word of padding for its terminator.
        assert_eq!(bytes.as_ref(), b"/abc\0\0\0\0,T\0\0");
    }

    #[test]
    fn test_decode_float_message() {
        let mut raw = BytesMut::new();
        raw.put_slice(b"/avatar/parameters/Face\0");
        raw.put_slice(b",f\0\0");
        raw.put_f32(0.25);

        let msgs = decode_packet(&raw).unwrap();
        assert_eq!(
            msgs,
            vec![OscMessage {
                address: "/avatar/parameters/Face".into(),
                value: ParameterValue::Float(0.25),
            }]
        );
    }

    #[test]
    fn test_decode_bundle_flattens_messages() {
        let first = encode_message("/x", &ParameterValue::Bool(false));
        let second = encode_message("/y", &ParameterValue::String("hi".into()));

        let mut raw = BytesMut::new();
        raw.put_slice(BUNDLE_TAG);
        raw.put_u64(1);
        raw.put_i32(first.len() as i32);
        raw.put_slice(&first);
        raw.put_i32(second.len() as i32);
        raw.put_slice(&second);

        let msgs = decode_packet(&raw).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].value, ParameterValue::Bool(false));
        assert_eq!(msgs[1].address, "/y");
        assert_eq!(msgs[1].value, ParameterValue::String("hi".into()));
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert_eq!(decode_packet(b"/abc"), Err(OscError::UnterminatedString));
        assert!(matches!(
            decode_packet(b"abc\0,i\0\0\0\0\0\x01"),
            Err(OscError::InvalidAddress(_))
        ));
        assert_eq!(decode_packet(b"/a\0\0,i\0\0\0\0"), Err(OscError::Truncated));
        assert_eq!(decode_packet(b"/a\0\0,d\0\0"), Err(OscError::UnsupportedType('d')));
        assert_eq!(decode_packet(b"/a\0\0,\0\0\0"), Err(OscError::NoArguments));
        assert_eq!(decode_packet(b"/a\0\0"), Err(OscError::MissingTypeTags));
    }
}
