//! Frame encoding/decoding
//!
//! Request frame: `/_` + command + `\r`
//!
//! Response frame (one line):
//! - 1 byte: start marker (`/`)
//! - 1 byte: address of the replying host
//! - 1 byte: status (bit 5 set when the valve is idle)
//! - N bytes: payload
//! - 1 byte: end-of-text marker
//! - `\r\n`

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use super::{ProtocolError, MAX_FRAME_SIZE};

/// Prefix of every request frame
pub const REQUEST_PREFIX: &[u8] = b"/_";

/// Terminator of every request frame
pub const REQUEST_TERMINATOR: u8 = b'\r';

/// Status bit set when the valve is not executing a motion command
pub const STATUS_IDLE_MASK: u8 = 1 << 5;

/// Start marker, address and status byte
const HEADER_LEN: usize = 3;

/// Header plus the end-of-text marker
const MIN_FRAME_LEN: usize = HEADER_LEN + 1;

/// A decoded response line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw status byte
    pub status: u8,
    /// Payload text, without header and end-of-text marker
    pub payload: String,
}

impl Frame {
    /// Whether the valve reported itself busy with a motion command
    pub fn is_busy(&self) -> bool {
        self.status & STATUS_IDLE_MASK == 0
    }
}

/// Decode one received line, terminator included
pub fn decode_line(line: &[u8]) -> Result<Frame, ProtocolError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    if line.len() < MIN_FRAME_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "expected at least {} bytes, got {}: {:?}",
            MIN_FRAME_LEN,
            line.len(),
            String::from_utf8_lossy(line)
        )));
    }

    let payload = std::str::from_utf8(&line[HEADER_LEN..line.len() - 1])
        .map_err(|e| ProtocolError::MalformedFrame(format!("payload is not UTF-8: {}", e)))?;

    Ok(Frame {
        status: line[2],
        payload: payload.to_string(),
    })
}

/// Line codec for the valve's command/response protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        match src.iter().position(|&b| b == b'\n') {
            Some(end) => {
                let line = src.split_to(end + 1);
                decode_line(&line).map(Some)
            }
            None if src.len() > MAX_FRAME_SIZE => Err(ProtocolError::MalformedFrame(format!(
                "no line terminator within {} bytes",
                MAX_FRAME_SIZE
            ))),
            None => Ok(None),
        }
    }
}

impl<T: AsRef<str>> Encoder<T> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, command: T, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let command = command.as_ref();
        dst.reserve(REQUEST_PREFIX.len() + command.len() + 1);
        dst.put_slice(REQUEST_PREFIX);
        dst.put_slice(command.as_bytes());
        dst.put_u8(REQUEST_TERMINATOR);
        Ok(())
    }
}

/// Scalar type a payload should be read as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    /// `"1"` is true, anything else false
    Boolean,
    /// Unsigned decimal
    Integer,
    /// Payload as received
    Text,
}

/// A parsed payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Parsed from [`PayloadKind::Boolean`]
    Boolean(bool),
    /// Parsed from [`PayloadKind::Integer`]
    Integer(u32),
    /// Parsed from [`PayloadKind::Text`]
    Text(String),
}

/// Types a response payload can be parsed into
pub trait FromPayload: Sized {
    /// Parse a payload, failing with [`ProtocolError::MalformedPayload`]
    fn from_payload(payload: &str) -> Result<Self, ProtocolError>;
}

impl FromPayload for bool {
    fn from_payload(payload: &str) -> Result<Self, ProtocolError> {
        Ok(payload == "1")
    }
}

impl FromPayload for u32 {
    fn from_payload(payload: &str) -> Result<Self, ProtocolError> {
        payload
            .parse()
            .map_err(|_| ProtocolError::MalformedPayload(payload.to_string()))
    }
}

impl FromPayload for String {
    fn from_payload(payload: &str) -> Result<Self, ProtocolError> {
        Ok(payload.to_string())
    }
}

/// Parse a payload as the given kind
pub fn parse_payload(payload: &str, kind: PayloadKind) -> Result<Value, ProtocolError> {
    Ok(match kind {
        PayloadKind::Boolean => Value::Boolean(bool::from_payload(payload)?),
        PayloadKind::Integer => Value::Integer(u32::from_payload(payload)?),
        PayloadKind::Text => Value::Text(String::from_payload(payload)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encode(command: &str) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec.encode(command, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_encode_command() {
        assert_eq!(&encode("?9000")[..], b"/_?9000\r");
        assert_eq!(&encode("b12R")[..], b"/_b12R\r");
    }

    #[test]
    fn test_encoder_appends_to_pending_bytes() {
        let mut buf = BytesMut::from(&b"/_ZR\r"[..]);
        FrameCodec.encode(String::from("?6"), &mut buf).unwrap();
        assert_eq!(&buf[..], b"/_ZR\r/_?6\r");
    }

    #[test]
    fn test_decode_idle_frame() {
        let frame = decode_line(b"/0`AB1234\x03\r\n").unwrap();
        assert_eq!(frame.status, b'`');
        assert_eq!(frame.payload, "AB1234");
        assert!(!frame.is_busy());
    }

    #[test]
    fn test_decode_busy_frame() {
        let frame = decode_line(b"/0@\x03\r\n").unwrap();
        assert_eq!(frame.payload, "");
        assert!(frame.is_busy());
    }

    #[test]
    fn test_decode_too_short() {
        let err = decode_line(b"/0`\r\n").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
        assert!(decode_line(b"\r\n").is_err());
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = decode_line(b"/0`\xff\xfe\x03\r\n").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }

    #[test]
    fn test_decoder_waits_for_full_line() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&b"/0`12"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\x03\r\n/0@\x03\r\n");
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.payload, "12");

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert!(second.is_busy());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_rejects_runaway_line() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&vec![b'x'; MAX_FRAME_SIZE + 1][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(
            parse_payload("1", PayloadKind::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            parse_payload("0", PayloadKind::Boolean).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            parse_payload("12", PayloadKind::Integer).unwrap(),
            Value::Integer(12)
        );
        assert_eq!(
            parse_payload("AB1234", PayloadKind::Text).unwrap(),
            Value::Text("AB1234".to_string())
        );
    }

    #[test]
    fn test_parse_non_numeric_integer() {
        assert_eq!(
            parse_payload("abc", PayloadKind::Integer),
            Err(ProtocolError::MalformedPayload("abc".to_string()))
        );
        assert!(u32::from_payload("").is_err());
    }
}
