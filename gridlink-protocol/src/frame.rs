//! Message framing codec.
//!
//! Wire order: a 4-byte big-endian header length, the XML-encoded
//! `MsgHeader_PI` header, then up to three segments in declared order -
//! payload (negotiated encoding), error stack (always XML `RError_PI`) and
//! a raw byte-stream copied verbatim. A zero-length segment occupies zero
//! bytes on the wire. The header is always XML regardless of the session's
//! negotiated payload encoding.

use crate::error::ProtocolError;
use crate::pack::{Packer, Unpacker};
use crate::registry::Registry;
use crate::value::Value;
use crate::{WireEncoding, MAX_PACKED_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Upper bound for an encoded header; a length prefix outside (0, this]
/// is fatal framing corruption.
pub const MAX_HEADER_LEN: usize = 1024;

/// Message type tag for an endpoint request.
pub const MSG_API_REQ: &str = "API_REQ";
/// Message type tag for an endpoint reply.
pub const MSG_API_REPLY: &str = "API_REPLY";
/// Message type tag for the connection startup record.
pub const MSG_CONNECT: &str = "CONNECT";
/// Message type tag for the server version record.
pub const MSG_VERSION: &str = "VERSION";
/// Message type tag for orderly shutdown, header only.
pub const MSG_DISCONNECT: &str = "DISCONNECT";

/// The fixed message header. `int_info` carries the endpoint number on
/// requests and the signed call status on replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgHeader {
    pub msg_type: String,
    pub msg_len: u32,
    pub error_len: u32,
    pub bs_len: u32,
    pub int_info: i32,
}

impl MsgHeader {
    /// Encodes the header as XML `MsgHeader_PI`.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let record = Value::record([
            ("type", Value::str(&self.msg_type)),
            ("msgLen", Value::Int(self.msg_len as i32)),
            ("errorLen", Value::Int(self.error_len as i32)),
            ("bsLen", Value::Int(self.bs_len as i32)),
            ("intInfo", Value::Int(self.int_info)),
        ]);
        let registry = Registry::new();
        let packed = Packer::new(&registry, WireEncoding::Xml).pack(&record, "MsgHeader_PI")?;
        Ok(packed.data)
    }

    /// Decodes an XML `MsgHeader_PI` header. Segment lengths are validated
    /// non-negative and below the packed-size cap.
    pub fn decode(data: &[u8]) -> Result<MsgHeader, ProtocolError> {
        let registry = Registry::new();
        let record = Unpacker::new(&registry, WireEncoding::Xml).unpack(data, "MsgHeader_PI")?;

        let field_int = |name: &'static str| -> Result<i32, ProtocolError> {
            record
                .get(name)
                .and_then(Value::as_int)
                .ok_or(ProtocolError::ValueMismatch {
                    field: name.to_string(),
                    expected: "int header field",
                })
        };
        let segment = |name: &'static str| -> Result<u32, ProtocolError> {
            let len = field_int(name)?;
            if len < 0 {
                return Err(ProtocolError::SegmentLength { name, len });
            }
            if len as usize > MAX_PACKED_LEN {
                return Err(ProtocolError::Allocation {
                    requested: len as usize,
                    cap: MAX_PACKED_LEN,
                });
            }
            Ok(len as u32)
        };

        let msg_type = record
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::ValueMismatch {
                field: "type".to_string(),
                expected: "string header field",
            })?
            .to_string();

        Ok(MsgHeader {
            msg_type,
            msg_len: segment("msgLen")?,
            error_len: segment("errorLen")?,
            bs_len: segment("bsLen")?,
            int_info: field_int("intInfo")?,
        })
    }
}

/// One framed unit: header plus up to three segments.
#[derive(Debug, Clone)]
pub struct WireMessage {
    pub header: MsgHeader,
    pub payload: Bytes,
    pub error: Bytes,
    pub bs: Bytes,
}

impl WireMessage {
    /// Builds a message; the header segment lengths come from the segments.
    pub fn new(
        msg_type: impl Into<String>,
        int_info: i32,
        payload: Bytes,
        error: Bytes,
        bs: Bytes,
    ) -> WireMessage {
        WireMessage {
            header: MsgHeader {
                msg_type: msg_type.into(),
                msg_len: payload.len() as u32,
                error_len: error.len() as u32,
                bs_len: bs.len() as u32,
                int_info,
            },
            payload,
            error,
            bs,
        }
    }

    /// Header-only message, e.g. DISCONNECT.
    pub fn bare(msg_type: impl Into<String>, int_info: i32) -> WireMessage {
        WireMessage::new(msg_type, int_info, Bytes::new(), Bytes::new(), Bytes::new())
    }

    /// Encodes the full wire form: length prefix, header, segments.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let header = self.header.encode()?;
        if header.len() > MAX_HEADER_LEN {
            return Err(ProtocolError::HeaderLength(header.len() as i64));
        }
        let total = 4 + header.len() + self.payload.len() + self.error.len() + self.bs.len();
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32(header.len() as u32);
        buf.put_slice(&header);
        buf.put_slice(&self.payload);
        buf.put_slice(&self.error);
        buf.put_slice(&self.bs);
        Ok(buf)
    }

    /// Decodes the next message from the buffer.
    ///
    /// Returns `Ok(Some(msg))` for a complete message, `Ok(None)` if more
    /// data is needed, or an error on framing corruption.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<WireMessage>, ProtocolError> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let header_len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64;
        if header_len <= 0 || header_len as usize > MAX_HEADER_LEN {
            return Err(ProtocolError::HeaderLength(header_len));
        }
        let header_len = header_len as usize;
        if buf.len() < 4 + header_len {
            return Ok(None);
        }
        let header = MsgHeader::decode(&buf[4..4 + header_len])?;

        let msg_len = header.msg_len as usize;
        let error_len = header.error_len as usize;
        let bs_len = header.bs_len as usize;
        if buf.len() < 4 + header_len + msg_len + error_len + bs_len {
            return Ok(None);
        }

        buf.advance(4 + header_len);
        let payload = buf.split_to(msg_len).freeze();
        let error = buf.split_to(error_len).freeze();
        let bs = buf.split_to(bs_len).freeze();

        Ok(Some(WireMessage {
            header,
            payload,
            error,
            bs,
        }))
    }
}

/// One diagnostic carried in the error-stack segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub status: i32,
    pub message: String,
}

/// The ordered error stack exchanged in the error segment, always XML,
/// schema `RError_PI`. Append only across a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorStack {
    pub entries: Vec<ErrorEntry>,
}

impl ErrorStack {
    pub fn new() -> ErrorStack {
        ErrorStack::default()
    }

    pub fn push(&mut self, status: i32, message: impl Into<String>) {
        self.entries.push(ErrorEntry {
            status,
            message: message.into(),
        });
    }

    pub fn append(&mut self, other: ErrorStack) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let msgs = if self.entries.is_empty() {
            Value::Null
        } else {
            Value::Array(
                self.entries
                    .iter()
                    .map(|e| {
                        Value::record([
                            ("status", Value::Int(e.status)),
                            ("msg", Value::str(&e.message)),
                        ])
                    })
                    .collect(),
            )
        };
        let record = Value::record([
            ("count", Value::Int(self.entries.len() as i32)),
            ("RErrMsg_PI", msgs),
        ]);
        let registry = Registry::new();
        let packed = Packer::new(&registry, WireEncoding::Xml).pack(&record, "RError_PI")?;
        Ok(packed.data)
    }

    pub fn decode(data: &[u8]) -> Result<ErrorStack, ProtocolError> {
        let registry = Registry::new();
        let record = Unpacker::new(&registry, WireEncoding::Xml).unpack(data, "RError_PI")?;
        let mut stack = ErrorStack::new();
        if let Some(Value::Array(msgs)) = record.get("RErrMsg_PI") {
            for msg in msgs {
                let status = msg.get("status").and_then(Value::as_int).unwrap_or(0);
                let message = msg
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                stack.push(status, message);
            }
        }
        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = MsgHeader {
            msg_type: MSG_API_REPLY.to_string(),
            msg_len: 37,
            error_len: 0,
            bs_len: 512,
            int_info: -808000,
        };
        let encoded = header.encode().unwrap();
        let decoded = MsgHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_message_roundtrip_and_segment_sizes() {
        let payload = Bytes::from(vec![1u8; 37]);
        let bs = Bytes::from(vec![2u8; 512]);
        let msg = WireMessage::new(MSG_API_REPLY, 0, payload.clone(), Bytes::new(), bs.clone());

        let encoded = msg.encode().unwrap();
        let header_len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        // the empty error segment occupies zero wire bytes
        assert_eq!(encoded.len(), 4 + header_len as usize + 37 + 512);

        let mut buf = encoded;
        let decoded = WireMessage::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.header.msg_len, 37);
        assert_eq!(decoded.header.error_len, 0);
        assert_eq!(decoded.header.bs_len, 512);
        assert_eq!(decoded.payload, payload);
        assert!(decoded.error.is_empty());
        assert_eq!(decoded.bs, bs);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_message() {
        let msg = WireMessage::new(MSG_API_REQ, 7, Bytes::from_static(b"xyz"), Bytes::new(), Bytes::new());
        let encoded = msg.encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..2]);
        assert!(WireMessage::decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&encoded[..encoded.len() - 1]);
        assert!(WireMessage::decode(&mut buf).unwrap().is_none());

        let mut buf = encoded;
        assert!(WireMessage::decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_header_length_out_of_range() {
        let mut zero = BytesMut::from(&[0u8, 0, 0, 0, b'x'][..]);
        assert!(matches!(
            WireMessage::decode(&mut zero),
            Err(ProtocolError::HeaderLength(0))
        ));

        let mut huge = BytesMut::from(&[0x7fu8, 0xff, 0xff, 0xff][..]);
        assert!(matches!(
            WireMessage::decode(&mut huge),
            Err(ProtocolError::HeaderLength(_))
        ));
    }

    #[test]
    fn test_negative_segment_length_is_fatal() {
        // hand-build a header claiming msgLen -1
        let record = Value::record([
            ("type", Value::str(MSG_API_REPLY)),
            ("msgLen", Value::Int(-1)),
            ("errorLen", Value::Int(0)),
            ("bsLen", Value::Int(0)),
            ("intInfo", Value::Int(0)),
        ]);
        let registry = Registry::new();
        let header = Packer::new(&registry, WireEncoding::Xml)
            .pack(&record, "MsgHeader_PI")
            .unwrap()
            .data;

        let mut buf = BytesMut::new();
        buf.put_u32(header.len() as u32);
        buf.put_slice(&header);

        let err = WireMessage::decode(&mut buf).unwrap_err();
        assert!(err.is_fatal_framing());
    }

    #[test]
    fn test_error_stack_roundtrip() {
        let mut stack = ErrorStack::new();
        stack.push(-808000, "boom");
        stack.push(-3100, "while handling request");
        let encoded = stack.encode().unwrap();
        assert_eq!(ErrorStack::decode(&encoded).unwrap(), stack);
    }

    #[test]
    fn test_empty_error_stack_roundtrip() {
        let stack = ErrorStack::new();
        let encoded = stack.encode().unwrap();
        assert!(ErrorStack::decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_bare_message() {
        let msg = WireMessage::bare(MSG_DISCONNECT, 0);
        let mut buf = msg.encode().unwrap();
        let decoded = WireMessage::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.header.msg_type, MSG_DISCONNECT);
        assert_eq!(decoded.header.msg_len, 0);
        assert!(decoded.payload.is_empty());
    }
}
