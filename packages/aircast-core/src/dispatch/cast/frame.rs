//! CASTV2 frame codec.
//!
//! A frame is a 4-byte big-endian length followed by a `CastMessage`
//! protobuf. Only the fields a sender needs are modelled:
//!
//! | field | type   | meaning                         |
//! |-------|--------|---------------------------------|
//! | 1     | varint | protocol version (0 = 1.0)      |
//! | 2     | string | source id                       |
//! | 3     | string | destination id                  |
//! | 4     | string | namespace                       |
//! | 5     | varint | payload type (0 = string)       |
//! | 6     | string | UTF-8 JSON payload              |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::CastError;
use crate::protocol_constants::CAST_MAX_FRAME_LEN;

const WIRE_VARINT: u8 = 0;
const WIRE_LEN: u8 = 2;

/// One decoded cast message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastMessage {
    pub source_id: String,
    pub destination_id: String,
    pub namespace: String,
    pub payload: String,
}

impl CastMessage {
    pub fn new(
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        namespace: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            namespace: namespace.into(),
            payload: payload.into(),
        }
    }

    /// Encodes the message as a length-prefixed frame.
    pub fn encode(&self) -> Result<Bytes, CastError> {
        let mut body = BytesMut::with_capacity(
            16 + self.source_id.len()
                + self.destination_id.len()
                + self.namespace.len()
                + self.payload.len(),
        );
        put_varint_field(&mut body, 1, 0);
        put_string_field(&mut body, 2, &self.source_id);
        put_string_field(&mut body, 3, &self.destination_id);
        put_string_field(&mut body, 4, &self.namespace);
        put_varint_field(&mut body, 5, 0);
        put_string_field(&mut body, 6, &self.payload);

        if body.len() > CAST_MAX_FRAME_LEN {
            return Err(CastError::Frame(format!(
                "frame of {} bytes exceeds {}",
                body.len(),
                CAST_MAX_FRAME_LEN
            )));
        }

        let mut frame = BytesMut::with_capacity(4 + body.len());
        frame.put_u32(body.len() as u32);
        frame.extend_from_slice(&body);
        Ok(frame.freeze())
    }

    /// Decodes a frame body (without the length prefix).
    ///
    /// Unknown fields are skipped.
    pub fn decode(mut body: &[u8]) -> Result<Self, CastError> {
        let mut msg = Self::new("", "", "", "");

        while body.has_remaining() {
            let key = get_varint(&mut body)?;
            let field = key >> 3;
            match (key & 0x07) as u8 {
                WIRE_VARINT => {
                    get_varint(&mut body)?;
                }
                WIRE_LEN => {
                    let len = get_varint(&mut body)? as usize;
                    if len > body.remaining() {
                        return Err(CastError::Frame("field length out of bounds".into()));
                    }
                    let value = String::from_utf8(body[..len].to_vec())
                        .map_err(|_| CastError::Frame("field is not valid UTF-8".into()))?;
                    body.advance(len);
                    match field {
                        2 => msg.source_id = value,
                        3 => msg.destination_id = value,
                        4 => msg.namespace = value,
                        6 => msg.payload = value,
                        _ => {}
                    }
                }
                other => {
                    return Err(CastError::Frame(format!("unsupported wire type {}", other)));
                }
            }
        }

        Ok(msg)
    }
}

/// Validates a frame length prefix.
pub fn check_frame_len(len: u32) -> Result<usize, CastError> {
    let len = len as usize;
    if len > CAST_MAX_FRAME_LEN {
        return Err(CastError::Frame(format!(
            "announced frame of {} bytes exceeds {}",
            len, CAST_MAX_FRAME_LEN
        )));
    }
    Ok(len)
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

fn put_varint_field(buf: &mut BytesMut, field: u64, value: u64) {
    put_varint(buf, (field << 3) | u64::from(WIRE_VARINT));
    put_varint(buf, value);
}

fn put_string_field(buf: &mut BytesMut, field: u64, value: &str) {
    put_varint(buf, (field << 3) | u64::from(WIRE_LEN));
    put_varint(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

fn get_varint(buf: &mut &[u8]) -> Result<u64, CastError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    while buf.has_remaining() && shift <= 63 {
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(CastError::Frame("truncated varint".into()))
}
