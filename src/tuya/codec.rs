//! Tuya datapoint frame codec.
//!
//! Wire layout (all multi-byte fields big-endian):
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 1    | status         |
//! | 1      | 1    | transaction id |
//! | 2      | 1    | datapoint id   |
//! | 3      | 1    | data type      |
//! | 4      | 2    | length         |
//! | 6      | n    | payload        |

use serde::{Deserialize, Serialize};
use strum::FromRepr;

use crate::error::FrameError;
use crate::zcl::AttributeValue;

pub const HEADER_LEN: usize = 6;
/// Smallest decodable frame: the header plus one payload byte.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + 1;

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, FromRepr, Serialize, Deserialize, strum::Display,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Raw = 0,
    Bool = 1,
    Value = 2,
    String = 3,
    Enum = 4,
    Bitmap = 5,
}

/// Decoded datapoint payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum DatapointValue {
    Raw(Vec<u8>),
    Bool(bool),
    Value(i32),
    String(String),
    Enum(u8),
    Bitmap(u32),
    /// Payload of a data type this codec does not know, kept verbatim.
    Unparsed { data_type: u8, bytes: Vec<u8> },
}

impl DatapointValue {
    /// Wire data type byte for this value.
    pub fn type_byte(&self) -> u8 {
        match self {
            DatapointValue::Raw(_) => DataType::Raw as u8,
            DatapointValue::Bool(_) => DataType::Bool as u8,
            DatapointValue::Value(_) => DataType::Value as u8,
            DatapointValue::String(_) => DataType::String as u8,
            DatapointValue::Enum(_) => DataType::Enum as u8,
            DatapointValue::Bitmap(_) => DataType::Bitmap as u8,
            DatapointValue::Unparsed { data_type, .. } => *data_type,
        }
    }

    /// Attribute view used by value parsers.
    pub fn to_attribute(&self) -> AttributeValue {
        match self {
            DatapointValue::Bool(b) => AttributeValue::Bool(*b),
            DatapointValue::Value(v) => AttributeValue::Int(i64::from(*v)),
            DatapointValue::Enum(v) => AttributeValue::Int(i64::from(*v)),
            DatapointValue::Bitmap(v) => AttributeValue::Int(i64::from(*v)),
            DatapointValue::String(s) => AttributeValue::Text(s.clone()),
            DatapointValue::Raw(b) | DatapointValue::Unparsed { bytes: b, .. } => {
                AttributeValue::Bytes(b.clone())
            }
        }
    }

    /// Build a typed value from an attribute value for an outbound write.
    pub fn from_attribute(data_type: DataType, value: &AttributeValue) -> Result<Self, FrameError> {
        let mismatch = || FrameError::TypeMismatch(data_type_name(data_type));
        match data_type {
            DataType::Bool => match value {
                AttributeValue::Bool(b) => Ok(DatapointValue::Bool(*b)),
                other => other
                    .as_i64()
                    .map(|v| DatapointValue::Bool(v != 0))
                    .ok_or_else(mismatch),
            },
            DataType::Value => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(DatapointValue::Value)
                .ok_or_else(mismatch),
            DataType::Enum => value
                .as_i64()
                .and_then(|v| u8::try_from(v).ok())
                .map(DatapointValue::Enum)
                .ok_or_else(mismatch),
            DataType::Bitmap => value
                .as_i64()
                .and_then(|v| u32::try_from(v).ok())
                .map(DatapointValue::Bitmap)
                .ok_or_else(mismatch),
            DataType::String => match value {
                AttributeValue::Text(s) => Ok(DatapointValue::String(s.clone())),
                _ => Err(mismatch()),
            },
            DataType::Raw => match value {
                AttributeValue::Bytes(b) => Ok(DatapointValue::Raw(b.clone())),
                _ => Err(mismatch()),
            },
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            DatapointValue::Raw(b) | DatapointValue::Unparsed { bytes: b, .. } => b.clone(),
            DatapointValue::Bool(b) => vec![u8::from(*b)],
            DatapointValue::Value(v) => v.to_be_bytes().to_vec(),
            DatapointValue::String(s) => s.as_bytes().to_vec(),
            DatapointValue::Enum(v) => vec![*v],
            DatapointValue::Bitmap(v) => {
                if *v <= 0xFF {
                    vec![*v as u8]
                } else if *v <= 0xFFFF {
                    (*v as u16).to_be_bytes().to_vec()
                } else {
                    v.to_be_bytes().to_vec()
                }
            }
        }
    }
}

/// One datapoint frame as carried by the Tuya cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatapointFrame {
    pub status: u8,
    pub transaction_id: u8,
    pub datapoint_id: u8,
    pub data_type: u8,
    pub length: u16,
    pub value: DatapointValue,
}

impl DatapointFrame {
    /// Known data type, `None` when the frame was kept unparsed.
    pub fn kind(&self) -> Option<DataType> {
        DataType::from_repr(self.data_type)
    }

    pub fn is_unparsed(&self) -> bool {
        matches!(self.value, DatapointValue::Unparsed { .. })
    }
}

/// Decode a frame carrying exactly one datapoint.
///
/// The declared length must match the remaining bytes exactly.
pub fn decode(bytes: &[u8]) -> Result<DatapointFrame, FrameError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort(bytes.len(), MIN_FRAME_LEN));
    }
    let (status, transaction_id) = (bytes[0], bytes[1]);
    let (frame, consumed) = decode_record(status, transaction_id, &bytes[2..])?;
    let remaining = bytes.len() - 2 - consumed;
    if remaining != 0 {
        return Err(FrameError::LengthMismatch {
            declared: usize::from(frame.length),
            actual: usize::from(frame.length) + remaining,
        });
    }
    Ok(frame)
}

/// Decode a frame whose body holds several consecutive datapoint records
/// sharing one status/transaction header.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<DatapointFrame>, FrameError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort(bytes.len(), MIN_FRAME_LEN));
    }
    let (status, transaction_id) = (bytes[0], bytes[1]);
    let mut body = &bytes[2..];
    let mut frames = Vec::new();
    while !body.is_empty() {
        let (frame, consumed) = decode_record(status, transaction_id, body)?;
        frames.push(frame);
        body = &body[consumed..];
    }
    Ok(frames)
}

/// Decode one `dp | type | len | payload` record, returning bytes consumed.
fn decode_record(
    status: u8,
    transaction_id: u8,
    record: &[u8],
) -> Result<(DatapointFrame, usize), FrameError> {
    const RECORD_HEADER: usize = HEADER_LEN - 2;
    if record.len() < RECORD_HEADER {
        return Err(FrameError::TooShort(record.len() + 2, MIN_FRAME_LEN));
    }
    let datapoint_id = record[0];
    if datapoint_id == 0 {
        return Err(FrameError::ReservedDatapoint);
    }
    let data_type = record[1];
    let length = u16::from_be_bytes([record[2], record[3]]);
    let available = record.len() - RECORD_HEADER;
    let declared = usize::from(length);
    if declared > available {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: available,
        });
    }
    let payload = &record[RECORD_HEADER..RECORD_HEADER + declared];
    let value = decode_payload(data_type, payload)?;
    Ok((
        DatapointFrame {
            status,
            transaction_id,
            datapoint_id,
            data_type,
            length,
            value,
        },
        RECORD_HEADER + declared,
    ))
}

fn decode_payload(data_type: u8, payload: &[u8]) -> Result<DatapointValue, FrameError> {
    let Some(kind) = DataType::from_repr(data_type) else {
        return Ok(DatapointValue::Unparsed {
            data_type,
            bytes: payload.to_vec(),
        });
    };
    let bad_size = || FrameError::InvalidPayloadSize {
        data_type: data_type_name(kind),
        size: payload.len(),
    };
    match kind {
        DataType::Raw => Ok(DatapointValue::Raw(payload.to_vec())),
        DataType::Bool => match payload {
            [b] => Ok(DatapointValue::Bool(*b != 0)),
            _ => Err(bad_size()),
        },
        DataType::Value => match payload.len() {
            1 => Ok(DatapointValue::Value(i32::from(payload[0] as i8))),
            2 => Ok(DatapointValue::Value(i32::from(i16::from_be_bytes([
                payload[0], payload[1],
            ])))),
            4 => Ok(DatapointValue::Value(i32::from_be_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ]))),
            _ => Err(bad_size()),
        },
        DataType::String => Ok(match std::str::from_utf8(payload) {
            Ok(s) => DatapointValue::String(s.to_string()),
            Err(_) => DatapointValue::Raw(payload.to_vec()),
        }),
        DataType::Enum => match payload {
            [v] => Ok(DatapointValue::Enum(*v)),
            _ => Err(bad_size()),
        },
        DataType::Bitmap => match payload.len() {
            1..=4 => Ok(DatapointValue::Bitmap(
                payload
                    .iter()
                    .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)),
            )),
            _ => Err(bad_size()),
        },
    }
}

/// Encode one datapoint into a frame with status 0.
///
/// `data_type` must agree with the value variant.
pub fn encode(
    transaction_id: u8,
    datapoint_id: u8,
    data_type: DataType,
    value: &DatapointValue,
) -> Result<Vec<u8>, FrameError> {
    if datapoint_id == 0 {
        return Err(FrameError::ReservedDatapoint);
    }
    if value.type_byte() != data_type as u8 {
        return Err(FrameError::TypeMismatch(data_type_name(data_type)));
    }
    let payload = value.payload();
    if payload.is_empty() {
        return Err(FrameError::EmptyPayload);
    }
    let length =
        u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(0x00);
    frame.push(transaction_id);
    frame.push(datapoint_id);
    frame.push(data_type as u8);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn data_type_name(kind: DataType) -> &'static str {
    match kind {
        DataType::Raw => "raw",
        DataType::Bool => "bool",
        DataType::Value => "value",
        DataType::String => "string",
        DataType::Enum => "enum",
        DataType::Bitmap => "bitmap",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bool_frame() {
        let frame = decode(&[0x00, 0x05, 0x01, 0x01, 0x00, 0x01, 0x01]).unwrap();
        assert_eq!(
            frame,
            DatapointFrame {
                status: 0,
                transaction_id: 5,
                datapoint_id: 1,
                data_type: DataType::Bool as u8,
                length: 1,
                value: DatapointValue::Bool(true),
            }
        );
        assert_eq!(frame.kind(), Some(DataType::Bool));
    }

    #[test]
    fn test_decode_value_is_signed_big_endian() {
        let frame = decode(&[0x00, 0x10, 0x02, 0x02, 0x00, 0x04, 0xFF, 0xFF, 0xFF, 0x38]).unwrap();
        assert_eq!(frame.value, DatapointValue::Value(-200));

        let frame = decode(&[0x00, 0x10, 0x02, 0x02, 0x00, 0x04, 0x00, 0x00, 0x01, 0x0E]).unwrap();
        assert_eq!(frame.value, DatapointValue::Value(270));
    }

    #[test]
    fn test_decode_bitmap_widths() {
        let frame = decode(&[0x00, 0x01, 0x0D, 0x05, 0x00, 0x02, 0x01, 0x02]).unwrap();
        assert_eq!(frame.value, DatapointValue::Bitmap(0x0102));
    }

    #[test]
    fn test_short_input_is_frame_error() {
        for len in 0..MIN_FRAME_LEN {
            let bytes = vec![0u8; len];
            assert!(matches!(decode(&bytes), Err(FrameError::TooShort(..))));
        }
    }

    #[test]
    fn test_length_mismatch_never_panics() {
        // Declared 4, only 1 byte present.
        assert!(matches!(
            decode(&[0x00, 0x01, 0x02, 0x02, 0x00, 0x04, 0x01]),
            Err(FrameError::LengthMismatch {
                declared: 4,
                actual: 1
            })
        ));
        // Declared 1, 3 bytes present.
        assert!(matches!(
            decode(&[0x00, 0x01, 0x01, 0x01, 0x00, 0x01, 0x01, 0x00, 0x00]),
            Err(FrameError::LengthMismatch {
                declared: 1,
                actual: 3
            })
        ));
        // Every declared length against a fixed body.
        for declared in 0u16..=64 {
            let mut bytes = vec![0x00, 0x01, 0x03, 0x00];
            bytes.extend_from_slice(&declared.to_be_bytes());
            bytes.extend_from_slice(&[0xAA; 8]);
            let result = decode(&bytes);
            if declared == 8 {
                assert!(result.is_ok());
            } else {
                assert!(result.is_err());
            }
        }
    }

    #[test]
    fn test_datapoint_zero_is_rejected() {
        assert_eq!(
            decode(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x01, 0x01]),
            Err(FrameError::ReservedDatapoint)
        );
        // Reserved id in the second record fails the whole frame.
        assert!(decode_all(&[
            0x00, 0x01, 0x01, 0x01, 0x00, 0x01, 0x01, 0x00, 0x01, 0x00, 0x01, 0x00,
        ])
        .is_err());
    }

    #[test]
    fn test_unknown_type_is_kept_unparsed() {
        let frame = decode(&[0x00, 0x02, 0x65, 0x09, 0x00, 0x02, 0xAB, 0xCD]).unwrap();
        assert!(frame.is_unparsed());
        assert_eq!(frame.kind(), None);
        assert_eq!(
            frame.value,
            DatapointValue::Unparsed {
                data_type: 9,
                bytes: vec![0xAB, 0xCD]
            }
        );
    }

    #[test]
    fn test_invalid_utf8_string_falls_back_to_raw() {
        let frame = decode(&[0x00, 0x02, 0x11, 0x03, 0x00, 0x02, 0xC3, 0x28]).unwrap();
        assert_eq!(frame.value, DatapointValue::Raw(vec![0xC3, 0x28]));
    }

    #[test]
    fn test_round_trip() {
        let cases = [
            (DataType::Bool, DatapointValue::Bool(false)),
            (DataType::Bool, DatapointValue::Bool(true)),
            (DataType::Value, DatapointValue::Value(i32::MIN)),
            (DataType::Value, DatapointValue::Value(-1)),
            (DataType::Value, DatapointValue::Value(235)),
            (DataType::Enum, DatapointValue::Enum(2)),
            (DataType::Bitmap, DatapointValue::Bitmap(0x01)),
            (DataType::Bitmap, DatapointValue::Bitmap(0x0100)),
            (DataType::Bitmap, DatapointValue::Bitmap(0xDEAD_BEEF)),
            (DataType::String, DatapointValue::String("Zigbee 温度".into())),
        ];
        for (i, (kind, value)) in cases.into_iter().enumerate() {
            let dp = (i + 1) as u8;
            let bytes = encode(9, dp, kind, &value).unwrap();
            let frame = decode(&bytes).unwrap();
            assert_eq!(frame.datapoint_id, dp);
            assert_eq!(frame.transaction_id, 9);
            assert_eq!(frame.value, value);
        }
    }

    #[test]
    fn test_encode_rejects_mismatched_type() {
        assert_eq!(
            encode(0, 1, DataType::Enum, &DatapointValue::Bool(true)),
            Err(FrameError::TypeMismatch("enum"))
        );
        assert_eq!(
            encode(0, 0, DataType::Bool, &DatapointValue::Bool(true)),
            Err(FrameError::ReservedDatapoint)
        );
        assert_eq!(
            encode(0, 3, DataType::String, &DatapointValue::String(String::new())),
            Err(FrameError::EmptyPayload)
        );
    }

    #[test]
    fn test_decode_all_multiple_records() {
        let bytes = [
            0x00, 0x07, // status, transaction
            0x01, 0x01, 0x00, 0x01, 0x01, // dp1 bool true
            0x04, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0x64, // dp4 value 100
        ];
        let frames = decode_all(&bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].value, DatapointValue::Bool(true));
        assert_eq!(frames[1].datapoint_id, 4);
        assert_eq!(frames[1].value, DatapointValue::Value(100));
        assert!(frames.iter().all(|f| f.transaction_id == 7));

        // Truncated second record.
        assert!(decode_all(&bytes[..bytes.len() - 1]).is_err());
    }
}
