//! The record codec.
//!
//! A serialized record is a varint header followed by the column
//! payloads: the header starts with its own byte length, then one
//! varint serial type per column. The serial type encodes both the
//! column's type and its payload length:
//!
//! | Serial type  | Payload | Meaning                     |
//! |--------------|---------|-----------------------------|
//! | 0            | 0       | NULL                        |
//! | 1            | 1       | 8-bit signed integer        |
//! | 2            | 2       | 16-bit big-endian integer   |
//! | 3            | 3       | 24-bit big-endian integer   |
//! | 4            | 4       | 32-bit big-endian integer   |
//! | 5            | 6       | 48-bit big-endian integer   |
//! | 6            | 8       | 64-bit big-endian integer   |
//! | 7            | 8       | IEEE-754 double             |
//! | 8            | 0       | integer constant 0 (fmt >= 4) |
//! | 9            | 0       | integer constant 1 (fmt >= 4) |
//! | 10, 11       | —       | reserved                    |
//! | N >= 12 even | (N-12)/2 | blob                       |
//! | N >= 13 odd  | (N-13)/2 | text                       |

use std::rc::Rc;

use crate::types::{Blob, Buffer, Text, TextEncoding, Value};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialType {
    Null,
    I8,
    I16,
    I24,
    I32,
    I48,
    I64,
    F64,
    ConstInt0,
    ConstInt1,
    Blob(usize),
    Text(usize),
}

impl SerialType {
    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            0 => Ok(Self::Null),
            1 => Ok(Self::I8),
            2 => Ok(Self::I16),
            3 => Ok(Self::I24),
            4 => Ok(Self::I32),
            5 => Ok(Self::I48),
            6 => Ok(Self::I64),
            7 => Ok(Self::F64),
            8 => Ok(Self::ConstInt0),
            9 => Ok(Self::ConstInt1),
            n if n >= 12 && n % 2 == 0 => Ok(Self::Blob(((n - 12) / 2) as usize)),
            n if n >= 13 => Ok(Self::Text(((n - 13) / 2) as usize)),
            _ => crate::bail_corrupt_error!("Invalid serial type: {}", code),
        }
    }

    pub fn code(&self) -> u64 {
        match self {
            Self::Null => 0,
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I24 => 3,
            Self::I32 => 4,
            Self::I48 => 5,
            Self::I64 => 6,
            Self::F64 => 7,
            Self::ConstInt0 => 8,
            Self::ConstInt1 => 9,
            Self::Blob(n) => (*n as u64) * 2 + 12,
            Self::Text(n) => (*n as u64) * 2 + 13,
        }
    }

    pub fn payload_len(&self) -> usize {
        match self {
            Self::Null | Self::ConstInt0 | Self::ConstInt1 => 0,
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I24 => 3,
            Self::I32 => 4,
            Self::I48 => 6,
            Self::I64 | Self::F64 => 8,
            Self::Blob(n) | Self::Text(n) => *n,
        }
    }
}

/// Pick the smallest serial type that represents `value` exactly. The
/// one-byte constant codes 8 and 9 are only produced under file format
/// 4 or later.
pub fn serial_type_of(value: &Value, file_format: u32) -> SerialType {
    match value {
        Value::Null => SerialType::Null,
        Value::Integer(i) => {
            if file_format >= 4 {
                if *i == 0 {
                    return SerialType::ConstInt0;
                }
                if *i == 1 {
                    return SerialType::ConstInt1;
                }
            }
            let u = if *i < 0 { !(*i as u64) } else { *i as u64 };
            if u <= 0x7f {
                SerialType::I8
            } else if u <= 0x7fff {
                SerialType::I16
            } else if u <= 0x7f_ffff {
                SerialType::I24
            } else if u <= 0x7fff_ffff {
                SerialType::I32
            } else if u <= 0x7fff_ffff_ffff {
                SerialType::I48
            } else {
                SerialType::I64
            }
        }
        Value::Float(_) => SerialType::F64,
        Value::Text(t) => SerialType::Text(t.as_bytes().len()),
        Value::Blob(b) => SerialType::Blob(b.len()),
        // aggregate state never reaches the codec
        Value::Agg(_) => unreachable!("cannot serialize an aggregate cell"),
    }
}

#[cfg(not(feature = "mixed-endian-float"))]
fn float_to_bytes(f: f64) -> [u8; 8] {
    f.to_be_bytes()
}

#[cfg(not(feature = "mixed-endian-float"))]
fn float_from_bytes(b: [u8; 8]) -> f64 {
    f64::from_be_bytes(b)
}

// Some historical FPU ABIs store the two 32-bit words of a double in
// swapped order. The on-disk format is defined against big-endian
// doubles, so those targets swap the halves on the way in and out.
#[cfg(feature = "mixed-endian-float")]
fn float_to_bytes(f: f64) -> [u8; 8] {
    let b = f.to_be_bytes();
    [b[4], b[5], b[6], b[7], b[0], b[1], b[2], b[3]]
}

#[cfg(feature = "mixed-endian-float")]
fn float_from_bytes(b: [u8; 8]) -> f64 {
    f64::from_be_bytes([b[4], b[5], b[6], b[7], b[0], b[1], b[2], b[3]])
}

/// Append the payload bytes of `value` for an already-computed serial
/// type. Zero-blobs append their materialized prefix and then zero-fill
/// the remainder of the declared length.
pub fn write_value(buf: &mut Vec<u8>, value: &Value, serial_type: &SerialType) {
    match (value, serial_type) {
        (Value::Null, _) | (_, SerialType::ConstInt0) | (_, SerialType::ConstInt1) => {}
        (Value::Integer(i), SerialType::I8) => buf.push(*i as u8),
        (Value::Integer(i), SerialType::I16) => buf.extend_from_slice(&(*i as i16).to_be_bytes()),
        (Value::Integer(i), SerialType::I24) => {
            buf.extend_from_slice(&(*i as i32).to_be_bytes()[1..])
        }
        (Value::Integer(i), SerialType::I32) => buf.extend_from_slice(&(*i as i32).to_be_bytes()),
        (Value::Integer(i), SerialType::I48) => buf.extend_from_slice(&i.to_be_bytes()[2..]),
        (Value::Integer(i), SerialType::I64) => buf.extend_from_slice(&i.to_be_bytes()),
        (Value::Float(f), SerialType::F64) => buf.extend_from_slice(&float_to_bytes(*f)),
        (Value::Text(t), SerialType::Text(_)) => buf.extend_from_slice(t.as_bytes()),
        (Value::Blob(b), SerialType::Blob(n)) => {
            buf.extend_from_slice(b.buf.as_slice());
            let fill = n.saturating_sub(b.buf.len());
            buf.resize(buf.len() + fill, 0);
        }
        _ => unreachable!("serial type does not match value"),
    }
}

/// Decode one column at `offset`. Text and blob payloads are installed
/// as shared references into `payload` without copying; callers that
/// retain them past the buffer must `make_writeable` first. NaN doubles
/// decode to NULL.
pub fn read_value(
    payload: &Rc<[u8]>,
    offset: usize,
    serial_type: &SerialType,
) -> Result<(Value, usize)> {
    let buf = match payload.get(offset..) {
        Some(b) => b,
        None => crate::bail_corrupt_error!("record payload offset {} out of range", offset),
    };
    let n = serial_type.payload_len();
    if buf.len() < n {
        crate::bail_corrupt_error!(
            "serial type {} needs {} bytes but only {} remain",
            serial_type.code(),
            n,
            buf.len()
        );
    }
    let value = match serial_type {
        SerialType::Null => Value::Null,
        SerialType::I8 => Value::Integer(buf[0] as i8 as i64),
        SerialType::I16 => Value::Integer(i16::from_be_bytes([buf[0], buf[1]]) as i64),
        SerialType::I24 => {
            let v = i32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
            // sign-extend from 24 bits
            Value::Integer(((v << 8) >> 8) as i64)
        }
        SerialType::I32 => {
            Value::Integer(i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64)
        }
        SerialType::I48 => {
            let v = i64::from_be_bytes([0, 0, buf[0], buf[1], buf[2], buf[3], buf[4], buf[5]]);
            Value::Integer((v << 16) >> 16)
        }
        SerialType::I64 => Value::Integer(i64::from_be_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ])),
        SerialType::F64 => {
            let f = float_from_bytes([
                buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
            ]);
            if f.is_nan() {
                Value::Null
            } else {
                Value::Float(f)
            }
        }
        SerialType::ConstInt0 => Value::Integer(0),
        SerialType::ConstInt1 => Value::Integer(1),
        SerialType::Blob(len) => Value::Blob(Blob {
            buf: Buffer::Shared(payload.clone(), offset..offset + len),
            zero_tail: 0,
        }),
        SerialType::Text(len) => Value::Text(Text {
            buf: Buffer::Shared(payload.clone(), offset..offset + len),
            encoding: TextEncoding::Utf8,
        }),
    };
    Ok((value, n))
}

pub fn read_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut v: u64 = 0;
    for i in 0..8 {
        match buf.get(i) {
            Some(c) => {
                v = (v << 7) + (c & 0x7f) as u64;
                if (c & 0x80) == 0 {
                    return Ok((v, i + 1));
                }
            }
            None => {
                crate::bail_corrupt_error!("Invalid varint");
            }
        }
    }
    match buf.get(8) {
        Some(c) => Ok(((v << 8) + *c as u64, 9)),
        None => crate::bail_corrupt_error!("Invalid varint"),
    }
}

pub fn write_varint(buf: &mut [u8], value: u64) -> usize {
    if value <= 0x7f {
        buf[0] = (value & 0x7f) as u8;
        return 1;
    }

    if value <= 0x3fff {
        buf[0] = (((value >> 7) & 0x7f) | 0x80) as u8;
        buf[1] = (value & 0x7f) as u8;
        return 2;
    }

    let mut value = value;
    if (value & ((0xff000000_u64) << 32)) > 0 {
        buf[8] = value as u8;
        value >>= 8;
        for i in (0..8).rev() {
            buf[i] = ((value & 0x7f) | 0x80) as u8;
            value >>= 7;
        }
        return 9;
    }

    let mut encoded: [u8; 10] = [0; 10];
    let mut bytes = value;
    let mut n = 0;
    while bytes != 0 {
        let v = 0x80 | (bytes & 0x7f);
        encoded[n] = v as u8;
        bytes >>= 7;
        n += 1;
    }
    encoded[0] &= 0x7f;
    for i in 0..n {
        buf[i] = encoded[n - 1 - i];
    }
    n
}

pub fn write_varint_to_vec(value: u64, payload: &mut Vec<u8>) {
    let mut varint: [u8; 9] = [0; 9];
    let n = write_varint(&mut varint, value);
    payload.extend_from_slice(&varint[..n]);
}

pub fn varint_len(value: u64) -> usize {
    let mut buf = [0u8; 9];
    write_varint(&mut buf, value)
}

/// Serialize a row of cells into the record format: header varints then
/// the concatenated payloads, each column under its minimal serial type.
pub fn serialize_record(values: &[Value], file_format: u32) -> Vec<u8> {
    let serial_types: Vec<SerialType> =
        values.iter().map(|v| serial_type_of(v, file_format)).collect();
    let types_len: usize = serial_types.iter().map(|st| varint_len(st.code())).sum();

    // the header length includes the varint holding it; iterate to the
    // fixpoint (one extra round only matters near the 127-byte boundary)
    let mut self_len = 1;
    let header_len = loop {
        let h = types_len + self_len;
        let n = varint_len(h as u64);
        if n == self_len {
            break h;
        }
        self_len = n;
    };

    let mut buf = Vec::with_capacity(header_len);
    write_varint_to_vec(header_len as u64, &mut buf);
    for st in &serial_types {
        write_varint_to_vec(st.code(), &mut buf);
    }
    for (value, st) in values.iter().zip(&serial_types) {
        write_value(&mut buf, value, st);
    }
    buf
}

/// Decode a full record. Payloads stay shared with `payload`.
pub fn read_record(payload: &Rc<[u8]>) -> Result<Vec<Value>> {
    let (header_size, mut header_pos) = read_varint(payload)?;
    let header_size = header_size as usize;
    if header_size > payload.len() || header_size < header_pos {
        crate::bail_corrupt_error!(
            "record header claims {} bytes but payload is {}",
            header_size,
            payload.len()
        );
    }
    let mut serial_types = Vec::new();
    while header_pos < header_size {
        let (code, n) = read_varint(&payload[header_pos..])?;
        header_pos += n;
        serial_types.push(SerialType::from_code(code)?);
    }
    let mut values = Vec::with_capacity(serial_types.len());
    let mut pos = header_size;
    for st in &serial_types {
        let (value, n) = read_value(payload, pos, st)?;
        pos += n;
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn rc(bytes: Vec<u8>) -> Rc<[u8]> {
        Rc::from(bytes.into_boxed_slice())
    }

    #[rstest]
    #[case(0, SerialType::Null)]
    #[case(1, SerialType::I8)]
    #[case(2, SerialType::I16)]
    #[case(3, SerialType::I24)]
    #[case(4, SerialType::I32)]
    #[case(5, SerialType::I48)]
    #[case(6, SerialType::I64)]
    #[case(7, SerialType::F64)]
    #[case(8, SerialType::ConstInt0)]
    #[case(9, SerialType::ConstInt1)]
    #[case(12, SerialType::Blob(0))]
    #[case(13, SerialType::Text(0))]
    #[case(14, SerialType::Blob(1))]
    #[case(15, SerialType::Text(1))]
    fn test_serial_type_codes(#[case] code: u64, #[case] expected: SerialType) {
        assert_eq!(SerialType::from_code(code).unwrap(), expected);
        assert_eq!(expected.code(), code);
    }

    #[rstest]
    #[case(10)]
    #[case(11)]
    fn test_reserved_serial_types(#[case] code: u64) {
        assert!(SerialType::from_code(code).is_err());
    }

    #[rstest]
    #[case(0, SerialType::ConstInt0)]
    #[case(1, SerialType::ConstInt1)]
    #[case(2, SerialType::I8)]
    #[case(127, SerialType::I8)]
    #[case(128, SerialType::I16)]
    #[case(-128, SerialType::I8)]
    #[case(-129, SerialType::I16)]
    #[case(32767, SerialType::I16)]
    #[case(32768, SerialType::I24)]
    #[case(8388607, SerialType::I24)]
    #[case(8388608, SerialType::I32)]
    #[case(2147483647, SerialType::I32)]
    #[case(2147483648, SerialType::I48)]
    #[case(140737488355327, SerialType::I48)]
    #[case(140737488355328, SerialType::I64)]
    #[case(i64::MAX, SerialType::I64)]
    #[case(i64::MIN, SerialType::I64)]
    fn test_minimal_integer_serial_type(#[case] value: i64, #[case] expected: SerialType) {
        assert_eq!(serial_type_of(&Value::Integer(value), 4), expected);
    }

    #[test]
    fn test_const_codes_need_file_format_4() {
        assert_eq!(serial_type_of(&Value::Integer(0), 1), SerialType::I8);
        assert_eq!(serial_type_of(&Value::Integer(1), 1), SerialType::I8);
        assert_eq!(serial_type_of(&Value::Integer(0), 4), SerialType::ConstInt0);
    }

    #[rstest]
    #[case(Value::Null)]
    #[case(Value::Integer(0))]
    #[case(Value::Integer(1))]
    #[case(Value::Integer(127))]
    #[case(Value::Integer(-129))]
    #[case(Value::Integer(8388608))]
    #[case(Value::Integer(i64::MIN))]
    #[case(Value::Float(3.25))]
    #[case(Value::Float(-0.0))]
    #[case(Value::build_text(""))]
    #[case(Value::build_text("hello world"))]
    #[case(Value::build_blob(vec![0xde, 0xad, 0xbe, 0xef]))]
    fn test_value_round_trip(#[case] value: Value) {
        let st = serial_type_of(&value, 4);
        let mut buf = Vec::new();
        write_value(&mut buf, &value, &st);
        assert_eq!(buf.len(), st.payload_len());
        let payload = rc(buf);
        let (decoded, n) = read_value(&payload, 0, &st).unwrap();
        assert_eq!(n, st.payload_len());
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_nan_round_trips_to_null() {
        let st = SerialType::F64;
        let mut buf = Vec::new();
        write_value(&mut buf, &Value::Float(f64::NAN), &st);
        let payload = rc(buf);
        let (decoded, _) = read_value(&payload, 0, &st).unwrap();
        assert_eq!(decoded, Value::Null);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(127)]
    #[case(128)]
    #[case(16383)]
    #[case(16384)]
    #[case(u32::MAX as u64)]
    #[case(u64::MAX >> 8)]
    #[case(u64::MAX)]
    fn test_varint_round_trip(#[case] value: u64) {
        let mut buf = [0u8; 9];
        let n = write_varint(&mut buf, value);
        let (decoded, m) = read_varint(&buf[..n]).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(m, n);
        assert_eq!(varint_len(value), n);
    }

    #[test]
    fn test_truncated_varint_is_corrupt() {
        assert!(read_varint(&[]).is_err());
        assert!(read_varint(&[0x80]).is_err());
        assert!(read_varint(&[0xff; 8]).is_err());
    }

    #[test]
    fn test_record_round_trip() {
        let values = vec![
            Value::Null,
            Value::Integer(42),
            Value::Integer(0),
            Value::Float(1.5),
            Value::build_text("text"),
            Value::build_blob(vec![1, 2, 3]),
        ];
        let payload = rc(serialize_record(&values, 4));
        let decoded = read_record(&payload).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_zeroblob_serializes_as_zeros() {
        let mut v = Value::Null;
        v.set_zeroblob(5);
        let payload = serialize_record(&[v], 4);
        // one header-length byte, one serial-type byte, five zeros
        assert_eq!(payload.len(), 7);
        assert_eq!(&payload[2..], &[0u8; 5]);
        let decoded = read_record(&rc(payload)).unwrap();
        assert_eq!(decoded[0], Value::build_blob(vec![0u8; 5]));
    }

    #[test]
    fn test_large_record_header() {
        // >127 columns forces a two-byte header-length varint
        let values: Vec<Value> = (0..200).map(Value::Integer).collect();
        let payload = rc(serialize_record(&values, 4));
        let decoded = read_record(&payload).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_read_value_shares_payload() {
        let payload = rc(serialize_record(&[Value::build_text("shared")], 4));
        let decoded = read_record(&payload).unwrap();
        match &decoded[0] {
            Value::Text(t) => {
                assert!(matches!(t.buf, crate::types::Buffer::Shared(..)));
                assert_eq!(t.as_bytes(), b"shared");
            }
            other => panic!("expected text, got {:?}", other),
        }
    }
}
