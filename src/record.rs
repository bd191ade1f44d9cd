//! The encoded form of tuples and keys.
//!
//! A record is a varint field count followed by that many tagged
//! fields. Keys use exactly the same layout, so a key is just a record
//! holding the key parts in key order.

use std::convert::TryFrom;
use std::fmt;

use crate::{Error, Result};

const TAG_NIL: u8 = 0xc0;
const TAG_FALSE: u8 = 0xc2;
const TAG_TRUE: u8 = 0xc3;
const TAG_UNSIGNED: u8 = 0x01;
const TAG_NEGATIVE: u8 = 0x02;
const TAG_DOUBLE: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_BINARY: u8 = 0x05;

/// A decoded field.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Unsigned(u64),
    /// Always negative once decoded: non-negative integers are stored
    /// as `Unsigned`.
    Integer(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Unsigned(_) => "unsigned",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Binary(_) => "varbinary",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Unsigned(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Unsigned(u) => i64::try_from(u).ok(),
            Value::Integer(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Decodes exactly one field. Trailing bytes are corruption.
    pub fn decode(mut field: &[u8]) -> Result<Value> {
        let ret = Value::take(&mut field)?;
        if !field.is_empty() {
            return Err(Error::corruption("trailing bytes after field"));
        }
        Ok(ret)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        self.put(&mut buf);
        buf
    }

    pub(crate) fn encoded_size(&self) -> usize {
        match self {
            Value::Nil | Value::Bool(_) => 1,
            Value::Unsigned(u) => 1 + varint_size(*u),
            Value::Integer(i) if *i >= 0 => 1 + varint_size(*i as u64),
            Value::Integer(i) => 1 + varint_size(zigzag(*i)),
            Value::Double(_) => 9,
            Value::String(s) => 1 + varint_size(s.len() as u64) + s.len(),
            Value::Binary(b) => 1 + varint_size(b.len() as u64) + b.len(),
        }
    }

    pub(crate) fn put(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Nil => buf.push(TAG_NIL),
            Value::Bool(false) => buf.push(TAG_FALSE),
            Value::Bool(true) => buf.push(TAG_TRUE),
            Value::Unsigned(u) => {
                buf.push(TAG_UNSIGNED);
                put_varint(*u, buf);
            }
            Value::Integer(i) if *i >= 0 => {
                buf.push(TAG_UNSIGNED);
                put_varint(*i as u64, buf);
            }
            Value::Integer(i) => {
                buf.push(TAG_NEGATIVE);
                put_varint(zigzag(*i), buf);
            }
            Value::Double(d) => {
                buf.push(TAG_DOUBLE);
                buf.extend_from_slice(&d.to_le_bytes());
            }
            Value::String(s) => {
                buf.push(TAG_STRING);
                put_varint(s.len() as u64, buf);
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Binary(b) => {
                buf.push(TAG_BINARY);
                put_varint(b.len() as u64, buf);
                buf.extend_from_slice(b);
            }
        }
    }

    /// Decodes one field and pushes `buf` past it.
    pub(crate) fn take(buf: &mut &[u8]) -> Result<Value> {
        let tag = take_u8(buf)?;
        Ok(match tag {
            TAG_NIL => Value::Nil,
            TAG_FALSE => Value::Bool(false),
            TAG_TRUE => Value::Bool(true),
            TAG_UNSIGNED => Value::Unsigned(take_varint(buf)?),
            TAG_NEGATIVE => Value::Integer(unzigzag(take_varint(buf)?)),
            TAG_DOUBLE => {
                let bytes = take_slice(buf, 8)?;
                let mut array = [0_u8; 8];
                array.copy_from_slice(bytes);
                Value::Double(f64::from_le_bytes(array))
            }
            TAG_STRING => {
                let len = take_len(buf)?;
                let bytes = take_slice(buf, len)?;
                match std::str::from_utf8(bytes) {
                    Ok(s) => Value::String(s.to_owned()),
                    Err(_) => {
                        return Err(Error::corruption(
                            "string field is not valid utf-8",
                        ));
                    }
                }
            }
            TAG_BINARY => {
                let len = take_len(buf)?;
                Value::Binary(take_slice(buf, len)?.to_vec())
            }
            other => {
                return Err(Error::corruption(format!(
                    "unknown field tag {:#04x}",
                    other
                )));
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Unsigned(u) => write!(f, "{}", u),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Binary(b) => write!(f, "{:x?}", b),
        }
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Value {
        Value::Unsigned(u)
    }
}

impl From<u32> for Value {
    fn from(u: u32) -> Value {
        Value::Unsigned(u64::from(u))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        if i >= 0 { Value::Unsigned(i as u64) } else { Value::Integer(i) }
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Value {
        Value::from(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Value {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Value {
        Value::Binary(b.to_vec())
    }
}

/// Builds an encoded record from anything convertible to `Value`s.
///
/// ```
/// let rec = spacestore::record![1_u64, "a"];
/// assert_eq!(spacestore::decode_record(&rec).unwrap().len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    ($($v:expr),* $(,)?) => {
        $crate::encode_record(&[$($crate::Value::from($v)),*])
    };
}

/// Encodes `values` as a record.
pub fn encode_record(values: &[Value]) -> Vec<u8> {
    let size = varint_size(values.len() as u64)
        + values.iter().map(Value::encoded_size).sum::<usize>();
    let mut buf = Vec::with_capacity(size);
    put_varint(values.len() as u64, &mut buf);
    for value in values {
        value.put(&mut buf);
    }
    buf
}

/// Decodes every field of a record.
pub fn decode_record(data: &[u8]) -> Result<Vec<Value>> {
    let mut buf = data;
    let count = take_len(&mut buf)?;
    let mut ret = Vec::with_capacity(count.min(buf.len()));
    for _ in 0..count {
        ret.push(Value::take(&mut buf)?);
    }
    if !buf.is_empty() {
        return Err(Error::corruption("trailing bytes after record"));
    }
    Ok(ret)
}

/// Returns the field count and the length of the header that holds it.
pub(crate) fn record_header(data: &[u8]) -> Result<(u32, usize)> {
    let mut buf = data;
    let count = take_varint(&mut buf)?;
    let count = u32::try_from(count)
        .map_err(|_| Error::corruption("record field count overflow"))?;
    Ok((count, data.len() - buf.len()))
}

/// Advances `buf` past one field without decoding its payload.
pub(crate) fn skip_field(buf: &mut &[u8]) -> Result<()> {
    let tag = take_u8(buf)?;
    match tag {
        TAG_NIL | TAG_FALSE | TAG_TRUE => {}
        TAG_UNSIGNED | TAG_NEGATIVE => {
            take_varint(buf)?;
        }
        TAG_DOUBLE => {
            take_slice(buf, 8)?;
        }
        TAG_STRING | TAG_BINARY => {
            let len = take_len(buf)?;
            take_slice(buf, len)?;
        }
        other => {
            return Err(Error::corruption(format!(
                "unknown field tag {:#04x}",
                other
            )));
        }
    }
    Ok(())
}

/// Iterates over the raw bytes of each field of a record.
pub(crate) struct Fields<'a> {
    rest: &'a [u8],
    remaining: u32,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Result<Fields<'a>> {
        let (count, header_len) = record_header(data)?;
        Ok(Fields { rest: &data[header_len..], remaining: count })
    }

    pub(crate) fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let before = self.rest;
        if let Err(e) = skip_field(&mut self.rest) {
            self.remaining = 0;
            return Some(Err(e));
        }
        Some(Ok(&before[..before.len() - self.rest.len()]))
    }
}

/// Returns the number of bytes that this varint will need
pub(crate) const fn varint_size(int: u64) -> usize {
    if int <= 240 {
        1
    } else if int <= 2287 {
        2
    } else if int <= 67823 {
        3
    } else if int <= 0x00FF_FFFF {
        4
    } else if int <= 0xFFFF_FFFF {
        5
    } else if int <= 0x00FF_FFFF_FFFF {
        6
    } else if int <= 0xFFFF_FFFF_FFFF {
        7
    } else if int <= 0x00FF_FFFF_FFFF_FFFF {
        8
    } else {
        9
    }
}

pub(crate) fn put_varint(int: u64, buf: &mut Vec<u8>) {
    if int <= 240 {
        buf.push(int as u8);
    } else if int <= 2287 {
        buf.push(((int - 240) / 256 + 241) as u8);
        buf.push(((int - 240) % 256) as u8);
    } else if int <= 67823 {
        buf.push(249);
        buf.push(((int - 2288) / 256) as u8);
        buf.push(((int - 2288) % 256) as u8);
    } else {
        let sz = varint_size(int) - 1;
        buf.push(247 + sz as u8);
        buf.extend_from_slice(&int.to_le_bytes()[..sz]);
    }
}

pub(crate) fn take_varint(buf: &mut &[u8]) -> Result<u64> {
    let first = take_u8(buf)?;
    let res = match first {
        0..=240 => u64::from(first),
        241..=248 => {
            let second = take_u8(buf)?;
            240 + 256 * (u64::from(first) - 241) + u64::from(second)
        }
        249 => {
            let bytes = take_slice(buf, 2)?;
            2288 + 256 * u64::from(bytes[0]) + u64::from(bytes[1])
        }
        other => {
            let sz = other as usize - 247;
            let bytes = take_slice(buf, sz)?;
            let mut aligned = [0; 8];
            aligned[..sz].copy_from_slice(bytes);
            u64::from_le_bytes(aligned)
        }
    };
    Ok(res)
}

fn take_len(buf: &mut &[u8]) -> Result<usize> {
    let len = take_varint(buf)?;
    usize::try_from(len).map_err(|_| Error::corruption("length overflow"))
}

fn take_u8(buf: &mut &[u8]) -> Result<u8> {
    match buf.split_first() {
        Some((first, rest)) => {
            *buf = rest;
            Ok(*first)
        }
        None => Err(Error::corruption("record truncated")),
    }
}

fn take_slice<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(Error::corruption(format!(
            "record truncated: wanted {} bytes, {} remain",
            len,
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

const fn zigzag(i: i64) -> u64 {
    ((i << 1) ^ (i >> 63)) as u64
}

const fn unzigzag(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for int in [0, 240, 241, 2287, 2288, 67823, 67824, u64::MAX] {
            let mut buf = vec![];
            put_varint(int, &mut buf);
            assert_eq!(buf.len(), varint_size(int), "size of {}", int);
            let mut slice = &buf[..];
            assert_eq!(take_varint(&mut slice).unwrap(), int);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn negative_integers_keep_their_sign() {
        let rec = encode_record(&[Value::from(-5_i64), Value::from(5_i64)]);
        assert_eq!(
            decode_record(&rec).unwrap(),
            vec![Value::Integer(-5), Value::Unsigned(5)]
        );
    }

    #[test]
    fn truncated_records_are_corruption() {
        let rec = record![1_u64, "hello"];
        for cut in 1..rec.len() {
            let err = decode_record(&rec[..cut]).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Corruption);
        }
    }

    #[test]
    fn fields_iterates_raw_slices() {
        let rec = record![7_u64, "x", true];
        let fields: Vec<_> =
            Fields::new(&rec).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(Value::decode(fields[1]).unwrap(), Value::from("x"));
    }
}
