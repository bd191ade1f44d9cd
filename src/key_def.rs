//! Key definitions: which fields of a record form an index key, how
//! keys compare, and how they are cut out of tuples.

use std::cmp::Ordering;
use std::fmt::{self, Debug};

use inline_array::InlineArray;

use crate::record::{Fields, put_varint, record_header, varint_size};
use crate::*;

/// Field numbers of key parts must be below this.
pub const FIELD_MAX: u32 = 1 << 16;

/// How strings in a key part compare.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Collation {
    #[default]
    Binary,
    /// Compares the Unicode lowercase forms.
    UnicodeCi,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One component of a key.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeyPart {
    pub fieldno: u32,
    pub field_type: FieldType,
    pub collation: Collation,
    pub is_nullable: bool,
    pub sort_order: SortOrder,
}

impl KeyPart {
    pub fn new(fieldno: u32, field_type: FieldType) -> KeyPart {
        KeyPart {
            fieldno,
            field_type,
            collation: Collation::Binary,
            is_nullable: false,
            sort_order: SortOrder::Asc,
        }
    }

    pub fn nullable(mut self) -> KeyPart {
        self.is_nullable = true;
        self
    }

    pub fn desc(mut self) -> KeyPart {
        self.sort_order = SortOrder::Desc;
        self
    }

    pub fn collation(mut self, collation: Collation) -> KeyPart {
        self.collation = collation;
        self
    }

    fn compare_values(&self, a: &Value, b: &Value) -> Ordering {
        let ord = compare_scalars(self.collation, a, b);
        match self.sort_order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }

    fn check_value(&self, partno: u32, value: &Value) -> Result<()> {
        let ok = if value.is_nil() {
            self.is_nullable
        } else {
            self.field_type.accepts(value)
        };
        if ok {
            Ok(())
        } else {
            Err(Error::FieldTypeMismatch {
                fieldno: partno,
                expected: self.field_type.name(),
                found: value.type_name(),
            })
        }
    }
}

/// Which extraction routine a `KeyDef` was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// Parts are fields `0..n` in order: the key is one contiguous copy.
    Sequential,
    /// Parts are scattered or out of order.
    Scattered,
}

type ExtractFn = fn(&KeyDef, &Tuple) -> Result<Vec<u8>>;
type ExtractRawFn = fn(&KeyDef, &[u8]) -> Result<Vec<u8>>;

/// An immutable, ordered list of key parts with extraction routines
/// chosen for its shape.
#[derive(Clone)]
pub struct KeyDef {
    parts: Vec<KeyPart>,
    extraction: Extraction,
    extract: ExtractFn,
    extract_raw: ExtractRawFn,
}

impl Debug for KeyDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDef")
            .field("parts", &self.parts)
            .field("extraction", &self.extraction)
            .finish()
    }
}

impl PartialEq for KeyDef {
    fn eq(&self, other: &KeyDef) -> bool {
        self.parts == other.parts
    }
}

impl KeyDef {
    /// Fails unless every part names a distinct field below
    /// `FIELD_MAX` and has an indexable type.
    pub fn new(parts: Vec<KeyPart>) -> Result<KeyDef> {
        if parts.is_empty() {
            return Err(Error::unsupported("key definition has no parts"));
        }
        for (i, part) in parts.iter().enumerate() {
            if part.fieldno >= FIELD_MAX {
                return Err(Error::unsupported(format!(
                    "key part {} names field {}, fields are numbered below {}",
                    i, part.fieldno, FIELD_MAX
                )));
            }
            if part.field_type == FieldType::Any {
                return Err(Error::unsupported(format!(
                    "key part {} has type 'any', which is not indexable",
                    i
                )));
            }
            if parts[..i].iter().any(|p| p.fieldno == part.fieldno) {
                return Err(Error::unsupported(format!(
                    "field {} is indexed twice in one key",
                    part.fieldno
                )));
            }
        }

        let sequential =
            parts.iter().enumerate().all(|(i, p)| p.fieldno as usize == i);

        let (extraction, extract, extract_raw): (_, ExtractFn, ExtractRawFn) =
            if sequential {
                (
                    Extraction::Sequential,
                    extract_sequential,
                    extract_raw_sequential,
                )
            } else {
                (Extraction::Scattered, extract_scattered, extract_raw_scattered)
            };

        Ok(KeyDef { parts, extraction, extract, extract_raw })
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    pub fn part_count(&self) -> u32 {
        self.parts.len() as u32
    }

    pub fn extraction(&self) -> Extraction {
        self.extraction
    }

    pub fn contains_field(&self, fieldno: u32) -> bool {
        self.parts.iter().any(|p| p.fieldno == fieldno)
    }

    /// Cuts the key out of a tuple, using its field map where it can.
    pub fn extract_key(&self, tuple: &Tuple) -> Result<Vec<u8>> {
        (self.extract)(self, tuple)
    }

    /// Cuts the key out of raw record bytes by walking the record.
    pub fn extract_key_raw(&self, data: &[u8]) -> Result<Vec<u8>> {
        (self.extract_raw)(self, data)
    }

    /// Returns this key extended with the parts of `pk` it does not
    /// already cover. Non-unique secondary indexes store merged keys so
    /// every entry is distinct.
    pub fn merge(&self, pk: &KeyDef) -> KeyDef {
        let mut parts = self.parts.clone();
        for part in &pk.parts {
            if !self.contains_field(part.fieldno) {
                parts.push(part.clone());
            }
        }
        // both inputs passed validation, and merging only appends
        // fields not already present
        KeyDef::new(parts).unwrap_or_else(|_| self.clone())
    }

    /// Checks the part count and part types of a key. Partial keys may
    /// hold any prefix of the parts.
    pub fn validate_key(&self, key: &[u8], allow_partial: bool) -> Result<u32> {
        let values = decode_record(key)?;
        let count = values.len() as u32;
        let ok_count = if allow_partial {
            count <= self.part_count()
        } else {
            count == self.part_count()
        };
        if !ok_count {
            return Err(Error::unsupported(format!(
                "invalid key part count (expected {}{}, got {})",
                if allow_partial { "[0.." } else { "" },
                if allow_partial {
                    format!("{}]", self.part_count())
                } else {
                    self.part_count().to_string()
                },
                count
            )));
        }
        for (i, (part, value)) in self.parts.iter().zip(&values).enumerate() {
            part.check_value(i as u32, value)?;
        }
        Ok(count)
    }

    /// Compares two keys part by part. Only the parts present in both
    /// keys take part in the comparison.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        let mut left = Fields::new(a)?;
        let mut right = Fields::new(b)?;
        for part in &self.parts {
            match (left.next(), right.next()) {
                (Some(l), Some(r)) => {
                    let l = Value::decode(l?)?;
                    let r = Value::decode(r?)?;
                    match part.compare_values(&l, &r) {
                        Ordering::Equal => continue,
                        other => return Ok(other),
                    }
                }
                _ => break,
            }
        }
        Ok(Ordering::Equal)
    }

    /// Compares the key of `tuple` with a possibly partial `key`.
    pub fn compare_with_key(&self, tuple: &Tuple, key: &[u8]) -> Result<Ordering> {
        let mut wanted = Fields::new(key)?;
        for part in &self.parts {
            let Some(r) = wanted.next() else {
                break;
            };
            let r = Value::decode(r?)?;
            let l = match tuple.field(part.fieldno)? {
                Some(field) => Value::decode(field)?,
                None => Value::Nil,
            };
            match part.compare_values(&l, &r) {
                Ordering::Equal => continue,
                other => return Ok(other),
            }
        }
        Ok(Ordering::Equal)
    }

    /// Compares the keys of two tuples over every part.
    pub fn compare_tuples(&self, a: &Tuple, b: &Tuple) -> Result<Ordering> {
        for part in &self.parts {
            let l = field_value(a, part.fieldno)?;
            let r = field_value(b, part.fieldno)?;
            match part.compare_values(&l, &r) {
                Ordering::Equal => continue,
                other => return Ok(other),
            }
        }
        Ok(Ordering::Equal)
    }

    /// Encodes a possibly partial key so that byte order equals
    /// `compare` order. A partial key encodes to a byte prefix of every
    /// full key it matches.
    pub fn sort_key(&self, key: &[u8]) -> Result<InlineArray> {
        let mut buf = Vec::with_capacity(key.len() + 8);
        for (part, field) in self.parts.iter().zip(Fields::new(key)?) {
            encode_sort_part(part, &Value::decode(field?)?, &mut buf);
        }
        Ok(InlineArray::from(&buf[..]))
    }

    /// `sort_key` of the key of `tuple`, without building the key.
    pub fn tuple_sort_key(&self, tuple: &Tuple) -> Result<InlineArray> {
        let mut buf = Vec::with_capacity(16 * self.parts.len());
        for part in &self.parts {
            let value = field_value(tuple, part.fieldno)?;
            if value.is_nil() && !part.is_nullable {
                return Err(missing_field(part.fieldno));
            }
            encode_sort_part(part, &value, &mut buf);
        }
        Ok(InlineArray::from(&buf[..]))
    }
}

fn field_value(tuple: &Tuple, fieldno: u32) -> Result<Value> {
    match tuple.field(fieldno)? {
        Some(field) => Value::decode(field),
        None => Ok(Value::Nil),
    }
}

fn missing_field(fieldno: u32) -> Error {
    Error::corruption(format!("field {} required by key is missing", fieldno))
}

fn alloc_key(size: usize) -> Result<Vec<u8>> {
    let mut key = Vec::new();
    if key.try_reserve_exact(size).is_err() {
        return Err(Error::OutOfMemory { size, what: "key" });
    }
    Ok(key)
}

const NIL_FIELD: u8 = 0xc0;

fn extract_sequential(key_def: &KeyDef, tuple: &Tuple) -> Result<Vec<u8>> {
    // the record already holds the key fields back to back
    extract_raw_sequential(key_def, tuple.data())
}

fn extract_raw_sequential(key_def: &KeyDef, data: &[u8]) -> Result<Vec<u8>> {
    let n = key_def.part_count();
    let (field_count, header_len) = record_header(data)?;
    let present = field_count.min(n);

    let mut fields = Fields::new(data)?;
    let mut end = header_len;
    for _ in 0..present {
        let field = fields
            .next()
            .ok_or_else(|| Error::corruption("record shorter than its header"))??;
        end += field.len();
    }
    for part in &key_def.parts[present as usize..] {
        if !part.is_nullable {
            return Err(missing_field(part.fieldno));
        }
    }

    let body = &data[header_len..end];
    let size = varint_size(u64::from(n)) + body.len() + (n - present) as usize;
    let mut key = alloc_key(size)?;
    put_varint(u64::from(n), &mut key);
    key.extend_from_slice(body);
    key.resize(size, NIL_FIELD);
    Ok(key)
}

fn extract_scattered(key_def: &KeyDef, tuple: &Tuple) -> Result<Vec<u8>> {
    let mut fields = Vec::with_capacity(key_def.parts.len());
    for part in &key_def.parts {
        fields.push(tuple.field(part.fieldno)?);
    }
    assemble(key_def, &fields)
}

fn extract_raw_scattered(key_def: &KeyDef, data: &[u8]) -> Result<Vec<u8>> {
    // part numbers by ascending field number: one pass over the record
    // picks up every part
    let mut wanted: Vec<usize> = (0..key_def.parts.len()).collect();
    wanted.sort_unstable_by_key(|partno| key_def.parts[*partno].fieldno);
    let mut wanted = wanted.into_iter().peekable();

    let mut fields: Vec<Option<&[u8]>> = vec![None; key_def.parts.len()];
    for (fieldno, field) in Fields::new(data)?.enumerate() {
        let Some(&partno) = wanted.peek() else {
            break;
        };
        let field = field?;
        if key_def.parts[partno].fieldno as usize == fieldno {
            fields[partno] = Some(field);
            wanted.next();
        }
    }
    assemble(key_def, &fields)
}

fn assemble(key_def: &KeyDef, fields: &[Option<&[u8]>]) -> Result<Vec<u8>> {
    let n = key_def.part_count();
    let mut size = varint_size(u64::from(n));
    for (part, field) in key_def.parts.iter().zip(fields) {
        match field {
            Some(field) => size += field.len(),
            None if part.is_nullable => size += 1,
            None => return Err(missing_field(part.fieldno)),
        }
    }
    let mut key = alloc_key(size)?;
    put_varint(u64::from(n), &mut key);
    for field in fields {
        match field {
            Some(field) => key.extend_from_slice(field),
            None => key.push(NIL_FIELD),
        }
    }
    Ok(key)
}

fn class_rank(value: &Value) -> u8 {
    match value {
        Value::Nil => 0,
        Value::Bool(_) => 1,
        Value::Unsigned(_) | Value::Integer(_) | Value::Double(_) => 2,
        Value::String(_) => 3,
        Value::Binary(_) => 4,
    }
}

/// Numbers order first by their nearest double, then by exact value.
/// This is exact numeric order, and it is what the sort key encodes.
fn number_key(value: &Value) -> (u64, i128) {
    let (approx, exact) = match *value {
        Value::Unsigned(u) => (u as f64, i128::from(u)),
        Value::Integer(i) => (i as f64, i128::from(i)),
        Value::Double(d) => {
            let exact = if d.is_finite() { d.trunc() as i128 } else { 0 };
            (d, exact)
        }
        _ => (0.0, 0),
    };
    (ordered_double_bits(approx), exact)
}

fn ordered_double_bits(d: f64) -> u64 {
    if d.is_nan() {
        return 0;
    }
    // -0.0 and 0.0 are the same key
    let bits = if d == 0.0 { 0_u64 } else { d.to_bits() };
    if bits & (1 << 63) != 0 { !bits } else { bits | (1 << 63) }
}

fn fold<'a>(collation: Collation, s: &'a str) -> std::borrow::Cow<'a, str> {
    match collation {
        Collation::Binary => std::borrow::Cow::Borrowed(s),
        Collation::UnicodeCi => std::borrow::Cow::Owned(s.to_lowercase()),
    }
}

fn compare_scalars(collation: Collation, a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (class_rank(a), class_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Nil, Value::Nil) => Ordering::Equal,
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        (Value::String(l), Value::String(r)) => {
            fold(collation, l).as_bytes().cmp(fold(collation, r).as_bytes())
        }
        (Value::Binary(l), Value::Binary(r)) => l.cmp(r),
        _ => number_key(a).cmp(&number_key(b)),
    }
}

fn put_escaped(bytes: &[u8], buf: &mut Vec<u8>) {
    for &byte in bytes {
        if byte == 0x00 {
            buf.extend_from_slice(&[0x00, 0xFF]);
        } else {
            buf.push(byte);
        }
    }
    buf.extend_from_slice(&[0x00, 0x00]);
}

fn encode_sort_part(part: &KeyPart, value: &Value, buf: &mut Vec<u8>) {
    let start = buf.len();
    match value {
        Value::Nil => buf.push(0x01),
        other => {
            buf.push(0x02);
            buf.push(class_rank(other) << 4);
            match other {
                Value::Bool(b) => buf.push(u8::from(*b)),
                Value::String(s) => {
                    put_escaped(fold(part.collation, s).as_bytes(), buf)
                }
                Value::Binary(b) => put_escaped(b, buf),
                number => {
                    let (approx, exact) = number_key(number);
                    buf.extend_from_slice(&approx.to_be_bytes());
                    let flipped = (exact as u128) ^ (1 << 127);
                    buf.extend_from_slice(&flipped.to_be_bytes());
                }
            }
        }
    }
    if part.sort_order == SortOrder::Desc {
        for byte in &mut buf[start..] {
            *byte = !*byte;
        }
    }
}

/// The smallest byte string greater than every string that starts with
/// `prefix`, or `None` when no such string exists.
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<InlineArray> {
    let mut ret = prefix.to_vec();
    while let Some(last) = ret.pop() {
        if last != 0xFF {
            ret.push(last + 1);
            return Some(InlineArray::from(&ret[..]));
        }
    }
    None
}
