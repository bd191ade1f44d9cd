use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::record::{Fields, record_header, skip_field};
use crate::*;

/// The declared type of a field or key part.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum FieldType {
    Any,
    Unsigned,
    Integer,
    Number,
    String,
    Binary,
    Boolean,
    Scalar,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Any => "any",
            FieldType::Unsigned => "unsigned",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::Binary => "varbinary",
            FieldType::Boolean => "boolean",
            FieldType::Scalar => "scalar",
        }
    }

    /// Whether a non-nil `value` may be stored in a field of this type.
    /// Nil is governed by nullability, not by the type.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Any, _) => true,
            (_, Value::Nil) => false,
            (FieldType::Scalar, _) => true,
            (FieldType::Unsigned, Value::Unsigned(_)) => true,
            (
                FieldType::Integer,
                Value::Unsigned(_) | Value::Integer(_),
            ) => true,
            (
                FieldType::Number,
                Value::Unsigned(_) | Value::Integer(_) | Value::Double(_),
            ) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Binary, Value::Binary(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            _ => false,
        }
    }

    /// Whether every value accepted by `old` is accepted by `self`.
    pub fn is_compatible_with(self, old: FieldType) -> bool {
        use FieldType::*;

        match (old, self) {
            (old, new) if old == new => true,
            (_, Any) => true,
            (Any, _) => false,
            (_, Scalar) => true,
            (Unsigned, Integer | Number) => true,
            (Integer, Number) => true,
            _ => false,
        }
    }
}

/// A declared field of a space format.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub is_nullable: bool,
}

impl FieldDef {
    pub fn new<S: Into<String>>(name: S, field_type: FieldType) -> FieldDef {
        FieldDef { name: name.into(), field_type, is_nullable: false }
    }

    pub fn nullable(mut self) -> FieldDef {
        self.is_nullable = true;
        self
    }
}

const NO_SLOT: u32 = u32::MAX;

/// Describes the shape tuples of a space must have, and which fields
/// get an O(1) offset slot in every tuple's field map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TupleFormat {
    fields: Vec<FieldDef>,
    exact_field_count: u32,
    /// fieldno -> slot in the field map, `NO_SLOT` when absent.
    slots: Vec<u32>,
    slot_count: u32,
}

impl TupleFormat {
    /// Builds a format. Every field referenced by one of `keys` gets a
    /// field-map slot.
    pub fn new<'a, I>(
        fields: Vec<FieldDef>,
        exact_field_count: u32,
        keys: I,
    ) -> TupleFormat
    where
        I: IntoIterator<Item = &'a KeyDef>,
    {
        let mut slots: Vec<u32> = vec![];
        let mut slot_count = 0;
        for key_def in keys {
            for part in key_def.parts() {
                let fieldno = part.fieldno as usize;
                if slots.len() <= fieldno {
                    slots.resize(fieldno + 1, NO_SLOT);
                }
                if slots[fieldno] == NO_SLOT {
                    slots[fieldno] = slot_count;
                    slot_count += 1;
                }
            }
        }
        TupleFormat { fields, exact_field_count, slots, slot_count }
    }

    /// A format that checks nothing and has no field map.
    pub fn empty() -> TupleFormat {
        TupleFormat::default()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn exact_field_count(&self) -> u32 {
        self.exact_field_count
    }

    fn slot(&self, fieldno: u32) -> Option<usize> {
        match self.slots.get(fieldno as usize) {
            Some(&slot) if slot != NO_SLOT => Some(slot as usize),
            _ => None,
        }
    }

    fn min_field_count(&self) -> u32 {
        self.fields
            .iter()
            .rposition(|f| !f.is_nullable)
            .map_or(0, |pos| pos as u32 + 1)
    }

    /// Checks an already decoded value against the declared field.
    pub(crate) fn check_field(&self, fieldno: u32, value: &Value) -> Result<()> {
        let Some(def) = self.fields.get(fieldno as usize) else {
            return Ok(());
        };
        if value.is_nil() {
            if def.is_nullable || def.field_type == FieldType::Any {
                return Ok(());
            }
        } else if def.field_type.accepts(value) {
            return Ok(());
        }
        Err(Error::FieldTypeMismatch {
            fieldno,
            expected: def.field_type.name(),
            found: value.type_name(),
        })
    }
}

/// An immutable, cheaply cloneable encoded row.
#[derive(Clone)]
pub struct Tuple(Arc<TupleInner>);

struct TupleInner {
    data: Box<[u8]>,
    field_count: u32,
    field_map: Box<[u32]>,
    format: Arc<TupleFormat>,
}

impl Tuple {
    /// Validates `data` against `format` and builds its field map.
    pub fn new(format: &Arc<TupleFormat>, data: &[u8]) -> Result<Tuple> {
        let (field_count, _) = record_header(data)?;

        if format.exact_field_count != 0
            && field_count != format.exact_field_count
        {
            return Err(Error::unsupported(format!(
                "tuple field count {} does not match space field count {}",
                field_count, format.exact_field_count
            )));
        }
        if field_count < format.min_field_count() {
            return Err(Error::unsupported(format!(
                "tuple field count {} is less than required by space format {}",
                field_count,
                format.min_field_count()
            )));
        }

        let mut field_map = vec![0; format.slot_count as usize];
        let mut fields = Fields::new(data)?;
        let mut fieldno = 0;
        while let Some(field) = fields.next() {
            let field = field?;
            if let Some(slot) = format.slot(fieldno) {
                field_map[slot] = (field.as_ptr() as usize
                    - data.as_ptr() as usize)
                    as u32;
            }
            if (fieldno as usize) < format.fields.len() {
                format.check_field(fieldno, &Value::decode(field)?)?;
            }
            fieldno += 1;
        }
        debug_assert_eq!(fields.remaining(), 0);

        // slots for fields beyond the end of the record stay unset
        for slot_fieldno in field_count..format.slots.len() as u32 {
            if let Some(slot) = format.slot(slot_fieldno) {
                field_map[slot] = NO_SLOT;
            }
        }

        Ok(Tuple(Arc::new(TupleInner {
            data: data.into(),
            field_count,
            field_map: field_map.into_boxed_slice(),
            format: format.clone(),
        })))
    }

    /// Builds a tuple with no format: only the record structure is
    /// checked and there is no field map.
    pub fn from_raw(data: &[u8]) -> Result<Tuple> {
        Tuple::new(&Arc::new(TupleFormat::empty()), data)
    }

    /// Encodes `values` and builds a tuple with no format.
    pub fn from_values(values: &[Value]) -> Result<Tuple> {
        Tuple::from_raw(&encode_record(values))
    }

    pub fn data(&self) -> &[u8] {
        &self.0.data
    }

    pub fn field_count(&self) -> u32 {
        self.0.field_count
    }

    pub fn format(&self) -> &Arc<TupleFormat> {
        &self.0.format
    }

    /// Bytes accounted to this tuple in space size statistics.
    pub fn byte_size(&self) -> usize {
        self.0.data.len() + self.0.field_map.len() * 4
    }

    /// Returns the encoded bytes of field `fieldno`, or `None` when the
    /// record is shorter than that.
    pub fn field(&self, fieldno: u32) -> Result<Option<&[u8]>> {
        if fieldno >= self.0.field_count {
            return Ok(None);
        }
        if let Some(field) = self.field_by_map(fieldno)? {
            return Ok(Some(field));
        }
        self.field_by_scan(fieldno)
    }

    /// O(1) lookup through the field map. `None` means the format gave
    /// this field no slot, not that the field is absent.
    pub fn field_by_map(&self, fieldno: u32) -> Result<Option<&[u8]>> {
        let Some(slot) = self.0.format.slot(fieldno) else {
            return Ok(None);
        };
        let offset = self.0.field_map[slot];
        if offset == NO_SLOT {
            return Ok(None);
        }
        let start = &self.0.data[offset as usize..];
        let mut rest = start;
        skip_field(&mut rest)?;
        Ok(Some(&start[..start.len() - rest.len()]))
    }

    /// O(n) lookup by walking the record.
    pub fn field_by_scan(&self, fieldno: u32) -> Result<Option<&[u8]>> {
        match Fields::new(&self.0.data)?.nth(fieldno as usize) {
            Some(field) => Ok(Some(field?)),
            None => Ok(None),
        }
    }

    /// Decodes field `fieldno`.
    pub fn value(&self, fieldno: u32) -> Result<Option<Value>> {
        match self.field(fieldno)? {
            Some(field) => Ok(Some(Value::decode(field)?)),
            None => Ok(None),
        }
    }

    pub fn to_values(&self) -> Result<Vec<Value>> {
        decode_record(&self.0.data)
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Tuple) -> bool {
        self.0.data == other.0.data
    }
}

impl Eq for Tuple {}

impl Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_values() {
            Ok(values) => {
                write!(f, "Tuple[")?;
                for (i, v) in values.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Err(_) => write!(f, "Tuple(<corrupt {} bytes>)", self.0.data.len()),
        }
    }
}
