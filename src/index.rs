use std::cmp::Ordering;
use std::fmt::Debug;

use inline_array::InlineArray;

use crate::record::record_header;
use crate::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    Tree,
    Hash,
}

impl IndexType {
    pub fn name(self) -> &'static str {
        match self {
            IndexType::Tree => "TREE",
            IndexType::Hash => "HASH",
        }
    }
}

/// The definition of one index of a space.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub space_id: u32,
    pub id: u32,
    pub name: String,
    pub index_type: IndexType,
    pub is_unique: bool,
    pub key_def: KeyDef,
}

impl IndexDef {
    pub fn new<S: Into<String>>(
        space_id: u32,
        id: u32,
        name: S,
        index_type: IndexType,
        key_def: KeyDef,
    ) -> IndexDef {
        IndexDef {
            space_id,
            id,
            name: name.into(),
            index_type,
            is_unique: true,
            key_def,
        }
    }

    pub fn non_unique(mut self) -> IndexDef {
        self.is_unique = false;
        self
    }

    pub fn is_primary(&self) -> bool {
        self.id == 0
    }

    /// The key entries are stored under: the index key itself for
    /// unique indexes, extended with the primary key otherwise.
    pub fn storage_key_def(&self, pk: &KeyDef) -> KeyDef {
        if self.is_unique {
            self.key_def.clone()
        } else {
            self.key_def.merge(pk)
        }
    }
}

/// How a seek positions and which rows an iteration visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IteratorType {
    /// Rows equal to the key, forward.
    Eq,
    /// Rows equal to the key, backward.
    Req,
    /// Every row, forward from the key if one is given.
    All,
    Lt,
    Le,
    Ge,
    Gt,
}

impl IteratorType {
    pub fn direction(self) -> Direction {
        match self {
            IteratorType::Eq
            | IteratorType::All
            | IteratorType::Ge
            | IteratorType::Gt => Direction::Forward,
            IteratorType::Req | IteratorType::Lt | IteratorType::Le => {
                Direction::Backward
            }
        }
    }

    /// Whether rows past the first mismatch are outside the iteration.
    pub fn is_equality(self) -> bool {
        matches!(self, IteratorType::Eq | IteratorType::Req)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

/// What `Index::replace` does when the new key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DupMode {
    /// Fail with `DuplicateKey`, leaving the index untouched.
    Insert,
    /// Overwrite the existing row.
    ReplaceOrInsert,
}

/// A row an index is positioned on. `key` is the index-internal
/// position of the row and stays usable for stepping after the row
/// itself is gone.
#[derive(Debug, Clone)]
pub struct Position {
    pub(crate) key: InlineArray,
    pub tuple: Tuple,
    /// False for positions produced by hashed point lookups, which
    /// cannot be stepped from.
    pub(crate) positional: bool,
}

impl Position {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn is_positional(&self) -> bool {
        self.positional
    }
}

/// A physical index. Every engine index is reached only through this
/// interface.
pub trait Index: Send + Sync + Debug {
    fn def(&self) -> &IndexDef;

    /// The key entries are ordered and deduplicated by.
    fn storage_key_def(&self) -> &KeyDef;

    fn is_ordered(&self) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn byte_size(&self) -> usize;

    /// Positions on the first row an iteration of type `it` over `key`
    /// visits.
    fn seek(&self, it: IteratorType, key: &[u8]) -> Result<Option<Position>>;

    /// The neighbour of a position in `direction`. The position need not
    /// hold a live row.
    fn step(
        &self,
        from: &InlineArray,
        direction: Direction,
    ) -> Result<Option<Position>>;

    /// The row stored exactly at an internal position, if any.
    fn at(&self, position: &InlineArray) -> Option<Position>;

    /// Inserts `new`, removes `old`, or both. Returns the row the index
    /// no longer holds.
    fn replace(
        &self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: DupMode,
    ) -> Result<Option<Tuple>>;

    /// Drops every row.
    fn truncate(&self);

    /// Every row in index order.
    fn tuples(&self) -> Vec<Tuple>;

    /// Exact lookup by a full key of a unique index.
    fn get(&self, key: &[u8]) -> Result<Option<Tuple>> {
        let def = self.def();
        if !def.is_unique {
            return Err(Error::MoreThanOneTuple);
        }
        def.key_def.validate_key(key, false)?;
        Ok(self.seek(IteratorType::Eq, key)?.map(|p| p.tuple))
    }

    fn min(&self) -> Result<Option<Tuple>> {
        Ok(self.seek(IteratorType::All, &encode_record(&[]))?.map(|p| p.tuple))
    }

    fn max(&self) -> Result<Option<Tuple>> {
        if !self.is_ordered() {
            return Err(Error::unsupported(format!(
                "{} index does not support max",
                self.def().index_type.name()
            )));
        }
        Ok(self.seek(IteratorType::Le, &encode_record(&[]))?.map(|p| p.tuple))
    }

    /// Counts the rows an iteration of type `it` over `key` visits.
    fn count(&self, it: IteratorType, key: &[u8]) -> Result<usize> {
        if it == IteratorType::All && record_header(key)?.0 == 0 {
            return Ok(self.len());
        }
        let direction = it.direction();
        let mut ret = 0;
        let mut cursor = self.seek(it, key)?;
        while let Some(position) = cursor {
            if it.is_equality()
                && self.def().key_def.compare_with_key(&position.tuple, key)?
                    != Ordering::Equal
            {
                break;
            }
            ret += 1;
            if !position.positional {
                break;
            }
            cursor = self.step(&position.key, direction)?;
        }
        Ok(ret)
    }
}

/// Key-addressed row storage shared by the index implementations.
pub(crate) trait Slots {
    fn slot_key(&self, tuple: &Tuple) -> Result<InlineArray>;
    fn slot_get(&self, key: &InlineArray) -> Option<Tuple>;
    fn slot_insert(&self, key: InlineArray, tuple: Tuple);
    fn slot_remove(&self, key: &InlineArray) -> Option<Tuple>;
}

pub(crate) fn replace_in_slots<S: Slots>(
    slots: &S,
    def: &IndexDef,
    space_name: &str,
    old: Option<&Tuple>,
    new: Option<&Tuple>,
    mode: DupMode,
) -> Result<Option<Tuple>> {
    let new_key = new.map(|t| slots.slot_key(t)).transpose()?;
    let old_key = old.map(|t| slots.slot_key(t)).transpose()?;

    let mut displaced = None;
    if let Some(key) = &new_key {
        if let Some(existing) = slots.slot_get(key) {
            let is_old = old.is_some_and(|o| *o == existing);
            if !is_old && mode == DupMode::Insert {
                return Err(Error::DuplicateKey {
                    index: def.name.clone(),
                    space: space_name.to_owned(),
                });
            }
            displaced = Some(existing);
        }
    }

    if let Some(key) = &old_key {
        if new_key.as_ref() != Some(key) {
            if let Some(removed) = slots.slot_remove(key) {
                displaced = displaced.or(Some(removed));
            }
        }
    }

    if let (Some(key), Some(tuple)) = (new_key, new) {
        slots.slot_insert(key, tuple.clone());
    }

    Ok(displaced)
}

/// Rejects iterator types an index cannot serve and checks the key.
pub(crate) fn check_iterator(
    def: &IndexDef,
    it: IteratorType,
    key: &[u8],
) -> Result<u32> {
    let part_count = def.key_def.validate_key(key, true)?;
    match def.index_type {
        IndexType::Tree => Ok(part_count),
        IndexType::Hash => match it {
            IteratorType::All => Ok(part_count),
            IteratorType::Eq if part_count == def.key_def.part_count() => {
                Ok(part_count)
            }
            IteratorType::Eq => Err(Error::unsupported(
                "HASH index supports only full-key equality lookups",
            )),
            other => Err(Error::unsupported(format!(
                "HASH index does not support iterator type {:?}",
                other
            ))),
        },
    }
}
