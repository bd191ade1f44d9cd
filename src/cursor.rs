use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use inline_array::InlineArray;

use crate::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorState {
    /// No current row: before the first seek, on an empty result, or
    /// past either end.
    Invalid,
    /// Positioned on a row.
    Valid,
    /// The space this cursor reads was poisoned. Every operation
    /// returns the latched error.
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorHint {
    /// Only equality seeks will be issued.
    SeekEq,
    /// Inserts overwrite rows with the same key instead of failing.
    BulkLoad,
}

/// A position-tracking handle over one index of a space.
pub struct Cursor {
    space: Arc<Space>,
    index: Arc<dyn Index>,
    fault: FaultLatch,
    state: CursorState,
    position: Option<Position>,
    // key of the last Eq/Req seek, bounding steps
    eq_bound: Option<Vec<u8>>,
    saved_key: Option<InlineArray>,
    skip_next: bool,
    direction: Direction,
    seek_eq: bool,
    bulk_load: bool,
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("space", &self.space.name())
            .field("index", &self.index.def().name)
            .field("state", &self.state)
            .field("skip_next", &self.skip_next)
            .finish()
    }
}

impl Cursor {
    /// Opens a cursor over index `index_id` of `space`.
    pub fn open(space: &Arc<Space>, index_id: u32) -> Result<Cursor> {
        space.fault().check()?;
        let index = space.index_find(index_id)?;
        log::trace!("opening cursor on {}.{}", space.name(), index.def().name);
        Ok(Cursor::with_index(space.clone(), index))
    }

    /// Opens a cursor over the primary key of an ephemeral space. The
    /// space lives as long as the cursor.
    pub fn open_ephemeral(space: Space) -> Result<Cursor> {
        if !space.is_ephemeral() {
            return Err(Error::unsupported(format!(
                "space '{}' is not ephemeral",
                space.name()
            )));
        }
        let space = Arc::new(space);
        let index = space.primary_key()?;
        Ok(Cursor::with_index(space, index))
    }

    fn with_index(space: Arc<Space>, index: Arc<dyn Index>) -> Cursor {
        Cursor {
            fault: space.fault().clone(),
            space,
            index,
            state: CursorState::Invalid,
            position: None,
            eq_bound: None,
            saved_key: None,
            skip_next: false,
            direction: Direction::Forward,
            seek_eq: false,
            bulk_load: false,
        }
    }

    pub fn hint(&mut self, hint: CursorHint) {
        match hint {
            CursorHint::SeekEq => self.seek_eq = true,
            CursorHint::BulkLoad => self.bulk_load = true,
        }
    }

    pub fn state(&self) -> CursorState {
        if self.fault.is_set() { CursorState::Fault } else { self.state }
    }

    pub fn is_valid(&self) -> bool {
        self.state() == CursorState::Valid
    }

    pub fn space(&self) -> &Arc<Space> {
        &self.space
    }

    pub fn index(&self) -> &Arc<dyn Index> {
        &self.index
    }

    /// Fails with the latched fault, if any.
    fn check(&mut self) -> Result<()> {
        if let Err(e) = self.fault.check() {
            self.state = CursorState::Fault;
            self.position = None;
            return Err(e);
        }
        Ok(())
    }

    /// Checks a caller-supplied key against the index key definition.
    /// A malformed key is the caller's error, not the space's.
    fn check_key(&self, key: &[u8]) -> Result<()> {
        self.index.def().key_def.validate_key(key, true).map(|_| ())
    }

    /// Poisons every cursor of the space when stored data turns out to
    /// be unreadable.
    fn latch(&mut self, error: Error) -> Error {
        if matches!(error.kind(), ErrorKind::Corruption | ErrorKind::Fatal) {
            self.fault.set(error.clone());
            self.state = CursorState::Fault;
            self.position = None;
        }
        error
    }

    fn land(&mut self, found: Option<Position>) {
        self.skip_next = false;
        match found {
            Some(position) => {
                self.position = Some(position);
                self.state = CursorState::Valid;
            }
            None => self.invalidate(),
        }
    }

    fn invalidate(&mut self) {
        self.position = None;
        self.state = CursorState::Invalid;
    }

    fn current(&self) -> Result<&Position> {
        match (self.state, &self.position) {
            (CursorState::Valid, Some(position)) => Ok(position),
            _ => Err(Error::InvalidCursor),
        }
    }

    /// Whether a row is still inside the current equality bound.
    fn in_bound(&self, tuple: &Tuple) -> Result<bool> {
        match &self.eq_bound {
            None => Ok(true),
            Some(key) => Ok(self.index.def().key_def.compare_with_key(tuple, key)?
                == Ordering::Equal),
        }
    }

    /// Positions on the first row. Returns `true` if the index is empty.
    pub fn first(&mut self) -> Result<bool> {
        self.check()?;
        self.eq_bound = None;
        self.direction = Direction::Forward;
        let found = self
            .index
            .seek(IteratorType::All, &encode_record(&[]))
            .map_err(|e| self.latch(e))?;
        self.land(found);
        Ok(!self.is_valid())
    }

    /// Positions on the last row. Returns `true` if the index is empty.
    pub fn last(&mut self) -> Result<bool> {
        self.check()?;
        self.eq_bound = None;
        self.direction = Direction::Backward;
        let found = self
            .index
            .seek(IteratorType::Le, &encode_record(&[]))
            .map_err(|e| self.latch(e))?;
        self.land(found);
        Ok(!self.is_valid())
    }

    /// Positions on the first row an iteration of type `it` over `key`
    /// visits. Returns how that row compares with `key` (`Equal` when it
    /// matches every part given), or `Less` when no row qualifies.
    pub fn seek(&mut self, key: &[u8], it: IteratorType) -> Result<Ordering> {
        self.check()?;
        if self.seek_eq && !it.is_equality() {
            return Err(Error::unsupported(format!(
                "cursor is restricted to equality seeks, got {:?}",
                it
            )));
        }
        if let Err(e) = self.check_key(key) {
            self.invalidate();
            return Err(e);
        }
        self.eq_bound = if it.is_equality() { Some(key.to_vec()) } else { None };
        self.direction = it.direction();

        let found = self.index.seek(it, key).map_err(|e| self.latch(e))?;
        self.land(found);

        let Some(position) = &self.position else {
            return Ok(Ordering::Less);
        };
        let key_def = &self.index.def().key_def;
        match key_def.compare_with_key(&position.tuple, key) {
            Ok(ordering) => Ok(ordering),
            Err(e) => Err(self.latch(e)),
        }
    }

    /// Positions on the row nearest to `key`: the first row not below
    /// it, or the last row when every row is below it. Returns how the
    /// row compares with `key`.
    pub fn move_to(&mut self, key: &[u8]) -> Result<Ordering> {
        let ordering = self.seek(key, IteratorType::Ge)?;
        if self.is_valid() || self.index.is_empty() {
            return Ok(ordering);
        }
        self.last()?;
        Ok(if self.is_valid() { Ordering::Less } else { ordering })
    }

    fn advance(&mut self, direction: Direction) -> Result<bool> {
        self.check()?;
        if self.skip_next && self.direction == direction {
            self.skip_next = false;
            return Ok(!self.is_valid());
        }
        self.skip_next = false;
        self.direction = direction;

        let from = match (&self.position, self.state) {
            (Some(position), CursorState::Valid) => {
                if !position.positional {
                    return Err(Error::unsupported(format!(
                        "{} index {} can not step from a lookup",
                        self.index.def().index_type.name(),
                        self.index.def().name
                    )));
                }
                position.key.clone()
            }
            _ => return Ok(true),
        };

        let found = self.index.step(&from, direction).map_err(|e| self.latch(e))?;
        let found = match found {
            Some(position) => {
                let inside =
                    self.in_bound(&position.tuple).map_err(|e| self.latch(e))?;
                inside.then_some(position)
            }
            None => None,
        };
        self.land(found);
        Ok(!self.is_valid())
    }

    /// Moves to the next row. Returns `true` when the iteration is
    /// exhausted.
    pub fn next(&mut self) -> Result<bool> {
        self.advance(Direction::Forward)
    }

    /// Moves to the previous row. Returns `true` when the iteration is
    /// exhausted.
    pub fn previous(&mut self) -> Result<bool> {
        self.advance(Direction::Backward)
    }

    /// Copies `amount` bytes of the current record starting at `offset`.
    pub fn payload(&mut self, offset: usize, amount: usize) -> Result<Vec<u8>> {
        self.check()?;
        let data = self.current()?.tuple.data();
        let end = offset.checked_add(amount).filter(|end| *end <= data.len());
        let Some(end) = end else {
            return Err(Error::corruption(format!(
                "payload range {}+{} is outside a {} byte record",
                offset,
                amount,
                data.len()
            )));
        };

        let mut ret = Vec::new();
        ret.try_reserve_exact(amount)
            .map_err(|_| Error::OutOfMemory { size: amount, what: "payload" })?;
        ret.extend_from_slice(&data[offset..end]);
        Ok(ret)
    }

    /// The whole current record.
    pub fn payload_fetch(&mut self) -> Result<&[u8]> {
        self.check()?;
        Ok(self.current()?.tuple.data())
    }

    /// The current row.
    pub fn tuple(&mut self) -> Result<Tuple> {
        self.check()?;
        Ok(self.current()?.tuple.clone())
    }

    /// Decodes field `fieldno` of the current row.
    pub fn column(&mut self, fieldno: u32) -> Result<Option<Value>> {
        self.check()?;
        let tuple = self.current()?.tuple.clone();
        tuple.value(fieldno).map_err(|e| self.latch(e))
    }

    /// Compares the row under the cursor with a search key.
    pub fn key_compare(&mut self, key: &[u8]) -> Result<Ordering> {
        self.check()?;
        let tuple = self.current()?.tuple.clone();
        self.check_key(key)?;
        self.index
            .def()
            .key_def
            .compare_with_key(&tuple, key)
            .map_err(|e| self.latch(e))
    }

    /// Rows in the index.
    pub fn count(&mut self) -> Result<usize> {
        self.check()?;
        Ok(self.index.len())
    }

    /// Stores a row. Ephemeral spaces take rows without a transaction;
    /// other spaces run the insert as a statement of `txn`.
    pub fn insert(&mut self, txn: Option<&mut Txn>, data: &[u8]) -> Result<Tuple> {
        self.check()?;
        if self.space.is_ephemeral() {
            return self.space.ephemeral_replace(data);
        }
        let Some(txn) = txn else {
            return Err(Error::unsupported(
                "insert into a persistent space requires a transaction",
            ));
        };
        if self.bulk_load {
            txn.replace(&self.space, data)
        } else {
            txn.insert(&self.space, data)
        }
    }

    /// Deletes the current row. The cursor stays usable: the next step
    /// in the direction of travel visits the row after the deleted one.
    /// A cursor placed by a hash lookup has no neighbour and becomes
    /// invalid.
    pub fn delete(&mut self, txn: Option<&mut Txn>) -> Result<Option<Tuple>> {
        self.check()?;
        let tuple = self.current()?.tuple.clone();
        let key = self
            .space
            .primary_key()?
            .def()
            .key_def
            .extract_key(&tuple)
            .map_err(|e| self.latch(e))?;

        self.save_position()?;
        let removed = if self.space.is_ephemeral() {
            self.space.ephemeral_delete(&key)?
        } else {
            let Some(txn) = txn else {
                return Err(Error::unsupported(
                    "delete from a persistent space requires a transaction",
                ));
            };
            txn.delete(&self.space, &key)?
        };
        if self.saved_key.is_some() {
            self.restore_position()?;
        } else {
            self.invalidate();
        }
        Ok(removed)
    }

    /// Deletes every row of the space.
    pub fn clear_table(&mut self, txn: Option<&mut Txn>) -> Result<usize> {
        self.check()?;
        let pk = self.space.primary_key()?;
        let rows = pk.len();
        if self.space.is_ephemeral() {
            for index in self.space.indexes() {
                index.truncate();
            }
        } else {
            let Some(txn) = txn else {
                return Err(Error::unsupported(
                    "clearing a persistent space requires a transaction",
                ));
            };
            for tuple in pk.tuples() {
                let key =
                    pk.def().key_def.extract_key(&tuple).map_err(|e| self.latch(e))?;
                txn.delete(&self.space, &key)?;
            }
        }
        self.saved_key = None;
        self.invalidate();
        Ok(rows)
    }

    /// Remembers the current position so it can be found again after
    /// the row under it changes.
    pub fn save_position(&mut self) -> Result<()> {
        self.check()?;
        self.saved_key = match (&self.position, self.state) {
            (Some(position), CursorState::Valid) if position.positional => {
                Some(position.key.clone())
            }
            _ => None,
        };
        Ok(())
    }

    /// Returns to the saved position. If its row is gone, lands on the
    /// neighbour in the direction of travel and arms the skip flag so
    /// the next step does not pass over it.
    pub fn restore_position(&mut self) -> Result<()> {
        self.check()?;
        let Some(saved) = self.saved_key.take() else {
            return Ok(());
        };

        if let Some(position) = self.index.at(&saved) {
            self.land(Some(position));
            return Ok(());
        }

        let found = self
            .index
            .step(&saved, self.direction)
            .map_err(|e| self.latch(e))?;
        let found = match found {
            Some(position) => {
                let inside =
                    self.in_bound(&position.tuple).map_err(|e| self.latch(e))?;
                inside.then_some(position)
            }
            None => None,
        };
        self.land(found);
        self.skip_next = self.is_valid();
        Ok(())
    }

    pub fn close(self) {
        log::trace!(
            "closing cursor on {}.{}",
            self.space.name(),
            self.index.def().name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(rows: &[u64]) -> Cursor {
        let key_def =
            KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)]).unwrap();
        let space =
            Space::ephemeral(Arc::new(MemoryEngine::default()), 0, key_def).unwrap();
        for id in rows {
            space.ephemeral_replace(&record![*id]).unwrap();
        }
        Cursor::open_ephemeral(space).unwrap()
    }

    fn id(cursor: &mut Cursor) -> u64 {
        cursor.column(0).unwrap().unwrap().as_u64().unwrap()
    }

    #[test]
    fn reads_require_a_row() {
        let mut cursor = cursor(&[]);
        assert_eq!(cursor.state(), CursorState::Invalid);
        assert_eq!(cursor.payload_fetch().unwrap_err(), Error::InvalidCursor);
        assert!(cursor.first().unwrap());
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.seek(&record![1_u64], IteratorType::Ge).unwrap(), Ordering::Less);
    }

    #[test]
    fn move_to_reports_nearest() {
        let mut cursor = cursor(&[10, 20]);
        assert_eq!(cursor.move_to(&record![15_u64]).unwrap(), Ordering::Greater);
        assert_eq!(id(&mut cursor), 20);
        assert_eq!(cursor.move_to(&record![25_u64]).unwrap(), Ordering::Less);
        assert_eq!(id(&mut cursor), 20);
        assert_eq!(cursor.move_to(&record![10_u64]).unwrap(), Ordering::Equal);
        assert_eq!(id(&mut cursor), 10);
    }

    #[test]
    fn delete_keeps_iteration_going() {
        let mut cursor = cursor(&[1, 2, 3, 4]);
        assert!(!cursor.first().unwrap());
        let mut seen = vec![];
        while cursor.is_valid() {
            let current = id(&mut cursor);
            seen.push(current);
            if current % 2 == 0 {
                cursor.delete(None).unwrap();
            }
            cursor.next().unwrap();
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(cursor.count().unwrap(), 2);
    }

    #[test]
    fn payload_is_bounds_checked() {
        let mut cursor = cursor(&[7]);
        cursor.first().unwrap();
        let data = cursor.payload_fetch().unwrap().to_vec();
        assert_eq!(cursor.payload(1, data.len() - 1).unwrap(), data[1..].to_vec());
        assert_eq!(
            cursor.payload(1, data.len()).unwrap_err().kind(),
            ErrorKind::Corruption
        );
        // a caller asking for too much does not poison the space
        assert!(cursor.is_valid());
    }

    #[test]
    fn seek_eq_hint_refuses_ranges() {
        let mut cursor = cursor(&[1]);
        cursor.hint(CursorHint::SeekEq);
        assert!(matches!(
            cursor.seek(&record![1_u64], IteratorType::Gt),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(cursor.seek(&record![1_u64], IteratorType::Eq).unwrap(), Ordering::Equal);
    }
}
