use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use concurrent_map::ConcurrentMap;
use inline_array::InlineArray;
use parking_lot::Mutex;

use crate::index::{Slots, check_iterator, replace_in_slots};
use crate::key_def::prefix_successor;
use crate::*;

type Map = ConcurrentMap<InlineArray, Tuple>;

/// An ordered index. Entries live in a lock-free b+ tree keyed by the
/// order-preserving sort key of each row.
pub struct TreeIndex {
    def: IndexDef,
    space_name: String,
    storage_key_def: KeyDef,
    // a map handle may not be shared between threads, so every
    // operation works on its own clone of this one
    map: Mutex<Map>,
    len: AtomicUsize,
    bytes: AtomicUsize,
}

impl fmt::Debug for TreeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeIndex")
            .field("space", &self.space_name)
            .field("index", &self.def.name)
            .field("len", &self.len())
            .finish()
    }
}

impl TreeIndex {
    pub fn new(def: IndexDef, space_name: &str, pk: &KeyDef) -> TreeIndex {
        let storage_key_def = def.storage_key_def(pk);
        TreeIndex {
            def,
            space_name: space_name.to_owned(),
            storage_key_def,
            map: Mutex::new(ConcurrentMap::default()),
            len: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
        }
    }

    fn map(&self) -> Map {
        self.map.lock().clone()
    }

    fn position(&self, (key, tuple): (InlineArray, Tuple)) -> Position {
        Position { key, tuple, positional: true }
    }

    fn matching(
        &self,
        candidate: Option<(InlineArray, Tuple)>,
        target: &[u8],
    ) -> Option<Position> {
        candidate
            .filter(|(key, _)| key.starts_with(target))
            .map(|kv| self.position(kv))
    }

    fn last_below_successor(&self, target: &[u8]) -> Option<(InlineArray, Tuple)> {
        if target.is_empty() {
            return self.map().last();
        }
        match prefix_successor(target) {
            Some(successor) => self.map().get_lt(&successor),
            None => self.map().last(),
        }
    }
}

impl Slots for TreeIndex {
    fn slot_key(&self, tuple: &Tuple) -> Result<InlineArray> {
        self.storage_key_def.tuple_sort_key(tuple)
    }

    fn slot_get(&self, key: &InlineArray) -> Option<Tuple> {
        self.map().get(key)
    }

    fn slot_insert(&self, key: InlineArray, tuple: Tuple) {
        let key_size = key.len();
        let tuple_size = tuple.byte_size();
        match self.map().insert(key, tuple) {
            Some(previous) => {
                // same key, only the row changed
                self.bytes.fetch_add(tuple_size, Ordering::Relaxed);
                self.bytes.fetch_sub(previous.byte_size(), Ordering::Relaxed);
            }
            None => {
                self.len.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(key_size + tuple_size, Ordering::Relaxed);
            }
        }
    }

    fn slot_remove(&self, key: &InlineArray) -> Option<Tuple> {
        let removed = self.map().remove(key)?;
        self.len.fetch_sub(1, Ordering::Relaxed);
        self.bytes
            .fetch_sub(key.len() + removed.byte_size(), Ordering::Relaxed);
        Some(removed)
    }
}

impl Index for TreeIndex {
    fn def(&self) -> &IndexDef {
        &self.def
    }

    fn storage_key_def(&self) -> &KeyDef {
        &self.storage_key_def
    }

    fn is_ordered(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    fn byte_size(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    fn seek(&self, it: IteratorType, key: &[u8]) -> Result<Option<Position>> {
        check_iterator(&self.def, it, key)?;
        let target = self.def.key_def.sort_key(key)?;

        let found = match it {
            IteratorType::Eq => {
                return Ok(self.matching(self.map().get_gte(&target), &target));
            }
            IteratorType::Req => {
                return Ok(
                    self.matching(self.last_below_successor(&target), &target)
                );
            }
            IteratorType::All | IteratorType::Ge => self.map().get_gte(&target),
            IteratorType::Gt if target.is_empty() => self.map().first(),
            IteratorType::Gt => match prefix_successor(&target) {
                Some(successor) => self.map().get_gte(&successor),
                None => None,
            },
            IteratorType::Le => self.last_below_successor(&target),
            IteratorType::Lt if target.is_empty() => self.map().last(),
            IteratorType::Lt => self.map().get_lt(&target),
        };

        Ok(found.map(|kv| self.position(kv)))
    }

    fn step(
        &self,
        from: &InlineArray,
        direction: Direction,
    ) -> Result<Option<Position>> {
        let found = match direction {
            Direction::Forward => self.map().get_gt(from),
            Direction::Backward => self.map().get_lt(from),
        };
        Ok(found.map(|kv| self.position(kv)))
    }

    fn at(&self, position: &InlineArray) -> Option<Position> {
        let tuple = self.map().get(position)?;
        Some(Position { key: position.clone(), tuple, positional: true })
    }

    fn replace(
        &self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: DupMode,
    ) -> Result<Option<Tuple>> {
        log::trace!(
            "{}.{} replace old: {:?} new: {:?}",
            self.space_name,
            self.def.name,
            old,
            new
        );
        replace_in_slots(self, &self.def, &self.space_name, old, new, mode)
    }

    fn truncate(&self) {
        let keys: Vec<InlineArray> = self.map().iter().map(|(k, _)| k).collect();
        for key in &keys {
            self.slot_remove(key);
        }
    }

    fn tuples(&self) -> Vec<Tuple> {
        self.map().iter().map(|(_, tuple)| tuple).collect()
    }
}
