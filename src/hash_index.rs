use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;
use std::ops::Bound;

use fnv::FnvHasher;
use inline_array::InlineArray;
use parking_lot::RwLock;

use crate::index::{Slots, check_iterator, replace_in_slots};
use crate::*;

/// An unordered unique index. Rows are bucketed by the fnv hash of
/// their key; the only order a scan follows is hash order.
pub struct HashIndex {
    def: IndexDef,
    space_name: String,
    buckets: RwLock<BTreeMap<InlineArray, Tuple>>,
}

impl fmt::Debug for HashIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashIndex")
            .field("space", &self.space_name)
            .field("index", &self.def.name)
            .field("len", &self.len())
            .finish()
    }
}

fn bucket_key(sort_key: &[u8]) -> InlineArray {
    let mut hasher = FnvHasher::default();
    hasher.write(sort_key);
    let mut buf = Vec::with_capacity(8 + sort_key.len());
    buf.extend_from_slice(&hasher.finish().to_be_bytes());
    buf.extend_from_slice(sort_key);
    InlineArray::from(&buf[..])
}

impl HashIndex {
    pub fn new(def: IndexDef, space_name: &str) -> HashIndex {
        HashIndex {
            def,
            space_name: space_name.to_owned(),
            buckets: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Slots for HashIndex {
    fn slot_key(&self, tuple: &Tuple) -> Result<InlineArray> {
        Ok(bucket_key(&self.def.key_def.tuple_sort_key(tuple)?))
    }

    fn slot_get(&self, key: &InlineArray) -> Option<Tuple> {
        self.buckets.read().get(key).cloned()
    }

    fn slot_insert(&self, key: InlineArray, tuple: Tuple) {
        self.buckets.write().insert(key, tuple);
    }

    fn slot_remove(&self, key: &InlineArray) -> Option<Tuple> {
        self.buckets.write().remove(key)
    }
}

impl Index for HashIndex {
    fn def(&self) -> &IndexDef {
        &self.def
    }

    fn storage_key_def(&self) -> &KeyDef {
        &self.def.key_def
    }

    fn is_ordered(&self) -> bool {
        false
    }

    fn len(&self) -> usize {
        self.buckets.read().len()
    }

    fn byte_size(&self) -> usize {
        self.buckets
            .read()
            .iter()
            .map(|(k, t)| k.len() + t.byte_size())
            .sum()
    }

    fn seek(&self, it: IteratorType, key: &[u8]) -> Result<Option<Position>> {
        check_iterator(&self.def, it, key)?;
        if it == IteratorType::All {
            let buckets = self.buckets.read();
            return Ok(buckets.iter().next().map(|(k, t)| Position {
                key: k.clone(),
                tuple: t.clone(),
                positional: true,
            }));
        }
        let key = bucket_key(&self.def.key_def.sort_key(key)?);
        let tuple = self.slot_get(&key);
        Ok(tuple.map(|tuple| Position { key, tuple, positional: false }))
    }

    fn step(
        &self,
        from: &InlineArray,
        direction: Direction,
    ) -> Result<Option<Position>> {
        let buckets = self.buckets.read();
        let found = match direction {
            Direction::Forward => buckets
                .range::<InlineArray, _>((Bound::Excluded(from), Bound::Unbounded))
                .next(),
            Direction::Backward => buckets.range::<InlineArray, _>(..from).next_back(),
        };
        Ok(found.map(|(k, t)| Position {
            key: k.clone(),
            tuple: t.clone(),
            positional: true,
        }))
    }

    fn at(&self, position: &InlineArray) -> Option<Position> {
        let tuple = self.slot_get(position)?;
        Some(Position { key: position.clone(), tuple, positional: true })
    }

    fn replace(
        &self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: DupMode,
    ) -> Result<Option<Tuple>> {
        replace_in_slots(self, &self.def, &self.space_name, old, new, mode)
    }

    fn truncate(&self) {
        self.buckets.write().clear();
    }

    fn tuples(&self) -> Vec<Tuple> {
        self.buckets.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> HashIndex {
        let key_def =
            KeyDef::new(vec![KeyPart::new(1, FieldType::String)]).unwrap();
        HashIndex::new(
            IndexDef::new(1, 1, "by_name", IndexType::Hash, key_def),
            "test",
        )
    }

    #[test]
    fn lookups_are_not_positional() {
        let index = index();
        let row = Tuple::from_raw(&record![1_u64, "a"]).unwrap();
        index.replace(None, Some(&row), DupMode::Insert).unwrap();

        let found = index.seek(IteratorType::Eq, &record!["a"]).unwrap().unwrap();
        assert_eq!(found.tuple, row);
        assert!(!found.is_positional());

        let scan = index.seek(IteratorType::All, &record![]).unwrap().unwrap();
        assert!(scan.is_positional());
        assert!(index.step(&scan.key, Direction::Forward).unwrap().is_none());
    }

    #[test]
    fn range_iterators_are_rejected() {
        let index = index();
        for it in [IteratorType::Ge, IteratorType::Lt, IteratorType::Req] {
            let err = index.seek(it, &record!["a"]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Misuse);
        }
        assert!(index.max().is_err());
    }
}
