use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use fnv::FnvHashMap;
use parking_lot::RwLock;

use crate::*;

/// Bits of a root page holding the index id.
const INDEX_ID_BITS: u32 = 10;

/// How the executor addresses an index: space id and index id packed
/// into one integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RootPage(u32);

impl RootPage {
    pub fn new(space_id: u32, index_id: u32) -> Result<RootPage> {
        if index_id >= 1 << INDEX_ID_BITS || space_id >= 1 << (32 - INDEX_ID_BITS) {
            return Err(Error::unsupported(format!(
                "space {} index {} does not fit a root page",
                space_id, index_id
            )));
        }
        Ok(RootPage(space_id << INDEX_ID_BITS | index_id))
    }

    pub fn from_raw(raw: u32) -> RootPage {
        RootPage(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn space_id(self) -> u32 {
        self.0 >> INDEX_ID_BITS
    }

    pub fn index_id(self) -> u32 {
        self.0 & ((1 << INDEX_ID_BITS) - 1)
    }
}

#[derive(Default)]
struct Registry {
    by_id: FnvHashMap<u32, Arc<Space>>,
    by_name: FnvHashMap<String, u32>,
}

/// The published spaces, by id and by name. Replacing a space is a
/// single swap under the write lock.
#[derive(Default)]
pub struct Schema {
    registry: RwLock<Registry>,
    version: AtomicU64,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("spaces", &self.len())
            .field("version", &self.version())
            .finish()
    }
}

impl Schema {
    /// Bumped by every change to the set of published spaces.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.registry.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn space(&self, id: u32) -> Result<Arc<Space>> {
        self.registry
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(Error::NoSuchSpace(id))
    }

    pub fn space_by_name(&self, name: &str) -> Result<Arc<Space>> {
        let registry = self.registry.read();
        registry
            .by_name
            .get(name)
            .and_then(|id| registry.by_id.get(id))
            .cloned()
            .ok_or_else(|| Error::NoSuchSpaceName(name.to_owned()))
    }

    /// Fails if a space with the id or name of `def` is registered.
    pub fn check_vacant(&self, def: &SpaceDef) -> Result<()> {
        let registry = self.registry.read();
        if registry.by_id.contains_key(&def.id) || registry.by_name.contains_key(&def.name) {
            return Err(Error::SpaceExists(def.name.clone()));
        }
        Ok(())
    }

    /// Publishes a new space.
    pub fn insert(&self, space: Arc<Space>) -> Result<()> {
        let mut registry = self.registry.write();
        if registry.by_id.contains_key(&space.id())
            || registry.by_name.contains_key(space.name())
        {
            return Err(Error::SpaceExists(space.name().to_owned()));
        }
        registry.by_name.insert(space.name().to_owned(), space.id());
        registry.by_id.insert(space.id(), space);
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Publishes `space` in place of the space with its id, returning
    /// the one it displaced.
    pub fn replace(&self, space: Arc<Space>) -> Option<Arc<Space>> {
        let mut registry = self.registry.write();
        let old = registry.by_id.insert(space.id(), space.clone());
        if let Some(old) = &old {
            registry.by_name.remove(old.name());
        }
        registry.by_name.insert(space.name().to_owned(), space.id());
        self.version.fetch_add(1, Ordering::AcqRel);
        old
    }

    pub fn remove(&self, id: u32) -> Result<Arc<Space>> {
        let mut registry = self.registry.write();
        let space = registry.by_id.remove(&id).ok_or(Error::NoSuchSpace(id))?;
        registry.by_name.remove(space.name());
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(space)
    }

    /// Ids of every published space, ascending.
    pub fn space_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.registry.read().by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Extracts the key of index `index_id` of space `space_id` from an
    /// encoded row.
    pub fn tuple_extract_key(
        &self,
        data: &[u8],
        space_id: u32,
        index_id: u32,
    ) -> Result<Vec<u8>> {
        let space = self.space(space_id)?;
        let index = space.index_find(index_id)?;
        index.def().key_def.extract_key_raw(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_pages_pack_both_ids() {
        let page = RootPage::new(512, 3).unwrap();
        assert_eq!(page.raw(), 512 << 10 | 3);
        assert_eq!(page.space_id(), 512);
        assert_eq!(page.index_id(), 3);
        assert_eq!(RootPage::from_raw(page.raw()), page);
        assert!(RootPage::new(1, 1024).is_err());
        assert!(RootPage::new(1 << 22, 0).is_err());
    }

    #[test]
    fn names_follow_replacement() {
        let schema = Schema::default();
        let engine: Arc<dyn SpaceEngine> = Arc::new(MemoryEngine::default());
        let space = |name: &str| {
            Arc::new(Space::new(SpaceDef::new(7, name), engine.clone(), &[], 64).unwrap())
        };

        schema.insert(space("a")).unwrap();
        assert_eq!(schema.insert(space("a")), Err(Error::SpaceExists("a".to_owned())));
        let version = schema.version();

        let old = schema.replace(space("b")).unwrap();
        assert_eq!(old.name(), "a");
        assert!(schema.version() > version);
        assert!(schema.space_by_name("a").is_err());
        assert_eq!(schema.space_by_name("b").unwrap().id(), 7);

        schema.remove(7).unwrap();
        assert_eq!(schema.space(7).unwrap_err(), Error::NoSuchSpace(7));
        assert!(schema.is_empty());
    }
}
