use std::sync::Arc;

use parking_lot::Mutex;

use crate::alter::DdlGuard;
use crate::*;

/// An open database: the schema cache, the engines spaces are built on,
/// and the identifier checker every new name passes through.
pub struct Database {
    config: Config,
    schema: Schema,
    memtx: Arc<MemoryEngine>,
    // opened on first use so memory-only databases never touch the disk
    journal: Mutex<Option<Arc<DiskEngine>>>,
    identifiers: IdentifierChecker,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.config.get_path())
            .field("schema", &self.schema)
            .finish()
    }
}

impl Database {
    pub(crate) fn new(config: Config) -> Database {
        Database {
            memtx: Arc::new(MemoryEngine::new(&config)),
            journal: Mutex::new(None),
            identifiers: IdentifierChecker::default(),
            schema: Schema::default(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn identifiers(&self) -> &IdentifierChecker {
        &self.identifiers
    }

    /// The engine called `name`, or the configured default for an empty
    /// name.
    pub fn engine(&self, name: &str) -> Result<Arc<dyn SpaceEngine>> {
        let name = if name.is_empty() {
            self.config.get_default_engine()
        } else {
            name.to_owned()
        };
        match name.as_str() {
            MemoryEngine::NAME => Ok(self.memtx.clone()),
            DiskEngine::NAME => {
                let mut journal = self.journal.lock();
                if let Some(engine) = &*journal {
                    return Ok(engine.clone());
                }
                let engine = Arc::new(DiskEngine::open(&self.config)?);
                *journal = Some(engine.clone());
                Ok(engine)
            }
            other => Err(Error::unsupported(format!("unknown engine '{}'", other))),
        }
    }

    /// Creates and publishes a space. Spaces of the journal engine
    /// recover their rows from a journal left by an earlier run.
    pub fn create_space(
        &self,
        mut def: SpaceDef,
        index_defs: &[IndexDef],
    ) -> Result<Arc<Space>> {
        self.identifiers.check(&def.name)?;
        for index_def in index_defs {
            self.identifiers.check(&index_def.name)?;
        }
        self.schema.check_vacant(&def)?;

        let engine = self.engine(&def.engine)?;
        def.engine = engine.name().to_owned();

        let space = Arc::new(Space::new(
            def,
            engine,
            index_defs,
            self.config.get_max_tuple_size(),
        )?);
        self.schema.insert(space.clone())?;
        log::info!(
            "created space {} #{} on {} with {} indexes",
            space.name(),
            space.id(),
            space.engine().name(),
            space.index_count()
        );
        Ok(space)
    }

    /// A transient in-memory space with a single tree key. It is not
    /// registered anywhere.
    pub fn create_ephemeral_space(
        &self,
        field_count: u32,
        key_def: KeyDef,
    ) -> Result<Space> {
        Space::ephemeral(self.memtx.clone(), field_count, key_def)
    }

    /// Unpublishes a space and releases its rows, journal included.
    /// Cursors and transactions still holding it fail from now on.
    pub fn drop_space(&self, id: u32, user: u32) -> Result<()> {
        let space = self.schema.space(id)?;
        space.access_check(user, Privileges::DROP)?;
        let guard = DdlGuard::begin(&space)?;
        self.schema.remove(id)?;
        space.fault().set(Error::Fatal(format!(
            "space '{}' was dropped",
            space.name()
        )));
        let engine = space.engine().clone();
        engine.destroy(&space);
        engine.drop_primary_key(&space);
        guard.finish();
        log::info!("dropped space {} #{}", space.name(), id);
        Ok(())
    }

    pub fn space(&self, id: u32) -> Result<Arc<Space>> {
        self.schema.space(id)
    }

    pub fn space_by_name(&self, name: &str) -> Result<Arc<Space>> {
        self.schema.space_by_name(name)
    }

    pub fn begin(&self, user: u32) -> Txn {
        Txn::new(user)
    }

    /// Starts an ALTER of a space from its current definition.
    pub fn alter(&self, space_id: u32, user: u32) -> Result<AlterSpace> {
        let space = self.schema.space(space_id)?;
        Ok(AlterSpace::new(space, user, self.identifiers.clone()))
    }

    /// Runs a prepared ALTER to completion and returns the new space.
    pub fn commit_alter(&self, prepared: PreparedAlter) -> Arc<Space> {
        let (space, retired) = prepared.commit(&self.schema);
        retired.teardown();
        space
    }

    /// Empties a space. Returns the space that replaced it.
    pub fn truncate(&self, space_id: u32, user: u32) -> Result<Arc<Space>> {
        let old = self.schema.space(space_id)?;
        let prepared = TruncateSpace::new(old, user).prepare()?;
        let (space, retired) = prepared.commit(&self.schema);
        retired.teardown();
        Ok(space)
    }

    pub fn cursor(&self, space_id: u32, index_id: u32) -> Result<Cursor> {
        let space = self.schema.space(space_id)?;
        Cursor::open(&space, index_id)
    }

    /// Extracts the key of an index from an encoded row.
    pub fn tuple_extract_key(
        &self,
        data: &[u8],
        space_id: u32,
        index_id: u32,
    ) -> Result<Vec<u8>> {
        self.schema.tuple_extract_key(data, space_id, index_id)
    }
}
