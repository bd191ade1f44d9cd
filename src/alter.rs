//! Two-phase schema changes. `prepare` does every fallible step and
//! builds the replacement space off to the side, and `commit` publishes
//! it and cannot fail. Dropping a prepared change abandons it.
//! `RetiredSpace::teardown` releases what the old space still owns.

use std::sync::Arc;

use crate::*;

/// A space displaced by DDL. Its remaining indexes are released by
/// `teardown`, which should run once nothing reads the old space.
#[must_use]
#[derive(Debug)]
pub struct RetiredSpace {
    space: Arc<Space>,
    drop_primary_key: bool,
}

impl RetiredSpace {
    pub fn space(&self) -> &Arc<Space> {
        &self.space
    }

    pub fn teardown(self) {
        let engine = self.space.engine().clone();
        engine.destroy(&self.space);
        if self.drop_primary_key {
            engine.drop_primary_key(&self.space);
        }
    }
}

/// Holds the DDL flag of a space. Dropping the guard abandons the DDL:
/// the engine discards what was staged and the flag is released.
pub(crate) struct DdlGuard {
    space: Arc<Space>,
    armed: bool,
}

impl DdlGuard {
    pub(crate) fn begin(space: &Arc<Space>) -> Result<DdlGuard> {
        space.begin_ddl()?;
        Ok(DdlGuard { space: space.clone(), armed: true })
    }

    /// Ends the DDL after it took effect.
    pub(crate) fn finish(mut self) {
        self.armed = false;
        self.space.end_ddl();
    }
}

impl Drop for DdlGuard {
    fn drop(&mut self) {
        if self.armed {
            log::debug!("abandoning DDL on space {}", self.space.name());
            self.space.engine().abort_ddl(&self.space);
            self.space.end_ddl();
        }
    }
}

/// The target definition of an ALTER, starting from the current one.
#[derive(Debug)]
pub struct AlterSpace {
    old: Arc<Space>,
    user: u32,
    identifiers: IdentifierChecker,
    def: SpaceDef,
    index_defs: Vec<IndexDef>,
}

impl AlterSpace {
    pub fn new(old: Arc<Space>, user: u32, identifiers: IdentifierChecker) -> AlterSpace {
        let (def, index_defs) = old.dump_def();
        AlterSpace { old, user, identifiers, def, index_defs }
    }

    pub fn rename<S: Into<String>>(mut self, name: S) -> AlterSpace {
        self.def.name = name.into();
        self
    }

    pub fn format(mut self, fields: Vec<FieldDef>) -> AlterSpace {
        self.def.fields = fields;
        self
    }

    pub fn field_count(mut self, field_count: u32) -> AlterSpace {
        self.def.field_count = field_count;
        self
    }

    /// Adds an index, or redefines the index with the same id.
    pub fn index(mut self, def: IndexDef) -> AlterSpace {
        self.index_defs.retain(|d| d.id != def.id);
        self.index_defs.push(def);
        self
    }

    pub fn drop_index(mut self, id: u32) -> AlterSpace {
        self.index_defs.retain(|d| d.id != id);
        self
    }

    pub fn def(&self) -> &SpaceDef {
        &self.def
    }

    pub fn index_defs(&self) -> &[IndexDef] {
        &self.index_defs
    }

    /// Builds the altered space and fills its new indexes. Nothing
    /// visible changes; on error the old space is as it was.
    pub fn prepare(mut self) -> Result<PreparedAlter> {
        let old = self.old.clone();
        old.access_check(self.user, Privileges::ALTER)?;
        self.identifiers.check(&self.def.name)?;
        for index_def in &self.index_defs {
            self.identifiers.check(&index_def.name)?;
        }

        let guard = DdlGuard::begin(&old)?;
        log::debug!("preparing alter of space {}", old.name());

        check_compatibility(old.def(), &self.def, old.is_empty())?;
        self.index_defs.sort_by_key(|d| d.id);

        let engine = old.engine().clone();
        let mut new = Space::bare(
            self.def.clone(),
            engine.clone(),
            &self.index_defs,
            old.max_tuple_size(),
        )?;
        new.inherit(&old);

        let old_pk = old.index_key_def(0);
        let new_pk = self.index_defs.first().filter(|d| d.is_primary());
        let pk_unchanged = match (&old_pk, new_pk) {
            (Some(old_pk), Some(new_pk)) => *old_pk == new_pk.key_def,
            (None, None) => true,
            _ => false,
        };

        // indexes carry the space name they were built under
        let renamed = self.def.name != old.name();

        let mut moved = vec![];
        if let Some(pk) = new_pk {
            let pk_key_def = pk.key_def.clone();
            for index_def in &self.index_defs {
                let same = old.index(index_def.id).is_some_and(|index| {
                    !renamed
                        && index.def() == index_def
                        && (pk_unchanged || index_def.is_unique)
                });
                if same {
                    moved.push(index_def.id);
                    continue;
                }
                let index = new.add_index(index_def, &pk_key_def)?;
                engine.build_secondary_key(&old, &new, &*index)?;
            }
        }

        engine.check_format(&new, &old)?;
        engine.prepare_alter(&old, &new)?;

        log::debug!(
            "alter of space {} prepared: {} indexes kept, {} built",
            old.name(),
            moved.len(),
            new.index_count()
        );

        Ok(PreparedAlter {
            guard,
            new,
            moved,
            drop_primary_key: old_pk.is_some() && new_pk.is_none(),
        })
    }
}

/// A built replacement space waiting to be published.
#[derive(Debug)]
pub struct PreparedAlter {
    guard: DdlGuard,
    new: Space,
    moved: Vec<u32>,
    drop_primary_key: bool,
}

impl std::fmt::Debug for DdlGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdlGuard").field("space", &self.space.name()).finish()
    }
}

impl PreparedAlter {
    /// The space that will be published.
    pub fn space(&self) -> &Space {
        &self.new
    }

    /// Moves unchanged indexes over, publishes the new space and retires
    /// the old one.
    pub fn commit(self, schema: &Schema) -> (Arc<Space>, RetiredSpace) {
        let PreparedAlter { guard, new, moved, drop_primary_key } = self;
        let old = guard.space.clone();
        for id in moved {
            new.swap_index(&old, id, id);
        }
        let new = Arc::new(new);

        schema.replace(new.clone());
        old.retire();
        new.engine().commit_alter(&old, &new);
        guard.finish();
        log::info!(
            "altered space {} ({} indexes)",
            new.name(),
            new.index_count()
        );

        (new, RetiredSpace { space: old, drop_primary_key })
    }
}

/// The first phase of TRUNCATE.
#[derive(Debug)]
pub struct TruncateSpace {
    old: Arc<Space>,
    user: u32,
}

impl TruncateSpace {
    pub fn new(old: Arc<Space>, user: u32) -> TruncateSpace {
        TruncateSpace { old, user }
    }

    /// Builds an empty copy of the space with a bumped truncate count.
    pub fn prepare(self) -> Result<PreparedTruncate> {
        let old = self.old;
        old.access_check(self.user, Privileges::WRITE)?;
        let guard = DdlGuard::begin(&old)?;

        let (def, index_defs) = old.dump_def();
        let engine = old.engine().clone();
        let mut new = Space::bare(def, engine.clone(), &index_defs, old.max_tuple_size())?;
        new.inherit(&old);
        new.bump_truncate_count();
        if let Some(pk) = index_defs.first().filter(|d| d.is_primary()) {
            let pk_key_def = pk.key_def.clone();
            for index_def in &index_defs {
                new.add_index(index_def, &pk_key_def)?;
            }
        }
        engine.prepare_truncate(&old, &new)?;

        Ok(PreparedTruncate { guard, new })
    }
}

#[derive(Debug)]
pub struct PreparedTruncate {
    guard: DdlGuard,
    new: Space,
}

impl PreparedTruncate {
    /// Publishes the empty space. Readers of the old space see it empty
    /// or faulted, never its rows.
    pub fn commit(self, schema: &Schema) -> (Arc<Space>, RetiredSpace) {
        let PreparedTruncate { guard, new } = self;
        let old = guard.space.clone();
        let new = Arc::new(new);

        schema.replace(new.clone());
        old.retire();
        new.engine().commit_truncate(&old, &new);
        guard.finish();
        log::info!(
            "truncated space {} (truncate count {})",
            new.name(),
            new.truncate_count()
        );

        (new, RetiredSpace { space: old, drop_primary_key: false })
    }
}
