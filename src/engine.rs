use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;

use crate::space::INDEX_MAX;
use crate::txn::updated_values;
use crate::*;

/// The capability set a physical storage engine provides to the spaces
/// it backs. Generic behavior lives in the provided methods, expressed
/// through the `Index` trait; engines override what differs.
#[allow(unused)]
pub trait SpaceEngine: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Creates an empty index. Called before the DDL is logged; the
    /// index is simply dropped if the DDL fails.
    fn create_index(
        &self,
        space: &SpaceDef,
        def: &IndexDef,
        pk: &KeyDef,
    ) -> Result<Arc<dyn Index>>;

    /// Rejects index definitions the engine cannot serve.
    fn check_index_def(&self, space: &SpaceDef, def: &IndexDef) -> Result<()> {
        check_index_def_common(space, def)
    }

    /// Releases a space that is no longer referenced by the schema.
    /// Indexes still owned by the space are dropped with it.
    fn destroy(&self, space: &Space) {
        let dropped = space.take_indexes();
        log::debug!(
            "destroying space {} ({} indexes released)",
            space.name(),
            dropped.len()
        );
    }

    fn byte_size(&self, space: &Space) -> usize {
        space.index(0).map_or(0, |pk| pk.byte_size())
    }

    fn execute_replace(
        &self,
        txn: &Txn,
        space: &Space,
        data: &[u8],
        mode: DupMode,
    ) -> Result<Change> {
        let new = space.make_tuple(data)?;
        let old = space.replace_tuple(None, Some(&new), mode)?;
        Ok(Change { old, new: Some(new) })
    }

    fn execute_delete(
        &self,
        txn: &Txn,
        space: &Space,
        index_id: u32,
        key: &[u8],
    ) -> Result<Change> {
        let index = space.index_find_unique(index_id)?;
        let Some(old) = index.get(key)? else {
            return Ok(Change::default());
        };
        let removed =
            space.replace_tuple(Some(&old), None, DupMode::ReplaceOrInsert)?;
        Ok(Change { old: removed.or(Some(old)), new: None })
    }

    fn execute_update(
        &self,
        txn: &Txn,
        space: &Space,
        index_id: u32,
        key: &[u8],
        ops: &[UpdateOp],
    ) -> Result<Change> {
        let index = space.index_find_unique(index_id)?;
        let Some(old) = index.get(key)? else {
            return Ok(Change::default());
        };
        let new = updated_tuple(space, &old, ops)?;
        space.replace_tuple(Some(&old), Some(&new), DupMode::Insert)?;
        Ok(Change { old: Some(old), new: Some(new) })
    }

    /// Inserts the tuple, or updates the row with its primary key.
    /// Update failures skip the statement instead of failing it.
    fn execute_upsert(
        &self,
        txn: &Txn,
        space: &Space,
        data: &[u8],
        ops: &[UpdateOp],
    ) -> Result<Change> {
        let tuple = space.make_tuple(data)?;
        let pk = space.primary_key()?;
        let key = pk.def().key_def.extract_key(&tuple)?;

        let Some(old) = pk.get(&key)? else {
            space.replace_tuple(None, Some(&tuple), DupMode::Insert)?;
            return Ok(Change { old: None, new: Some(tuple) });
        };

        let new = match updated_tuple(space, &old, ops) {
            Ok(new) => new,
            Err(e) => {
                log::warn!("upsert on space {} skipped: {}", space.name(), e);
                return Ok(Change::default());
            }
        };
        match space.replace_tuple(Some(&old), Some(&new), DupMode::Insert) {
            Ok(_) => Ok(Change { old: Some(old), new: Some(new) }),
            Err(e @ Error::DuplicateKey { .. }) => {
                log::warn!("upsert on space {} skipped: {}", space.name(), e);
                Ok(Change::default())
            }
            Err(e) => Err(e),
        }
    }

    fn ephemeral_replace(&self, space: &Space, data: &[u8]) -> Result<Tuple> {
        let new = space.make_tuple(data)?;
        space.replace_tuple(None, Some(&new), DupMode::ReplaceOrInsert)?;
        Ok(new)
    }

    fn ephemeral_delete(&self, space: &Space, key: &[u8]) -> Result<Option<Tuple>> {
        let Some(old) = space.primary_key()?.get(key)? else {
            return Ok(None);
        };
        let removed =
            space.replace_tuple(Some(&old), None, DupMode::ReplaceOrInsert)?;
        Ok(removed.or(Some(old)))
    }

    /// Applies a row received during replica bootstrap and makes it
    /// durable at once.
    fn apply_initial_join_row(&self, space: &Space, request: &Request) -> Result<()> {
        let txn = Txn::detached();
        let change = match request {
            Request::Insert(data) => {
                self.execute_replace(&txn, space, data, DupMode::Insert)?
            }
            Request::Replace(data) => self.execute_replace(
                &txn,
                space,
                data,
                DupMode::ReplaceOrInsert,
            )?,
            Request::Delete { index_id, key } => {
                self.execute_delete(&txn, space, *index_id, key)?
            }
            Request::Update { index_id, key, ops } => {
                self.execute_update(&txn, space, *index_id, key, ops)?
            }
            Request::Upsert { tuple, ops } => {
                self.execute_upsert(&txn, space, tuple, ops)?
            }
        };
        if change.is_noop() || space.is_temporary() {
            return Ok(());
        }
        self.commit_statement(space, &change)
    }

    /// Called once the primary key of a newly created space is
    /// installed. An ALTER that adds a primary key goes through
    /// `prepare_alter` instead.
    fn add_primary_key(&self, space: &Space) -> Result<()> {
        Ok(())
    }

    /// Called when a space loses its primary key for good.
    fn drop_primary_key(&self, space: &Space) {}

    /// Checks every stored row of `old` against the format of `new`.
    fn check_format(&self, new: &Space, old: &Space) -> Result<()> {
        let Some(pk) = old.index(0) else {
            return Ok(());
        };
        pk.tuples()
            .par_iter()
            .try_for_each(|tuple| new.make_tuple(tuple.data()).map(|_| ()))
    }

    /// Fills `index`, a new index of `new`, from the primary key of
    /// `old`.
    fn build_secondary_key(
        &self,
        old: &Space,
        new: &Space,
        index: &dyn Index,
    ) -> Result<()> {
        let Some(pk) = old.index(0) else {
            return Ok(());
        };
        let tuples: Vec<Tuple> = pk
            .tuples()
            .par_iter()
            .map(|tuple| new.make_tuple(tuple.data()))
            .collect::<Result<_>>()?;
        log::debug!(
            "building index {} of space {} from {} rows",
            index.def().name,
            new.name(),
            tuples.len()
        );
        for tuple in &tuples {
            index.replace(None, Some(tuple), DupMode::Insert)?;
        }
        Ok(())
    }

    fn prepare_truncate(&self, old: &Space, new: &Space) -> Result<()> {
        Ok(())
    }

    /// Must not fail: the truncation is already logged.
    fn commit_truncate(&self, old: &Space, new: &Space) {
        for index in old.indexes() {
            index.truncate();
        }
    }

    /// Whatever the engine stages here is published by `commit_alter`
    /// or discarded by `abort_ddl`.
    fn prepare_alter(&self, old: &Space, new: &Space) -> Result<()> {
        Ok(())
    }

    /// Must not fail: the alter is already logged.
    fn commit_alter(&self, old: &Space, new: &Space) {}

    /// Discards what a prepare staged for `space` when its DDL is
    /// abandoned before commit.
    fn abort_ddl(&self, _space: &Space) {}

    /// Makes a committed statement durable.
    fn commit_statement(&self, space: &Space, change: &Change) -> Result<()> {
        Ok(())
    }
}

/// Applies update `ops` to `old`, refusing changes to the primary key.
pub(crate) fn updated_tuple(
    space: &Space,
    old: &Tuple,
    ops: &[UpdateOp],
) -> Result<Tuple> {
    let values = updated_values(old.to_values()?, ops)?;
    let new = space.make_tuple(&encode_record(&values))?;
    let pk = space.primary_key()?;
    if pk.def().key_def.compare_tuples(old, &new)? != std::cmp::Ordering::Equal {
        return Err(Error::PrimaryKeyModified { space: space.name().to_owned() });
    }
    Ok(new)
}

/// Structural checks every engine applies to an index definition.
pub fn check_index_def_common(space: &SpaceDef, def: &IndexDef) -> Result<()> {
    let refuse = |reason: String| {
        Err(Error::InvalidIndexDef {
            index: def.name.clone(),
            space: space.name.clone(),
            reason,
        })
    };

    if def.id >= INDEX_MAX {
        return refuse(format!("index id must be below {}", INDEX_MAX));
    }
    if def.space_id != space.id {
        return refuse(format!(
            "index belongs to space {}, not {}",
            def.space_id, space.id
        ));
    }
    if def.is_primary() && !def.is_unique {
        return refuse("primary key must be unique".to_owned());
    }
    for part in def.key_def.parts() {
        if def.is_primary() && part.is_nullable {
            return refuse("primary key can not contain nullable parts".to_owned());
        }
        if space.field_count != 0 && part.fieldno >= space.field_count {
            return refuse(format!(
                "field {} is beyond the space field count {}",
                part.fieldno, space.field_count
            ));
        }
        let Some(field) = space.fields.get(part.fieldno as usize) else {
            continue;
        };
        if !part.field_type.is_compatible_with(field.field_type) {
            return refuse(format!(
                "field {} has type '{}', incompatible with key part type '{}'",
                part.fieldno,
                field.field_type.name(),
                part.field_type.name()
            ));
        }
        if field.is_nullable && !part.is_nullable {
            return refuse(format!(
                "field {} is nullable but the key part is not",
                part.fieldno
            ));
        }
    }
    Ok(())
}
