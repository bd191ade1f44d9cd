use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::access::{ADMIN, AccessCache};
use crate::trigger::TriggerList;
use crate::*;

/// Index ids are below this.
pub const INDEX_MAX: u32 = 128;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaceOpts {
    /// Never written to the persistent journal.
    pub temporary: bool,
    pub is_view: bool,
}

/// The published definition of a space. Replaced wholesale by ALTER.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceDef {
    pub id: u32,
    pub name: String,
    pub owner: u32,
    /// Engine name. Empty selects the configured default.
    pub engine: String,
    /// Exact field count of every tuple, 0 for any.
    pub field_count: u32,
    pub fields: Vec<FieldDef>,
    pub opts: SpaceOpts,
}

impl SpaceDef {
    pub fn new<S: Into<String>>(id: u32, name: S) -> SpaceDef {
        SpaceDef {
            id,
            name: name.into(),
            owner: ADMIN,
            engine: String::new(),
            field_count: 0,
            fields: vec![],
            opts: SpaceOpts::default(),
        }
    }

    pub fn owner(mut self, owner: u32) -> SpaceDef {
        self.owner = owner;
        self
    }

    pub fn engine<S: Into<String>>(mut self, engine: S) -> SpaceDef {
        self.engine = engine.into();
        self
    }

    pub fn field_count(mut self, field_count: u32) -> SpaceDef {
        self.field_count = field_count;
        self
    }

    pub fn format(mut self, fields: Vec<FieldDef>) -> SpaceDef {
        self.fields = fields;
        self
    }

    pub fn temporary(mut self) -> SpaceDef {
        self.opts.temporary = true;
        self
    }
}

/// Checks that a space defined by `old` may be altered to `new`.
pub fn check_compatibility(
    old: &SpaceDef,
    new: &SpaceDef,
    is_empty: bool,
) -> Result<()> {
    let refuse = |reason: String| {
        Err(Error::IncompatibleAlter { space: old.name.clone(), reason })
    };

    if new.id != old.id {
        return refuse("space id is immutable".to_owned());
    }
    if new.engine != old.engine {
        return refuse("can not change space engine".to_owned());
    }
    if is_empty {
        return Ok(());
    }
    if new.field_count != 0 && new.field_count != old.field_count {
        return refuse("can not change field count on a non-empty space".to_owned());
    }
    for (fieldno, field) in new.fields.iter().enumerate() {
        match old.fields.get(fieldno) {
            Some(was) => {
                if was.is_nullable && !field.is_nullable {
                    return refuse(format!(
                        "can not change field {} to not nullable",
                        fieldno
                    ));
                }
                if !field.field_type.is_compatible_with(was.field_type) {
                    return refuse(format!(
                        "can not change field {} type from {} to {}",
                        fieldno,
                        was.field_type.name(),
                        field.field_type.name()
                    ));
                }
            }
            None if !field.is_nullable && field.field_type != FieldType::Any => {
                return refuse(format!(
                    "field {} is added as not nullable to a non-empty space",
                    fieldno
                ));
            }
            None => {}
        }
    }
    Ok(())
}

/// Indexes of a space by id, with a dense view in id order that is
/// rebuilt on every structural change.
#[derive(Default)]
struct IndexTable {
    by_id: BTreeMap<u32, Arc<dyn Index>>,
    dense: Vec<Arc<dyn Index>>,
}

impl IndexTable {
    fn rebuild(&mut self) {
        self.dense = self.by_id.values().cloned().collect();
        #[cfg(feature = "for-internal-testing-only")]
        assert!(self.is_consistent());
    }

    fn is_consistent(&self) -> bool {
        self.dense.len() == self.by_id.len()
            && self.dense.iter().all(|index| {
                self.by_id
                    .get(&index.def().id)
                    .is_some_and(|by_id| Arc::ptr_eq(by_id, index))
            })
            && self.dense.windows(2).all(|w| w[0].def().id < w[1].def().id)
    }
}

/// A change applied by an engine: the row that was displaced and the
/// row that was stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Change {
    pub old: Option<Tuple>,
    pub new: Option<Tuple>,
}

impl Change {
    pub fn is_noop(&self) -> bool {
        self.old.is_none() && self.new.is_none()
    }
}

/// A table: a set of indexes over one set of rows, dispatching every
/// mutation and DDL step to its engine.
pub struct Space {
    def: SpaceDef,
    format: Arc<TupleFormat>,
    engine: Arc<dyn SpaceEngine>,
    indexes: RwLock<IndexTable>,
    truncate_count: u64,
    ephemeral: bool,
    max_tuple_size: usize,
    fault: FaultLatch,
    // serializes DML, and lets DDL wait out in-flight statements
    latch: Mutex<()>,
    ddl_in_progress: AtomicBool,
    // statements applied by transactions that have not finished
    uncommitted: AtomicUsize,
    run_triggers: AtomicBool,
    triggers: Arc<TriggerList>,
    access: Arc<AccessCache>,
    sequence: RwLock<Option<Arc<Sequence>>>,
}

impl fmt::Debug for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Space")
            .field("id", &self.def.id)
            .field("name", &self.def.name)
            .field("engine", &self.engine.name())
            .field("index_count", &self.index_count())
            .field("truncate_count", &self.truncate_count)
            .finish()
    }
}

impl Space {
    /// Builds a space and its (empty) indexes. Nothing is registered.
    pub fn new(
        def: SpaceDef,
        engine: Arc<dyn SpaceEngine>,
        index_defs: &[IndexDef],
        max_tuple_size: usize,
    ) -> Result<Space> {
        let mut space = Space::bare(def, engine, index_defs, max_tuple_size)?;
        let mut ordered: Vec<&IndexDef> = index_defs.iter().collect();
        ordered.sort_by_key(|d| d.id);
        if let Some(pk) = ordered.first().filter(|d| d.is_primary()) {
            let pk_key_def = pk.key_def.clone();
            for index_def in ordered {
                space.add_index(index_def, &pk_key_def)?;
            }
        }
        if space.index(0).is_some() {
            space.engine.clone().add_primary_key(&space)?;
        }
        Ok(space)
    }

    /// A transient space with a single tree primary key. Ephemeral
    /// spaces skip triggers, access checks and the DDL protocol.
    pub fn ephemeral(
        engine: Arc<dyn SpaceEngine>,
        field_count: u32,
        key_def: KeyDef,
    ) -> Result<Space> {
        let def = SpaceDef::new(0, "ephemeral")
            .engine(engine.name())
            .field_count(field_count)
            .temporary();
        let pk = IndexDef::new(0, 0, "pk", IndexType::Tree, key_def);
        let mut space = Space::new(def, engine, &[pk], usize::MAX)?;
        space.ephemeral = true;
        space.run_triggers = AtomicBool::new(false);
        Ok(space)
    }

    /// A space with the format implied by `index_defs` but no indexes.
    pub(crate) fn bare(
        def: SpaceDef,
        engine: Arc<dyn SpaceEngine>,
        index_defs: &[IndexDef],
        max_tuple_size: usize,
    ) -> Result<Space> {
        for index_def in index_defs {
            engine.check_index_def(&def, index_def)?;
        }
        if index_defs.iter().any(|d| d.id != 0)
            && !index_defs.iter().any(|d| d.id == 0)
        {
            return Err(Error::InvalidIndexDef {
                index: index_defs[0].name.clone(),
                space: def.name.clone(),
                reason: "secondary index requires a primary key".to_owned(),
            });
        }
        for (i, index_def) in index_defs.iter().enumerate() {
            if index_defs[..i].iter().any(|d| d.id == index_def.id) {
                return Err(Error::InvalidIndexDef {
                    index: index_def.name.clone(),
                    space: def.name.clone(),
                    reason: format!("index id {} is defined twice", index_def.id),
                });
            }
        }

        let format = Arc::new(TupleFormat::new(
            def.fields.clone(),
            def.field_count,
            index_defs.iter().map(|d| &d.key_def),
        ));

        Ok(Space {
            def,
            format,
            engine,
            indexes: RwLock::new(IndexTable::default()),
            truncate_count: 0,
            ephemeral: false,
            max_tuple_size,
            fault: FaultLatch::default(),
            latch: Mutex::new(()),
            ddl_in_progress: AtomicBool::new(false),
            uncommitted: AtomicUsize::new(0),
            run_triggers: AtomicBool::new(true),
            triggers: Arc::default(),
            access: Arc::default(),
            sequence: RwLock::new(None),
        })
    }

    /// Creates an empty index through the engine and installs it.
    /// `pk` is the key definition of the primary key the space will
    /// have, which need not be installed yet.
    pub(crate) fn add_index(
        &mut self,
        index_def: &IndexDef,
        pk: &KeyDef,
    ) -> Result<Arc<dyn Index>> {
        let index = self.engine.create_index(&self.def, index_def, pk)?;
        self.install(index.clone());
        Ok(index)
    }

    fn install(&mut self, index: Arc<dyn Index>) {
        let table = self.indexes.get_mut();
        table.by_id.insert(index.def().id, index);
        table.rebuild();
    }

    /// Carries over the identity-independent state of `old`: triggers,
    /// grants, the attached sequence, and the truncate counter.
    pub(crate) fn inherit(&mut self, old: &Space) {
        self.triggers = old.triggers.clone();
        self.access = old.access.clone();
        self.truncate_count = old.truncate_count;
        self.run_triggers = AtomicBool::new(old.run_triggers.load(Ordering::Acquire));
        *self.sequence.get_mut() = old.sequence();
    }

    pub(crate) fn bump_truncate_count(&mut self) {
        self.truncate_count += 1;
    }

    pub fn id(&self) -> u32 {
        self.def.id
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &SpaceDef {
        &self.def
    }

    pub fn format(&self) -> &Arc<TupleFormat> {
        &self.format
    }

    pub fn engine(&self) -> &Arc<dyn SpaceEngine> {
        &self.engine
    }

    pub fn truncate_count(&self) -> u64 {
        self.truncate_count
    }

    pub fn max_tuple_size(&self) -> usize {
        self.max_tuple_size
    }

    pub fn is_temporary(&self) -> bool {
        self.def.opts.temporary
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn fault(&self) -> &FaultLatch {
        &self.fault
    }

    pub fn index(&self, id: u32) -> Option<Arc<dyn Index>> {
        self.indexes.read().by_id.get(&id).cloned()
    }

    pub fn index_find(&self, id: u32) -> Result<Arc<dyn Index>> {
        self.index(id).ok_or_else(|| Error::NoSuchIndex {
            index_id: id,
            space: self.def.name.clone(),
        })
    }

    /// Like `index_find`, but the index must be unique.
    pub fn index_find_unique(&self, id: u32) -> Result<Arc<dyn Index>> {
        let index = self.index_find(id)?;
        if !index.def().is_unique {
            return Err(Error::MoreThanOneTuple);
        }
        Ok(index)
    }

    pub fn primary_key(&self) -> Result<Arc<dyn Index>> {
        self.index_find(0)
    }

    pub fn index_key_def(&self, id: u32) -> Option<KeyDef> {
        self.index(id).map(|index| index.def().key_def.clone())
    }

    /// The definition of the `n`-th index in id order.
    pub fn index_def(&self, n: usize) -> Option<IndexDef> {
        self.indexes.read().dense.get(n).map(|index| index.def().clone())
    }

    pub fn index_name_by_id(&self, id: u32) -> Option<String> {
        self.index(id).map(|index| index.def().name.clone())
    }

    pub fn index_count(&self) -> usize {
        self.indexes.read().dense.len()
    }

    /// The largest index id in use.
    pub fn index_id_max(&self) -> Option<u32> {
        self.indexes.read().by_id.keys().next_back().copied()
    }

    /// All indexes in id order.
    pub fn indexes(&self) -> Vec<Arc<dyn Index>> {
        self.indexes.read().dense.clone()
    }

    /// Whether the dense view and the id map agree.
    pub fn check_index_map(&self) -> bool {
        self.indexes.read().is_consistent()
    }

    /// Rebuilds the dense index view from the id map.
    pub fn fill_index_map(&self) {
        self.indexes.write().rebuild();
    }

    /// Exchanges index `lhs_id` of this space with index `rhs_id` of
    /// `other`. Either slot may be empty, in which case the swap is a
    /// move. Every index ends up owned by exactly one of the two spaces.
    pub fn swap_index(&self, other: &Space, lhs_id: u32, rhs_id: u32) {
        if std::ptr::eq(self, other) {
            let mut table = self.indexes.write();
            let lhs = table.by_id.remove(&lhs_id);
            let rhs = table.by_id.remove(&rhs_id);
            if let Some(index) = lhs {
                table.by_id.insert(rhs_id, index);
            }
            if let Some(index) = rhs {
                table.by_id.insert(lhs_id, index);
            }
            table.rebuild();
            return;
        }

        let mut mine = self.indexes.write();
        let mut theirs = other.indexes.write();
        let lhs = mine.by_id.remove(&lhs_id);
        let rhs = theirs.by_id.remove(&rhs_id);
        if let Some(index) = lhs {
            theirs.by_id.insert(rhs_id, index);
        }
        if let Some(index) = rhs {
            mine.by_id.insert(lhs_id, index);
        }
        mine.rebuild();
        theirs.rebuild();
    }

    /// Removes every index, handing them to the caller.
    pub(crate) fn take_indexes(&self) -> Vec<Arc<dyn Index>> {
        let mut table = self.indexes.write();
        let ret = std::mem::take(&mut table.dense);
        table.by_id.clear();
        ret
    }

    /// The definitions ALTER starts from.
    pub fn dump_def(&self) -> (SpaceDef, Vec<IndexDef>) {
        let index_defs = self
            .indexes
            .read()
            .dense
            .iter()
            .map(|index| index.def().clone())
            .collect();
        (self.def.clone(), index_defs)
    }

    /// Rows in the space.
    pub fn len(&self) -> usize {
        self.index(0).map_or(0, |pk| pk.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_size(&self) -> usize {
        self.engine.byte_size(self)
    }

    pub fn grant(&self, user: u32, privileges: Privileges) {
        self.access.grant(user, privileges);
    }

    pub fn revoke(&self, user: u32, privileges: Privileges) {
        self.access.revoke(user, privileges);
    }

    /// The pass/fail gate run before every DML and DDL statement.
    pub fn access_check(&self, user: u32, access: Privileges) -> Result<()> {
        if self.ephemeral {
            return Ok(());
        }
        self.access.check(
            user,
            self.def.owner,
            access,
            SchemaObjectType::Space,
            &self.def.name,
        )
    }

    pub fn on_replace(&self, trigger: Arc<dyn Trigger>) {
        self.triggers.add(trigger);
    }

    pub fn remove_trigger(&self, trigger: &Arc<dyn Trigger>) -> bool {
        self.triggers.remove(trigger)
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Enables or disables trigger firing.
    pub fn run_triggers(&self, yes: bool) {
        self.run_triggers.store(yes, Ordering::Release);
    }

    fn triggers_enabled(&self) -> bool {
        !self.ephemeral && self.run_triggers.load(Ordering::Acquire)
    }

    pub fn sequence(&self) -> Option<Arc<Sequence>> {
        self.sequence.read().clone()
    }

    pub fn set_sequence(&self, sequence: Option<Arc<Sequence>>) {
        *self.sequence.write() = sequence;
    }

    /// The largest value of field `fieldno`, read from the last row of
    /// an ordered index whose first part is that field.
    pub fn max_id(&self, index_id: u32, fieldno: u32) -> Result<Option<u64>> {
        let index = self.index_find(index_id)?;
        if index.def().key_def.parts()[0].fieldno != fieldno {
            return Err(Error::unsupported(format!(
                "index '{}' does not lead with field {}",
                index.def().name,
                fieldno
            )));
        }
        let Some(last) = index.max()? else {
            return Ok(None);
        };
        match last.value(fieldno)? {
            Some(Value::Unsigned(u)) => Ok(Some(u)),
            Some(other) => Err(Error::FieldTypeMismatch {
                fieldno,
                expected: FieldType::Unsigned.name(),
                found: other.type_name(),
            }),
            None => Err(Error::NoSuchField(fieldno)),
        }
    }

    /// Validates `data` against the space format and size limit.
    pub fn make_tuple(&self, data: &[u8]) -> Result<Tuple> {
        if data.len() > self.max_tuple_size {
            return Err(Error::TupleTooLarge {
                size: data.len(),
                max: self.max_tuple_size,
            });
        }
        Tuple::new(&self.format, data)
    }

    /// Applies a change to every index: the primary key with `mode`,
    /// secondary keys strictly. On failure the indexes already changed
    /// are restored. Returns the row displaced from the primary key.
    pub fn replace_tuple(
        &self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: DupMode,
    ) -> Result<Option<Tuple>> {
        let indexes = self.indexes();
        let Some((pk, secondaries)) = indexes.split_first() else {
            return Err(Error::NoSuchIndex {
                index_id: 0,
                space: self.def.name.clone(),
            });
        };
        if pk.def().id != 0 {
            return Err(Error::NoSuchIndex {
                index_id: 0,
                space: self.def.name.clone(),
            });
        }

        let displaced = pk.replace(old, new, mode)?;
        let old = displaced.as_ref().or(old);

        for (i, index) in secondaries.iter().enumerate() {
            if let Err(e) = index.replace(old, new, DupMode::Insert) {
                for done in secondaries[..i].iter().rev() {
                    self.undo_index(&**done, new, old);
                }
                self.undo_index(&**pk, new, old);
                return Err(e);
            }
        }
        Ok(displaced)
    }

    fn undo_index(&self, index: &dyn Index, applied: Option<&Tuple>, restore: Option<&Tuple>) {
        if let Err(e) = index.replace(applied, restore, DupMode::ReplaceOrInsert) {
            log::error!(
                "failed to undo change in index {} of space {}: {}",
                index.def().name,
                self.def.name,
                e
            );
            self.fault.set(Error::Fatal(format!(
                "space '{}' is inconsistent after a failed undo: {}",
                self.def.name, e
            )));
        }
    }

    /// Reverts an applied change on every index.
    pub(crate) fn revert(&self, change: &Change) {
        let indexes = self.indexes();
        for index in indexes.iter().rev() {
            self.undo_index(&**index, change.new.as_ref(), change.old.as_ref());
        }
    }

    /// Marks a space replaced by DDL. Its cursors and statements fail
    /// from now on.
    pub(crate) fn retire(&self) {
        self.fault.set(Error::Fatal(format!(
            "space '{}' was replaced by DDL and must be reopened",
            self.def.name
        )));
    }

    pub(crate) fn begin_ddl(&self) -> Result<()> {
        if self
            .ddl_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SpaceBusy { space: self.def.name.clone() });
        }
        // wait out statements already running
        drop(self.latch.lock());
        if self.uncommitted.load(Ordering::Acquire) != 0 {
            self.end_ddl();
            return Err(Error::SpaceBusy { space: self.def.name.clone() });
        }
        Ok(())
    }

    pub(crate) fn note_statement(&self) {
        self.uncommitted.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn settle_statement(&self) {
        self.uncommitted.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn end_ddl(&self) {
        self.ddl_in_progress.store(false, Ordering::Release);
    }

    fn lock_for_dml(&self) -> Result<MutexGuard<'_, ()>> {
        self.fault.check()?;
        let busy = || Error::SpaceBusy { space: self.def.name.clone() };
        if self.ddl_in_progress.load(Ordering::Acquire) {
            return Err(busy());
        }
        let guard = self.latch.lock();
        if self.ddl_in_progress.load(Ordering::Acquire) {
            return Err(busy());
        }
        Ok(guard)
    }

    /// Runs one statement: access check, statement triggers, the engine
    /// change, replace triggers, and the undo record in `txn`.
    fn run_statement<F>(self: &Arc<Self>, txn: &mut Txn, apply: F) -> Result<Change>
    where
        F: FnOnce(&dyn SpaceEngine, &Txn) -> Result<Change>,
    {
        self.access_check(txn.user(), Privileges::WRITE)?;
        let _guard = self.lock_for_dml()?;

        let triggers = self.triggers_enabled();
        if triggers {
            self.triggers.run_stmt_begin(&self.def, txn.id())?;
        }

        let change = apply(&*self.engine, txn)?;
        if change.is_noop() {
            return Ok(change);
        }

        if triggers {
            if let Err(e) = self.triggers.run_replace(
                &self.def,
                change.old.as_ref(),
                change.new.as_ref(),
            ) {
                log::debug!("on_replace trigger of {} failed: {}", self.def.name, e);
                self.revert(&change);
                return Err(e);
            }
        }

        txn.record(self.clone(), change.clone());
        Ok(change)
    }

    /// Inserts (`DupMode::Insert`) or replaces a row. Returns the stored
    /// row.
    pub fn execute_replace(
        self: &Arc<Self>,
        txn: &mut Txn,
        data: &[u8],
        mode: DupMode,
    ) -> Result<Option<Tuple>> {
        let change = self.run_statement(txn, |engine, txn| {
            engine.execute_replace(txn, self, data, mode)
        })?;
        Ok(change.new)
    }

    /// Deletes the row matching `key` in a unique index. Returns the
    /// deleted row.
    pub fn execute_delete(
        self: &Arc<Self>,
        txn: &mut Txn,
        index_id: u32,
        key: &[u8],
    ) -> Result<Option<Tuple>> {
        let change = self.run_statement(txn, |engine, txn| {
            engine.execute_delete(txn, self, index_id, key)
        })?;
        Ok(change.old)
    }

    /// Updates the row matching `key` in a unique index. Returns the new
    /// row, or `None` when no row matched.
    pub fn execute_update(
        self: &Arc<Self>,
        txn: &mut Txn,
        index_id: u32,
        key: &[u8],
        ops: &[UpdateOp],
    ) -> Result<Option<Tuple>> {
        let change = self.run_statement(txn, |engine, txn| {
            engine.execute_update(txn, self, index_id, key, ops)
        })?;
        Ok(change.new)
    }

    /// Inserts `data`, or applies `ops` to the row with the same primary
    /// key.
    pub fn execute_upsert(
        self: &Arc<Self>,
        txn: &mut Txn,
        data: &[u8],
        ops: &[UpdateOp],
    ) -> Result<()> {
        self.run_statement(txn, |engine, txn| {
            engine.execute_upsert(txn, self, data, ops)
        })?;
        Ok(())
    }

    /// Applies a row received from a replica during initial join: no
    /// access checks, no triggers, no undo record.
    pub fn apply_initial_join_row(&self, request: &Request) -> Result<()> {
        let _guard = self.lock_for_dml()?;
        self.engine.apply_initial_join_row(self, request)
    }

    pub fn ephemeral_replace(&self, data: &[u8]) -> Result<Tuple> {
        let _guard = self.lock_for_dml()?;
        self.engine.ephemeral_replace(self, data)
    }

    pub fn ephemeral_delete(&self, key: &[u8]) -> Result<Option<Tuple>> {
        let _guard = self.lock_for_dml()?;
        self.engine.ephemeral_delete(self, key)
    }

    /// Reverts a statement during transaction rollback.
    pub(crate) fn rollback_statement(&self, change: &Change) {
        let _guard = self.latch.lock();
        self.revert(change);
    }
}
