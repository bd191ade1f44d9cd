use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::access::ADMIN;
use crate::*;

/// One field operation of an update. Field numbers are 0-based.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Assign(u32, Value),
    Add(u32, Value),
    Subtract(u32, Value),
    /// Inserts a new field before `fieldno`.
    Insert(u32, Value),
    /// Removes `count` fields starting at `fieldno`.
    Delete(u32, u32),
}

/// A data manipulation statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Insert(Vec<u8>),
    Replace(Vec<u8>),
    Delete { index_id: u32, key: Vec<u8> },
    Update { index_id: u32, key: Vec<u8>, ops: Vec<UpdateOp> },
    Upsert { tuple: Vec<u8>, ops: Vec<UpdateOp> },
}

fn arith(fieldno: u32, lhs: &Value, rhs: &Value, negate: bool) -> Result<Value> {
    let as_i128 = |v: &Value| match *v {
        Value::Unsigned(u) => Some(i128::from(u)),
        Value::Integer(i) => Some(i128::from(i)),
        _ => None,
    };
    let mismatch = |v: &Value| Error::FieldTypeMismatch {
        fieldno,
        expected: FieldType::Number.name(),
        found: v.type_name(),
    };

    if let (Some(l), Some(r)) = (as_i128(lhs), as_i128(rhs)) {
        let sum = if negate { l - r } else { l + r };
        return if let Ok(u) = u64::try_from(sum) {
            Ok(Value::Unsigned(u))
        } else if let Ok(i) = i64::try_from(sum) {
            Ok(Value::Integer(i))
        } else {
            Err(Error::unsupported(format!(
                "integer overflow in update of field {}",
                fieldno
            )))
        };
    }

    let as_f64 = |v: &Value| match *v {
        Value::Unsigned(u) => Ok(u as f64),
        Value::Integer(i) => Ok(i as f64),
        Value::Double(d) => Ok(d),
        ref other => Err(mismatch(other)),
    };
    let (l, r) = (as_f64(lhs)?, as_f64(rhs)?);
    Ok(Value::Double(if negate { l - r } else { l + r }))
}

/// Applies `ops` in order to the fields of a row.
pub fn updated_values(mut values: Vec<Value>, ops: &[UpdateOp]) -> Result<Vec<Value>> {
    for op in ops {
        match op {
            UpdateOp::Assign(fieldno, value) => {
                let at = *fieldno as usize;
                if at < values.len() {
                    values[at] = value.clone();
                } else if at == values.len() {
                    values.push(value.clone());
                } else {
                    return Err(Error::NoSuchField(*fieldno));
                }
            }
            UpdateOp::Add(fieldno, value) | UpdateOp::Subtract(fieldno, value) => {
                let at = *fieldno as usize;
                let Some(current) = values.get(at) else {
                    return Err(Error::NoSuchField(*fieldno));
                };
                let negate = matches!(op, UpdateOp::Subtract(..));
                values[at] = arith(*fieldno, current, value, negate)?;
            }
            UpdateOp::Insert(fieldno, value) => {
                let at = *fieldno as usize;
                if at > values.len() {
                    return Err(Error::NoSuchField(*fieldno));
                }
                values.insert(at, value.clone());
            }
            UpdateOp::Delete(fieldno, count) => {
                let at = *fieldno as usize;
                if at >= values.len() || *count == 0 {
                    return Err(Error::NoSuchField(*fieldno));
                }
                let end = (at + *count as usize).min(values.len());
                values.drain(at..end);
            }
        }
    }
    Ok(values)
}

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

struct Statement {
    space: Arc<Space>,
    change: Change,
}

/// A transaction: the statements applied so far, kept for undo in
/// issue order. Dropping an unfinished transaction rolls it back.
pub struct Txn {
    id: u64,
    user: u32,
    statements: Vec<Statement>,
}

impl std::fmt::Debug for Txn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("statements", &self.statements.len())
            .finish()
    }
}

impl Txn {
    pub fn new(user: u32) -> Txn {
        Txn {
            id: NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed),
            user,
            statements: vec![],
        }
    }

    /// A transaction for internal row application, run as admin.
    pub(crate) fn detached() -> Txn {
        Txn::new(ADMIN)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user(&self) -> u32 {
        self.user
    }

    /// Statements applied and not yet committed.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub(crate) fn record(&mut self, space: Arc<Space>, change: Change) {
        space.note_statement();
        self.statements.push(Statement { space, change });
    }

    /// Runs `request` against `space`. Returns the stored row for
    /// inserts, replaces and updates, the removed row for deletes, and
    /// `None` for upserts or when nothing matched.
    pub fn execute(
        &mut self,
        space: &Arc<Space>,
        request: &Request,
    ) -> Result<Option<Tuple>> {
        match request {
            Request::Insert(data) => space.execute_replace(self, data, DupMode::Insert),
            Request::Replace(data) => {
                space.execute_replace(self, data, DupMode::ReplaceOrInsert)
            }
            Request::Delete { index_id, key } => {
                space.execute_delete(self, *index_id, key)
            }
            Request::Update { index_id, key, ops } => {
                space.execute_update(self, *index_id, key, ops)
            }
            Request::Upsert { tuple, ops } => {
                space.execute_upsert(self, tuple, ops)?;
                Ok(None)
            }
        }
    }

    pub fn insert(&mut self, space: &Arc<Space>, data: &[u8]) -> Result<Tuple> {
        let stored = space.execute_replace(self, data, DupMode::Insert)?;
        stored.ok_or_else(|| Error::ReportableBug("insert stored no row".to_owned()))
    }

    pub fn replace(&mut self, space: &Arc<Space>, data: &[u8]) -> Result<Tuple> {
        let stored =
            space.execute_replace(self, data, DupMode::ReplaceOrInsert)?;
        stored.ok_or_else(|| Error::ReportableBug("replace stored no row".to_owned()))
    }

    pub fn delete(&mut self, space: &Arc<Space>, key: &[u8]) -> Result<Option<Tuple>> {
        space.execute_delete(self, 0, key)
    }

    /// Makes every statement durable in issue order and forgets the undo
    /// log.
    pub fn commit(mut self) -> Result<()> {
        let statements = std::mem::take(&mut self.statements);
        log::trace!("committing txn {} with {} statements", self.id, statements.len());
        let mut ret = Ok(());
        for statement in &statements {
            let space = &statement.space;
            space.settle_statement();
            if ret.is_err() || space.is_ephemeral() || space.is_temporary() {
                continue;
            }
            ret = space.engine().commit_statement(space, &statement.change);
        }
        ret
    }

    /// Undoes every statement, newest first.
    pub fn rollback(mut self) {
        self.rollback_inner();
    }

    fn rollback_inner(&mut self) {
        if self.statements.is_empty() {
            return;
        }
        log::debug!(
            "rolling back txn {} ({} statements)",
            self.id,
            self.statements.len()
        );
        while let Some(statement) = self.statements.pop() {
            statement.space.rollback_statement(&statement.change);
            statement.space.settle_statement();
        }
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        self.rollback_inner();
    }
}
