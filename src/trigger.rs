use std::sync::Arc;

use parking_lot::RwLock;

use crate::*;

/// Hooks a space runs around its statements. Returning an error aborts
/// the statement and rolls back its engine change.
#[allow(unused)]
pub trait Trigger: 'static + Send + Sync {
    /// Fired before each statement on the space.
    fn on_stmt_begin(&self, space: &SpaceDef, txn_id: u64) -> Result<()> {
        Ok(())
    }

    /// Fired after the engine applied a change. `old` is the row that
    /// was displaced, `new` the row that was stored.
    fn on_replace(
        &self,
        space: &SpaceDef,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Triggers of one space, in registration order.
#[derive(Default)]
pub(crate) struct TriggerList {
    triggers: RwLock<Vec<Arc<dyn Trigger>>>,
}

impl TriggerList {
    pub(crate) fn add(&self, trigger: Arc<dyn Trigger>) {
        self.triggers.write().push(trigger);
    }

    pub(crate) fn remove(&self, trigger: &Arc<dyn Trigger>) -> bool {
        let mut triggers = self.triggers.write();
        let before = triggers.len();
        triggers.retain(|t| !Arc::ptr_eq(t, trigger));
        triggers.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.triggers.read().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn Trigger>> {
        self.triggers.read().clone()
    }

    pub(crate) fn run_stmt_begin(&self, def: &SpaceDef, txn_id: u64) -> Result<()> {
        for trigger in self.snapshot() {
            trigger.on_stmt_begin(def, txn_id)?;
        }
        Ok(())
    }

    pub(crate) fn run_replace(
        &self,
        def: &SpaceDef,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
    ) -> Result<()> {
        for trigger in self.snapshot() {
            trigger.on_replace(def, old, new)?;
        }
        Ok(())
    }
}
