use std::sync::Arc;

use crate::engine::check_index_def_common;
use crate::*;

/// The in-memory engine. Supports tree and hash indexes; nothing
/// survives the process.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    fanout_hint: usize,
}

impl Default for MemoryEngine {
    fn default() -> MemoryEngine {
        MemoryEngine { fanout_hint: 64 }
    }
}

impl MemoryEngine {
    pub const NAME: &'static str = "memtx";

    pub fn new(config: &Config) -> MemoryEngine {
        MemoryEngine { fanout_hint: config.get_index_fanout_hint() }
    }
}

impl SpaceEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        MemoryEngine::NAME
    }

    fn check_index_def(&self, space: &SpaceDef, def: &IndexDef) -> Result<()> {
        check_index_def_common(space, def)?;
        if def.index_type == IndexType::Hash && !def.is_unique {
            return Err(Error::InvalidIndexDef {
                index: def.name.clone(),
                space: space.name.clone(),
                reason: "HASH index must be unique".to_owned(),
            });
        }
        Ok(())
    }

    fn create_index(
        &self,
        space: &SpaceDef,
        def: &IndexDef,
        pk: &KeyDef,
    ) -> Result<Arc<dyn Index>> {
        log::trace!(
            "memtx: creating {} index {} on {} (fanout hint {})",
            def.index_type.name(),
            def.name,
            space.name,
            self.fanout_hint
        );
        Ok(match def.index_type {
            IndexType::Tree => Arc::new(TreeIndex::new(def.clone(), &space.name, pk)),
            IndexType::Hash => Arc::new(HashIndex::new(def.clone(), &space.name)),
        })
    }
}
