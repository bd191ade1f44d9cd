use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fault_injection::fallible;
use fnv::FnvHashMap;
use parking_lot::Mutex;

use crate::engine::check_index_def_common;
use crate::journal::{Journal, JournalRecord};
use crate::*;

const WARN: &str = "DO_NOT_PUT_YOUR_FILES_HERE";

/// The persistent engine. Rows live in tree indexes in memory, and every
/// committed statement of a non-temporary space is appended to that
/// space's journal, which is replayed when the space is next created.
#[derive(Debug)]
pub struct DiskEngine {
    directory: PathBuf,
    temporary: bool,
    sync_writes: bool,
    journals: Mutex<FnvHashMap<u32, Journal>>,
    // recovered by a prepared ALTER, registered at its commit
    pending_journals: Mutex<FnvHashMap<u32, Journal>>,
    pending_rotations: Mutex<FnvHashMap<u32, PathBuf>>,
    _directory_lock: fs::File,
}

/// Replay and integrity errors are corruption, the rest plain I/O.
fn journal_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::InvalidData {
        Error::Corruption(e.to_string())
    } else {
        Error::Io(e)
    }
}

fn open_directory(path: &Path) -> io::Result<fs::File> {
    use fs2::FileExt;

    if let Err(e) = fs::read_dir(path) {
        if e.kind() == io::ErrorKind::NotFound {
            fallible!(fs::create_dir_all(path));
        }
    }

    let _ = fs::File::create(path.join(WARN));

    let directory_lock = fallible!(fs::File::open(path));
    fallible!(directory_lock.try_lock_exclusive());
    Ok(directory_lock)
}

impl DiskEngine {
    pub const NAME: &'static str = "journal";

    /// Opens the journal directory of `config`, creating it if needed.
    /// Fails if another process holds it.
    pub fn open(config: &Config) -> Result<DiskEngine> {
        let directory = config.get_path();
        let directory_lock = open_directory(&directory).map_err(journal_error)?;
        log::debug!("opened journal directory {:?}", directory);

        Ok(DiskEngine {
            directory,
            temporary: config.get_temporary(),
            sync_writes: config.get_sync_writes(),
            journals: Mutex::default(),
            pending_journals: Mutex::default(),
            pending_rotations: Mutex::default(),
            _directory_lock: directory_lock,
        })
    }

    fn journal_path(&self, space_id: u32) -> PathBuf {
        self.directory.join(format!("space-{}.journal", space_id))
    }

    fn is_journaled(space: &Space) -> bool {
        !space.is_temporary() && !space.is_ephemeral()
    }

    /// Opens the journal of `space` and replays it into the space.
    fn recover(&self, space: &Space) -> Result<Journal> {
        let path = self.journal_path(space.id());
        let (journal, records) =
            Journal::recover(&path, self.sync_writes).map_err(journal_error)?;
        DiskEngine::replay(space, &records)?;
        if !records.is_empty() {
            log::info!(
                "recovered {} rows of space {} from {} journal records",
                space.len(),
                space.name(),
                records.len()
            );
        }
        Ok(journal)
    }

    fn replay(space: &Space, records: &[JournalRecord]) -> Result<()> {
        for record in records {
            match record {
                JournalRecord::Replace(data) => {
                    let tuple = space.make_tuple(data)?;
                    space.replace_tuple(None, Some(&tuple), DupMode::ReplaceOrInsert)?;
                }
                JournalRecord::Delete(data) => {
                    let tuple = space.make_tuple(data)?;
                    let pk = space.primary_key()?;
                    let key = pk.def().key_def.extract_key(&tuple)?;
                    if let Some(stored) = pk.get(&key)? {
                        space.replace_tuple(
                            Some(&stored),
                            None,
                            DupMode::ReplaceOrInsert,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl SpaceEngine for DiskEngine {
    fn name(&self) -> &'static str {
        DiskEngine::NAME
    }

    fn check_index_def(&self, space: &SpaceDef, def: &IndexDef) -> Result<()> {
        check_index_def_common(space, def)?;
        if def.index_type != IndexType::Tree {
            return Err(Error::InvalidIndexDef {
                index: def.name.clone(),
                space: space.name.clone(),
                reason: format!(
                    "{} index is not supported by the journal engine",
                    def.index_type.name()
                ),
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
        Ok(Arc::new(TreeIndex::new(def.clone(), &space.name, pk)))
    }

    /// Recovers the rows of a space the first time it is created in this
    /// process.
    fn add_primary_key(&self, space: &Space) -> Result<()> {
        if !DiskEngine::is_journaled(space) {
            return Ok(());
        }
        let mut journals = self.journals.lock();
        if journals.contains_key(&space.id()) {
            return Ok(());
        }
        let journal = self.recover(space)?;
        journals.insert(space.id(), journal);
        Ok(())
    }

    /// An ALTER that gives a space back its primary key recovers the
    /// journal into the new space, but only registers it on commit.
    fn prepare_alter(&self, old: &Space, new: &Space) -> Result<()> {
        let adds_primary_key = old.index(0).is_none() && new.index(0).is_some();
        if !adds_primary_key || !DiskEngine::is_journaled(new) {
            return Ok(());
        }
        if self.journals.lock().contains_key(&new.id()) {
            return Ok(());
        }
        let journal = self.recover(new)?;
        self.pending_journals.lock().insert(new.id(), journal);
        Ok(())
    }

    fn commit_alter(&self, _old: &Space, new: &Space) {
        if let Some(journal) = self.pending_journals.lock().remove(&new.id()) {
            self.journals.lock().insert(new.id(), journal);
        }
    }

    fn abort_ddl(&self, space: &Space) {
        if self.pending_journals.lock().remove(&space.id()).is_some() {
            log::debug!("released staged journal of space {}", space.name());
        }
        if let Some(tmp) = self.pending_rotations.lock().remove(&space.id()) {
            if let Err(e) = fs::remove_file(&tmp) {
                log::warn!("failed to remove staged journal {:?}: {}", tmp, e);
            }
        }
    }

    fn drop_primary_key(&self, space: &Space) {
        let Some(journal) = self.journals.lock().remove(&space.id()) else {
            return;
        };
        if let Err(e) = fs::remove_file(journal.path()) {
            log::warn!(
                "failed to remove journal {:?} of dropped space {}: {}",
                journal.path(),
                space.name(),
                e
            );
        }
    }

    fn prepare_truncate(&self, old: &Space, _new: &Space) -> Result<()> {
        if !DiskEngine::is_journaled(old) {
            return Ok(());
        }
        let journals = self.journals.lock();
        let Some(journal) = journals.get(&old.id()) else {
            return Ok(());
        };
        let tmp = journal.prepare_rotation().map_err(journal_error)?;
        self.pending_rotations.lock().insert(old.id(), tmp);
        Ok(())
    }

    fn commit_truncate(&self, old: &Space, new: &Space) {
        for index in old.indexes() {
            index.truncate();
        }
        let Some(tmp) = self.pending_rotations.lock().remove(&old.id()) else {
            return;
        };
        let mut journals = self.journals.lock();
        let Some(journal) = journals.get_mut(&old.id()) else {
            return;
        };
        if let Err(e) = journal.rotate(&tmp) {
            log::error!(
                "failed to rotate journal of truncated space {}: {}",
                new.name(),
                e
            );
            new.fault().set(Error::Io(e));
        }
    }

    fn commit_statement(&self, space: &Space, change: &Change) -> Result<()> {
        if !DiskEngine::is_journaled(space) {
            return Ok(());
        }
        let record = match change {
            Change { new: Some(new), .. } => JournalRecord::Replace(new.data().to_vec()),
            Change { new: None, old: Some(old) } => {
                JournalRecord::Delete(old.data().to_vec())
            }
            Change { new: None, old: None } => return Ok(()),
        };

        let mut journals = self.journals.lock();
        let Some(journal) = journals.get_mut(&space.id()) else {
            return Err(Error::ReportableBug(format!(
                "space {} has no open journal",
                space.name()
            )));
        };
        if let Err(e) = journal.append(&record) {
            log::error!("failed to journal a statement of {}: {}", space.name(), e);
            let error = Error::Io(e);
            space.fault().set(error.clone());
            return Err(error);
        }
        Ok(())
    }
}

impl Drop for DiskEngine {
    fn drop(&mut self) {
        if self.temporary {
            if let Err(e) = fs::remove_dir_all(&self.directory) {
                log::warn!(
                    "failed to remove temporary directory {:?}: {}",
                    self.directory,
                    e
                );
            }
        }
    }
}
