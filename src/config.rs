use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::*;

/// Top-level configuration for a `Database`.
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    temporary: bool,
    max_tuple_size: usize,
    sync_writes: bool,
    default_engine: String,
    index_fanout_hint: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            path: "default.spacestore".into(),
            temporary: false,
            max_tuple_size: 1024 * 1024, // 1mb
            sync_writes: false,
            default_engine: MemoryEngine::NAME.to_owned(),
            index_fanout_hint: 64,
        }
    }
}

macro_rules! builder {
    ($(($name:ident, $get:ident, $set:ident, $t:ty, $desc:expr)),*) => {
        $(
            #[doc="Get "]
            #[doc=$desc]
            pub fn $get(&self) -> $t {
                self.$name.clone()
            }

            #[doc="Set "]
            #[doc=$desc]
            pub fn $set(&mut self, to: $t) {
                self.$name = to;
            }

            #[doc="Builder, set "]
            #[doc=$desc]
            pub fn $name(&self, to: $t) -> Config {
                let mut ret = self.clone();
                ret.$name = to;
                ret
            }
        )*
    }
}

impl Config {
    builder!(
        (path, get_path, set_path, PathBuf, "directory holding the journals of persistent spaces"),
        (temporary, get_temporary, set_temporary, bool, "whether the directory is removed when the database is dropped"),
        (max_tuple_size, get_max_tuple_size, set_max_tuple_size, usize, "largest accepted encoded row, in bytes"),
        (sync_writes, get_sync_writes, set_sync_writes, bool, "whether every journal append is followed by fsync"),
        (default_engine, get_default_engine, set_default_engine, String, "engine used by spaces that name none"),
        (index_fanout_hint, get_index_fanout_hint, set_index_fanout_hint, usize, "expected fanout of in-memory tree indexes")
    );

    pub fn new() -> Config {
        Config::default()
    }

    /// A temporary configuration under the system temp directory, removed
    /// when the database is dropped.
    pub fn tmp() -> Config {
        static SALT: AtomicUsize = AtomicUsize::new(0);

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.subsec_nanos());
        let path = std::env::temp_dir().join(format!(
            "spacestore.tmp.{}.{}.{}",
            std::process::id(),
            nanos,
            SALT.fetch_add(1, Ordering::Relaxed)
        ));

        Config::default().path(path).temporary(true)
    }

    /// Opens a database with this configuration. Journals are only
    /// touched once a space of the journal engine is created.
    pub fn open(&self) -> Result<Database> {
        if self.max_tuple_size == 0 {
            return Err(Error::unsupported("max_tuple_size must be positive"));
        }
        match self.default_engine.as_str() {
            MemoryEngine::NAME | DiskEngine::NAME => {}
            other => {
                return Err(Error::unsupported(format!(
                    "unknown default engine '{}'",
                    other
                )));
            }
        }
        Ok(Database::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_validation() {
        let config = Config::new().max_tuple_size(16).sync_writes(true);
        assert_eq!(config.get_max_tuple_size(), 16);
        assert!(config.get_sync_writes());
        assert_eq!(config.get_default_engine(), "memtx");

        assert!(Config::new().max_tuple_size(0).open().is_err());
        assert!(Config::new().default_engine("vinyl".to_owned()).open().is_err());

        let a = Config::tmp();
        let b = Config::tmp();
        assert!(a.get_temporary());
        assert_ne!(a.get_path(), b.get_path());
    }
}
