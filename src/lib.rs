//! `spacestore` is the storage-engine seam of an embedded relational
//! database: spaces (tables) made of indexes, cursors that scan and
//! mutate them, and the key definitions that tie rows to index order.
//!
//! ```
//! use spacestore::*;
//!
//! # fn main() -> Result<()> {
//! let db = Config::new().open()?;
//! let pk = KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)])?;
//! let space = db.create_space(
//!     SpaceDef::new(512, "users"),
//!     &[IndexDef::new(512, 0, "pk", IndexType::Tree, pk)],
//! )?;
//!
//! let mut txn = db.begin(ADMIN);
//! txn.insert(&space, &record![1_u64, "a"])?;
//! txn.insert(&space, &record![2_u64, "b"])?;
//! txn.commit()?;
//!
//! let mut cursor = db.cursor(512, 0)?;
//! assert_eq!(cursor.seek(&record![1_u64], IteratorType::Ge)?, std::cmp::Ordering::Equal);
//! assert_eq!(cursor.column(1)?, Some(Value::from("a")));
//! assert!(!cursor.next()?);
//! assert!(cursor.next()?);
//! # Ok(())
//! # }
//! ```

#[macro_use]
mod record;

mod access;
mod alter;
mod config;
mod cursor;
mod db;
mod disk;
mod engine;
mod fault;
mod hash_index;
mod index;
mod journal;
mod key_def;
mod memtx;
mod result;
mod schema;
mod schema_def;
mod sequence;
mod space;
mod trigger;
mod tree_index;
mod tuple;
mod txn;

pub use self::{
    access::{ADMIN, AccessCache, GUEST, Privileges},
    alter::{AlterSpace, PreparedAlter, PreparedTruncate, RetiredSpace, TruncateSpace},
    config::Config,
    cursor::{Cursor, CursorHint, CursorState},
    db::Database,
    disk::DiskEngine,
    engine::{SpaceEngine, check_index_def_common},
    fault::FaultLatch,
    hash_index::HashIndex,
    index::{Direction, DupMode, Index, IndexDef, IndexType, IteratorType, Position},
    key_def::{Collation, Extraction, FIELD_MAX, KeyDef, KeyPart, SortOrder},
    memtx::MemoryEngine,
    record::{Value, decode_record, encode_record},
    result::{Error, ErrorKind, Result},
    schema::{RootPage, Schema},
    schema_def::{IdentifierChecker, NAME_MAX, SchemaObjectType},
    sequence::Sequence,
    space::{Change, INDEX_MAX, Space, SpaceDef, SpaceOpts, check_compatibility},
    trigger::Trigger,
    tree_index::TreeIndex,
    tuple::{FieldDef, FieldType, Tuple, TupleFormat},
    txn::{Request, Txn, UpdateOp, updated_values},
};
