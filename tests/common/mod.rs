#![allow(dead_code)]

use std::sync::Arc;

use spacestore::*;

pub fn setup_logger() {
    use std::io::Write;

    fn tn() -> String {
        std::thread::current().name().unwrap_or("unknown").to_owned()
    }

    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{:05} {:20} {:10} {}",
                record.level(),
                tn(),
                record
                    .module_path()
                    .and_then(|path| path.split("::").last())
                    .unwrap_or("?"),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info);

    if let Ok(env) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env);
    }

    let _r = builder.try_init();
}

pub fn unsigned_pk() -> KeyDef {
    KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)]).unwrap()
}

pub fn string_key(fieldno: u32) -> KeyDef {
    KeyDef::new(vec![KeyPart::new(fieldno, FieldType::String)]).unwrap()
}

pub fn pk_def(space_id: u32) -> IndexDef {
    IndexDef::new(space_id, 0, "pk", IndexType::Tree, unsigned_pk())
}

/// A `users(id unsigned, name string)` space with a tree primary key.
pub fn users(db: &Database, space_id: u32) -> Arc<Space> {
    let def = SpaceDef::new(space_id, format!("users_{}", space_id)).format(vec![
        FieldDef::new("id", FieldType::Unsigned),
        FieldDef::new("name", FieldType::String),
    ]);
    db.create_space(def, &[pk_def(space_id)]).unwrap()
}

pub fn fill(space: &Arc<Space>, rows: &[(u64, &str)]) {
    let mut txn = Txn::new(ADMIN);
    for (id, name) in rows {
        txn.insert(space, &record![*id, *name]).unwrap();
    }
    txn.commit().unwrap();
}

/// Field 0 of every row of an index, in index order.
pub fn ids(space: &Space, index_id: u32) -> Vec<u64> {
    space
        .index(index_id)
        .unwrap()
        .tuples()
        .iter()
        .map(|tuple| tuple.value(0).unwrap().unwrap().as_u64().unwrap())
        .collect()
}
