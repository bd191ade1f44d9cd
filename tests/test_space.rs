mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use quickcheck::QuickCheck;
use rand::Rng;

use spacestore::*;

use common::{fill, ids, users};

#[test]
fn duplicate_insert_is_a_conflict() -> Result<()> {
    common::setup_logger();
    let db = Config::new().open()?;
    let space = users(&db, 512);
    fill(&space, &[(1, "a"), (2, "b")]);

    let mut txn = db.begin(ADMIN);
    let err = txn.insert(&space, &record![1_u64, "c"]).unwrap_err();
    assert!(matches!(err, Error::DuplicateKey { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    txn.commit()?;

    assert_eq!(space.len(), 2);
    let pk = space.primary_key()?;
    assert_eq!(pk.get(&record![1_u64])?.unwrap().value(1)?, Some(Value::from("a")));
    Ok(())
}

#[test]
fn secondary_failure_restores_primary() -> Result<()> {
    let db = Config::new().open()?;
    let by_name = IndexDef::new(513, 1, "by_name", IndexType::Tree, common::string_key(1));
    let space = db.create_space(
        SpaceDef::new(513, "unique_names"),
        &[common::pk_def(513), by_name],
    )?;
    fill(&space, &[(1, "a")]);
    let bytes = space.byte_size();

    let mut txn = db.begin(ADMIN);
    assert!(txn.insert(&space, &record![2_u64, "a"]).is_err());
    assert_eq!(ids(&space, 0), vec![1]);
    assert_eq!(ids(&space, 1), vec![1]);
    assert_eq!(space.byte_size(), bytes);
    Ok(())
}

#[test]
fn rollback_undoes_in_reverse() -> Result<()> {
    let db = Config::new().open()?;
    let space = users(&db, 514);
    fill(&space, &[(1, "a")]);

    let mut txn = db.begin(ADMIN);
    txn.replace(&space, &record![1_u64, "changed"])?;
    txn.insert(&space, &record![2_u64, "b"])?;
    txn.delete(&space, &record![1_u64])?;
    assert_eq!(txn.len(), 3);
    txn.rollback();

    assert_eq!(ids(&space, 0), vec![1]);
    let row = space.primary_key()?.get(&record![1_u64])?.unwrap();
    assert_eq!(row.value(1)?, Some(Value::from("a")));

    // dropping an unfinished transaction rolls back too
    {
        let mut txn = db.begin(ADMIN);
        txn.insert(&space, &record![3_u64, "c"])?;
    }
    assert_eq!(ids(&space, 0), vec![1]);
    Ok(())
}

#[test]
fn update_and_upsert() -> Result<()> {
    let db = Config::new().open()?;
    let space = db.create_space(SpaceDef::new(515, "counters"), &[common::pk_def(515)])?;
    let mut txn = db.begin(ADMIN);

    let upsert = |tuple: Vec<u8>| Request::Upsert {
        tuple,
        ops: vec![UpdateOp::Add(1, Value::Unsigned(1))],
    };
    txn.execute(&space, &upsert(record![1_u64, 10_u64]))?;
    txn.execute(&space, &upsert(record![1_u64, 10_u64]))?;
    let row = space.primary_key()?.get(&record![1_u64])?.unwrap();
    assert_eq!(row.value(1)?, Some(Value::Unsigned(11)));

    // an upsert whose ops fail is skipped
    txn.execute(
        &space,
        &Request::Upsert {
            tuple: record![1_u64, 0_u64],
            ops: vec![UpdateOp::Assign(0, Value::Unsigned(9))],
        },
    )?;
    assert_eq!(ids(&space, 0), vec![1]);

    let updated = txn.execute(
        &space,
        &Request::Update {
            index_id: 0,
            key: record![1_u64],
            ops: vec![UpdateOp::Subtract(1, Value::Unsigned(20))],
        },
    )?;
    assert_eq!(updated.unwrap().value(1)?, Some(Value::Integer(-9)));

    let err = space
        .execute_update(&mut txn, 0, &record![1_u64], &[UpdateOp::Assign(0, Value::Unsigned(2))])
        .unwrap_err();
    assert_eq!(err, Error::PrimaryKeyModified { space: "counters".to_owned() });

    assert_eq!(space.execute_update(&mut txn, 0, &record![7_u64], &[])?, None);
    txn.commit()?;
    Ok(())
}

struct Audit {
    begins: AtomicUsize,
    replaces: AtomicUsize,
    veto: Option<u64>,
}

impl Trigger for Audit {
    fn on_stmt_begin(&self, _space: &SpaceDef, _txn_id: u64) -> Result<()> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_replace(
        &self,
        _space: &SpaceDef,
        _old: Option<&Tuple>,
        new: Option<&Tuple>,
    ) -> Result<()> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        let id = new.and_then(|t| t.value(0).ok().flatten()).and_then(|v| v.as_u64());
        if id.is_some() && id == self.veto {
            return Err(Error::Unsupported("vetoed".to_owned()));
        }
        Ok(())
    }
}

#[test]
fn triggers_fire_and_veto() -> Result<()> {
    let db = Config::new().open()?;
    let space = users(&db, 516);
    let audit = Arc::new(Audit {
        begins: AtomicUsize::new(0),
        replaces: AtomicUsize::new(0),
        veto: Some(13),
    });
    let as_trigger: Arc<dyn Trigger> = audit.clone();
    space.on_replace(as_trigger.clone());

    fill(&space, &[(1, "a"), (2, "b")]);
    assert_eq!(audit.begins.load(Ordering::SeqCst), 2);
    assert_eq!(audit.replaces.load(Ordering::SeqCst), 2);

    let mut txn = db.begin(ADMIN);
    assert!(txn.insert(&space, &record![13_u64, "x"]).is_err());
    assert_eq!(space.len(), 2);
    assert!(txn.is_empty());

    space.run_triggers(false);
    txn.insert(&space, &record![13_u64, "x"])?;
    txn.commit()?;
    assert_eq!(audit.replaces.load(Ordering::SeqCst), 3);

    assert!(space.remove_trigger(&as_trigger));
    assert_eq!(space.trigger_count(), 0);
    Ok(())
}

#[test]
fn access_is_checked_per_user() -> Result<()> {
    let db = Config::new().open()?;
    let space = db.create_space(
        SpaceDef::new(517, "owned").owner(42),
        &[common::pk_def(517)],
    )?;

    let mut guest = db.begin(GUEST);
    let err = guest.insert(&space, &record![1_u64]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Denied);

    space.grant(GUEST, Privileges::WRITE);
    guest.insert(&space, &record![1_u64])?;
    guest.commit()?;

    let mut owner = db.begin(42);
    owner.insert(&space, &record![2_u64])?;
    owner.commit()?;

    assert_eq!(db.drop_space(517, GUEST).unwrap_err().kind(), ErrorKind::Denied);
    db.drop_space(517, 42)?;
    Ok(())
}

#[test]
fn tuples_are_checked_against_the_format() -> Result<()> {
    let db = Config::new().max_tuple_size(64).open()?;
    let space = users(&db, 518);
    let mut txn = db.begin(ADMIN);

    assert!(matches!(
        txn.insert(&space, &record![1_u64, 2_u64]),
        Err(Error::FieldTypeMismatch { fieldno: 1, .. })
    ));
    assert!(matches!(
        txn.insert(&space, &record![1_u64, "x".repeat(100)]),
        Err(Error::TupleTooLarge { max: 64, .. })
    ));
    assert!(txn.insert(&space, &record![1_u64]).is_err());
    assert!(txn.is_empty());
    Ok(())
}

#[test]
fn sequences_and_max_id() -> Result<()> {
    let db = Config::new().open()?;
    let space = users(&db, 519);
    assert_eq!(space.max_id(0, 0)?, None);
    fill(&space, &[(4, "a"), (9, "b")]);
    assert_eq!(space.max_id(0, 0)?, Some(9));
    assert!(space.max_id(0, 1).is_err());

    let sequence = Arc::new(Sequence::new("users_seq"));
    space.set_sequence(Some(sequence.clone()));
    sequence.set(space.max_id(0, 0)?.unwrap_or(0) as i64);
    assert_eq!(space.sequence().unwrap().next()?, 10);
    Ok(())
}

#[test]
fn initial_join_rows_skip_checks() -> Result<()> {
    let db = Config::new().open()?;
    let space = db.create_space(
        SpaceDef::new(520, "replica").owner(42),
        &[common::pk_def(520)],
    )?;
    let audit = Arc::new(Audit {
        begins: AtomicUsize::new(0),
        replaces: AtomicUsize::new(0),
        veto: None,
    });
    space.on_replace(audit.clone());

    space.apply_initial_join_row(&Request::Insert(record![1_u64, "a"]))?;
    space.apply_initial_join_row(&Request::Replace(record![1_u64, "b"]))?;
    space.apply_initial_join_row(&Request::Insert(record![2_u64, "c"]))?;
    space.apply_initial_join_row(&Request::Delete {
        index_id: 0,
        key: record![2_u64],
    })?;

    assert_eq!(ids(&space, 0), vec![1]);
    assert_eq!(audit.replaces.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn index_map_stays_consistent() {
    common::setup_logger();

    fn prop(ops: Vec<(bool, u8)>) -> bool {
        let engine: Arc<dyn SpaceEngine> = Arc::new(MemoryEngine::default());
        let key = || KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)]).unwrap();
        let defs: Vec<IndexDef> = (0..6)
            .map(|id| IndexDef::new(1, id, format!("i{}", id), IndexType::Tree, key()))
            .collect();
        let a = Space::new(SpaceDef::new(1, "a"), engine.clone(), &defs[..1], 64).unwrap();
        let b = Space::new(SpaceDef::new(1, "b"), engine, &defs, 64).unwrap();

        let total = a.index_count() + b.index_count();
        for (from_a, id) in ops {
            let id = u32::from(id % 7);
            if from_a {
                a.swap_index(&b, id, id);
            } else {
                b.swap_index(&a, id, id);
            }
            if !a.check_index_map() || !b.check_index_map() {
                return false;
            }
            if a.index_count() + b.index_count() != total {
                return false;
            }
        }
        a.fill_index_map();
        a.check_index_map()
            && (0..7).all(|id| match (a.index(id), b.index(id)) {
                (Some(x), Some(y)) => !Arc::ptr_eq(&x, &y),
                _ => true,
            })
    }

    QuickCheck::new()
        .tests(200)
        .quickcheck(prop as fn(Vec<(bool, u8)>) -> bool);
}

#[test]
fn index_lookups_by_id_and_position() -> Result<()> {
    let db = Config::new().open()?;
    let sk = IndexDef::new(521, 5, "by_name", IndexType::Tree, common::string_key(1)).non_unique();
    let space = db.create_space(SpaceDef::new(521, "sparse"), &[common::pk_def(521), sk])?;

    assert_eq!(space.index_count(), 2);
    assert_eq!(space.index_id_max(), Some(5));
    assert_eq!(space.index_def(1).unwrap().id, 5);
    assert_eq!(space.index_name_by_id(5).as_deref(), Some("by_name"));
    assert!(space.index_key_def(3).is_none());
    assert!(matches!(space.index_find(3), Err(Error::NoSuchIndex { index_id: 3, .. })));
    assert_eq!(space.index_find_unique(5).unwrap_err(), Error::MoreThanOneTuple);

    // a non-unique index stores rows under key + primary key
    fill(&space, &[(2, "same"), (1, "same"), (3, "other")]);
    assert_eq!(ids(&space, 5), vec![3, 1, 2]);
    assert_eq!(
        space.index(5).unwrap().count(IteratorType::Eq, &record!["same"])?,
        2
    );
    Ok(())
}

#[test]
fn ddl_waits_for_open_transactions() -> Result<()> {
    let db = Config::new().open()?;
    let space = users(&db, 522);

    let mut txn = db.begin(ADMIN);
    txn.insert(&space, &record![1_u64, "a"])?;
    assert!(matches!(db.truncate(522, ADMIN), Err(Error::SpaceBusy { .. })));
    assert!(matches!(db.drop_space(522, ADMIN), Err(Error::SpaceBusy { .. })));
    txn.commit()?;

    db.drop_space(522, ADMIN)?;
    Ok(())
}

#[test]
fn journal_survives_reopen() -> Result<()> {
    common::setup_logger();
    let dir = tempdir::TempDir::new("spacestore_journal").unwrap();
    let config = Config::new().path(dir.path().to_path_buf());
    let def = || {
        SpaceDef::new(600, "durable").engine(DiskEngine::NAME).format(vec![
            FieldDef::new("id", FieldType::Unsigned),
            FieldDef::new("payload", FieldType::Unsigned),
        ])
    };

    let mut rng = rand::rng();
    let mut expected = std::collections::BTreeMap::new();
    {
        let db = config.open()?;
        let space = db.create_space(def(), &[common::pk_def(600)])?;
        let mut txn = db.begin(ADMIN);
        for _ in 0..200 {
            let id = rng.random_range(0..50_u64);
            let payload = rng.random::<u32>() as u64;
            if rng.random_bool(0.2) {
                txn.delete(&space, &record![id])?;
                expected.remove(&id);
            } else {
                txn.replace(&space, &record![id, payload])?;
                expected.insert(id, payload);
            }
        }
        txn.commit()?;

        // uncommitted work is never journaled
        let mut txn = db.begin(ADMIN);
        txn.insert(&space, &record![1000_u64, 0_u64])?;
        txn.rollback();
    }

    let db = config.open()?;
    let space = db.create_space(def(), &[common::pk_def(600)])?;
    let recovered: Vec<(u64, u64)> = space
        .primary_key()?
        .tuples()
        .iter()
        .map(|t| {
            (
                t.value(0).unwrap().unwrap().as_u64().unwrap(),
                t.value(1).unwrap().unwrap().as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(recovered, expected.into_iter().collect::<Vec<_>>());

    // truncation empties the journal as well
    db.truncate(600, ADMIN)?;
    drop(space);
    drop(db);
    let db = config.open()?;
    let space = db.create_space(def(), &[common::pk_def(600)])?;
    assert!(space.is_empty());
    Ok(())
}

#[test]
fn temporary_spaces_are_not_journaled() -> Result<()> {
    let dir = tempdir::TempDir::new("spacestore_temporary").unwrap();
    let config = Config::new()
        .path(dir.path().to_path_buf())
        .default_engine(DiskEngine::NAME.to_owned());
    let def = || SpaceDef::new(601, "scratch").temporary();
    {
        let db = config.open()?;
        let space = db.create_space(def(), &[common::pk_def(601)])?;
        assert_eq!(space.engine().name(), DiskEngine::NAME);
        fill(&space, &[(1, "a")]);
    }
    let db = config.open()?;
    assert!(db.create_space(def(), &[common::pk_def(601)])?.is_empty());
    Ok(())
}
