mod common;

use std::cmp::Ordering;
use std::sync::Arc;

use spacestore::*;

use common::{fill, ids, users};

fn by_name(space_id: u32) -> IndexDef {
    IndexDef::new(space_id, 1, "by_name", IndexType::Tree, common::string_key(1))
}

#[test]
fn adding_a_secondary_index_replays_rows() -> Result<()> {
    common::setup_logger();
    let db = Config::new().open()?;
    let old = users(&db, 512);
    fill(&old, &[(1, "a"), (2, "b")]);
    let old_pk = old.primary_key()?;

    let prepared = db.alter(512, ADMIN)?.index(by_name(512)).prepare()?;
    assert_eq!(prepared.space().index_count(), 1);
    // nothing is published before commit
    assert!(Arc::ptr_eq(&db.space(512)?, &old));

    let new = db.commit_alter(prepared);
    assert!(Arc::ptr_eq(&db.space(512)?, &new));
    assert_eq!(new.index_count(), 2);
    assert_eq!(ids(&new, 1), vec![1, 2]);
    // the unchanged primary key moved over rather than being rebuilt
    assert!(Arc::ptr_eq(&new.primary_key()?, &old_pk));

    let mut cursor = db.cursor(512, 1)?;
    assert_eq!(cursor.seek(&record!["b"], IteratorType::Eq)?, Ordering::Equal);
    assert_eq!(cursor.payload_fetch()?, &record![2_u64, "b"][..]);

    // the old space is retired: its cursors and statements fail
    let mut txn = db.begin(ADMIN);
    assert_eq!(txn.insert(&old, &record![3_u64, "c"]).unwrap_err().kind(), ErrorKind::Fatal);
    txn.insert(&new, &record![3_u64, "c"])?;
    txn.commit()?;
    assert_eq!(ids(&new, 1), vec![1, 2, 3]);
    Ok(())
}

#[test]
fn truncate_bumps_the_count_and_faults_old_cursors() -> Result<()> {
    let db = Config::new().open()?;
    let old = users(&db, 513);
    fill(&old, &[(1, "a"), (2, "b")]);
    let mut stale = db.cursor(513, 0)?;
    assert!(!stale.first()?);

    let new = db.truncate(513, ADMIN)?;
    assert_eq!(new.truncate_count(), old.truncate_count() + 1);
    assert!(new.is_empty());
    assert_eq!(new.index_count(), 1);

    assert_eq!(stale.state(), CursorState::Fault);
    assert_eq!(stale.next().unwrap_err().kind(), ErrorKind::Fatal);
    assert_eq!(stale.tuple().unwrap_err().kind(), ErrorKind::Fatal);

    let mut fresh = db.cursor(513, 0)?;
    assert!(fresh.first()?);

    let again = db.truncate(513, ADMIN)?;
    assert_eq!(again.truncate_count(), 2);
    Ok(())
}

#[test]
fn failed_prepare_changes_nothing() -> Result<()> {
    let db = Config::new().open()?;
    let space = users(&db, 514);
    fill(&space, &[(1, "a"), (2, "a")]);

    // retyping a field of a non-empty space
    let err = db
        .alter(514, ADMIN)?
        .format(vec![
            FieldDef::new("id", FieldType::Unsigned),
            FieldDef::new("name", FieldType::Unsigned),
        ])
        .prepare()
        .unwrap_err();
    assert!(matches!(err, Error::IncompatibleAlter { .. }));

    // a unique index over duplicate values
    let err = db.alter(514, ADMIN)?.index(by_name(514)).prepare().unwrap_err();
    assert!(matches!(err, Error::DuplicateKey { .. }));

    // a bad name
    let err = db.alter(514, ADMIN)?.rename("bad\u{7}").prepare().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Denied);

    let err = db.alter(514, GUEST)?.rename("other").prepare().unwrap_err();
    assert!(matches!(err, Error::AccessDenied { .. }));

    let current = db.space(514)?;
    assert!(Arc::ptr_eq(&current, &space));
    assert_eq!(current.index_count(), 1);
    assert_eq!(current.len(), 2);
    assert!(!current.fault().is_set());

    // the DDL flag was released
    let mut txn = db.begin(ADMIN);
    txn.insert(&space, &record![3_u64, "c"])?;
    txn.commit()?;
    Ok(())
}

#[test]
fn dml_is_refused_between_prepare_and_commit() -> Result<()> {
    let db = Config::new().open()?;
    let space = users(&db, 515);
    fill(&space, &[(1, "a")]);

    let prepared = db.alter(515, ADMIN)?.index(by_name(515)).prepare()?;

    let mut txn = db.begin(ADMIN);
    let err = txn.insert(&space, &record![2_u64, "b"]).unwrap_err();
    assert!(matches!(err, Error::SpaceBusy { .. }));
    assert!(matches!(
        db.alter(515, ADMIN)?.prepare(),
        Err(Error::SpaceBusy { .. })
    ));
    assert!(matches!(db.truncate(515, ADMIN), Err(Error::SpaceBusy { .. })));

    // publishing by hand: commit, then tear down the retired space
    let (new, retired) = prepared.commit(db.schema());
    assert!(Arc::ptr_eq(retired.space(), &space));
    retired.teardown();
    assert_eq!(space.index_count(), 0);

    txn.insert(&new, &record![2_u64, "b"])?;
    txn.commit()?;
    assert_eq!(ids(&new, 1), vec![1, 2]);
    Ok(())
}

#[test]
fn renaming_rebuilds_every_index() -> Result<()> {
    let db = Config::new().open()?;
    let space = db.create_space(
        SpaceDef::new(516, "users"),
        &[common::pk_def(516), by_name(516).non_unique()],
    )?;
    fill(&space, &[(1, "b"), (2, "a")]);
    let old_pk = space.primary_key()?;

    let new = db.commit_alter(db.alter(516, ADMIN)?.rename("people").prepare()?);
    assert_eq!(new.name(), "people");
    assert!(!Arc::ptr_eq(&new.primary_key()?, &old_pk));
    assert_eq!(ids(&new, 0), vec![1, 2]);
    assert_eq!(ids(&new, 1), vec![2, 1]);

    assert!(db.space_by_name("users").is_err());
    assert!(Arc::ptr_eq(&db.space_by_name("people")?, &new));
    Ok(())
}

#[test]
fn changing_the_primary_key() -> Result<()> {
    let db = Config::new().open()?;
    let space = users(&db, 517);
    fill(&space, &[(1, "b"), (2, "a")]);

    let pk_on_name =
        IndexDef::new(517, 0, "pk", IndexType::Tree, common::string_key(1));
    let new = db.commit_alter(db.alter(517, ADMIN)?.index(pk_on_name).prepare()?);
    assert_eq!(ids(&new, 0), vec![2, 1]);

    let mut txn = db.begin(ADMIN);
    assert!(matches!(
        txn.insert(&new, &record![3_u64, "a"]),
        Err(Error::DuplicateKey { .. })
    ));
    Ok(())
}

#[test]
fn dropping_indexes() -> Result<()> {
    let db = Config::new().open()?;
    let space = db.create_space(
        SpaceDef::new(518, "t"),
        &[common::pk_def(518), by_name(518)],
    )?;
    fill(&space, &[(1, "a")]);

    // secondary keys need a primary key
    assert!(matches!(
        db.alter(518, ADMIN)?.drop_index(0).prepare(),
        Err(Error::InvalidIndexDef { .. })
    ));

    let new = db.commit_alter(db.alter(518, ADMIN)?.drop_index(1).prepare()?);
    assert_eq!(new.index_count(), 1);
    assert!(new.index(1).is_none());
    assert_eq!(new.len(), 1);

    let bare = db.commit_alter(db.alter(518, ADMIN)?.drop_index(0).prepare()?);
    assert_eq!(bare.index_count(), 0);
    assert!(bare.is_empty());
    Ok(())
}

#[test]
fn journal_engine_survives_alter_and_drop() -> Result<()> {
    let dir = tempdir::TempDir::new("spacestore_alter").unwrap();
    let config = Config::new().path(dir.path().to_path_buf());
    let def = || SpaceDef::new(600, "durable").engine(DiskEngine::NAME);
    {
        let db = config.open()?;
        let space = db.create_space(def(), &[common::pk_def(600)])?;
        fill(&space, &[(1, "a"), (2, "b")]);
        let new = db.commit_alter(db.alter(600, ADMIN)?.index(by_name(600)).prepare()?);
        fill(&new, &[(3, "c")]);
    }
    {
        let db = config.open()?;
        let space = db.create_space(def(), &[common::pk_def(600)])?;
        assert_eq!(ids(&space, 0), vec![1, 2, 3]);
        db.drop_space(600, ADMIN)?;
    }
    let db = config.open()?;
    assert!(db.create_space(def(), &[common::pk_def(600)])?.is_empty());
    Ok(())
}

#[test]
fn abandoned_prepare_releases_the_space() -> Result<()> {
    let db = Config::new().open()?;
    let space = users(&db, 519);
    fill(&space, &[(1, "a")]);

    let prepared = db.alter(519, ADMIN)?.index(by_name(519)).prepare()?;
    assert!(matches!(db.drop_space(519, ADMIN), Err(Error::SpaceBusy { .. })));
    assert!(Arc::ptr_eq(&db.space(519)?, &space));

    drop(prepared);
    assert_eq!(space.index_count(), 1);
    assert!(!space.fault().is_set());

    db.drop_space(519, ADMIN)?;
    assert_eq!(space.fault().check().unwrap_err().kind(), ErrorKind::Fatal);
    assert!(db.space(519).is_err());
    Ok(())
}
