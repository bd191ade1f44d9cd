mod common;

use spacestore::*;

use common::{fill, users};

#[test]
fn object_types_by_name_and_code() {
    assert_eq!(SchemaObjectType::from_name("space"), SchemaObjectType::Space);
    assert_eq!(SchemaObjectType::from_name("sequence").code(), 6);
    assert_eq!(SchemaObjectType::from_code(4), SchemaObjectType::User);
    assert_eq!(SchemaObjectType::from_name("SPACE"), SchemaObjectType::Unknown);
    assert_eq!(SchemaObjectType::from_name(""), SchemaObjectType::Unknown);
}

#[test]
fn identifier_checks() {
    let checker = IdentifierChecker::default();
    assert!(checker.is_valid(b"orders"));
    assert!(!checker.is_valid(b"tab\x01le"));
    // a code point no unicode version assigns
    assert!(!checker.is_valid("x\u{E0080}".as_bytes()));
    assert_eq!(
        checker.check("a\u{2028}b").unwrap_err().kind(),
        ErrorKind::Denied
    );
}

#[test]
fn root_pages_address_indexes() -> Result<()> {
    let page = RootPage::new(513, 2)?;
    let back = RootPage::from_raw(page.raw());
    assert_eq!((back.space_id(), back.index_id()), (513, 2));
    assert_eq!(RootPage::new(513, 1 << 10).unwrap_err().kind(), ErrorKind::Misuse);
    Ok(())
}

#[test]
fn extracting_keys_through_the_schema() -> Result<()> {
    common::setup_logger();
    let db = Config::new().open()?;
    let by_name = IndexDef::new(520, 1, "by_name", IndexType::Tree, common::string_key(1));
    db.create_space(
        SpaceDef::new(520, "people"),
        &[common::pk_def(520), by_name],
    )?;

    let row = record![7_u64, "g", true];
    assert_eq!(db.tuple_extract_key(&row, 520, 0)?, record![7_u64]);
    assert_eq!(db.tuple_extract_key(&row, 520, 1)?, record!["g"]);

    assert_eq!(db.tuple_extract_key(&row, 521, 0), Err(Error::NoSuchSpace(521)));
    assert!(matches!(
        db.tuple_extract_key(&row, 520, 9),
        Err(Error::NoSuchIndex { index_id: 9, .. })
    ));
    Ok(())
}

#[test]
fn schema_changes_bump_the_version() -> Result<()> {
    let db = Config::new().open()?;
    let start = db.schema().version();

    let space = users(&db, 521);
    let created = db.schema().version();
    assert!(created > start);

    // DML leaves the schema alone
    fill(&space, &[(1, "a")]);
    assert_eq!(db.schema().version(), created);

    db.truncate(521, ADMIN)?;
    let truncated = db.schema().version();
    assert!(truncated > created);

    db.drop_space(521, ADMIN)?;
    assert!(db.schema().version() > truncated);
    assert!(db.schema().is_empty());
    Ok(())
}

#[test]
fn creating_spaces_checks_names_and_ids() -> Result<()> {
    let db = Config::new().open()?;
    users(&db, 522);

    assert_eq!(
        db.create_space(SpaceDef::new(522, "other"), &[common::pk_def(522)])
            .unwrap_err()
            .kind(),
        ErrorKind::Conflict
    );
    assert!(matches!(
        db.create_space(SpaceDef::new(523, "users_522"), &[common::pk_def(523)]),
        Err(Error::SpaceExists(_))
    ));
    assert!(matches!(
        db.create_space(SpaceDef::new(523, ""), &[common::pk_def(523)]),
        Err(Error::InvalidIdentifier(_))
    ));
    assert!(matches!(
        db.create_space(SpaceDef::new(523, "bell\u{7}"), &[common::pk_def(523)]),
        Err(Error::InvalidIdentifier(_))
    ));
    assert!(matches!(
        db.create_space(SpaceDef::new(523, "t").engine("vinyl"), &[common::pk_def(523)]),
        Err(Error::Unsupported(_))
    ));

    assert_eq!(db.schema().space_ids(), vec![522]);
    assert!(db.space_by_name("users_522").is_ok());
    Ok(())
}

#[test]
fn only_privileged_users_drop_spaces() -> Result<()> {
    let db = Config::new().open()?;
    users(&db, 524);
    assert!(matches!(
        db.drop_space(524, GUEST),
        Err(Error::AccessDenied { .. })
    ));
    assert!(db.space(524).is_ok());
    db.drop_space(524, ADMIN)?;
    assert_eq!(db.drop_space(524, ADMIN), Err(Error::NoSuchSpace(524)));
    Ok(())
}
