mod common;

use std::cmp::Ordering;
use std::sync::Arc;

use quickcheck::QuickCheck;

use spacestore::*;

fn value(tag: u8, n: u64) -> Value {
    match tag % 5 {
        0 => Value::Unsigned(n),
        1 => Value::Integer(-((n / 2) as i64)),
        2 => Value::from(format!("s{}", n % 97)),
        3 => Value::Double(n as f64 / 3.0),
        _ => Value::Nil,
    }
}

fn key_def_from(picks: &[u8], field_count: usize) -> Option<KeyDef> {
    let mut parts: Vec<KeyPart> = vec![];
    for pick in picks {
        // allow fields past the end of the row: nullable parts read them as nil
        let fieldno = u32::from(*pick) % (field_count as u32 + 2);
        if parts.iter().any(|p| p.fieldno == fieldno) {
            continue;
        }
        parts.push(KeyPart::new(fieldno, FieldType::Scalar).nullable());
    }
    KeyDef::new(parts).ok()
}

#[test]
fn extraction_paths_agree() {
    common::setup_logger();

    fn prop(row: Vec<(u8, u64)>, picks: Vec<u8>) -> bool {
        let values: Vec<Value> = row.iter().map(|(t, n)| value(*t, *n)).collect();
        let Some(key_def) = key_def_from(&picks, values.len()) else {
            return true;
        };
        let data = encode_record(&values);

        let mapped_format = Arc::new(TupleFormat::new(vec![], 0, [&key_def]));
        let mapped = Tuple::new(&mapped_format, &data).unwrap();
        let scanned = Tuple::from_raw(&data).unwrap();

        let raw = key_def.extract_key_raw(&data).unwrap();
        raw == key_def.extract_key(&mapped).unwrap()
            && raw == key_def.extract_key(&scanned).unwrap()
            && decode_record(&raw).unwrap().len() == key_def.part_count() as usize
    }

    QuickCheck::new()
        .tests(500)
        .quickcheck(prop as fn(Vec<(u8, u64)>, Vec<u8>) -> bool);
}

#[test]
fn sequential_keys_are_record_prefixes() {
    let key_def = KeyDef::new(vec![
        KeyPart::new(0, FieldType::Unsigned),
        KeyPart::new(1, FieldType::String),
    ])
    .unwrap();
    assert_eq!(key_def.extraction(), Extraction::Sequential);

    let data = record![3_u64, "c", true, 4.5];
    assert_eq!(key_def.extract_key_raw(&data).unwrap(), record![3_u64, "c"]);

    // a required part past the end of the row is corruption
    let short = record![3_u64];
    assert_eq!(
        key_def.extract_key_raw(&short).unwrap_err().kind(),
        ErrorKind::Corruption
    );
}

#[test]
fn scattered_keys_follow_part_order() {
    let key_def = KeyDef::new(vec![
        KeyPart::new(2, FieldType::Boolean),
        KeyPart::new(0, FieldType::Unsigned),
        KeyPart::new(5, FieldType::String).nullable(),
    ])
    .unwrap();
    assert_eq!(key_def.extraction(), Extraction::Scattered);

    let data = record![3_u64, "c", true];
    assert_eq!(
        key_def.extract_key_raw(&data).unwrap(),
        record![true, 3_u64, Value::Nil]
    );
}

#[test]
fn sort_keys_order_like_compare() {
    fn prop(a: Vec<(u8, u64)>, b: Vec<(u8, u64)>, desc: bool) -> bool {
        let mut part = KeyPart::new(0, FieldType::Scalar).nullable();
        if desc {
            part = part.desc();
        }
        let key_def = KeyDef::new(vec![
            part,
            KeyPart::new(1, FieldType::Scalar)
                .nullable()
                .collation(Collation::UnicodeCi),
        ])
        .unwrap();

        let key = |row: &[(u8, u64)]| {
            let values: Vec<Value> =
                row.iter().take(2).map(|(t, n)| value(*t, *n)).collect();
            encode_record(&values)
        };
        let (a, b) = (key(&a), key(&b));

        let by_compare = key_def.compare(&a, &b).unwrap();
        let (sa, sb) = (key_def.sort_key(&a).unwrap(), key_def.sort_key(&b).unwrap());
        if sa.starts_with(&sb) || sb.starts_with(&sa) {
            // one key is a partial prefix of the other
            return by_compare == Ordering::Equal;
        }
        by_compare == sa.cmp(&sb)
    }

    QuickCheck::new()
        .tests(500)
        .quickcheck(prop as fn(Vec<(u8, u64)>, Vec<(u8, u64)>, bool) -> bool);
}

#[test]
fn case_insensitive_collation_matches_across_case() {
    let key_def = KeyDef::new(vec![
        KeyPart::new(0, FieldType::String).collation(Collation::UnicodeCi),
    ])
    .unwrap();
    assert_eq!(
        key_def.compare(&record!["ÄBC"], &record!["äbc"]).unwrap(),
        Ordering::Equal
    );
    assert_eq!(
        key_def.sort_key(&record!["ÄBC"]).unwrap(),
        key_def.sort_key(&record!["äbc"]).unwrap()
    );
}
