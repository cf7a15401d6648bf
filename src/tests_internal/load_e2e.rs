use std::sync::Arc;

use crate::{
    cellstore::MemCellStore,
    id::{RangeSpec, TableIdentifier},
    key::{Key, END_ROOT_ROW},
    range::Range,
    scan::{Cell, ScanContext},
    schema::{AccessGroupSpec, ColumnFamilySpec, Schema},
    test_util::{users_schema, users_table, TestEnv},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn store(path: &str, rows: &[&'static str]) -> MemCellStore {
    let cells = rows
        .iter()
        .enumerate()
        .map(|(ts, row)| Cell::new(Key::insert(*row, 1, "first", ts as i64 + 1), *row))
        .collect();
    MemCellStore::new(path, cells)
}

fn scanned_rows(range: &Range) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut scanner = range.create_scanner(Arc::new(ScanContext::builder().build()))?;
    let mut rows = Vec::new();
    while let Some(cell) = scanner.get() {
        rows.push(String::from_utf8(cell.key.row.to_vec())?);
        scanner.forward();
    }
    Ok(rows)
}

#[test]
fn unreadable_stores_and_unknown_groups_are_skipped() -> TestResult {
    let env = TestEnv::new();
    let table = users_table();
    env.cell_stores
        .insert(store("users/default/cs3", &["a", "g", "k", "z"]));
    env.cell_stores.insert(store("users/blobs/cs1", &["h"]));
    env.cell_stores.break_index("users/blobs/cs1");
    env.cell_stores.insert(store("users/ghost/cs1", &["i"]));

    env.metadata.add_files(
        &table,
        b"m",
        "default",
        " users/default/cs3 ; users/default/cs5 ;",
    );
    env.metadata
        .add_files(&table, b"m", "blobs", "users/blobs/cs1");
    env.metadata
        .add_files(&table, b"m", "ghost", "users/ghost/cs1");

    let range = Range::new(
        env.context(),
        table,
        users_schema(),
        RangeSpec::new("f", "m"),
        0,
    )?;
    assert!(range.is_available());
    // Only the readable store survives, clipped to the span.
    assert_eq!(scanned_rows(&range)?, vec!["g", "k"]);
    assert!(range.disk_usage() > 0);
    Ok(())
}

#[test]
fn new_stores_are_numbered_after_loaded_ones() -> TestResult {
    let env = TestEnv::new();
    let table = users_table();
    env.cell_stores.insert(store("users/default/cs3", &["g"]));
    env.metadata
        .add_files(&table, b"m", "default", "users/default/cs3");

    let range = Range::new(
        env.context(),
        table,
        users_schema(),
        RangeSpec::new("", "m"),
        0,
    )?;
    range.increment_update_counter()?;
    range.lock();
    range.add(
        &Key::insert("b", 1, "first", 10).encode(),
        &bytes::Bytes::from_static(b"b"),
        1,
    )?;
    range.add(
        &Key::insert("h", 1, "first", 11).encode(),
        &bytes::Bytes::from_static(b"h"),
        1,
    )?;
    range.unlock(1);
    range.decrement_update_counter();
    range.run_compaction(false)?;

    assert!(range.begin_maintenance());
    range.do_split()?;
    let files: Vec<_> = env
        .metadata
        .committed()
        .into_iter()
        .filter(|write| write.qualifier == "default")
        .map(|write| write.value)
        .collect();
    // Store 4 came from the minor compaction, store 5 from the major one.
    assert_eq!(files, vec!["users/default/cs5"]);
    Ok(())
}

#[test]
fn root_range_loads_from_the_root_list() -> TestResult {
    let env = TestEnv::new();
    let schema = Schema::builder(1)
        .access_group(
            AccessGroupSpec::new("default").column_family(ColumnFamilySpec::new(1, "StartRow")),
        )
        .build()?;
    let table = TableIdentifier::new(0, "METADATA", 1);
    env.cell_stores.insert(store("root/default/cs1", &["0:a"]));
    env.cell_stores.insert(store("meta/default/cs1", &["0:b"]));
    env.metadata
        .root
        .lock()
        .push(("default".to_string(), "root/default/cs1".to_string()));
    env.metadata
        .add_files(&table, END_ROOT_ROW, "default", "meta/default/cs1");

    let range = Range::new(
        env.context(),
        table,
        Arc::new(schema),
        RangeSpec::new("", END_ROOT_ROW),
        0,
    )?;
    assert!(range.is_root());
    assert_eq!(scanned_rows(&range)?, vec!["0:a"]);
    Ok(())
}
