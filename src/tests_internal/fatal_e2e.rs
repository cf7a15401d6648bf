use std::sync::{atomic::Ordering, Arc};

use bytes::Bytes;

use crate::{
    id::{RangeSpec, TableIdentifier},
    key::{Key, END_ROOT_ROW},
    option::RangeOptions,
    range::{FatalKind, Range, RangeError},
    scan::ScanContext,
    schema::{AccessGroupSpec, ColumnFamilySpec, Schema},
    test_util::{users_schema, users_table, TestEnv},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn range_with_rows(env: &TestEnv, rows: &[&'static str]) -> Result<Range, RangeError> {
    let range = Range::new(
        env.context(),
        users_table(),
        users_schema(),
        RangeSpec::new("", "m"),
        0,
    )?;
    range.increment_update_counter()?;
    range.lock();
    for (ts, row) in rows.iter().enumerate() {
        let key = Key::insert(*row, 1, format!("q{ts}"), ts as i64 + 1);
        range.add(&key.encode(), &Bytes::from_static(b"v"), 9)?;
    }
    range.unlock(9);
    range.decrement_update_counter();
    Ok(range)
}

fn fatal_kind(result: Result<(), RangeError>) -> Option<FatalKind> {
    match result {
        Err(RangeError::Fatal(fatal)) => Some(fatal.kind),
        _ => None,
    }
}

fn assert_out_of_service(range: &Range) {
    assert!(!range.is_available());
    assert!(matches!(
        range.add(&Key::insert("b", 1, "q", 50).encode(), &Bytes::new(), 0),
        Err(RangeError::Unavailable)
    ));
    assert!(matches!(
        range.increment_update_counter(),
        Err(RangeError::Unavailable)
    ));
    assert!(matches!(
        range.create_scanner(Arc::new(ScanContext::builder().build())),
        Err(RangeError::Unavailable)
    ));
    assert!(matches!(
        range.run_compaction(true),
        Err(RangeError::Unavailable)
    ));
    assert!(!range.maintenance_in_progress());
}

#[test]
fn metadata_failure_takes_the_range_out_of_service() -> TestResult {
    let env = TestEnv::new();
    env.metadata.fail_flush.store(true, Ordering::SeqCst);
    let range = range_with_rows(&env, &["a", "c", "e", "g"])?;

    assert!(range.begin_maintenance());
    assert_eq!(fatal_kind(range.do_split()), Some(FatalKind::MetadataUpdate));
    assert_eq!(
        range.fatal_error().map(|fatal| fatal.kind),
        Some(FatalKind::MetadataUpdate)
    );
    assert_out_of_service(&range);

    // The split stopped before the shrink.
    assert_eq!(range.start_row(), "");
    assert!(range.split_log().is_some());
    assert!(env.master.reports().is_empty());
    assert!(env.metadata.committed().is_empty());
    Ok(())
}

#[test]
fn missing_split_row_is_fatal() -> TestResult {
    let env = TestEnv::new();
    // Every cell sits in the end row, so no row is strictly inside the span.
    let range = range_with_rows(&env, &["m", "m", "m"])?;

    assert!(range.begin_maintenance());
    assert_eq!(fatal_kind(range.do_split()), Some(FatalKind::NoSplitRow));
    assert_out_of_service(&range);
    assert!(env.metadata.committed().is_empty());
    Ok(())
}

#[test]
fn empty_range_has_no_split_row() -> TestResult {
    let env = TestEnv::new();
    let range = range_with_rows(&env, &[])?;
    match range.get_split_row() {
        Err(RangeError::Fatal(fatal)) => assert_eq!(fatal.kind, FatalKind::NoSplitRow),
        other => panic!("expected a fatal error, got {other:?}"),
    }
    assert!(!range.is_available());
    Ok(())
}

#[test]
fn transfer_log_directory_failures_are_fatal() -> TestResult {
    let env = TestEnv::new();
    env.logs.fail_mkdirs.store(true, Ordering::SeqCst);
    let range = range_with_rows(&env, &["a", "c", "e", "g"])?;
    assert!(range.begin_maintenance());
    assert_eq!(fatal_kind(range.do_split()), Some(FatalKind::TransferLogDir));
    assert_out_of_service(&range);

    let mut env = TestEnv::new();
    env.options = RangeOptions::default().log_dir("/hypertable/servers/rs1/log");
    let range = range_with_rows(&env, &["a", "c", "e", "g"])?;
    assert!(range.begin_maintenance());
    assert_eq!(fatal_kind(range.do_split()), Some(FatalKind::TransferLogDir));
    assert!(!range.is_available());
    Ok(())
}

#[test]
fn split_log_close_failure_is_fatal_after_the_shrink() -> TestResult {
    let env = TestEnv::new();
    env.logs.fail_close.store(true, Ordering::SeqCst);
    let range = range_with_rows(&env, &["a", "c", "e", "g"])?;

    assert!(range.begin_maintenance());
    assert_eq!(fatal_kind(range.do_split()), Some(FatalKind::SplitLogClose));
    assert_out_of_service(&range);
    assert_ne!(range.start_row(), "");
    assert_eq!(env.metadata.committed().len(), 4);
    assert!(env.master.reports().is_empty());
    Ok(())
}

#[test]
fn mutators_are_turned_away_after_a_fatal_error() -> TestResult {
    let env = TestEnv::new();
    env.metadata.fail_flush.store(true, Ordering::SeqCst);
    let range = Arc::new(range_with_rows(&env, &["a", "c", "e", "g"])?);

    assert!(range.begin_maintenance());
    assert!(range.do_split().is_err());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let range = Arc::clone(&range);
            std::thread::spawn(move || range.increment_update_counter())
        })
        .collect();
    for handle in handles {
        let result = handle.join().map_err(|_| "mutator panicked")?;
        assert!(matches!(result, Err(RangeError::Unavailable)));
    }
    Ok(())
}

#[test]
fn root_range_is_never_split() -> TestResult {
    let env = TestEnv::new();
    let schema = Schema::builder(1)
        .access_group(
            AccessGroupSpec::new("default").column_family(ColumnFamilySpec::new(1, "Files")),
        )
        .build()?;
    let range = Range::new(
        env.context(),
        TableIdentifier::new(0, "METADATA", 1),
        Arc::new(schema),
        RangeSpec::new("", END_ROOT_ROW),
        0,
    )?;
    assert!(range.is_root());

    assert!(range.begin_maintenance());
    assert!(matches!(range.do_split(), Err(RangeError::RootSplit)));
    assert!(!range.maintenance_in_progress());
    assert!(range.is_available());
    Ok(())
}
