use std::sync::Arc;

use bytes::Bytes;

use crate::{
    commit_log::transfer_log_dir,
    id::RangeSpec,
    key::Key,
    metadata::{FILES_COLUMN, START_ROW_COLUMN},
    range::{Range, RangeError},
    scan::ScanContext,
    test_util::{users_schema, users_table, MetadataWrite, TestEnv},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Range `("", "m"]` holding one `name` cell in rows `a..=k` and one `data`
/// cell in rows `a..=e`, flushed to stores.
fn populated_range(env: &TestEnv) -> Result<Range, RangeError> {
    let range = Range::new(
        env.context(),
        users_table(),
        users_schema(),
        RangeSpec::new("", "m"),
        1000,
    )?;
    range.increment_update_counter()?;
    range.lock();
    for (ts, row) in (b'a'..=b'k').map(char::from).enumerate() {
        let key = Key::insert(row.to_string(), 1, "first", ts as i64 + 1);
        range.add(&key.encode(), &Bytes::from(format!("name-{row}")), 500)?;
    }
    for (ts, row) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
        let key = Key::insert(row, 3, "", ts as i64 + 20);
        range.add(&key.encode(), &Bytes::from_static(b"blob"), 500)?;
    }
    range.unlock(500);
    range.decrement_update_counter();
    range.run_compaction(false)?;
    Ok(range)
}

fn write(row: &str, column_family: &str, qualifier: &str, value: &str) -> MetadataWrite {
    MetadataWrite {
        row: Bytes::copy_from_slice(row.as_bytes()),
        column_family: column_family.to_string(),
        qualifier: Bytes::copy_from_slice(qualifier.as_bytes()),
        value: Bytes::copy_from_slice(value.as_bytes()),
    }
}

#[test]
fn split_hands_off_the_lower_half() -> TestResult {
    let env = TestEnv::new();
    let range = populated_range(&env)?;

    assert!(range.begin_maintenance());
    range.do_split()?;
    assert!(!range.maintenance_in_progress());

    // Cheap candidates are the middle rows of each group's store: "f" and
    // "c"; the median of the two is "f".
    assert_eq!(range.start_row(), "f");
    assert_eq!(range.span(), RangeSpec::new("f", "m"));
    assert!(range.split_log().is_none());

    let mut scanner = range.create_scanner(Arc::new(ScanContext::builder().build()))?;
    let mut rows = Vec::new();
    while let Some(cell) = scanner.get() {
        rows.push(cell.key.row);
        scanner.forward();
    }
    assert_eq!(rows, vec!["g", "h", "i", "j", "k"]);

    assert_eq!(
        env.metadata.committed(),
        vec![
            write("7:m", START_ROW_COLUMN, "", "f"),
            write("7:f", START_ROW_COLUMN, "", ""),
            write("7:f", FILES_COLUMN, "default", "users/default/cs2"),
            write("7:f", FILES_COLUMN, "blobs", "users/blobs/cs2"),
        ]
    );

    let dir = transfer_log_dir("/hypertable/servers/rs1/log/primary", b"f", 24)
        .ok_or("no transfer dir")?;
    assert!(env.logs.has_dir(&dir));
    assert_eq!(env.logs.closed_at(&dir), Some(500));

    let reports = env.master.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].range, RangeSpec::new("", "f"));
    assert_eq!(reports[0].transfer_log_dir, dir);
    assert_eq!(reports[0].soft_limit, 2000);
    assert_eq!(reports[0].table.generation, 2);
    assert_eq!(range.identifier().generation, 2);
    assert_eq!(range.disk_limit(), 2000);
    Ok(())
}

#[test]
fn repeated_splits_keep_the_span_partitioned() -> TestResult {
    let env = TestEnv::new();
    let range = populated_range(&env)?;
    let original = range.span();
    let mut handed_off = Vec::new();

    for _ in 0..2 {
        let before = range.span();
        assert!(range.begin_maintenance());
        range.do_split()?;
        let after = range.span();
        assert!(before.start_row < after.start_row);
        assert!(after.start_row < before.end_row);
        assert_eq!(after.end_row, original.end_row);
        handed_off.push(RangeSpec::new(before.start_row, after.start_row.clone()));
    }

    // The handed-off spans and the remainder tile the original span.
    let reports: Vec<_> = env
        .master
        .reports()
        .into_iter()
        .map(|report| report.range)
        .collect();
    assert_eq!(reports, handed_off);
    assert_eq!(handed_off[0].start_row, original.start_row);
    assert_eq!(handed_off[0].end_row, handed_off[1].start_row);
    assert_eq!(handed_off[1].end_row, range.start_row());
    assert_eq!(range.disk_limit(), 4000);
    Ok(())
}

#[test]
fn split_requires_the_maintenance_gate() -> TestResult {
    let env = TestEnv::new();
    let range = populated_range(&env)?;
    assert!(matches!(
        range.do_split(),
        Err(RangeError::MaintenanceNotInProgress)
    ));
    assert_eq!(range.start_row(), "");
    assert!(env.metadata.committed().is_empty());
    Ok(())
}

#[test]
fn master_failure_does_not_fail_the_split() -> TestResult {
    let env = TestEnv::new();
    env.master
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let range = populated_range(&env)?;

    assert!(range.begin_maintenance());
    range.do_split()?;
    assert!(range.is_available());
    assert_eq!(env.master.reports().len(), 1);
    assert_eq!(range.start_row(), "f");
    Ok(())
}

#[test]
fn split_row_falls_back_to_cached_rows() -> TestResult {
    let env = TestEnv::new();
    let range = Range::new(
        env.context(),
        users_table(),
        users_schema(),
        RangeSpec::new("c", "m"),
        0,
    )?;
    // Nothing on disk, so the only candidate is the middle cached cell, which
    // sits in the end row. The median of the distinct cached rows is used
    // instead.
    range.increment_update_counter()?;
    range.lock();
    for (ts, row) in ["d", "e", "m", "m", "m", "m", "m"].into_iter().enumerate() {
        let key = Key::insert(row, 1, format!("q{ts}"), ts as i64 + 1);
        range.add(&key.encode(), &Bytes::new(), 1)?;
    }
    range.unlock(1);
    range.decrement_update_counter();

    let row = range.get_split_row()?;
    assert_eq!(row, "e");
    assert!(range.span().splits_at(&row));
    Ok(())
}
