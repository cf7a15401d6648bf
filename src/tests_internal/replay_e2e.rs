use std::sync::Arc;

use bytes::Bytes;

use crate::{
    commit_log::encode_block,
    id::{RangeSpec, TableIdentifier},
    key::Key,
    range::{Range, RangeError},
    scan::{Cell, ScanContext},
    test_util::{users_schema, users_table, TestEnv},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const LOG_DIR: &str = "/hypertable/servers/rs1/log/4f2a";

fn upper_range(env: &TestEnv) -> Result<Range, RangeError> {
    Range::new(
        env.context(),
        users_table(),
        users_schema(),
        RangeSpec::new("f", "m"),
        0,
    )
}

fn scan_all(range: &Range) -> Result<Vec<Cell>, RangeError> {
    let mut scanner = range.create_scanner(Arc::new(ScanContext::builder().build()))?;
    let mut cells = Vec::new();
    while let Some(cell) = scanner.get() {
        cells.push(cell);
        scanner.forward();
    }
    Ok(cells)
}

#[test]
fn replayed_updates_are_applied_without_counting_as_new_traffic() -> TestResult {
    let env = TestEnv::new();
    let table = users_table();
    env.logs.push_block(
        LOG_DIR,
        &table,
        &[
            (Key::insert("g", 1, "first", 3), "gus"),
            (Key::insert("h", 3, "", 4), "blob"),
        ],
    );
    env.logs.push_block(
        LOG_DIR,
        &table,
        &[
            (Key::delete_cell("g", 1, "first", 5), ""),
            // Belongs to the half this range no longer serves.
            (Key::insert("b", 1, "first", 6), "bea"),
        ],
    );

    let range = upper_range(&env)?;
    let summary = range.replay_transfer_log(LOG_DIR, 1_000)?;
    assert_eq!(summary.blocks, 2);
    assert_eq!(summary.updates, 3);
    assert_eq!(summary.rejected, 1);
    assert!(summary.bytes > 0);

    let stats = range.stats();
    assert_eq!(stats.added_total(), 0);
    assert_eq!(stats.cached, 3);

    let cells = scan_all(&range)?;
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].key.row, "h");
    Ok(())
}

#[test]
fn replay_charges_the_shared_memory_tracker() -> TestResult {
    let env = TestEnv::new();
    let table = users_table();
    env.logs
        .push_block(LOG_DIR, &table, &[(Key::insert("g", 1, "q", 1), "v")]);

    let ctx = env.context();
    let tracker = Arc::clone(ctx.memory_tracker());
    let range = Range::new(
        ctx,
        table,
        users_schema(),
        RangeSpec::new("f", "m"),
        0,
    )?;
    let summary = range.replay_transfer_log(LOG_DIR, 1)?;

    let memory = tracker.snapshot();
    assert_eq!(memory.items, 1);
    assert_eq!(memory.memory, summary.bytes);
    Ok(())
}

#[test]
fn block_of_another_table_aborts_the_replay() -> TestResult {
    let env = TestEnv::new();
    env.logs.push_block(
        LOG_DIR,
        &users_table(),
        &[(Key::insert("g", 1, "first", 1), "gus")],
    );
    env.logs.push_block(
        LOG_DIR,
        &TableIdentifier::new(9, "orders", 1),
        &[(Key::insert("h", 1, "first", 2), "order")],
    );
    env.logs.push_block(
        LOG_DIR,
        &users_table(),
        &[(Key::insert("i", 1, "first", 3), "ivy")],
    );

    let range = upper_range(&env)?;
    match range.replay_transfer_log(LOG_DIR, 1) {
        Err(RangeError::CorruptCommitLog { expected, found }) => {
            assert_eq!(expected, "users");
            assert_eq!(found, "orders");
        }
        other => panic!("expected a corrupt log error, got {other:?}"),
    }

    // Blocks ahead of the bad one were applied, nothing after it.
    let rows: Vec<_> = scan_all(&range)?
        .into_iter()
        .map(|cell| cell.key.row)
        .collect();
    assert_eq!(rows, vec!["g"]);
    Ok(())
}

#[test]
fn truncated_block_fails_the_replay() -> TestResult {
    let env = TestEnv::new();
    let key = Key::insert("g", 1, "first", 1).encode();
    let block = encode_block([(key.as_ref(), &b"value"[..])]);
    env.logs
        .push_raw_block(LOG_DIR, &users_table(), block.slice(..block.len() - 2));

    let range = upper_range(&env)?;
    assert!(matches!(
        range.replay_transfer_log(LOG_DIR, 1),
        Err(RangeError::Log(_))
    ));
    Ok(())
}

/// Transfer logs interleave batches of different writers, so a later block
/// may carry older timestamps. Every version is kept, ordered newest first,
/// and the range clock never moves backwards.
#[test]
fn out_of_order_timestamps_are_accepted() -> TestResult {
    let env = TestEnv::new();
    let table = users_table();
    env.logs.push_block(
        LOG_DIR,
        &table,
        &[(Key::insert("g", 1, "first", 9), "newer")],
    );
    env.logs.push_block(
        LOG_DIR,
        &table,
        &[(Key::insert("g", 1, "first", 3), "older")],
    );

    let range = upper_range(&env)?;
    let summary = range.replay_transfer_log(LOG_DIR, 1)?;
    assert_eq!(summary.rejected, 0);
    range.lock();
    range.unlock(2);
    assert_eq!(range.get_latest_timestamp(), 9);

    let cells = scan_all(&range)?;
    let versions: Vec<_> = cells
        .iter()
        .map(|cell| (cell.key.timestamp, cell.value.clone()))
        .collect();
    assert_eq!(
        versions,
        vec![
            (9, Bytes::from_static(b"newer")),
            (3, Bytes::from_static(b"older")),
        ]
    );
    Ok(())
}

#[test]
fn missing_log_is_reported() -> TestResult {
    let env = TestEnv::new();
    let range = upper_range(&env)?;
    assert!(matches!(
        range.replay_transfer_log("/nowhere", 1),
        Err(RangeError::Log(_))
    ));
    Ok(())
}
