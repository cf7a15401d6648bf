use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use bytes::Bytes;

use crate::{
    access_group::{AccessGroup, AccessGroupError, AccessGroupFactory, CacheAccessGroup},
    cellstore::CellStore,
    id::{RangeSpec, TableIdentifier},
    key::Key,
    mvcc::RangeTimestamp,
    range::Range,
    scan::{CellSource, ScanContext},
    schema::{AccessGroupSpec, Schema},
    test_util::{users_schema, users_table, TestEnv},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Counts updates between `increment_update_counter` and
/// `decrement_update_counter`, and records any shrink that sees one.
#[derive(Default)]
struct Probe {
    active_updates: AtomicUsize,
    shrinks: AtomicUsize,
    overlaps: AtomicUsize,
}

struct ProbedFactory(Arc<Probe>);

impl AccessGroupFactory for ProbedFactory {
    fn create(
        &self,
        table: &TableIdentifier,
        _schema: &Schema,
        spec: &AccessGroupSpec,
        span: &RangeSpec,
    ) -> Box<dyn AccessGroup> {
        Box::new(ProbedGroup {
            inner: CacheAccessGroup::new(table, spec, span.clone()),
            probe: Arc::clone(&self.0),
        })
    }
}

struct ProbedGroup {
    inner: CacheAccessGroup,
    probe: Arc<Probe>,
}

impl AccessGroup for ProbedGroup {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn add(&self, key: &Key, value: &Bytes, real_timestamp: u64) -> Result<(), AccessGroupError> {
        self.inner.add(key, value, real_timestamp)
    }

    fn create_scanner(&self, ctx: &Arc<ScanContext>) -> Box<dyn CellSource> {
        self.inner.create_scanner(ctx)
    }

    fn include_in_scan(&self, ctx: &ScanContext) -> bool {
        self.inner.include_in_scan(ctx)
    }

    fn get_split_rows(&self, out: &mut Vec<Bytes>, expensive: bool) {
        self.inner.get_split_rows(out, expensive)
    }

    fn get_cached_rows(&self, out: &mut Vec<Bytes>) {
        self.inner.get_cached_rows(out)
    }

    fn run_compaction(&self, watermark: RangeTimestamp, major: bool) {
        self.inner.run_compaction(watermark, major)
    }

    fn shrink(&self, new_start_row: &Bytes) {
        self.probe.shrinks.fetch_add(1, Ordering::SeqCst);
        if self.probe.active_updates.load(Ordering::SeqCst) != 0 {
            self.probe.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        thread::yield_now();
        self.inner.shrink(new_start_row)
    }

    fn get_files(&self) -> String {
        self.inner.get_files()
    }

    fn disk_usage(&self) -> u64 {
        self.inner.disk_usage()
    }

    fn collision_count(&self) -> u64 {
        self.inner.collision_count()
    }

    fn cached_count(&self) -> u64 {
        self.inner.cached_count()
    }

    fn lock(&self) {
        self.inner.lock()
    }

    fn unlock(&self) {
        self.inner.unlock()
    }

    fn add_cell_store(&self, store: Box<dyn CellStore>, csid: u32) {
        self.inner.add_cell_store(store, csid)
    }
}

#[test]
fn shrink_never_overlaps_an_update() -> TestResult {
    const MUTATORS: usize = 4;
    const SPLITS: usize = 3;

    let env = TestEnv::new();
    let probe = Arc::new(Probe::default());
    let ctx = env
        .context()
        .with_access_group_factory(Arc::new(ProbedFactory(Arc::clone(&probe))));
    let range = Arc::new(Range::new(
        ctx,
        users_table(),
        users_schema(),
        RangeSpec::new("", "zz"),
        0,
    )?);

    // Seed rows "a0".."y9" so every split finds a row.
    range.increment_update_counter()?;
    range.lock();
    let mut ts = 0;
    for letter in b'a'..=b'y' {
        for digit in 0..10 {
            ts += 1;
            let row = format!("{}{digit}", char::from(letter));
            range.add(&Key::insert(row, 1, "q", ts).encode(), &Bytes::new(), 1)?;
        }
    }
    range.unlock(1);
    range.decrement_update_counter();

    let done = Arc::new(AtomicBool::new(false));
    let mutators: Vec<_> = (0..MUTATORS)
        .map(|seed| {
            let range = Arc::clone(&range);
            let probe = Arc::clone(&probe);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut rng = fastrand::Rng::with_seed(seed as u64);
                let mut applied = 0usize;
                let mut ts = 1_000 * (seed as i64 + 1);
                let mut rounds = 0;
                while rounds < 50 || !done.load(Ordering::SeqCst) {
                    rounds += 1;
                    if range.increment_update_counter().is_err() {
                        break;
                    }
                    probe.active_updates.fetch_add(1, Ordering::SeqCst);
                    range.lock();
                    for _ in 0..rng.usize(1..4) {
                        ts += 1;
                        let row = format!("{}{}", char::from(rng.u8(b'a'..=b'y')), rng.u8(0..10));
                        let key = Key::insert(row, 1, "q", ts).encode();
                        // Rows left behind by a split are rejected; that is fine.
                        if range.add(&key, &Bytes::new(), ts as u64).is_ok() {
                            applied += 1;
                        }
                    }
                    range.unlock(ts as u64);
                    probe.active_updates.fetch_sub(1, Ordering::SeqCst);
                    range.decrement_update_counter();
                }
                applied
            })
        })
        .collect();

    let mut starts = vec![range.start_row()];
    for _ in 0..SPLITS {
        assert!(range.begin_maintenance());
        range.do_split()?;
        starts.push(range.start_row());
    }
    done.store(true, Ordering::SeqCst);

    let mut applied = 0;
    for mutator in mutators {
        applied += mutator.join().map_err(|_| "mutator panicked")?;
    }

    assert!(applied > 0);
    assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(
        probe.shrinks.load(Ordering::SeqCst),
        SPLITS * users_schema().access_groups().len()
    );
    assert!(starts.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(range.is_available());
    Ok(())
}
