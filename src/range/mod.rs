//! A range: the partition of a table served by this process.
//!
//! The range owns one access group per schema access group and is the single
//! point of admission between updates and maintenance. Updates are bracketed
//! by [`Range::increment_update_counter`] and
//! [`Range::decrement_update_counter`]; compactions and splits quiesce them
//! before touching shared state. Scans are never blocked.

mod barrier;
mod error;
mod replay;
mod split;

use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;

pub use error::{FatalError, FatalKind, RangeError};
pub use replay::ReplaySummary;

use self::barrier::UpdateBarrier;
use crate::{
    access_group::AccessGroup,
    cellstore::{extract_csid, parse_file_list},
    commit_log::CommitLog,
    context::RangeServerContext,
    id::{RangeSpec, TableIdentifier},
    key::{Key, KeyFlag},
    logging::{range_log, LogContext},
    metadata::MetadataSource,
    metrics::RangeStats,
    mvcc::{RangeTimestamp, ScannerTimestampController},
    scan::{MergeScanner, ScanContext},
    schema::Schema,
};

/// Fields guarded by the short state lock.
struct RangeState {
    identifier: TableIdentifier,
    start_row: Bytes,
    split_row: Option<Bytes>,
    timestamp: RangeTimestamp,
    split_log: Option<Arc<dyn CommitLog>>,
}

/// Updates applied since construction or the last transfer log replay.
#[derive(Debug, Default)]
struct AddCounters {
    inserts: AtomicU64,
    deletes: [AtomicU64; 4],
}

impl AddCounters {
    fn record(&self, flag: KeyFlag) {
        match flag {
            KeyFlag::Insert => &self.inserts,
            delete => &self.deletes[delete as usize],
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.inserts.store(0, Ordering::Relaxed);
        for counter in &self.deletes {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

pub struct Range {
    ctx: RangeServerContext,
    schema: Arc<Schema>,
    end_row: Bytes,
    is_root: bool,
    access_groups: Vec<Box<dyn AccessGroup>>,
    /// Owning access group of each column family code.
    column_families: Vec<Option<usize>>,
    barrier: UpdateBarrier,
    state: Mutex<RangeState>,
    last_logical_timestamp: AtomicI64,
    maintenance_in_progress: AtomicBool,
    fatal: Mutex<Option<FatalError>>,
    disk_limit: AtomicU64,
    timestamp_controller: ScannerTimestampController,
    counters: AddCounters,
}

impl Range {
    /// Build the range's access groups and load the stores listed for it in
    /// the metadata. Stores that fail to open or index are skipped.
    pub fn new(
        ctx: RangeServerContext,
        identifier: TableIdentifier,
        schema: Arc<Schema>,
        span: RangeSpec,
        soft_limit: u64,
    ) -> Result<Self, RangeError> {
        let disk_limit = ctx.options.clamp_disk_limit(soft_limit);
        let is_root = span.is_root(&identifier);

        let mut column_families = vec![None; schema.max_column_family_id() as usize + 1];
        let mut access_groups = Vec::with_capacity(schema.access_groups().len());
        for (idx, spec) in schema.access_groups().iter().enumerate() {
            access_groups.push(
                ctx.access_groups
                    .create(&identifier, &schema, spec, &span),
            );
            for cf in &spec.column_families {
                column_families[cf.id as usize] = Some(idx);
            }
        }

        let source = if is_root {
            ctx.metadata.root_files(&schema)?
        } else {
            ctx.metadata.table_files(&identifier, &span.end_row)?
        };

        let range = Self {
            ctx,
            schema,
            end_row: span.end_row.clone(),
            is_root,
            access_groups,
            column_families,
            barrier: UpdateBarrier::default(),
            state: Mutex::new(RangeState {
                identifier,
                start_row: span.start_row.clone(),
                split_row: None,
                timestamp: RangeTimestamp::default(),
                split_log: None,
            }),
            last_logical_timestamp: AtomicI64::new(0),
            maintenance_in_progress: AtomicBool::new(false),
            fatal: Mutex::new(None),
            disk_limit: AtomicU64::new(disk_limit),
            timestamp_controller: ScannerTimestampController::new(),
            counters: AddCounters::default(),
        };
        range.load_cell_stores(source, &span);
        Ok(range)
    }

    fn load_cell_stores(&self, source: MetadataSource, span: &RangeSpec) {
        let log_ctx = self.log_ctx();
        for (ag_name, files) in source {
            let Some(ag) = self.access_group(&ag_name) else {
                range_log!(
                    log::Level::Error,
                    ctx: log_ctx,
                    "unknown_access_group",
                    "access_group={}",
                    ag_name
                );
                continue;
            };
            for path in parse_file_list(&files) {
                let csid = extract_csid(&path);
                let mut store = match self.ctx.cell_stores.open(&path, span) {
                    Ok(store) => store,
                    Err(err) => {
                        range_log!(
                            log::Level::Error,
                            ctx: log_ctx,
                            "cellstore_open_failed",
                            "path={} error={} action=skip",
                            path,
                            err
                        );
                        continue;
                    }
                };
                if let Err(err) = store.load_index() {
                    range_log!(
                        log::Level::Error,
                        ctx: log_ctx,
                        "cellstore_index_failed",
                        "path={} error={} action=skip",
                        path,
                        err
                    );
                    continue;
                }
                range_log!(
                    log::Level::Debug,
                    ctx: log_ctx,
                    "cellstore_loaded",
                    "path={} csid={} access_group={}",
                    path,
                    csid,
                    ag_name
                );
                ag.add_cell_store(store, csid);
            }
        }
    }

    fn access_group(&self, name: &str) -> Option<&dyn AccessGroup> {
        self.access_groups
            .iter()
            .find(|ag| ag.name() == name)
            .map(|ag| ag.as_ref())
    }

    fn log_ctx(&self) -> LogContext {
        let state = self.state.lock();
        LogContext::new(format!(
            "table={} range=[{}..{}]",
            state.identifier.name,
            String::from_utf8_lossy(&state.start_row),
            String::from_utf8_lossy(&self.end_row)
        ))
    }

    /// Apply one serialized update. Row deletes reach every access group;
    /// everything else goes to the group owning the key's column family.
    pub fn add(&self, key: &Bytes, value: &Bytes, real_timestamp: u64) -> Result<(), RangeError> {
        self.ensure_available()?;
        let key = Key::decode(key)?;
        self.add_key(&key, value, real_timestamp)
    }

    /// [`Range::add`] for an already parsed key.
    pub fn add_key(&self, key: &Key, value: &Bytes, real_timestamp: u64) -> Result<(), RangeError> {
        self.ensure_available()?;
        let code = key.column_family_code;
        if code as usize >= self.column_families.len() {
            return Err(RangeError::InvalidColumnFamily(code));
        }

        if key.flag == KeyFlag::DeleteRow {
            for ag in &self.access_groups {
                ag.add(key, value, real_timestamp)?;
            }
        } else {
            let Some(idx) = self.column_families[code as usize] else {
                return Err(RangeError::InvalidColumnFamily(code));
            };
            self.access_groups[idx].add(key, value, real_timestamp)?;
        }
        // Updates of one batch may arrive out of timestamp order; only the
        // maximum is kept.
        self.last_logical_timestamp
            .fetch_max(key.timestamp, Ordering::AcqRel);
        self.counters.record(key.flag);
        Ok(())
    }

    /// Enter the update window, waiting while maintenance holds updates.
    pub fn increment_update_counter(&self) -> Result<(), RangeError> {
        self.ensure_available()?;
        self.barrier.enter_update();
        if let Err(err) = self.ensure_available() {
            self.barrier.exit_update();
            return Err(err);
        }
        Ok(())
    }

    pub fn decrement_update_counter(&self) {
        self.barrier.exit_update();
    }

    /// Start an update batch on every access group.
    pub fn lock(&self) {
        for ag in &self.access_groups {
            ag.lock();
        }
    }

    /// End an update batch, publishing the batch's latest timestamp.
    pub fn unlock(&self, real_timestamp: u64) {
        {
            let mut state = self.state.lock();
            state.timestamp = RangeTimestamp::new(
                self.last_logical_timestamp.load(Ordering::Acquire),
                real_timestamp,
            );
        }
        for ag in &self.access_groups {
            ag.unlock();
        }
    }

    /// Merge scanner over every access group the scan selects.
    pub fn create_scanner(&self, scan: Arc<ScanContext>) -> Result<MergeScanner, RangeError> {
        self.ensure_available()?;
        let mut scanner = MergeScanner::new(Arc::clone(&scan), scan.return_deletes(), false);
        for ag in &self.access_groups {
            if ag.include_in_scan(&scan) {
                scanner.add_source(ag.create_scanner(&scan));
            }
        }
        Ok(scanner)
    }

    pub fn disk_usage(&self) -> u64 {
        self.access_groups.iter().map(|ag| ag.disk_usage()).sum()
    }

    pub fn disk_limit(&self) -> u64 {
        self.disk_limit.load(Ordering::Relaxed)
    }

    pub fn needs_split(&self) -> bool {
        self.disk_usage() > self.disk_limit()
    }

    /// Claim the maintenance gate. Returns `false` when another compaction or
    /// split already holds it.
    pub fn begin_maintenance(&self) -> bool {
        self.maintenance_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn maintenance_in_progress(&self) -> bool {
        self.maintenance_in_progress.load(Ordering::Acquire)
    }

    /// Compact every access group at a watermark no newer than any update
    /// still in flight.
    pub fn run_compaction(&self, major: bool) -> Result<(), RangeError> {
        self.ensure_available()?;
        let timestamp = {
            let _hold = self.barrier.quiesce();
            self.state.lock().timestamp
        };
        let timestamp = self.timestamp_controller.clamp(timestamp);
        for ag in &self.access_groups {
            ag.run_compaction(timestamp, major);
        }
        Ok(())
    }

    /// [`Range::run_compaction`], then release the maintenance gate.
    pub fn do_compaction(&self, major: bool) -> Result<(), RangeError> {
        let result = self.run_compaction(major);
        self.maintenance_in_progress.store(false, Ordering::Release);
        result
    }

    pub fn identifier(&self) -> TableIdentifier {
        self.state.lock().identifier.clone()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn start_row(&self) -> Bytes {
        self.state.lock().start_row.clone()
    }

    pub fn end_row(&self) -> &Bytes {
        &self.end_row
    }

    pub fn span(&self) -> RangeSpec {
        RangeSpec::new(self.start_row(), self.end_row.clone())
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Logical timestamp published by the last [`Range::unlock`].
    pub fn get_latest_timestamp(&self) -> i64 {
        self.state.lock().timestamp.logical
    }

    /// Oldest timestamp of an update that is applied but not committed.
    pub fn get_scan_timestamp(&self) -> Option<RangeTimestamp> {
        self.timestamp_controller.oldest_update_timestamp()
    }

    pub fn timestamp_controller(&self) -> &ScannerTimestampController {
        &self.timestamp_controller
    }

    /// Log receiving the split-off half's updates while a split is running.
    pub fn split_log(&self) -> Option<Arc<dyn CommitLog>> {
        self.state.lock().split_log.clone()
    }

    pub fn stats(&self) -> RangeStats {
        let deletes = |flag: KeyFlag| self.counters.deletes[flag as usize].load(Ordering::Relaxed);
        RangeStats {
            added_inserts: self.counters.inserts.load(Ordering::Relaxed),
            added_row_deletes: deletes(KeyFlag::DeleteRow),
            added_column_family_deletes: deletes(KeyFlag::DeleteColumnFamily),
            added_cell_deletes: deletes(KeyFlag::DeleteCell),
            added_cell_version_deletes: deletes(KeyFlag::DeleteCellVersion),
            collisions: self.access_groups.iter().map(|ag| ag.collision_count()).sum(),
            cached: self.access_groups.iter().map(|ag| ag.cached_count()).sum(),
            disk_usage: self.disk_usage(),
        }
    }

    pub fn dump_stats(&self) {
        let stats = self.stats();
        range_log!(
            log::Level::Info,
            ctx: self.log_ctx(),
            "range_stats",
            "added_inserts={} added_row_deletes={} added_cf_deletes={} added_cell_deletes={} \
             added_cell_version_deletes={} added_total={} collisions={} cached={} disk_usage={}",
            stats.added_inserts,
            stats.added_row_deletes,
            stats.added_column_family_deletes,
            stats.added_cell_deletes,
            stats.added_cell_version_deletes,
            stats.added_total(),
            stats.collisions,
            stats.cached,
            stats.disk_usage
        );
    }

    pub fn is_available(&self) -> bool {
        self.fatal.lock().is_none()
    }

    /// The fatal error that took the range out of service, if any.
    pub fn fatal_error(&self) -> Option<FatalError> {
        self.fatal.lock().clone()
    }

    fn ensure_available(&self) -> Result<(), RangeError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(RangeError::Unavailable)
        }
    }

    /// Take the range out of service.
    fn fail(&self, kind: FatalKind, detail: impl Into<String>) -> RangeError {
        let error = FatalError {
            kind,
            detail: detail.into(),
        };
        range_log!(
            log::Level::Error,
            ctx: self.log_ctx(),
            "range_fatal",
            "kind={} detail={} action=mark_unavailable",
            error.kind,
            error.detail
        );
        self.fatal.lock().get_or_insert_with(|| error.clone());
        RangeError::Fatal(error)
    }
}
