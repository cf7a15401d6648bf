//! Test-only in-memory collaborators of a range.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    cellstore::{CellStore, CellStoreError, CellStoreOpener, MemCellStore},
    commit_log::{encode_block, BlockHeader, CommitLog, CommitLogReader, LogError, LogStore},
    context::RangeServerContext,
    id::{RangeSpec, TableIdentifier},
    key::Key,
    master::{MasterClient, MasterError},
    metadata::{MetadataError, MetadataMutator, MetadataSource, MetadataStore},
    option::RangeOptions,
    scan::{CellSource, ScanContext},
    schema::{AccessGroupSpec, ColumnFamilySpec, Schema},
};

type Blocks = Arc<Mutex<HashMap<String, Vec<(Bytes, BlockHeader)>>>>;

/// Log store keeping every directory's blocks in memory.
#[derive(Default)]
pub(crate) struct MemLogStore {
    dirs: Mutex<HashSet<String>>,
    blocks: Blocks,
    closed: Arc<Mutex<HashMap<String, u64>>>,
    pub(crate) fail_mkdirs: AtomicBool,
    pub(crate) fail_close: Arc<AtomicBool>,
}

impl MemLogStore {
    pub(crate) fn has_dir(&self, dir: &str) -> bool {
        self.dirs.lock().contains(dir)
    }

    /// Timestamp a log was closed with.
    pub(crate) fn closed_at(&self, dir: &str) -> Option<u64> {
        self.closed.lock().get(dir).copied()
    }

    /// Append a block of `(key, value)` records to `dir`.
    pub(crate) fn push_block(&self, dir: &str, table: &TableIdentifier, records: &[(Key, &str)]) {
        let encoded: Vec<(Bytes, &str)> = records
            .iter()
            .map(|(key, value)| (key.encode(), *value))
            .collect();
        let block = encode_block(
            encoded
                .iter()
                .map(|(key, value)| (key.as_ref(), value.as_bytes())),
        );
        self.push_raw_block(dir, table, block);
    }

    pub(crate) fn push_raw_block(&self, dir: &str, table: &TableIdentifier, block: Bytes) {
        self.blocks.lock().entry(dir.to_string()).or_default().push((
            block,
            BlockHeader {
                table: table.clone(),
            },
        ));
    }
}

impl LogStore for MemLogStore {
    fn mkdirs(&self, dir: &str) -> Result<(), LogError> {
        if self.fail_mkdirs.load(Ordering::SeqCst) {
            return Err(LogError::backend(dir, "permission denied"));
        }
        self.dirs.lock().insert(dir.to_string());
        Ok(())
    }

    fn create_log(&self, dir: &str) -> Result<Arc<dyn CommitLog>, LogError> {
        if !self.has_dir(dir) {
            return Err(LogError::backend(dir, "no such directory"));
        }
        Ok(Arc::new(MemCommitLog {
            dir: dir.to_string(),
            blocks: Arc::clone(&self.blocks),
            closed: Arc::clone(&self.closed),
            fail_close: Arc::clone(&self.fail_close),
        }))
    }

    fn open_reader(&self, dir: &str) -> Result<Box<dyn CommitLogReader>, LogError> {
        let blocks = self
            .blocks
            .lock()
            .get(dir)
            .cloned()
            .ok_or_else(|| LogError::backend(dir, "no such log"))?;
        Ok(Box::new(MemLogReader {
            blocks: blocks.into(),
        }))
    }
}

struct MemCommitLog {
    dir: String,
    blocks: Blocks,
    closed: Arc<Mutex<HashMap<String, u64>>>,
    fail_close: Arc<AtomicBool>,
}

impl CommitLog for MemCommitLog {
    fn dir(&self) -> &str {
        &self.dir
    }

    fn write(&self, header: BlockHeader, block: Bytes) -> Result<(), LogError> {
        self.blocks
            .lock()
            .entry(self.dir.clone())
            .or_default()
            .push((block, header));
        Ok(())
    }

    fn close(&self, timestamp: u64) -> Result<(), LogError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(LogError::backend(&self.dir, "close failed"));
        }
        self.closed.lock().insert(self.dir.clone(), timestamp);
        Ok(())
    }
}

struct MemLogReader {
    blocks: VecDeque<(Bytes, BlockHeader)>,
}

impl CommitLogReader for MemLogReader {
    fn next_block(&mut self) -> Result<Option<(Bytes, BlockHeader)>, LogError> {
        Ok(self.blocks.pop_front())
    }
}

/// One `set` applied to the metadata table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MetadataWrite {
    pub(crate) row: Bytes,
    pub(crate) column_family: String,
    pub(crate) qualifier: Bytes,
    pub(crate) value: Bytes,
}

/// Metadata table held in memory.
#[derive(Default)]
pub(crate) struct MemMetadataStore {
    pub(crate) root: Mutex<Vec<(String, String)>>,
    pub(crate) tables: Mutex<HashMap<Bytes, Vec<(String, String)>>>,
    committed: Arc<Mutex<Vec<MetadataWrite>>>,
    pub(crate) fail_flush: Arc<AtomicBool>,
}

impl MemMetadataStore {
    /// Register the store list of an access group of a normal range.
    pub(crate) fn add_files(&self, table: &TableIdentifier, end_row: &[u8], ag: &str, files: &str) {
        self.tables
            .lock()
            .entry(table.metadata_row(end_row))
            .or_default()
            .push((ag.to_string(), files.to_string()));
    }

    pub(crate) fn committed(&self) -> Vec<MetadataWrite> {
        self.committed.lock().clone()
    }
}

impl MetadataStore for MemMetadataStore {
    fn root_files(&self, _schema: &Schema) -> Result<MetadataSource, MetadataError> {
        Ok(Box::new(self.root.lock().clone().into_iter()))
    }

    fn table_files(
        &self,
        table: &TableIdentifier,
        end_row: &[u8],
    ) -> Result<MetadataSource, MetadataError> {
        let entries = self
            .tables
            .lock()
            .get(&table.metadata_row(end_row))
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(entries.into_iter()))
    }

    fn create_mutator(&self) -> Box<dyn MetadataMutator> {
        Box::new(MemMetadataMutator {
            pending: Vec::new(),
            committed: Arc::clone(&self.committed),
            fail_flush: Arc::clone(&self.fail_flush),
        })
    }
}

struct MemMetadataMutator {
    pending: Vec<MetadataWrite>,
    committed: Arc<Mutex<Vec<MetadataWrite>>>,
    fail_flush: Arc<AtomicBool>,
}

impl MetadataMutator for MemMetadataMutator {
    fn set(
        &mut self,
        row: Bytes,
        column_family: &str,
        qualifier: &[u8],
        value: Bytes,
    ) -> Result<(), MetadataError> {
        self.pending.push(MetadataWrite {
            row,
            column_family: column_family.to_string(),
            qualifier: Bytes::copy_from_slice(qualifier),
            value,
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MetadataError> {
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(MetadataError("metadata range unavailable".to_string()));
        }
        self.committed.lock().append(&mut self.pending);
        Ok(())
    }
}

/// Opens [`MemCellStore`]s registered by path.
#[derive(Default)]
pub(crate) struct MemCellStoreOpener {
    stores: Mutex<HashMap<String, MemCellStore>>,
    broken_index: Mutex<HashSet<String>>,
}

impl MemCellStoreOpener {
    pub(crate) fn insert(&self, store: MemCellStore) {
        self.stores.lock().insert(store.path().to_string(), store);
    }

    /// Make loading the index of `path` fail.
    pub(crate) fn break_index(&self, path: &str) {
        self.broken_index.lock().insert(path.to_string());
    }
}

impl CellStoreOpener for MemCellStoreOpener {
    fn open(&self, path: &str, span: &RangeSpec) -> Result<Box<dyn CellStore>, CellStoreError> {
        let store = self
            .stores
            .lock()
            .get(path)
            .map(|store| store.restrict(span))
            .ok_or_else(|| CellStoreError::new(path, "file not found"))?;
        if self.broken_index.lock().contains(path) {
            return Ok(Box::new(BrokenIndexStore(store)));
        }
        Ok(Box::new(store))
    }
}

struct BrokenIndexStore(MemCellStore);

impl CellStore for BrokenIndexStore {
    fn load_index(&mut self) -> Result<(), CellStoreError> {
        Err(CellStoreError::new(self.0.path(), "bad trailer"))
    }

    fn path(&self) -> &str {
        self.0.path()
    }

    fn disk_usage(&self) -> u64 {
        self.0.disk_usage()
    }

    fn split_row(&self, span: &RangeSpec) -> Option<Bytes> {
        self.0.split_row(span)
    }

    fn create_scanner(&self, ctx: &ScanContext) -> Box<dyn CellSource> {
        self.0.create_scanner(ctx)
    }
}

/// One split announced to the master.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SplitReport {
    pub(crate) table: TableIdentifier,
    pub(crate) range: RangeSpec,
    pub(crate) transfer_log_dir: String,
    pub(crate) soft_limit: u64,
}

#[derive(Default)]
pub(crate) struct RecordingMaster {
    reports: Mutex<Vec<SplitReport>>,
    pub(crate) fail: AtomicBool,
}

impl RecordingMaster {
    pub(crate) fn reports(&self) -> Vec<SplitReport> {
        self.reports.lock().clone()
    }
}

impl MasterClient for RecordingMaster {
    fn report_split(
        &self,
        table: &TableIdentifier,
        range: &RangeSpec,
        transfer_log_dir: &str,
        soft_limit: u64,
    ) -> Result<(), MasterError> {
        self.reports.lock().push(SplitReport {
            table: table.clone(),
            range: range.clone(),
            transfer_log_dir: transfer_log_dir.to_string(),
            soft_limit,
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(MasterError("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Collaborators of a test range server, kept reachable for inspection.
pub(crate) struct TestEnv {
    pub(crate) logs: Arc<MemLogStore>,
    pub(crate) metadata: Arc<MemMetadataStore>,
    pub(crate) master: Arc<RecordingMaster>,
    pub(crate) cell_stores: Arc<MemCellStoreOpener>,
    pub(crate) options: RangeOptions,
}

impl TestEnv {
    pub(crate) fn new() -> Self {
        Self {
            logs: Arc::default(),
            metadata: Arc::default(),
            master: Arc::default(),
            cell_stores: Arc::default(),
            options: RangeOptions::default()
                .log_dir("/hypertable/servers/rs1/log/primary")
                .range_max_bytes(1 << 20),
        }
    }

    pub(crate) fn context(&self) -> RangeServerContext {
        RangeServerContext::new(
            self.options.clone(),
            self.logs.clone(),
            self.metadata.clone(),
            self.master.clone(),
            self.cell_stores.clone(),
        )
    }
}

/// Table `users` with a `default` group (`name`, `hits` counter) and a
/// `blobs` group (`data`).
pub(crate) fn users_schema() -> Arc<Schema> {
    let schema = Schema::builder(2)
        .access_group(
            AccessGroupSpec::new("default")
                .column_family(ColumnFamilySpec::new(1, "name").max_versions(3))
                .column_family(ColumnFamilySpec::new(2, "hits").counter(true)),
        )
        .access_group(
            AccessGroupSpec::new("blobs").column_family(ColumnFamilySpec::new(3, "data")),
        )
        .build();
    match schema {
        Ok(schema) => Arc::new(schema),
        Err(err) => panic!("invalid test schema: {err}"),
    }
}

pub(crate) fn users_table() -> TableIdentifier {
    TableIdentifier::new(7, "users", 1)
}
