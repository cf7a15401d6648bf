//! Access groups: the column families stored together, their cache and their
//! cell stores.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use thiserror::Error;

use crate::{
    cache::CellCache,
    cellstore::{CellStore, MemCellStore},
    id::{RangeSpec, TableIdentifier},
    key::{Key, KeyFlag},
    logging::range_log,
    mvcc::RangeTimestamp,
    scan::{Cell, CellSource, ColumnFamilyInfo, MergeScanner, ScanContext, VecSource},
    schema::{AccessGroupSpec, Schema},
};

/// Error raised by an access group when applying an update.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessGroupError {
    #[error("row `{row}` is outside {span}")]
    OutOfRange { row: String, span: String },
    #[error("column family {0} does not belong to access group `{1}`")]
    ForeignColumnFamily(u16, String),
}

/// Contract the range relies on for each of its access groups.
///
/// Methods take `&self`; implementations synchronize internally so updates,
/// scans and maintenance may overlap as the range's admission protocol
/// allows.
pub trait AccessGroup: Send + Sync {
    fn name(&self) -> &str;

    fn add(&self, key: &Key, value: &Bytes, real_timestamp: u64) -> Result<(), AccessGroupError>;

    /// Scanner over the cache and every store, merged as one access group.
    fn create_scanner(&self, ctx: &Arc<ScanContext>) -> Box<dyn CellSource>;

    /// Whether the scan selects any family of this group.
    fn include_in_scan(&self, ctx: &ScanContext) -> bool;

    /// Append candidate split rows. The cheap pass consults store indexes
    /// only; the expensive pass samples the cache.
    fn get_split_rows(&self, out: &mut Vec<Bytes>, expensive: bool);

    fn get_cached_rows(&self, out: &mut Vec<Bytes>);

    fn run_compaction(&self, watermark: RangeTimestamp, major: bool);

    /// Drop everything at or below `new_start_row`.
    fn shrink(&self, new_start_row: &Bytes);

    /// `;`-separated paths of the group's stores.
    fn get_files(&self) -> String;

    fn disk_usage(&self) -> u64;

    fn collision_count(&self) -> u64;

    fn cached_count(&self) -> u64;

    /// Start an update batch.
    fn lock(&self);

    /// End an update batch.
    fn unlock(&self);

    fn add_cell_store(&self, store: Box<dyn CellStore>, csid: u32);
}

/// Builds the access groups of a range from its schema.
pub trait AccessGroupFactory: Send + Sync {
    fn create(
        &self,
        table: &TableIdentifier,
        schema: &Schema,
        spec: &AccessGroupSpec,
        span: &RangeSpec,
    ) -> Box<dyn AccessGroup>;
}

/// Factory producing [`CacheAccessGroup`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheAccessGroupFactory;

impl AccessGroupFactory for CacheAccessGroupFactory {
    fn create(
        &self,
        table: &TableIdentifier,
        _schema: &Schema,
        spec: &AccessGroupSpec,
        span: &RangeSpec,
    ) -> Box<dyn AccessGroup> {
        Box::new(CacheAccessGroup::new(table, spec, span.clone()))
    }
}

struct StoreEntry {
    csid: u32,
    store: Arc<dyn CellStore>,
}

/// Mutual exclusion between update batches and cache swaps, usable across
/// separate `lock`/`unlock` calls.
#[derive(Default)]
struct BatchGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl BatchGate {
    fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_one();
    }
}

/// Access group backed by a [`CellCache`] and in-memory compaction output.
///
/// Minor compactions move cached cells at or below the watermark into a new
/// store; major compactions merge every store with them into one, dropping
/// deletes and surplus versions.
pub struct CacheAccessGroup {
    name: String,
    table_name: String,
    families: Vec<(u16, ColumnFamilyInfo)>,
    span: RwLock<RangeSpec>,
    cache: CellCache,
    stores: RwLock<Vec<StoreEntry>>,
    next_csid: Mutex<u32>,
    gate: BatchGate,
}

impl CacheAccessGroup {
    pub fn new(table: &TableIdentifier, spec: &AccessGroupSpec, span: RangeSpec) -> Self {
        let families = spec
            .column_families
            .iter()
            .map(|cf| {
                let info = ColumnFamilyInfo::new()
                    .max_versions(cf.max_versions)
                    .counter(cf.counter);
                (cf.id, info)
            })
            .collect();
        Self {
            name: spec.name.clone(),
            table_name: table.name.clone(),
            families,
            span: RwLock::new(span),
            cache: CellCache::new(),
            stores: RwLock::new(Vec::new()),
            next_csid: Mutex::new(0),
            gate: BatchGate::default(),
        }
    }

    fn owns_family(&self, code: u16) -> bool {
        self.families.iter().any(|(id, _)| *id == code)
    }

    fn allocate_csid(&self) -> u32 {
        let mut next = self.next_csid.lock();
        *next += 1;
        *next
    }

    fn compaction_context(&self) -> ScanContext {
        self.families
            .iter()
            .fold(ScanContext::builder(), |builder, (id, info)| {
                builder.family(*id, info.clone())
            })
            .build()
    }

    fn store_path(&self, csid: u32) -> String {
        format!("{}/{}/cs{}", self.table_name, self.name, csid)
    }
}

impl AccessGroup for CacheAccessGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, key: &Key, value: &Bytes, _real_timestamp: u64) -> Result<(), AccessGroupError> {
        if key.flag != KeyFlag::DeleteRow && !self.owns_family(key.column_family_code) {
            return Err(AccessGroupError::ForeignColumnFamily(
                key.column_family_code,
                self.name.clone(),
            ));
        }
        {
            let span = self.span.read();
            if !span.contains(&key.row) {
                return Err(AccessGroupError::OutOfRange {
                    row: String::from_utf8_lossy(&key.row).into_owned(),
                    span: span.to_string(),
                });
            }
        }
        self.cache.add(key.clone(), value.clone());
        Ok(())
    }

    fn create_scanner(&self, ctx: &Arc<ScanContext>) -> Box<dyn CellSource> {
        let mut scanner = MergeScanner::new(Arc::clone(ctx), ctx.return_deletes(), true);
        scanner.add_source(self.cache.scanner());
        let span = self.span.read().clone();
        for entry in self.stores.read().iter() {
            scanner.add_source(SpanSource {
                inner: entry.store.create_scanner(ctx),
                span: span.clone(),
            });
        }
        Box::new(scanner)
    }

    fn include_in_scan(&self, ctx: &ScanContext) -> bool {
        self.families.iter().any(|(id, _)| ctx.selects_family(*id))
    }

    fn get_split_rows(&self, out: &mut Vec<Bytes>, expensive: bool) {
        let span = self.span.read().clone();
        if expensive {
            if let Some(row) = self.cache.middle_row() {
                out.push(row);
            }
            return;
        }
        let stores = self.stores.read();
        let largest = stores.iter().max_by_key(|entry| entry.store.disk_usage());
        if let Some(row) = largest.and_then(|entry| entry.store.split_row(&span)) {
            if span.splits_at(&row) {
                out.push(row);
            }
        }
    }

    fn get_cached_rows(&self, out: &mut Vec<Bytes>) {
        self.cache.rows(out);
    }

    fn run_compaction(&self, watermark: RangeTimestamp, major: bool) {
        let csid = self.allocate_csid();
        let path = self.store_path(csid);

        // The frozen cells become visible as a store in the same step that
        // takes them out of the cache.
        self.gate.acquire();
        {
            let mut stores = self.stores.write();
            let frozen = self.cache.freeze_through(watermark.logical);
            if !frozen.is_empty() {
                stores.push(StoreEntry {
                    csid,
                    store: Arc::new(MemCellStore::new(path.clone(), frozen)),
                });
            }
        }
        self.gate.release();
        if !major {
            return;
        }

        let ctx = Arc::new(self.compaction_context());
        let span = self.span.read().clone();
        let inputs: Vec<(u32, Arc<dyn CellStore>)> = self
            .stores
            .read()
            .iter()
            .map(|entry| (entry.csid, Arc::clone(&entry.store)))
            .collect();
        let mut merge = MergeScanner::new(Arc::clone(&ctx), false, true);
        for (_, store) in &inputs {
            merge.add_source(SpanSource {
                inner: store.create_scanner(&ctx),
                span: span.clone(),
            });
        }
        let mut cells = Vec::new();
        while let Some(cell) = merge.get() {
            cells.push(cell);
            merge.forward();
        }

        let mut stores = self.stores.write();
        stores.retain(|entry| !inputs.iter().any(|(input, _)| *input == entry.csid));
        stores.push(StoreEntry {
            csid,
            store: Arc::new(MemCellStore::new(path, cells)),
        });
        stores.sort_by_key(|entry| entry.csid);
        range_log!(
            log::Level::Debug,
            "major_compaction",
            "access_group={} replaced_stores={} watermark={}",
            self.name,
            inputs.len(),
            watermark.logical
        );
    }

    fn shrink(&self, new_start_row: &Bytes) {
        self.span.write().start_row = new_start_row.clone();
        self.cache.purge_through(new_start_row);
    }

    fn get_files(&self) -> String {
        self.stores
            .read()
            .iter()
            .map(|entry| entry.store.path())
            .collect::<Vec<_>>()
            .join(";")
    }

    fn disk_usage(&self) -> u64 {
        self.stores
            .read()
            .iter()
            .map(|entry| entry.store.disk_usage())
            .sum()
    }

    fn collision_count(&self) -> u64 {
        self.cache.collision_count()
    }

    fn cached_count(&self) -> u64 {
        self.cache.len() as u64
    }

    fn lock(&self) {
        self.gate.acquire();
    }

    fn unlock(&self) {
        self.gate.release();
    }

    fn add_cell_store(&self, store: Box<dyn CellStore>, csid: u32) {
        {
            let mut next = self.next_csid.lock();
            *next = (*next).max(csid);
        }
        let mut stores = self.stores.write();
        stores.push(StoreEntry {
            csid,
            store: Arc::from(store),
        });
        stores.sort_by_key(|entry| entry.csid);
    }
}

/// Hides cells of rows outside the group's current span.
struct SpanSource {
    inner: Box<dyn CellSource>,
    span: RangeSpec,
}

impl SpanSource {
    fn skip_foreign(&mut self) {
        while let Some(cell) = self.inner.current() {
            if self.span.contains(&cell.key.row) {
                return;
            }
            self.inner.advance();
        }
    }
}

impl CellSource for SpanSource {
    fn current(&mut self) -> Option<Cell> {
        self.skip_foreign();
        self.inner.current()
    }

    fn advance(&mut self) {
        self.skip_foreign();
        self.inner.advance();
    }

    fn disk_read_bytes(&self) -> u64 {
        self.inner.disk_read_bytes()
    }
}
