//! K-way merge over cell sources with MVCC visibility, tombstones, version
//! and row/cell limits, filters and counter aggregation.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    fmt,
    sync::Arc,
};

use bytes::Bytes;

use super::{
    counter::CounterState, tombstone::Tombstones, Cell, CellSource, ColumnFamilyInfo,
    RegexpFilterCache, ScanContext,
};
use crate::{
    key::{Key, KeyFlag},
    metrics::ScanMetricsSnapshot,
};

/// Lifecycle of a [`MergeScanner`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    /// No cell has been requested yet.
    Uninitialized,
    /// A visible cell (or a finished counter) is ready.
    Active,
    /// Every source is drained or a row limit stopped the scan.
    Exhausted,
}

/// Outcome of evaluating the head of the queue.
enum Verdict {
    /// Not visible; move on to the next candidate.
    Skip,
    /// The head is the next visible cell.
    Emit,
    /// A finished counter was produced; the head stays unconsumed.
    Counted,
    /// The row limit was exceeded.
    Stop,
}

#[derive(Debug)]
struct HeapEntry {
    cell: Cell,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cell
            .key
            .cmp(&other.cell.key)
            .then(self.source.cmp(&other.source))
            .reverse()
    }
}

/// Row and per-family cell counting over the visible output.
#[derive(Debug, Default)]
struct Limits {
    row_limit: u32,
    cell_limit: u32,
    row_count: u32,
    cell_count: u32,
    last: Option<(Bytes, u16)>,
}

impl Limits {
    fn admit(&mut self, key: &Key, return_deletes: bool, cell_limited: bool) -> Verdict {
        if self.row_limit == 0 && self.cell_limit == 0 {
            return Verdict::Emit;
        }
        match self.last.as_mut() {
            Some((row, cf)) if *row == key.row => {
                if *cf != key.column_family_code {
                    *cf = key.column_family_code;
                    self.cell_count = 1;
                    return Verdict::Emit;
                }
                if !cell_limited || self.cell_limit == 0 {
                    return Verdict::Emit;
                }
                self.cell_count += 1;
                if self.cell_count > self.cell_limit {
                    Verdict::Skip
                } else {
                    Verdict::Emit
                }
            }
            _ => {
                self.last = Some((key.row.clone(), key.column_family_code));
                self.row_count += 1;
                self.cell_count = 1;
                if !return_deletes && self.row_limit > 0 && self.row_count > self.row_limit {
                    Verdict::Stop
                } else {
                    Verdict::Emit
                }
            }
        }
    }
}

/// Merges any number of sorted [`CellSource`]s into the single visible cell
/// sequence of one scan.
///
/// Sources must be added before the first call to [`MergeScanner::get`].
/// Counter aggregation and row/column/value filtering only run when the
/// scanner merges the sources of a single access group (`ag_scanner`).
pub struct MergeScanner {
    ctx: Arc<ScanContext>,
    return_deletes: bool,
    ag_scanner: bool,
    sources: Vec<Box<dyn CellSource>>,
    queue: BinaryHeap<HeapEntry>,
    state: ScanState,
    tombstones: Tombstones,
    row_set: VecDeque<Bytes>,
    regexp_cache: RegexpFilterCache,
    prev_cell: Option<Key>,
    revs_count: u32,
    revs_limit: u32,
    limits: Limits,
    counting: Option<CounterState>,
    counted: Option<Cell>,
    metrics: ScanMetricsSnapshot,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl MergeScanner {
    pub fn new(ctx: Arc<ScanContext>, return_deletes: bool, ag_scanner: bool) -> Self {
        let limits = Limits {
            row_limit: ctx.row_limit(),
            cell_limit: ctx.cell_limit_per_family(),
            ..Default::default()
        };
        let row_set = ctx.row_set().iter().cloned().collect();
        Self {
            ctx,
            return_deletes,
            ag_scanner,
            sources: Vec::new(),
            queue: BinaryHeap::new(),
            state: ScanState::Uninitialized,
            tombstones: Tombstones::default(),
            row_set,
            regexp_cache: RegexpFilterCache::new(),
            prev_cell: None,
            revs_count: 0,
            revs_limit: 0,
            limits,
            counting: None,
            counted: None,
            metrics: ScanMetricsSnapshot::default(),
            release: None,
        }
    }

    pub fn add_source(&mut self, source: impl CellSource + 'static) {
        debug_assert_eq!(self.state, ScanState::Uninitialized);
        self.sources.push(Box::new(source));
    }

    /// Install a callback run exactly once when the scanner is dropped.
    pub fn on_release(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.release = Some(Box::new(callback));
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Current visible cell without advancing.
    pub fn get(&mut self) -> Option<Cell> {
        if self.state == ScanState::Uninitialized {
            self.initialize();
        }
        if self.state == ScanState::Exhausted {
            return None;
        }
        if let Some(cell) = &self.counted {
            return Some(cell.clone());
        }
        self.queue.peek().map(|entry| entry.cell.clone())
    }

    /// Advance past the current visible cell.
    pub fn forward(&mut self) {
        match self.state {
            ScanState::Uninitialized => self.initialize(),
            ScanState::Exhausted => return,
            ScanState::Active => {}
        }
        if self.state == ScanState::Active {
            self.seek(true);
        }
    }

    /// Bytes read from disk by every source.
    pub fn disk_read(&self) -> u64 {
        self.sources
            .iter()
            .map(|source| source.disk_read_bytes())
            .sum()
    }

    pub fn metrics(&self) -> ScanMetricsSnapshot {
        ScanMetricsSnapshot {
            disk_read: self.disk_read(),
            ..self.metrics
        }
    }

    fn initialize(&mut self) {
        self.queue.clear();
        for source in 0..self.sources.len() {
            if let Some(cell) = self.sources[source].current() {
                self.push(source, cell);
            }
        }
        self.state = ScanState::Active;
        self.seek(false);
    }

    fn push(&mut self, source: usize, cell: Cell) {
        self.metrics.bytes_input += cell.encoded_len() as u64;
        self.metrics.cells_input += 1;
        self.queue.push(HeapEntry { cell, source });
    }

    /// Pop the head, advance its source and reinsert the source's next cell.
    fn advance_head(&mut self) {
        let Some(HeapEntry { source, .. }) = self.queue.pop() else {
            return;
        };
        let next = {
            let src = &mut self.sources[source];
            src.advance();
            src.current()
        };
        if let Some(cell) = next {
            self.push(source, cell);
        }
    }

    /// Establish the next visible cell, consuming the head first when
    /// `advance` is set.
    fn seek(&mut self, mut advance: bool) {
        // A presented counter did not consume the head that ended it.
        if self.counted.take().is_some() {
            advance = false;
        }
        loop {
            if advance {
                self.advance_head();
            }
            advance = true;

            let Some(cell) = self.queue.peek().map(|entry| entry.cell.clone()) else {
                match self.counting.take() {
                    Some(state) => self.present_counter(state),
                    None => self.state = ScanState::Exhausted,
                }
                return;
            };

            match self.evaluate(&cell) {
                Verdict::Skip => continue,
                Verdict::Counted => return,
                Verdict::Stop => {
                    self.state = ScanState::Exhausted;
                    return;
                }
                Verdict::Emit => {
                    self.metrics.bytes_output += cell.encoded_len() as u64;
                    self.metrics.cells_output += 1;
                    return;
                }
            }
        }
    }

    fn evaluate(&mut self, cell: &Cell) -> Verdict {
        let ctx = Arc::clone(&self.ctx);
        let key = &cell.key;
        let info = ctx.family(key.column_family_code);
        let counter = info.counter && self.ag_scanner;

        if key.timestamp < info.cutoff_time || key.timestamp < ctx.start_timestamp() {
            return Verdict::Skip;
        }
        if key.revision > ctx.revision()
            || (key.timestamp >= ctx.end_timestamp()
                && (!self.return_deletes || key.flag == KeyFlag::Insert))
        {
            return Verdict::Skip;
        }

        if key.flag.is_delete() {
            self.tombstones.record(key);
            if !self.return_deletes {
                return Verdict::Skip;
            }
        } else {
            if !self.tombstones.is_empty() && self.tombstones.suppresses(key) {
                return Verdict::Skip;
            }

            if !self
                .prev_cell
                .as_ref()
                .is_some_and(|prev| prev.same_cell(key))
            {
                self.prev_cell = Some(key.clone());
                self.revs_count = 0;
                self.revs_limit = info.max_versions;
            }
            self.revs_count += 1;
            // Counters are exempt: every increment must be summed.
            if self.revs_limit > 0 && self.revs_count > self.revs_limit && !counter {
                return Verdict::Skip;
            }

            if self.ag_scanner && !self.passes_filters(&ctx, info, cell) {
                return Verdict::Skip;
            }
        }

        if let Some(state) = self.counting.as_mut() {
            if counter && key.flag == KeyFlag::Insert && state.key().same_cell(key) {
                state.increment(&cell.value);
                return Verdict::Skip;
            }
        }
        if let Some(state) = self.counting.take() {
            self.present_counter(state);
            return Verdict::Counted;
        }
        if counter && key.flag == KeyFlag::Insert {
            if let Verdict::Stop = self.limits.admit(key, self.return_deletes, false) {
                return Verdict::Stop;
            }
            self.counting = Some(CounterState::start(key.clone(), &cell.value));
            return Verdict::Skip;
        }

        // Counters stay exempt from the cell limit after being summed below.
        self.limits.admit(key, self.return_deletes, !info.counter)
    }

    fn passes_filters(&mut self, ctx: &ScanContext, info: &ColumnFamilyInfo, cell: &Cell) -> bool {
        let key = &cell.key;

        if !ctx.row_set().is_empty() {
            while self.row_set.front().is_some_and(|row| *row < key.row) {
                self.row_set.pop_front();
            }
            if self.row_set.front() != Some(&key.row) {
                return false;
            }
        }

        if let Some(re) = ctx.row_regexp() {
            if !self.regexp_cache.row_matches(&key.row, |row| re.is_match(row)) {
                return false;
            }
        }

        if !info.qualifier_filter.is_empty()
            && !self.regexp_cache.column_matches(
                key.column_family_code,
                &key.column_qualifier,
                |qualifier| info.qualifier_matches(qualifier),
            )
        {
            return false;
        }

        // Value patterns last: they cannot be memoized.
        if let Some(re) = ctx.value_regexp() {
            if !info.counter && !re.is_match(&cell.value) {
                return false;
            }
        }
        true
    }

    fn present_counter(&mut self, state: CounterState) {
        let cell = state.finish();
        self.prev_cell = Some(cell.key.clone());
        self.metrics.bytes_output += cell.encoded_len() as u64;
        self.metrics.cells_output += 1;
        self.counted = Some(cell);
    }
}

impl CellSource for MergeScanner {
    fn current(&mut self) -> Option<Cell> {
        self.get()
    }

    fn advance(&mut self) {
        self.forward()
    }

    fn disk_read_bytes(&self) -> u64 {
        self.disk_read()
    }
}

impl Drop for MergeScanner {
    fn drop(&mut self) {
        self.sources.clear();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for MergeScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeScanner")
            .field("sources", &self.sources.len())
            .field("state", &self.state)
            .field("return_deletes", &self.return_deletes)
            .field("ag_scanner", &self.ag_scanner)
            .field("queued", &self.queue.len())
            .finish()
    }
}
