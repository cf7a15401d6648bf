//! Concurrent in-memory cell cache of an access group.

use std::{
    ops::Bound,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;

use crate::{
    key::Key,
    scan::{Cell, CellSource},
};

/// Sorted, lock-free map of recently applied cells.
///
/// Compaction never removes cells from a map a scanner may hold: it swaps in
/// a fresh map and leaves the frozen one to the scanners already reading it.
#[derive(Debug, Default)]
pub struct CellCache {
    data: RwLock<Arc<SkipMap<Key, Bytes>>>,
    collisions: AtomicU64,
    memory: AtomicU64,
}

impl CellCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a cell. Returns `true` when the exact key was already cached;
    /// the newer value replaces the old one and a collision is counted.
    pub fn add(&self, key: Key, value: Bytes) -> bool {
        let size = (key.encoded_len() + value.len()) as u64;
        let data = self.data.read();
        let collided = data.contains_key(&key);
        if collided {
            self.collisions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.memory.fetch_add(size, Ordering::Relaxed);
        }
        data.insert(key, value);
        collided
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    pub fn collision_count(&self) -> u64 {
        self.collisions.load(Ordering::Relaxed)
    }

    /// Approximate serialized size of the cached cells.
    pub fn memory_used(&self) -> u64 {
        self.memory.load(Ordering::Relaxed)
    }

    /// Scanner walking the live cache in key order.
    pub fn scanner(&self) -> CellCacheScanner {
        CellCacheScanner {
            data: Arc::clone(&self.data.read()),
            cursor: None,
            started: false,
        }
    }

    /// Append every distinct cached row, ascending.
    pub fn rows(&self, out: &mut Vec<Bytes>) {
        let mut last: Option<Bytes> = None;
        for entry in self.data.read().iter() {
            let row = &entry.key().row;
            if last.as_ref() != Some(row) {
                out.push(row.clone());
                last = Some(row.clone());
            }
        }
    }

    /// Row of the cell at the middle of the cache.
    pub fn middle_row(&self) -> Option<Bytes> {
        let data = self.data.read();
        let middle = data.len() / 2;
        let row = data
            .iter()
            .nth(middle)
            .map(|entry| entry.key().row.clone());
        row
    }

    /// Freeze the cache: return every cell with a timestamp at or below
    /// `logical` and continue with a new map holding only the newer cells.
    ///
    /// Scanners opened before the freeze keep reading the frozen map, so
    /// they still see the returned cells.
    pub fn freeze_through(&self, logical: i64) -> Vec<Cell> {
        let mut data = self.data.write();
        let retained = SkipMap::new();
        let mut frozen = Vec::new();
        for entry in data.iter() {
            let cell = Cell::new(entry.key().clone(), entry.value().clone());
            if cell.key.timestamp <= logical {
                frozen.push(cell);
            } else {
                retained.insert(cell.key, cell.value);
            }
        }
        if !frozen.is_empty() {
            *data = Arc::new(retained);
            frozen.iter().for_each(|cell| self.release(cell));
        }
        frozen
    }

    /// Drop every cell whose row is at or below `start_row`.
    pub fn purge_through(&self, start_row: &[u8]) -> usize {
        let mut purged = 0;
        for entry in self.data.read().iter() {
            if entry.key().row.as_ref() > start_row {
                break;
            }
            let cell = Cell::new(entry.key().clone(), entry.value().clone());
            if entry.remove() {
                self.release(&cell);
                purged += 1;
            }
        }
        purged
    }

    fn release(&self, cell: &Cell) {
        let size = cell.encoded_len() as u64;
        let _ = self
            .memory
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(size))
            });
    }
}

/// Forward cursor over a [`CellCache`].
///
/// The cursor re-seeks past the last returned key on every step, so cells
/// inserted concurrently behind the cursor are never returned twice.
pub struct CellCacheScanner {
    data: Arc<SkipMap<Key, Bytes>>,
    cursor: Option<Cell>,
    started: bool,
}

impl CellCacheScanner {
    fn seek_after(&self, key: Option<&Key>) -> Option<Cell> {
        let bound = match key {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        self.data
            .range((bound, Bound::Unbounded))
            .next()
            .map(|entry| Cell::new(entry.key().clone(), entry.value().clone()))
    }
}

impl CellSource for CellCacheScanner {
    fn current(&mut self) -> Option<Cell> {
        if !self.started {
            self.started = true;
            self.cursor = self.seek_after(None);
        }
        self.cursor.clone()
    }

    fn advance(&mut self) {
        if !self.started {
            self.current();
        }
        if let Some(cell) = self.cursor.take() {
            self.cursor = self.seek_after(Some(&cell.key));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(source: &mut impl CellSource) -> Vec<Cell> {
        let mut out = Vec::new();
        while let Some(cell) = source.current() {
            out.push(cell);
            source.advance();
        }
        out
    }

    #[test]
    fn collisions_replace_value() {
        let cache = CellCache::new();
        assert!(!cache.add(Key::insert("r", 1, "q", 1), Bytes::from_static(b"a")));
        let used = cache.memory_used();
        assert!(cache.add(Key::insert("r", 1, "q", 1), Bytes::from_static(b"b")));
        assert_eq!(cache.collision_count(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.memory_used(), used);

        let cells = drain(&mut cache.scanner());
        assert_eq!(cells[0].value, "b");
    }

    #[test]
    fn scanner_yields_key_order() {
        let cache = CellCache::new();
        cache.add(Key::insert("b", 1, "q", 1), Bytes::new());
        cache.add(Key::insert("a", 1, "q", 1), Bytes::new());
        cache.add(Key::insert("a", 1, "q", 9), Bytes::new());
        let cells = drain(&mut cache.scanner());
        let keys: Vec<_> = cells.iter().map(|c| c.key.clone()).collect();
        assert_eq!(
            keys,
            vec![
                Key::insert("a", 1, "q", 9),
                Key::insert("a", 1, "q", 1),
                Key::insert("b", 1, "q", 1),
            ]
        );
    }

    #[test]
    fn rows_and_middle_row() {
        let cache = CellCache::new();
        for (row, ts) in [("a", 1), ("a", 2), ("b", 1), ("c", 1), ("c", 2)] {
            cache.add(Key::insert(row, 1, "q", ts), Bytes::new());
        }
        let mut rows = Vec::new();
        cache.rows(&mut rows);
        assert_eq!(rows, vec!["a", "b", "c"]);
        assert_eq!(cache.middle_row().unwrap(), "b");
        assert!(CellCache::new().middle_row().is_none());
    }

    #[test]
    fn freeze_and_purge() {
        let cache = CellCache::new();
        cache.add(Key::insert("a", 1, "q", 5), Bytes::from_static(b"x"));
        cache.add(Key::insert("b", 1, "q", 10), Bytes::from_static(b"y"));
        cache.add(Key::insert("c", 1, "q", 3), Bytes::from_static(b"z"));
        let mut before = cache.scanner();

        let frozen = cache.freeze_through(5);
        assert_eq!(frozen.len(), 2);
        assert_eq!(cache.len(), 1);
        // An open scanner keeps the frozen map.
        assert_eq!(drain(&mut before).len(), 3);

        cache.add(Key::insert("a", 1, "q", 20), Bytes::new());
        assert_eq!(cache.purge_through(b"a"), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(drain(&mut cache.scanner())[0].key.row, "b");
    }
}
