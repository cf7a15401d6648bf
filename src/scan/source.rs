use bytes::Bytes;

use crate::key::Key;

/// A key/value pair produced by a [`CellSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub key: Key,
    pub value: Bytes,
}

impl Cell {
    pub fn new(key: Key, value: impl Into<Bytes>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    /// Serialized size of key plus value.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        self.key.encoded_len() + self.value.len()
    }
}

/// Ordered, forward-only sequence of cells.
///
/// Implemented by cell caches, on-disk store scanners and merge scanners.
/// `current` must keep returning the same cell until `advance` is called.
pub trait CellSource: Send {
    /// Cell at the cursor, or `None` once the source is exhausted.
    fn current(&mut self) -> Option<Cell>;

    /// Move the cursor past the current cell.
    fn advance(&mut self);

    /// Bytes read from disk so far on behalf of this source.
    fn disk_read_bytes(&self) -> u64 {
        0
    }
}

impl<S> CellSource for Box<S>
where
    S: CellSource + ?Sized,
{
    fn current(&mut self) -> Option<Cell> {
        (**self).current()
    }

    fn advance(&mut self) {
        (**self).advance()
    }

    fn disk_read_bytes(&self) -> u64 {
        (**self).disk_read_bytes()
    }
}

/// Source over an owned, already sorted vector of cells.
#[derive(Debug, Default)]
pub struct VecSource {
    cells: Vec<Cell>,
    pos: usize,
    account_disk: bool,
    disk_read: u64,
}

impl VecSource {
    /// Wrap `cells`, sorting them by key.
    pub fn new(mut cells: Vec<Cell>) -> Self {
        cells.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            cells,
            pos: 0,
            account_disk: false,
            disk_read: 0,
        }
    }

    /// Report every consumed cell as read from disk, as a store scanner would.
    pub fn with_disk_accounting(mut self) -> Self {
        self.account_disk = true;
        self
    }
}

impl CellSource for VecSource {
    fn current(&mut self) -> Option<Cell> {
        self.cells.get(self.pos).cloned()
    }

    fn advance(&mut self) {
        if self.pos < self.cells.len() {
            if self.account_disk {
                self.disk_read += self.cells[self.pos].encoded_len() as u64;
            }
            self.pos += 1;
        }
    }

    fn disk_read_bytes(&self) -> u64 {
        self.disk_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_source_yields_sorted_cells() {
        let mut source = VecSource::new(vec![
            Cell::new(Key::insert("b", 1, "q", 1), "2"),
            Cell::new(Key::insert("a", 1, "q", 1), "1"),
        ]);
        assert_eq!(source.current().unwrap().value, "1");
        assert_eq!(source.current().unwrap().value, "1");
        source.advance();
        assert_eq!(source.current().unwrap().value, "2");
        source.advance();
        assert!(source.current().is_none());
        source.advance();
        assert!(source.current().is_none());
    }

    #[test]
    fn disk_accounting_counts_consumed_bytes() {
        let cell = Cell::new(Key::insert("a", 1, "q", 1), "xyz");
        let len = cell.encoded_len() as u64;
        let mut source = VecSource::new(vec![cell]).with_disk_accounting();
        assert_eq!(source.disk_read_bytes(), 0);
        source.advance();
        assert_eq!(source.disk_read_bytes(), len);

        let mut plain = VecSource::new(vec![Cell::new(Key::insert("a", 1, "q", 1), "x")]);
        plain.advance();
        assert_eq!(plain.disk_read_bytes(), 0);
    }
}
