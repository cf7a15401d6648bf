//! Immutable sorted cell stores and how they are opened.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::{
    id::RangeSpec,
    key::KeyFlag,
    scan::{Cell, CellSource, ScanContext, VecSource},
};

/// Failure reported by a cell store backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cell store `{path}`: {message}")]
pub struct CellStoreError {
    pub path: String,
    pub message: String,
}

impl CellStoreError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// On-disk sorted store owned by one access group.
pub trait CellStore: Send + Sync {
    /// Load the block index. Must succeed before the store is scanned.
    fn load_index(&mut self) -> Result<(), CellStoreError>;

    fn path(&self) -> &str;

    fn disk_usage(&self) -> u64;

    /// Candidate split row among the store's rows inside `span`, derived from
    /// the index.
    fn split_row(&self, span: &RangeSpec) -> Option<Bytes>;

    fn create_scanner(&self, ctx: &ScanContext) -> Box<dyn CellSource>;
}

/// Opens stores named in persisted metadata, restricted to a row span.
pub trait CellStoreOpener: Send + Sync {
    fn open(&self, path: &str, span: &RangeSpec) -> Result<Box<dyn CellStore>, CellStoreError>;
}

/// Extract the store id from a trailing `/csN` path component; 0 when the
/// path does not end in one.
pub fn extract_csid(path: &str) -> u32 {
    let Some(idx) = path.rfind('/') else {
        return 0;
    };
    let Some(digits) = path[idx + 1..].strip_prefix("cs") else {
        return 0;
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse().unwrap_or(0)
}

/// Split a `;`-separated file list, trimming entries and dropping empty ones.
pub fn parse_file_list(files: &str) -> Vec<String> {
    files
        .split(';')
        .map(str::trim)
        .filter(|file| !file.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Cell store whose cells live in memory, produced by compacting a cache.
#[derive(Clone, Debug)]
pub struct MemCellStore {
    path: String,
    cells: Arc<Vec<Cell>>,
    span: RangeSpec,
    indexed: bool,
}

impl MemCellStore {
    pub fn new(path: impl Into<String>, mut cells: Vec<Cell>) -> Self {
        cells.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            path: path.into(),
            cells: Arc::new(cells),
            span: RangeSpec::default(),
            indexed: true,
        }
    }

    /// Restrict the store to rows inside `span`; the index must be loaded
    /// again before scanning.
    pub fn restrict(&self, span: &RangeSpec) -> Self {
        Self {
            span: span.clone(),
            indexed: false,
            ..self.clone()
        }
    }

    fn visible(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|cell| self.span.contains(&cell.key.row))
    }

    pub fn len(&self) -> usize {
        self.visible().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CellStore for MemCellStore {
    fn load_index(&mut self) -> Result<(), CellStoreError> {
        self.indexed = true;
        Ok(())
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn disk_usage(&self) -> u64 {
        self.visible().map(|cell| cell.encoded_len() as u64).sum()
    }

    fn split_row(&self, span: &RangeSpec) -> Option<Bytes> {
        let cells: Vec<&Cell> = self
            .visible()
            .filter(|cell| span.contains(&cell.key.row))
            .collect();
        cells.get(cells.len() / 2).map(|cell| cell.key.row.clone())
    }

    fn create_scanner(&self, ctx: &ScanContext) -> Box<dyn CellSource> {
        let cells = if self.indexed {
            self.visible()
                .filter(|cell| {
                    cell.key.flag == KeyFlag::DeleteRow
                        || ctx.selects_family(cell.key.column_family_code)
                })
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        Box::new(VecSource::new(cells).with_disk_accounting())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    #[test]
    fn csid_comes_from_trailing_component() {
        assert_eq!(extract_csid("/hypertable/tables/t/default/cs12"), 12);
        assert_eq!(extract_csid("/hypertable/tables/t/default/data"), 0);
        assert_eq!(extract_csid("cs3"), 0);
        assert_eq!(extract_csid("/x/cs"), 0);
    }

    #[test]
    fn file_list_drops_blanks() {
        assert_eq!(
            parse_file_list(" /a/cs1 ;; /a/cs2;  "),
            vec!["/a/cs1".to_string(), "/a/cs2".to_string()]
        );
        assert!(parse_file_list("").is_empty());
    }

    #[test]
    fn restricted_store_hides_rows_outside_span() {
        let store = MemCellStore::new(
            "mem/cs1",
            vec![
                Cell::new(Key::insert("a", 1, "q", 1), "1"),
                Cell::new(Key::insert("m", 1, "q", 1), "2"),
                Cell::new(Key::insert("z", 1, "q", 1), "3"),
            ],
        );
        assert_eq!(store.len(), 3);
        let mut upper = store.restrict(&RangeSpec::new("a", "m"));
        assert_eq!(upper.len(), 1);
        upper.load_index().unwrap();

        let mut scanner = upper.create_scanner(&ScanContext::builder().build());
        assert_eq!(scanner.current().unwrap().key.row, "m");
        scanner.advance();
        assert!(scanner.current().is_none());
        assert!(scanner.disk_read_bytes() > 0);
    }
}
