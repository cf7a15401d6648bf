//! Identity of tables and ranges.

use std::fmt;

use bytes::Bytes;

use crate::key::END_ROOT_ROW;

/// Table a range belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableIdentifier {
    /// Numeric table id; id 0 is the metadata table.
    pub id: u32,
    pub name: String,
    /// Schema generation the range was last aligned with.
    pub generation: u32,
}

impl TableIdentifier {
    pub fn new(id: u32, name: impl Into<String>, generation: u32) -> Self {
        Self {
            id,
            name: name.into(),
            generation,
        }
    }

    /// Row key of a range's entry in the metadata table: `{id}:{end_row}`.
    pub fn metadata_row(&self, end_row: &[u8]) -> Bytes {
        let mut row = format!("{}:", self.id).into_bytes();
        row.extend_from_slice(end_row);
        Bytes::from(row)
    }
}

/// Row span `(start_row, end_row]` of a range.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RangeSpec {
    pub start_row: Bytes,
    pub end_row: Bytes,
}

impl RangeSpec {
    pub fn new(start_row: impl Into<Bytes>, end_row: impl Into<Bytes>) -> Self {
        Self {
            start_row: start_row.into(),
            end_row: end_row.into(),
        }
    }

    /// Whether `row` belongs to the span. An empty end row is unbounded.
    pub fn contains(&self, row: &[u8]) -> bool {
        let after_start = self.start_row.is_empty() || row > self.start_row.as_ref();
        let before_end = self.end_row.is_empty() || row <= self.end_row.as_ref();
        after_start && before_end
    }

    /// Whether `row` lies strictly inside the span.
    pub fn splits_at(&self, row: &[u8]) -> bool {
        self.start_row.as_ref() < row && row < self.end_row.as_ref()
    }

    /// The first range of the metadata table, which is never split.
    pub fn is_root(&self, table: &TableIdentifier) -> bool {
        table.id == 0 && self.start_row.is_empty() && self.end_row.as_ref() == END_ROOT_ROW
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}]",
            String::from_utf8_lossy(&self.start_row),
            String::from_utf8_lossy(&self.end_row)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_range_is_detected() {
        let metadata = TableIdentifier::new(0, "METADATA", 1);
        assert!(RangeSpec::new("", END_ROOT_ROW).is_root(&metadata));
        assert!(!RangeSpec::new("a", END_ROOT_ROW).is_root(&metadata));
        let user = TableIdentifier::new(7, "users", 1);
        assert!(!RangeSpec::new("", END_ROOT_ROW).is_root(&user));
    }

    #[test]
    fn split_points_are_strictly_inside() {
        let span = RangeSpec::new("b", "m");
        assert!(span.splits_at(b"c"));
        assert!(!span.splits_at(b"b"));
        assert!(!span.splits_at(b"m"));
        assert!(!span.splits_at(b"a"));
    }

    #[test]
    fn span_excludes_start_and_includes_end() {
        let span = RangeSpec::new("b", "m");
        assert!(!span.contains(b"b"));
        assert!(span.contains(b"c"));
        assert!(span.contains(b"m"));
        assert!(!span.contains(b"n"));
        assert!(RangeSpec::default().contains(b"anything"));
    }

    #[test]
    fn metadata_row_prefixes_table_id() {
        let table = TableIdentifier::new(12, "t", 1);
        assert_eq!(table.metadata_row(b"zz"), "12:zz");
    }
}
