//! Cell keys: the parsed form of a serialized sorted key and its ordering.
//!
//! A cell is identified by `(row, column family, qualifier)`; each identity
//! carries any number of versions distinguished by timestamp. Keys sort by
//! identity ascending and then newest first, so a merge over individually
//! sorted sources observes every version of a cell contiguously.

mod codec;

use std::{cmp::Ordering, fmt};

use bytes::Bytes;

pub use codec::{KeyError, END_ROOT_ROW};

/// Kind of record a key describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum KeyFlag {
    /// Deletes every cell of the row.
    DeleteRow = 0,
    /// Deletes every cell of one column family within the row.
    DeleteColumnFamily = 1,
    /// Deletes every version of one cell.
    DeleteCell = 2,
    /// Deletes exactly one timestamped version of one cell.
    DeleteCellVersion = 3,
    /// A live value.
    Insert = 255,
}

impl KeyFlag {
    /// Decode the on-wire flag byte.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::DeleteRow),
            1 => Some(Self::DeleteColumnFamily),
            2 => Some(Self::DeleteCell),
            3 => Some(Self::DeleteCellVersion),
            255 => Some(Self::Insert),
            _ => None,
        }
    }

    /// Whether the record is one of the four tombstone flavors.
    #[inline]
    pub fn is_delete(self) -> bool {
        self != Self::Insert
    }
}

/// Parsed cell key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key {
    /// Row key; never contains `0x00`.
    pub row: Bytes,
    /// Column family code, resolved against the schema.
    pub column_family_code: u16,
    /// Column qualifier; never contains `0x00`.
    pub column_qualifier: Bytes,
    /// Logical timestamp, larger is newer.
    pub timestamp: i64,
    /// Write ordering token used for MVCC visibility.
    pub revision: i64,
    /// Record kind.
    pub flag: KeyFlag,
}

impl Key {
    /// Build a key from its components.
    pub fn new(
        row: impl Into<Bytes>,
        column_family_code: u16,
        column_qualifier: impl Into<Bytes>,
        timestamp: i64,
        flag: KeyFlag,
    ) -> Self {
        Self {
            row: row.into(),
            column_family_code,
            column_qualifier: column_qualifier.into(),
            timestamp,
            revision: timestamp,
            flag,
        }
    }

    /// Live value key.
    pub fn insert(
        row: impl Into<Bytes>,
        column_family_code: u16,
        column_qualifier: impl Into<Bytes>,
        timestamp: i64,
    ) -> Self {
        Self::new(row, column_family_code, column_qualifier, timestamp, KeyFlag::Insert)
    }

    /// Row tombstone. Row deletes carry family code 0 and an empty qualifier
    /// so they sort ahead of every cell in the row.
    pub fn delete_row(row: impl Into<Bytes>, timestamp: i64) -> Self {
        Self::new(row, 0, Bytes::new(), timestamp, KeyFlag::DeleteRow)
    }

    /// Column family tombstone.
    pub fn delete_column_family(
        row: impl Into<Bytes>,
        column_family_code: u16,
        timestamp: i64,
    ) -> Self {
        Self::new(
            row,
            column_family_code,
            Bytes::new(),
            timestamp,
            KeyFlag::DeleteColumnFamily,
        )
    }

    /// Tombstone covering every version of a cell up to `timestamp`.
    pub fn delete_cell(
        row: impl Into<Bytes>,
        column_family_code: u16,
        column_qualifier: impl Into<Bytes>,
        timestamp: i64,
    ) -> Self {
        Self::new(
            row,
            column_family_code,
            column_qualifier,
            timestamp,
            KeyFlag::DeleteCell,
        )
    }

    /// Tombstone covering exactly the version written at `timestamp`.
    pub fn delete_cell_version(
        row: impl Into<Bytes>,
        column_family_code: u16,
        column_qualifier: impl Into<Bytes>,
        timestamp: i64,
    ) -> Self {
        Self::new(
            row,
            column_family_code,
            column_qualifier,
            timestamp,
            KeyFlag::DeleteCellVersion,
        )
    }

    /// Replace the revision (defaults to the timestamp).
    pub fn with_revision(self, revision: i64) -> Self {
        Self { revision, ..self }
    }

    /// Size of the serialized form in bytes.
    pub fn encoded_len(&self) -> usize {
        self.row.len() + 1 + 2 + self.column_qualifier.len() + 1 + 1 + 8 + 8
    }

    /// Whether both keys address the same `(row, family, qualifier)` cell.
    #[inline]
    pub fn same_cell(&self, other: &Key) -> bool {
        self.column_family_code == other.column_family_code
            && self.row == other.row
            && self.column_qualifier == other.column_qualifier
    }

    /// Compare the `(row, family, qualifier)` identity only.
    pub fn cmp_cell(&self, other: &Key) -> Ordering {
        self.row
            .cmp(&other.row)
            .then(self.column_family_code.cmp(&other.column_family_code))
            .then_with(|| self.column_qualifier.cmp(&other.column_qualifier))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_cell(other)
            .then(other.timestamp.cmp(&self.timestamp))
            .then(self.flag.cmp(&other.flag))
            .then(other.revision.cmp(&self.revision))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("row", &String::from_utf8_lossy(&self.row))
            .field("cf", &self.column_family_code)
            .field("qualifier", &String::from_utf8_lossy(&self.column_qualifier))
            .field("ts", &self.timestamp)
            .field("rev", &self.revision)
            .field("flag", &self.flag)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_versions_sort_first() {
        let older = Key::insert("r", 1, "q", 10);
        let newer = Key::insert("r", 1, "q", 20);
        assert!(newer < older);
    }

    #[test]
    fn identity_dominates_timestamp() {
        let a = Key::insert("a", 1, "q", 1);
        let b = Key::insert("b", 1, "q", 100);
        assert!(a < b);

        let cf1 = Key::insert("a", 1, "z", 1);
        let cf2 = Key::insert("a", 2, "a", 100);
        assert!(cf1 < cf2);
    }

    #[test]
    fn row_delete_precedes_cells_of_row() {
        let tombstone = Key::delete_row("r", 5);
        let cell = Key::insert("r", 1, "", 50);
        assert!(tombstone < cell);
    }

    #[test]
    fn delete_precedes_insert_at_equal_timestamp() {
        let delete = Key::delete_cell_version("r", 1, "q", 7);
        let insert = Key::insert("r", 1, "q", 7);
        assert!(delete < insert);
    }

    #[test]
    fn flag_round_trips_through_byte() {
        for flag in [
            KeyFlag::DeleteRow,
            KeyFlag::DeleteColumnFamily,
            KeyFlag::DeleteCell,
            KeyFlag::DeleteCellVersion,
            KeyFlag::Insert,
        ] {
            assert_eq!(KeyFlag::from_u8(flag as u8), Some(flag));
        }
        assert_eq!(KeyFlag::from_u8(9), None);
        assert!(!KeyFlag::Insert.is_delete());
    }
}
