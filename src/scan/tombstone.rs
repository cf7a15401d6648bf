//! Active delete records tracked by the merge scanner.
//!
//! Tombstones sort immediately before the versions they cover, so the scanner
//! only needs to remember the most recent delete of each scope. Once a live
//! cell no longer shares a tombstone's prefix the tombstone can never apply
//! again and is dropped.

use std::collections::BTreeSet;

use bytes::Bytes;

use crate::key::{Key, KeyFlag};

/// Prefix scope a delete applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeleteScope {
    CellVersion = 0,
    Cell = 1,
    ColumnFamily = 2,
    Row = 3,
}

impl DeleteScope {
    /// Scopes ordered from most to least specific.
    pub(crate) const CHECK_ORDER: [DeleteScope; 4] = [
        DeleteScope::CellVersion,
        DeleteScope::Cell,
        DeleteScope::ColumnFamily,
        DeleteScope::Row,
    ];

    pub(crate) fn of(flag: KeyFlag) -> Option<Self> {
        match flag {
            KeyFlag::DeleteRow => Some(Self::Row),
            KeyFlag::DeleteColumnFamily => Some(Self::ColumnFamily),
            KeyFlag::DeleteCell => Some(Self::Cell),
            KeyFlag::DeleteCellVersion => Some(Self::CellVersion),
            KeyFlag::Insert => None,
        }
    }
}

/// Deleted key prefix plus the timestamp(s) it was issued at.
#[derive(Clone, Debug)]
pub(crate) struct Tombstone {
    row: Bytes,
    column_family_code: u16,
    column_qualifier: Bytes,
    timestamp: i64,
    versions: BTreeSet<i64>,
}

impl Tombstone {
    fn new(scope: DeleteScope, key: &Key) -> Self {
        let mut tombstone = Self {
            row: key.row.clone(),
            column_family_code: key.column_family_code,
            column_qualifier: key.column_qualifier.clone(),
            timestamp: key.timestamp,
            versions: BTreeSet::new(),
        };
        if scope == DeleteScope::CellVersion {
            tombstone.versions.insert(key.timestamp);
        }
        tombstone
    }

    /// Whether `key` falls under this tombstone's prefix.
    pub(crate) fn matches(&self, scope: DeleteScope, key: &Key) -> bool {
        match scope {
            DeleteScope::Row => self.row == key.row,
            DeleteScope::ColumnFamily => {
                self.column_family_code == key.column_family_code && self.row == key.row
            }
            DeleteScope::Cell | DeleteScope::CellVersion => {
                self.column_family_code == key.column_family_code
                    && self.row == key.row
                    && self.column_qualifier == key.column_qualifier
            }
        }
    }

    /// Whether a matching live version at `timestamp` is deleted.
    fn covers(&self, scope: DeleteScope, timestamp: i64) -> bool {
        match scope {
            DeleteScope::CellVersion => self.versions.contains(&timestamp),
            _ => timestamp <= self.timestamp,
        }
    }
}

/// The four independent active deletes of a scan.
#[derive(Debug, Default)]
pub(crate) struct Tombstones {
    active: [Option<Tombstone>; 4],
}

impl Tombstones {
    /// Record a delete. A delete repeating the tracked prefix extends it,
    /// any other delete of the same scope replaces it.
    pub(crate) fn record(&mut self, key: &Key) {
        let Some(scope) = DeleteScope::of(key.flag) else {
            return;
        };
        let slot = &mut self.active[scope as usize];
        let tombstone = match slot {
            Some(tombstone) if tombstone.matches(scope, key) => tombstone,
            _ => {
                *slot = Some(Tombstone::new(scope, key));
                return;
            }
        };
        if scope == DeleteScope::CellVersion {
            tombstone.versions.insert(key.timestamp);
        } else if tombstone.timestamp < key.timestamp {
            tombstone.timestamp = key.timestamp;
        }
    }

    /// Whether the live cell `key` is deleted. Tombstones whose prefix no
    /// longer matches are cleared along the way.
    pub(crate) fn suppresses(&mut self, key: &Key) -> bool {
        for scope in DeleteScope::CHECK_ORDER {
            let slot = &mut self.active[scope as usize];
            let Some(tombstone) = slot.as_ref() else {
                continue;
            };
            if !tombstone.matches(scope, key) {
                // Sources are sorted: this prefix cannot recur.
                *slot = None;
                continue;
            }
            if tombstone.covers(scope, key.timestamp) {
                return true;
            }
        }
        false
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.active.iter().all(Option::is_none)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, scope: DeleteScope) -> Option<&Tombstone> {
        self.active[scope as usize].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching_per_scope() {
        let cell = Key::insert("r", 2, "q", 5);
        let row = Tombstone::new(DeleteScope::Row, &Key::delete_row("r", 9));
        assert!(row.matches(DeleteScope::Row, &cell));
        assert!(!row.matches(DeleteScope::Row, &Key::insert("r2", 2, "q", 5)));

        let family =
            Tombstone::new(DeleteScope::ColumnFamily, &Key::delete_column_family("r", 2, 9));
        assert!(family.matches(DeleteScope::ColumnFamily, &cell));
        assert!(!family.matches(DeleteScope::ColumnFamily, &Key::insert("r", 3, "q", 5)));

        let exact = Tombstone::new(DeleteScope::Cell, &Key::delete_cell("r", 2, "q", 9));
        assert!(exact.matches(DeleteScope::Cell, &cell));
        assert!(!exact.matches(DeleteScope::Cell, &Key::insert("r", 2, "q2", 5)));
    }

    #[test]
    fn repeated_prefix_extends_timestamp() {
        let mut tombstones = Tombstones::default();
        tombstones.record(&Key::delete_cell("r", 1, "q", 10));
        tombstones.record(&Key::delete_cell("r", 1, "q", 30));
        tombstones.record(&Key::delete_cell("r", 1, "q", 20));
        assert_eq!(tombstones.get(DeleteScope::Cell).unwrap().timestamp, 30);

        tombstones.record(&Key::delete_cell("r", 1, "other", 5));
        let replaced = tombstones.get(DeleteScope::Cell).unwrap();
        assert_eq!(replaced.timestamp, 5);
        assert_eq!(replaced.column_qualifier, "other");
    }

    #[test]
    fn version_deletes_accumulate_exact_timestamps() {
        let mut tombstones = Tombstones::default();
        tombstones.record(&Key::delete_cell_version("r", 1, "q", 8));
        tombstones.record(&Key::delete_cell_version("r", 1, "q", 4));

        assert!(tombstones.suppresses(&Key::insert("r", 1, "q", 8)));
        assert!(!tombstones.suppresses(&Key::insert("r", 1, "q", 6)));
        assert!(tombstones.suppresses(&Key::insert("r", 1, "q", 4)));
    }

    #[test]
    fn coverage_is_inclusive_of_delete_timestamp() {
        let mut tombstones = Tombstones::default();
        tombstones.record(&Key::delete_column_family("r", 1, 10));
        assert!(!tombstones.suppresses(&Key::insert("r", 1, "a", 11)));
        assert!(tombstones.suppresses(&Key::insert("r", 1, "a", 10)));
        assert!(tombstones.suppresses(&Key::insert("r", 1, "b", 3)));
    }

    #[test]
    fn mismatched_prefix_clears_tombstone() {
        let mut tombstones = Tombstones::default();
        tombstones.record(&Key::delete_row("a", 10));
        tombstones.record(&Key::delete_cell("a", 1, "q", 10));
        assert!(!tombstones.is_empty());

        assert!(!tombstones.suppresses(&Key::insert("b", 1, "q", 1)));
        assert!(tombstones.is_empty());
    }

    #[test]
    fn most_specific_match_short_circuits() {
        let mut tombstones = Tombstones::default();
        tombstones.record(&Key::delete_row("r", 100));
        tombstones.record(&Key::delete_cell("r", 1, "q", 50));

        // Covered by the cell delete; the row delete is left untouched.
        assert!(tombstones.suppresses(&Key::insert("r", 1, "q", 40)));
        assert!(tombstones.get(DeleteScope::Row).is_some());

        // Next cell drops the cell delete but the row delete still applies.
        assert!(tombstones.suppresses(&Key::insert("r", 1, "z", 90)));
        assert!(tombstones.get(DeleteScope::Cell).is_none());
    }
}
