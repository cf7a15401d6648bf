//! Metric snapshots exposed by scanners and ranges.

/// Byte and cell counters of one merge scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct ScanMetricsSnapshot {
    /// Serialized bytes pulled from the underlying sources.
    pub bytes_input: u64,
    /// Serialized bytes of the cells made visible.
    pub bytes_output: u64,
    /// Cells pulled from the underlying sources.
    pub cells_input: u64,
    /// Cells made visible, synthetic counter cells included.
    pub cells_output: u64,
    /// Bytes read from disk by this scanner and, transitively, its sources.
    pub disk_read: u64,
}

/// Mutation and cache statistics of one range.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RangeStats {
    /// Inserts applied since construction or the last transfer-log replay.
    pub added_inserts: u64,
    /// Row deletes applied.
    pub added_row_deletes: u64,
    /// Column family deletes applied.
    pub added_column_family_deletes: u64,
    /// Cell deletes applied.
    pub added_cell_deletes: u64,
    /// Cell version deletes applied.
    pub added_cell_version_deletes: u64,
    /// Key collisions reported by the access group caches.
    pub collisions: u64,
    /// Cells held by the access group caches.
    pub cached: u64,
    /// On-disk footprint of all access groups.
    pub disk_usage: u64,
}

impl RangeStats {
    /// Every record applied, inserts and deletes.
    pub fn added_total(&self) -> u64 {
        self.added_inserts
            + self.added_row_deletes
            + self.added_column_family_deletes
            + self.added_cell_deletes
            + self.added_cell_version_deletes
    }
}

#[cfg(test)]
mod tests {
    use super::RangeStats;

    #[test]
    fn total_sums_every_kind() {
        let stats = RangeStats {
            added_inserts: 5,
            added_row_deletes: 1,
            added_column_family_deletes: 2,
            added_cell_deletes: 3,
            added_cell_version_deletes: 4,
            ..Default::default()
        };
        assert_eq!(stats.added_total(), 15);
    }
}
