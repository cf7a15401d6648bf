//! Per-scan configuration and the merge-scan engine.

mod counter;
mod merge;
mod regexp_cache;
mod source;
mod tombstone;

use std::{collections::BTreeSet, fmt};

use bytes::Bytes;
use regex::bytes::Regex;

pub use counter::{decode_counter_value, encode_counter_value};
pub use merge::{MergeScanner, ScanState};
pub use regexp_cache::RegexpFilterCache;
pub use source::{Cell, CellSource, VecSource};

/// Predicate over column qualifiers of one family.
///
/// An empty filter matches every qualifier; otherwise a qualifier matches when
/// it equals one of the exact qualifiers, starts with one of the prefixes, or
/// partially matches one of the patterns.
#[derive(Clone, Default)]
pub struct QualifierFilter {
    exact: BTreeSet<Bytes>,
    prefixes: Vec<Bytes>,
    patterns: Vec<Regex>,
}

impl QualifierFilter {
    /// Filter accepting every qualifier.
    pub const fn any() -> Self {
        Self {
            exact: BTreeSet::new(),
            prefixes: Vec::new(),
            patterns: Vec::new(),
        }
    }

    pub fn exact(mut self, qualifier: impl Into<Bytes>) -> Self {
        self.exact.insert(qualifier.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Whether the filter accepts every qualifier.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty() && self.patterns.is_empty()
    }

    pub fn matches(&self, qualifier: &[u8]) -> bool {
        if self.is_empty() {
            return true;
        }
        self.exact.contains(qualifier)
            || self.prefixes.iter().any(|p| qualifier.starts_with(p))
            || self.patterns.iter().any(|re| re.is_match(qualifier))
    }
}

impl fmt::Debug for QualifierFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QualifierFilter")
            .field("exact", &self.exact.len())
            .field("prefixes", &self.prefixes.len())
            .field(
                "patterns",
                &self.patterns.iter().map(Regex::as_str).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Per column-family scan metadata.
#[derive(Clone, Debug)]
pub struct ColumnFamilyInfo {
    /// Versions older than this timestamp are obsolete.
    pub cutoff_time: i64,
    /// Maximum versions returned per cell; 0 means unlimited.
    pub max_versions: u32,
    /// Inserts are summed into a single value per cell.
    pub counter: bool,
    pub qualifier_filter: QualifierFilter,
}

impl ColumnFamilyInfo {
    pub const fn new() -> Self {
        Self {
            cutoff_time: i64::MIN,
            max_versions: 0,
            counter: false,
            qualifier_filter: QualifierFilter::any(),
        }
    }

    pub fn cutoff_time(self, cutoff_time: i64) -> Self {
        Self {
            cutoff_time,
            ..self
        }
    }

    pub fn max_versions(self, max_versions: u32) -> Self {
        Self {
            max_versions,
            ..self
        }
    }

    pub fn counter(self, counter: bool) -> Self {
        Self { counter, ..self }
    }

    pub fn qualifier_filter(self, qualifier_filter: QualifierFilter) -> Self {
        Self {
            qualifier_filter,
            ..self
        }
    }

    #[inline]
    pub fn qualifier_matches(&self, qualifier: &[u8]) -> bool {
        self.qualifier_filter.matches(qualifier)
    }
}

impl Default for ColumnFamilyInfo {
    fn default() -> Self {
        Self::new()
    }
}

static UNRESTRICTED_FAMILY: ColumnFamilyInfo = ColumnFamilyInfo::new();

/// Immutable configuration shared by every scanner of one scan request.
#[derive(Clone, Debug)]
pub struct ScanContext {
    start_timestamp: i64,
    end_timestamp: i64,
    revision: i64,
    families: Vec<Option<ColumnFamilyInfo>>,
    row_set: Vec<Bytes>,
    row_regexp: Option<Regex>,
    value_regexp: Option<Regex>,
    return_deletes: bool,
    row_limit: u32,
    cell_limit_per_family: u32,
}

impl ScanContext {
    pub fn builder() -> ScanContextBuilder {
        ScanContextBuilder::default()
    }

    /// Inclusive lower bound of the time interval.
    #[inline]
    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    /// Exclusive upper bound of the time interval.
    #[inline]
    pub fn end_timestamp(&self) -> i64 {
        self.end_timestamp
    }

    /// Largest revision visible to the scan.
    #[inline]
    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Metadata of a family. Families without explicit metadata are
    /// unrestricted.
    pub fn family(&self, code: u16) -> &ColumnFamilyInfo {
        self.families
            .get(code as usize)
            .and_then(Option::as_ref)
            .unwrap_or(&UNRESTRICTED_FAMILY)
    }

    /// Whether the scan selects the family. A scan naming no family selects
    /// all of them.
    pub fn selects_family(&self, code: u16) -> bool {
        if self.families.iter().all(Option::is_none) {
            return true;
        }
        matches!(self.families.get(code as usize), Some(Some(_)))
    }

    /// Ascending set of rows the scan is restricted to; empty means all rows.
    pub fn row_set(&self) -> &[Bytes] {
        &self.row_set
    }

    pub fn row_regexp(&self) -> Option<&Regex> {
        self.row_regexp.as_ref()
    }

    pub fn value_regexp(&self) -> Option<&Regex> {
        self.value_regexp.as_ref()
    }

    pub fn return_deletes(&self) -> bool {
        self.return_deletes
    }

    /// Maximum distinct rows returned; 0 means unlimited.
    pub fn row_limit(&self) -> u32 {
        self.row_limit
    }

    /// Maximum cells returned per family within a row; 0 means unlimited.
    pub fn cell_limit_per_family(&self) -> u32 {
        self.cell_limit_per_family
    }
}

/// Builder for [`ScanContext`].
#[derive(Debug)]
pub struct ScanContextBuilder {
    ctx: ScanContext,
}

impl Default for ScanContextBuilder {
    fn default() -> Self {
        Self {
            ctx: ScanContext {
                start_timestamp: i64::MIN,
                end_timestamp: i64::MAX,
                revision: i64::MAX,
                families: Vec::new(),
                row_set: Vec::new(),
                row_regexp: None,
                value_regexp: None,
                return_deletes: false,
                row_limit: 0,
                cell_limit_per_family: 0,
            },
        }
    }
}

impl ScanContextBuilder {
    /// Restrict to timestamps in `[start, end)`.
    pub fn time_interval(mut self, start: i64, end: i64) -> Self {
        self.ctx.start_timestamp = start;
        self.ctx.end_timestamp = end;
        self
    }

    pub fn revision(mut self, revision: i64) -> Self {
        self.ctx.revision = revision;
        self
    }

    /// Select a family and attach its metadata.
    pub fn family(mut self, code: u16, info: ColumnFamilyInfo) -> Self {
        let idx = code as usize;
        if self.ctx.families.len() <= idx {
            self.ctx.families.resize(idx + 1, None);
        }
        self.ctx.families[idx] = Some(info);
        self
    }

    pub fn rows<I, R>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Bytes>,
    {
        self.ctx.row_set.extend(rows.into_iter().map(Into::into));
        self
    }

    pub fn row_regexp(mut self, pattern: Regex) -> Self {
        self.ctx.row_regexp = Some(pattern);
        self
    }

    pub fn value_regexp(mut self, pattern: Regex) -> Self {
        self.ctx.value_regexp = Some(pattern);
        self
    }

    pub fn return_deletes(mut self, return_deletes: bool) -> Self {
        self.ctx.return_deletes = return_deletes;
        self
    }

    pub fn row_limit(mut self, row_limit: u32) -> Self {
        self.ctx.row_limit = row_limit;
        self
    }

    pub fn cell_limit_per_family(mut self, cell_limit_per_family: u32) -> Self {
        self.ctx.cell_limit_per_family = cell_limit_per_family;
        self
    }

    pub fn build(mut self) -> ScanContext {
        self.ctx.row_set.sort();
        self.ctx.row_set.dedup();
        self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifier_filter_alternatives() {
        assert!(QualifierFilter::any().matches(b"anything"));

        let filter = QualifierFilter::any()
            .exact("name")
            .prefix("addr:")
            .pattern(Regex::new("^tag[0-9]+$").unwrap());
        assert!(filter.matches(b"name"));
        assert!(filter.matches(b"addr:home"));
        assert!(filter.matches(b"tag12"));
        assert!(!filter.matches(b"names"));
        assert!(!filter.matches(b"tagx"));
    }

    #[test]
    fn unlisted_families_are_unrestricted() {
        let ctx = ScanContext::builder()
            .family(2, ColumnFamilyInfo::new().max_versions(3))
            .build();
        assert_eq!(ctx.family(2).max_versions, 3);
        assert_eq!(ctx.family(7).max_versions, 0);
        assert!(ctx.selects_family(2));
        assert!(!ctx.selects_family(1));
        assert!(!ctx.selects_family(7));

        let all = ScanContext::builder().build();
        assert!(all.selects_family(7));
    }

    #[test]
    fn row_set_is_sorted_and_deduplicated() {
        let ctx = ScanContext::builder().rows(["c", "a", "c", "b"]).build();
        let rows: Vec<&[u8]> = ctx.row_set().iter().map(|r| r.as_ref()).collect();
        assert_eq!(rows, vec![&b"a"[..], b"b", b"c"]);
    }
}
