//! Storage-serving core of a range server.
//!
//! A table is partitioned into ranges. Each [`Range`] owns the access groups
//! of its partition, admits updates against maintenance (compaction and
//! split), and answers scans with a [`MergeScanner`] presenting one ordered,
//! tombstone-resolved view over every cache and cell store.
//!
//! Collaborators outside this crate (commit logs, the metadata table, the
//! master, cell store files) are reached through the traits in
//! [`commit_log`], [`metadata`], [`master`] and [`cellstore`], bundled in a
//! [`RangeServerContext`].

mod logging;

/// Access groups and the factory building them.
pub mod access_group;
/// Concurrent in-memory cell cache.
pub mod cache;
/// Immutable sorted cell stores.
pub mod cellstore;
/// Commit log contract and transfer-log block codec.
pub mod commit_log;
mod context;
/// Table and range identity.
pub mod id;
/// Cell keys and their serialized form.
pub mod key;
pub mod master;
/// Process-wide memory accounting.
pub mod memory;
pub mod metadata;
/// Scan and range counters.
pub mod metrics;
/// Timestamps and in-flight update tracking.
pub mod mvcc;
mod option;
/// Range lifecycle: updates, scans, compaction, split and replay.
pub mod range;
/// Scan requests and the merge scanner.
pub mod scan;
/// Table schema.
pub mod schema;

#[cfg(test)]
mod test_util;
mod tests_internal;

pub use crate::{
    context::RangeServerContext,
    option::{RangeOptions, DEFAULT_RANGE_MAX_BYTES},
    range::{FatalError, FatalKind, Range, RangeError, ReplaySummary},
    scan::{MergeScanner, ScanContext, ScanState},
};
