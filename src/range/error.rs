use std::fmt;

use crate::{
    access_group::AccessGroupError, commit_log::LogError, key::KeyError, metadata::MetadataError,
};

/// Error returned by range operations.
#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    /// The serialized key could not be parsed.
    #[error("malformed key: {0}")]
    MalformedKey(#[from] KeyError),
    /// The key names a column family the schema does not declare.
    #[error("invalid column family code {0}")]
    InvalidColumnFamily(u16),
    /// The owning access group rejected the update.
    #[error("access group error: {0}")]
    AccessGroup(#[from] AccessGroupError),
    /// A replayed block belongs to another table.
    #[error("corrupt commit log: expected table `{expected}`, found `{found}`")]
    CorruptCommitLog { expected: String, found: String },
    #[error("commit log error: {0}")]
    Log(#[from] LogError),
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
    /// A split or compaction was requested without the maintenance gate.
    #[error("no maintenance operation in progress")]
    MaintenanceNotInProgress,
    #[error("the root range is never split")]
    RootSplit,
    /// An earlier fatal error took the range out of service.
    #[error("range is unavailable")]
    Unavailable,
    #[error("fatal: {0}")]
    Fatal(#[from] FatalError),
}

/// Broken invariant that takes the owning range out of service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct FatalError {
    pub kind: FatalKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// No row strictly inside the range could be found.
    NoSplitRow,
    /// The transfer log directory could not be derived or created.
    TransferLogDir,
    /// The split log could not be sealed.
    SplitLogClose,
    /// The metadata table could not record the split.
    MetadataUpdate,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FatalKind::NoSplitRow => "no split row",
            FatalKind::TransferLogDir => "transfer log directory",
            FatalKind::SplitLogClose => "split log close",
            FatalKind::MetadataUpdate => "metadata update",
        };
        f.write_str(name)
    }
}
