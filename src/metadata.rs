//! Persisted range metadata: where stores are listed and how a split
//! publishes the new boundaries.

use bytes::Bytes;
use thiserror::Error;

use crate::{id::TableIdentifier, schema::Schema};

/// Column family holding a range's start row.
pub const START_ROW_COLUMN: &str = "StartRow";
/// Column family holding per access group file lists.
pub const FILES_COLUMN: &str = "Files";

/// Failure reported by the metadata table client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("metadata: {0}")]
pub struct MetadataError(pub String);

/// `(access group name, ;-separated store paths)` pairs of one range.
pub type MetadataSource = Box<dyn Iterator<Item = (String, String)> + Send>;

/// Client of the metadata table.
pub trait MetadataStore: Send + Sync {
    /// Store lists of the root range, kept outside the metadata table.
    fn root_files(&self, schema: &Schema) -> Result<MetadataSource, MetadataError>;

    /// Store lists of a normal range, keyed by table and end row.
    fn table_files(
        &self,
        table: &TableIdentifier,
        end_row: &[u8],
    ) -> Result<MetadataSource, MetadataError>;

    fn create_mutator(&self) -> Box<dyn MetadataMutator>;
}

/// Buffered writes to the metadata table, applied together by `flush`.
pub trait MetadataMutator: Send {
    fn set(
        &mut self,
        row: Bytes,
        column_family: &str,
        qualifier: &[u8],
        value: Bytes,
    ) -> Result<(), MetadataError>;

    fn flush(&mut self) -> Result<(), MetadataError>;
}
