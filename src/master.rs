//! Notifications sent to the master.

use thiserror::Error;

use crate::id::{RangeSpec, TableIdentifier};

/// Failure reported by the master client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("master: {0}")]
pub struct MasterError(pub String);

pub trait MasterClient: Send + Sync {
    /// Announce the range split off `table`, whose pending updates are in
    /// `transfer_log_dir`.
    fn report_split(
        &self,
        table: &TableIdentifier,
        range: &RangeSpec,
        transfer_log_dir: &str,
        soft_limit: u64,
    ) -> Result<(), MasterError>;
}
