use bytes::Bytes;

use super::{Range, RangeError};
use crate::{commit_log::decode_block, logging::range_log};

/// Outcome of [`Range::replay_transfer_log`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ReplaySummary {
    pub blocks: usize,
    /// Records applied through the update path.
    pub updates: usize,
    /// Records the update path refused.
    pub rejected: usize,
    /// Total size of the replayed blocks.
    pub bytes: u64,
}

impl Range {
    /// Apply the updates of a transfer log written by the range this one was
    /// split from.
    ///
    /// A block of another table aborts the replay with
    /// [`RangeError::CorruptCommitLog`]. Replayed updates are charged to the
    /// memory tracker but not to the range's add counters.
    pub fn replay_transfer_log(
        &self,
        log_dir: &str,
        real_timestamp: u64,
    ) -> Result<ReplaySummary, RangeError> {
        self.ensure_available()?;
        let expected = self.identifier().name;
        let mut reader = self.ctx.log_store.open_reader(log_dir)?;
        let mut summary = ReplaySummary::default();

        while let Some((block, header)) = reader.next_block()? {
            if header.table.name != expected {
                range_log!(
                    log::Level::Error,
                    ctx: self.log_ctx(),
                    "replay_table_mismatch",
                    "log_dir={} found={}",
                    log_dir,
                    header.table.name
                );
                return Err(RangeError::CorruptCommitLog {
                    expected,
                    found: header.table.name,
                });
            }
            summary.bytes += block.len() as u64;
            for (key, value) in decode_block(&block)? {
                self.replay_record(&key, &value, real_timestamp, log_dir, &mut summary);
            }
            summary.blocks += 1;
        }

        range_log!(
            log::Level::Info,
            ctx: self.log_ctx(),
            "transfer_log_replayed",
            "log_dir={} updates={} blocks={} rejected={} bytes={}",
            log_dir,
            summary.updates,
            summary.blocks,
            summary.rejected,
            summary.bytes
        );

        self.ctx.memory.add_memory(summary.bytes);
        self.ctx.memory.add_items(summary.updates as u64);
        self.counters.reset();
        Ok(summary)
    }

    fn replay_record(
        &self,
        key: &Bytes,
        value: &Bytes,
        real_timestamp: u64,
        log_dir: &str,
        summary: &mut ReplaySummary,
    ) {
        match self.add(key, value, real_timestamp) {
            Ok(()) => summary.updates += 1,
            Err(err) => {
                summary.rejected += 1;
                range_log!(
                    log::Level::Warn,
                    ctx: self.log_ctx(),
                    "replay_record_rejected",
                    "log_dir={} error={} action=skip",
                    log_dir,
                    err
                );
            }
        }
    }
}
