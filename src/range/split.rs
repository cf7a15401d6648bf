use std::sync::atomic::Ordering;

use bytes::Bytes;

use super::{FatalKind, Range, RangeError};
use crate::{
    commit_log::transfer_log_dir,
    id::RangeSpec,
    logging::range_log,
    metadata::{MetadataError, MetadataMutator, FILES_COLUMN, START_ROW_COLUMN},
};

fn median(mut rows: Vec<Bytes>) -> Option<Bytes> {
    if rows.is_empty() {
        return None;
    }
    rows.sort();
    let mid = rows.len() / 2;
    Some(rows.swap_remove(mid))
}

impl Range {
    /// Pick the row the range splits at and remember it as the pending
    /// split row.
    ///
    /// Candidates come from every access group, cheaply first and the
    /// expensive way when some group had nothing to offer. When their median
    /// is not strictly inside the range, the median of all cached rows is
    /// tried instead. No usable row leaves the range unavailable.
    pub fn get_split_row(&self) -> Result<Bytes, RangeError> {
        let mut candidates = Vec::new();
        for ag in &self.access_groups {
            ag.get_split_rows(&mut candidates, false);
        }
        if candidates.len() < self.access_groups.len() {
            for ag in &self.access_groups {
                ag.get_split_rows(&mut candidates, true);
            }
        }

        let span = self.span();
        let row = match median(candidates).filter(|row| span.splits_at(row)) {
            Some(row) => Some(row),
            None => {
                let mut cached = Vec::new();
                for ag in &self.access_groups {
                    ag.get_cached_rows(&mut cached);
                }
                median(cached).filter(|row| span.splits_at(row))
            }
        };

        let Some(row) = row else {
            return Err(self.fail(
                FatalKind::NoSplitRow,
                format!("unable to determine split row for range {}", span),
            ));
        };
        self.state.lock().split_row = Some(row.clone());
        Ok(row)
    }

    /// Split the range in place. The lower half `(start_row, split_row]`
    /// is handed off through the metadata table and the master; this range
    /// keeps `(split_row, end_row]`.
    ///
    /// The caller must hold the maintenance gate
    /// ([`Range::begin_maintenance`]); it is released when the split
    /// returns, whatever the outcome.
    pub fn do_split(&self) -> Result<(), RangeError> {
        if !self.maintenance_in_progress() {
            return Err(RangeError::MaintenanceNotInProgress);
        }
        let result = self.split();
        self.maintenance_in_progress.store(false, Ordering::Release);
        result
    }

    fn split(&self) -> Result<(), RangeError> {
        if self.is_root {
            return Err(RangeError::RootSplit);
        }
        self.ensure_available()?;

        let log_ctx = self.log_ctx();
        range_log!(log::Level::Info, ctx: log_ctx, "split_start", "disk_usage={}", self.disk_usage());

        let split_row = self.get_split_row()?;
        range_log!(
            log::Level::Info,
            ctx: log_ctx,
            "split_row_chosen",
            "split_row={}",
            String::from_utf8_lossy(&split_row)
        );

        let log_dir = &self.ctx.options.log_dir;
        let Some(transfer_dir) =
            transfer_log_dir(log_dir, &split_row, self.ctx.options.transfer_log_hash_len)
        else {
            return Err(self.fail(
                FatalKind::TransferLogDir,
                format!("log directory `{}` has no primary component", log_dir),
            ));
        };
        if let Err(err) = self.ctx.log_store.mkdirs(&transfer_dir) {
            return Err(self.fail(FatalKind::TransferLogDir, err.to_string()));
        }

        // Install the split log. Updates arriving from now on are mirrored
        // into it until the shrink below.
        let (watermark, old_start_row) = {
            let _hold = self.barrier.quiesce();
            let split_log = match self.ctx.log_store.create_log(&transfer_dir) {
                Ok(log) => log,
                Err(err) => return Err(self.fail(FatalKind::TransferLogDir, err.to_string())),
            };
            let oldest = self.timestamp_controller.oldest_update_timestamp();
            let mut state = self.state.lock();
            let watermark = match oldest {
                Some(ts) if ts.logical != 0 => ts,
                _ => state.timestamp,
            };
            state.split_log = Some(split_log);
            (watermark, state.start_row.clone())
        };

        for ag in &self.access_groups {
            ag.run_compaction(watermark, true);
        }

        self.publish_split(&old_start_row, &split_row)?;

        // Shrink and retire the split log.
        {
            let _hold = self.barrier.quiesce();
            let (split_log, close_timestamp) = {
                let mut state = self.state.lock();
                state.start_row = split_row.clone();
                state.split_row = None;
                for ag in &self.access_groups {
                    ag.shrink(&split_row);
                }
                (state.split_log.take(), state.timestamp)
            };
            if let Some(split_log) = split_log {
                if let Err(err) = split_log.close(close_timestamp.real) {
                    return Err(self.fail(
                        FatalKind::SplitLogClose,
                        format!("split log `{}`: {}", split_log.dir(), err),
                    ));
                }
            }
        }

        self.report_split(old_start_row, split_row, &transfer_dir);
        range_log!(
            log::Level::Info,
            ctx: self.log_ctx(),
            "split_complete",
            "transfer_log_dir={} disk_limit={}",
            transfer_dir,
            self.disk_limit()
        );
        Ok(())
    }

    /// Shrink the persisted boundary of this range and create the row of the
    /// split-off range, both in one flush.
    fn publish_split(&self, old_start_row: &Bytes, split_row: &Bytes) -> Result<(), RangeError> {
        let mut mutator = self.ctx.metadata.create_mutator();
        self.write_split_rows(mutator.as_mut(), old_start_row, split_row)
            .map_err(|err| {
                self.fail(
                    FatalKind::MetadataUpdate,
                    format!(
                        "new={} existing={}: {}",
                        String::from_utf8_lossy(split_row),
                        String::from_utf8_lossy(&self.end_row),
                        err
                    ),
                )
            })
    }

    fn write_split_rows(
        &self,
        mutator: &mut dyn MetadataMutator,
        old_start_row: &Bytes,
        split_row: &Bytes,
    ) -> Result<(), MetadataError> {
        let identifier = self.identifier();
        mutator.set(
            identifier.metadata_row(&self.end_row),
            START_ROW_COLUMN,
            b"",
            split_row.clone(),
        )?;

        let new_row = identifier.metadata_row(split_row);
        mutator.set(new_row.clone(), START_ROW_COLUMN, b"", old_start_row.clone())?;
        for ag in &self.access_groups {
            mutator.set(
                new_row.clone(),
                FILES_COLUMN,
                ag.name().as_bytes(),
                Bytes::from(ag.get_files()),
            )?;
        }
        mutator.flush()
    }

    fn report_split(&self, old_start_row: Bytes, split_row: Bytes, transfer_dir: &str) {
        let identifier = {
            let mut state = self.state.lock();
            state.identifier.generation = self.schema.generation();
            state.identifier.clone()
        };
        let limit = self
            .ctx
            .options
            .grow_disk_limit(self.disk_limit.load(Ordering::Relaxed));
        self.disk_limit.store(limit, Ordering::Relaxed);

        let range = RangeSpec::new(old_start_row, split_row);
        if let Err(err) = self
            .ctx
            .master
            .report_split(&identifier, &range, transfer_dir, limit)
        {
            range_log!(
                log::Level::Error,
                ctx: self.log_ctx(),
                "split_report_failed",
                "split_off={} error={} action=continue",
                range,
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::median;

    #[test]
    fn median_takes_upper_middle() {
        assert_eq!(median(Vec::new()), None);
        let rows = [b"d", b"a", b"c", b"b"].map(|row| bytes::Bytes::from_static(row)).to_vec();
        assert_eq!(median(rows).unwrap(), "c");
        let rows = [b"b", b"a", b"c"].map(|row| bytes::Bytes::from_static(row)).to_vec();
        assert_eq!(median(rows).unwrap(), "b");
    }
}
