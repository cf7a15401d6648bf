/// Default ceiling of a range's on-disk size.
pub const DEFAULT_RANGE_MAX_BYTES: u64 = 200 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeOptions {
    pub(crate) range_max_bytes: u64,
    pub(crate) log_dir: String,
    pub(crate) transfer_log_hash_len: usize,
}

impl Default for RangeOptions {
    fn default() -> Self {
        RangeOptions {
            range_max_bytes: DEFAULT_RANGE_MAX_BYTES,
            log_dir: "/hypertable/servers/localhost/log/primary".to_string(),
            transfer_log_hash_len: 24,
        }
    }
}

impl RangeOptions {
    pub fn range_max_bytes(self, range_max_bytes: u64) -> Self {
        RangeOptions {
            range_max_bytes,
            ..self
        }
    }

    /// Primary commit log directory. Transfer logs are created next to its
    /// last `primary` component.
    pub fn log_dir(self, log_dir: impl Into<String>) -> Self {
        RangeOptions {
            log_dir: log_dir.into(),
            ..self
        }
    }

    pub fn transfer_log_hash_len(self, transfer_log_hash_len: usize) -> Self {
        RangeOptions {
            transfer_log_hash_len,
            ..self
        }
    }
}

impl RangeOptions {
    /// Effective soft disk limit: 0 or anything above the ceiling means the
    /// ceiling.
    pub(crate) fn clamp_disk_limit(&self, soft_limit: u64) -> u64 {
        if soft_limit == 0 || soft_limit > self.range_max_bytes {
            self.range_max_bytes
        } else {
            soft_limit
        }
    }

    /// Limit after a split: doubled, capped at the ceiling.
    pub(crate) fn grow_disk_limit(&self, limit: u64) -> u64 {
        if limit < self.range_max_bytes {
            limit.saturating_mul(2).min(self.range_max_bytes)
        } else {
            limit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_limit_policy() {
        let options = RangeOptions::default().range_max_bytes(1_000);
        assert_eq!(options.clamp_disk_limit(0), 1_000);
        assert_eq!(options.clamp_disk_limit(5_000), 1_000);
        assert_eq!(options.clamp_disk_limit(300), 300);

        assert_eq!(options.grow_disk_limit(300), 600);
        assert_eq!(options.grow_disk_limit(600), 1_000);
        assert_eq!(options.grow_disk_limit(1_000), 1_000);
    }
}
