//! MVCC timestamps of a range and the controller of in-flight updates.

use std::{
    collections::{btree_map::Entry, BTreeMap},
    fmt,
};

use parking_lot::Mutex;

/// Pair of timestamps attached to every applied update and compaction point.
///
/// `logical` orders cell versions; `real` is the wall-clock time the update
/// was applied and drives cache aging.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RangeTimestamp {
    pub logical: i64,
    pub real: u64,
}

impl RangeTimestamp {
    #[inline]
    pub const fn new(logical: i64, real: u64) -> Self {
        Self { logical, real }
    }
}

impl fmt::Debug for RangeTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RangeTimestamp({}, {})", self.logical, self.real)
    }
}

/// Tracks timestamps of updates that are applied but not yet committed.
///
/// Compactions must not fold in updates that are not committed yet, so the
/// compaction point is clamped down to the oldest registered update. Each
/// timestamp is reference counted since concurrent updates may share one.
#[derive(Debug, Default)]
pub struct ScannerTimestampController {
    in_flight: Mutex<BTreeMap<RangeTimestamp, usize>>,
}

impl ScannerTimestampController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_update_timestamp(&self, ts: RangeTimestamp) {
        *self.in_flight.lock().entry(ts).or_insert(0) += 1;
    }

    /// Release one registration of `ts`. Returns `false` when `ts` was not
    /// registered.
    pub fn remove_update_timestamp(&self, ts: RangeTimestamp) -> bool {
        match self.in_flight.lock().entry(ts) {
            Entry::Vacant(_) => false,
            Entry::Occupied(mut o) => {
                if *o.get() > 1 {
                    *o.get_mut() -= 1;
                } else {
                    o.remove();
                }
                true
            }
        }
    }

    /// Oldest timestamp still in flight.
    pub fn oldest_update_timestamp(&self) -> Option<RangeTimestamp> {
        self.in_flight.lock().keys().next().copied()
    }

    /// Clamp a compaction point down to the oldest in-flight update.
    pub fn clamp(&self, ts: RangeTimestamp) -> RangeTimestamp {
        match self.oldest_update_timestamp() {
            Some(oldest) if oldest < ts => oldest,
            _ => ts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_order_by_logical_first() {
        let a = RangeTimestamp::new(1, 900);
        let b = RangeTimestamp::new(2, 100);
        assert!(a < b);
        assert!(RangeTimestamp::new(2, 0) < b);
        assert_eq!(a.max(b), b);
    }

    #[test]
    fn oldest_tracks_reference_counts() {
        let controller = ScannerTimestampController::new();
        let t5 = RangeTimestamp::new(5, 0);
        let t9 = RangeTimestamp::new(9, 0);
        controller.add_update_timestamp(t9);
        controller.add_update_timestamp(t5);
        controller.add_update_timestamp(t5);
        assert_eq!(controller.oldest_update_timestamp(), Some(t5));

        assert!(controller.remove_update_timestamp(t5));
        assert_eq!(controller.oldest_update_timestamp(), Some(t5));
        assert!(controller.remove_update_timestamp(t5));
        assert_eq!(controller.oldest_update_timestamp(), Some(t9));
        assert!(!controller.remove_update_timestamp(t5));

        assert!(controller.remove_update_timestamp(t9));
        assert!(controller.is_empty());
    }

    #[test]
    fn clamp_never_passes_in_flight_updates() {
        let controller = ScannerTimestampController::new();
        let point = RangeTimestamp::new(100, 7);
        assert_eq!(controller.clamp(point), point);

        controller.add_update_timestamp(RangeTimestamp::new(40, 3));
        assert_eq!(controller.clamp(point), RangeTimestamp::new(40, 3));
        assert_eq!(
            controller.clamp(RangeTimestamp::new(10, 0)),
            RangeTimestamp::new(10, 0)
        );
    }
}
