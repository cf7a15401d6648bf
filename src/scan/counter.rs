//! Counter column families: contiguous inserts of one cell are summed.

use bytes::Bytes;

use crate::{
    key::Key,
    logging::range_log,
    scan::Cell,
};

/// Encode a counter sum as the 8-byte big-endian value emitted by scans.
pub fn encode_counter_value(sum: i64) -> Bytes {
    Bytes::copy_from_slice(&sum.to_be_bytes())
}

/// Decode a counter increment.
///
/// Eight-byte values are binary sums produced by earlier scans or
/// compactions; anything else is read as an ASCII decimal integer.
pub fn decode_counter_value(value: &[u8]) -> Option<i64> {
    if let Ok(raw) = <[u8; 8]>::try_from(value) {
        return Some(i64::from_be_bytes(raw));
    }
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}

/// Sum accumulated for the cell currently being counted.
#[derive(Debug)]
pub(crate) struct CounterState {
    key: Key,
    sum: i64,
}

impl CounterState {
    pub(crate) fn start(key: Key, value: &[u8]) -> Self {
        let mut state = Self { key, sum: 0 };
        state.increment(value);
        state
    }

    pub(crate) fn key(&self) -> &Key {
        &self.key
    }

    pub(crate) fn increment(&mut self, value: &[u8]) {
        match decode_counter_value(value) {
            Some(delta) => self.sum = self.sum.wrapping_add(delta),
            None => range_log!(
                log::Level::Warn,
                "counter_value_malformed",
                "row={} cf={} len={}",
                String::from_utf8_lossy(&self.key.row),
                self.key.column_family_code,
                value.len()
            ),
        }
    }

    pub(crate) fn finish(self) -> Cell {
        Cell::new(self.key, encode_counter_value(self.sum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_binary_and_ascii_increments() {
        assert_eq!(decode_counter_value(&7i64.to_be_bytes()), Some(7));
        assert_eq!(decode_counter_value(&(-3i64).to_be_bytes()), Some(-3));
        assert_eq!(decode_counter_value(b"42"), Some(42));
        assert_eq!(decode_counter_value(b"-5"), Some(-5));
        assert_eq!(decode_counter_value(b" 9 "), Some(9));
        assert_eq!(decode_counter_value(b"abc"), None);
    }

    #[test]
    fn malformed_increment_is_ignored() {
        let mut state = CounterState::start(Key::insert("r", 1, "hits", 3), b"2");
        state.increment(b"oops");
        state.increment(&5i64.to_be_bytes());
        let cell = state.finish();
        assert_eq!(cell.value.as_ref(), &7i64.to_be_bytes());
        assert_eq!(cell.key.timestamp, 3);
    }
}
