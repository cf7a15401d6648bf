//! Serialized key layout.
//!
//! `row 0x00 | family (u16 BE) | qualifier 0x00 | flag | timestamp | revision`
//!
//! Timestamp and revision are stored sign-flipped and inverted so that a byte
//! comparison of two keys of the same cell orders newer versions first.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Key, KeyFlag};

/// End row of the root metadata range.
pub const END_ROOT_ROW: &[u8] = b"0:\xff\xff";

const FIXED_TAIL: usize = 1 + 8 + 8;

/// Errors raised while parsing a serialized key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The buffer ended before a required component.
    #[error("truncated key: {0}")]
    Truncated(&'static str),
    /// A row or qualifier terminator was not found.
    #[error("missing {0} terminator")]
    MissingTerminator(&'static str),
    /// The flag byte does not name a known record kind.
    #[error("unknown key flag 0x{0:02x}")]
    UnknownFlag(u8),
}

#[inline]
fn encode_desc(value: i64) -> u64 {
    !((value as u64) ^ (1 << 63))
}

#[inline]
fn decode_desc(raw: u64) -> i64 {
    ((!raw) ^ (1 << 63)) as i64
}

impl Key {
    /// Serialize the key.
    pub fn encode(&self) -> Bytes {
        debug_assert!(!self.row.contains(&0), "row must not contain 0x00");
        debug_assert!(
            !self.column_qualifier.contains(&0),
            "qualifier must not contain 0x00"
        );
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.row);
        buf.put_u8(0);
        buf.put_u16(self.column_family_code);
        buf.put_slice(&self.column_qualifier);
        buf.put_u8(0);
        buf.put_u8(self.flag as u8);
        buf.put_u64(encode_desc(self.timestamp));
        buf.put_u64(encode_desc(self.revision));
        buf.freeze()
    }

    /// Parse a serialized key. Row and qualifier are zero-copy slices of `buf`.
    pub fn decode(buf: &Bytes) -> Result<Self, KeyError> {
        let row_end = buf
            .iter()
            .position(|b| *b == 0)
            .ok_or(KeyError::MissingTerminator("row"))?;
        let mut offset = row_end + 1;
        if buf.len() < offset + 2 {
            return Err(KeyError::Truncated("column family"));
        }
        let column_family_code = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
        offset += 2;

        let qualifier_len = buf[offset..]
            .iter()
            .position(|b| *b == 0)
            .ok_or(KeyError::MissingTerminator("qualifier"))?;
        let qualifier_start = offset;
        offset += qualifier_len + 1;

        if buf.len() != offset + FIXED_TAIL {
            return Err(KeyError::Truncated("flag/timestamp/revision"));
        }
        let flag = KeyFlag::from_u8(buf[offset]).ok_or(KeyError::UnknownFlag(buf[offset]))?;
        offset += 1;
        let timestamp = decode_desc(read_u64(&buf[offset..offset + 8]));
        offset += 8;
        let revision = decode_desc(read_u64(&buf[offset..offset + 8]));

        Ok(Key {
            row: buf.slice(..row_end),
            column_family_code,
            column_qualifier: buf.slice(qualifier_start..qualifier_start + qualifier_len),
            timestamp,
            revision,
            flag,
        })
    }
}

fn read_u64(slice: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(slice);
    u64::from_be_bytes(raw)
}
