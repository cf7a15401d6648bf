//! Commit log contract used for split (transfer) logs, and the block codec
//! replayed from them.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::id::TableIdentifier;

/// Failure reported by the commit log backend or while decoding a block.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("commit log `{dir}`: {message}")]
    Backend { dir: String, message: String },
    #[error("malformed log block: {0}")]
    MalformedBlock(&'static str),
}

impl LogError {
    pub fn backend(dir: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            dir: dir.into(),
            message: message.into(),
        }
    }
}

/// Header stored with every block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Table whose updates the block carries.
    pub table: TableIdentifier,
}

/// Append-only log of update blocks.
pub trait CommitLog: Send + Sync {
    fn dir(&self) -> &str;

    fn write(&self, header: BlockHeader, block: Bytes) -> Result<(), LogError>;

    /// Seal the log; `timestamp` is recorded as its final timestamp.
    fn close(&self, timestamp: u64) -> Result<(), LogError>;
}

/// Sequential reader over the blocks of a log directory.
pub trait CommitLogReader: Send {
    fn next_block(&mut self) -> Result<Option<(Bytes, BlockHeader)>, LogError>;
}

/// Filesystem holding log directories.
pub trait LogStore: Send + Sync {
    fn mkdirs(&self, dir: &str) -> Result<(), LogError>;

    fn create_log(&self, dir: &str) -> Result<Arc<dyn CommitLog>, LogError>;

    fn open_reader(&self, dir: &str) -> Result<Box<dyn CommitLogReader>, LogError>;
}

/// Encode `(key, value)` records as one block: each component is a
/// little-endian `u32` length followed by its bytes.
pub fn encode_block<'a, I>(records: I) -> Bytes
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let mut buf = BytesMut::new();
    for (key, value) in records {
        buf.put_u32_le(key.len() as u32);
        buf.put_slice(key);
        buf.put_u32_le(value.len() as u32);
        buf.put_slice(value);
    }
    buf.freeze()
}

/// Decode a block produced by [`encode_block`]. Records share the block's
/// buffer.
pub fn decode_block(block: &Bytes) -> Result<Vec<(Bytes, Bytes)>, LogError> {
    let mut buf = block.clone();
    let mut records = Vec::new();
    while buf.has_remaining() {
        let key = take_component(&mut buf, "key")?;
        let value = take_component(&mut buf, "value")?;
        records.push((key, value));
    }
    Ok(records)
}

fn take_component(buf: &mut Bytes, what: &'static str) -> Result<Bytes, LogError> {
    if buf.remaining() < 4 {
        return Err(LogError::MalformedBlock(what));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(LogError::MalformedBlock(what));
    }
    Ok(buf.split_to(len))
}

/// Directory receiving the updates of the half split off at `split_row`.
///
/// The last `primary` component of `log_dir` is replaced with the first
/// `hash_len` hex digits of the split row's SHA-256 digest. Returns `None`
/// when `log_dir` has no `primary` component.
pub fn transfer_log_dir(log_dir: &str, split_row: &[u8], hash_len: usize) -> Option<String> {
    let pos = log_dir.rfind("primary")?;
    let mut hasher = Sha256::new();
    hasher.update(split_row);
    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(hash_len);
    Some(format!("{}{}", &log_dir[..pos], digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_records_share_buffer() {
        let block = encode_block([(&b"k1"[..], &b"v1"[..]), (&b"key2"[..], &b""[..])]);
        assert_eq!(block.len(), 4 + 2 + 4 + 2 + 4 + 4 + 4);
        let records = decode_block(&block).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (Bytes::from_static(b"k1"), Bytes::from_static(b"v1")));
        assert_eq!(records[1].0, "key2");
        assert!(records[1].1.is_empty());
    }

    #[test]
    fn truncated_block_is_rejected() {
        let block = encode_block([(&b"key"[..], &b"value"[..])]);
        let cut = block.slice(..block.len() - 1);
        assert_eq!(decode_block(&cut), Err(LogError::MalformedBlock("value")));
        assert_eq!(
            decode_block(&Bytes::from_static(&[1, 0])),
            Err(LogError::MalformedBlock("key"))
        );
    }

    #[test]
    fn transfer_dir_replaces_primary_component() {
        let dir = transfer_log_dir("/hypertable/servers/rs1/log/primary", b"m", 24).unwrap();
        let (parent, digest) = dir.rsplit_once('/').unwrap();
        assert_eq!(parent, "/hypertable/servers/rs1/log");
        assert_eq!(digest.len(), 24);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));

        let again = transfer_log_dir("/hypertable/servers/rs1/log/primary", b"m", 24).unwrap();
        assert_eq!(dir, again);
        let other = transfer_log_dir("/hypertable/servers/rs1/log/primary", b"n", 24).unwrap();
        assert_ne!(dir, other);

        assert!(transfer_log_dir("/hypertable/log", b"m", 24).is_none());
    }
}
