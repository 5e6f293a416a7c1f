//! The archive-byte storage cursor and the `StorageSink` collaborator
//! boundary (§3, §6). At most one cursor is open per `ServerIO`;
//! `backends::memory` supplies a reference sink.

use async_trait::async_trait;

use crate::error::{Error, ErrorKind, Result};

/// The out-of-scope (per §1) byte-level archive writer a worker's
/// storage cursor writes through. `backends::memory::MemoryStorageSink`
/// is a reference implementation; real deployments back this with
/// local disk, SFTP, SCP, FTP, WebDAV, or S3.
#[async_trait]
pub trait StorageSink: Send + Sync {
    async fn create(&self, name: &str, size: u64) -> Result<()>;
    async fn write_at(&self, name: &str, offset: u64, bytes: &[u8]) -> Result<()>;
    async fn close(&self, name: &str) -> Result<()>;
    async fn size_of(&self, name: &str) -> Result<u64>;
}

/// Per-connection, at-most-one-open write cursor over an archive
/// (§3). Tracks the declared size so writes outside `[0, size]` are
/// rejected before ever reaching the sink.
#[derive(Debug, Clone)]
pub struct StorageCursor {
    pub archive_name: String,
    pub declared_size: u64,
    pub offset: u64,
    closed: bool,
}

impl StorageCursor {
    pub fn open(archive_name: String, declared_size: u64) -> Self {
        Self {
            archive_name,
            declared_size,
            offset: 0,
            closed: false,
        }
    }

    /// Validates a pending `STORAGE_WRITE(offset, length)` against the
    /// declared size without touching the sink. The write also acts as
    /// a seek: subsequent calls continue from `offset + length`.
    pub fn validate_write(&self, offset: u64, length: u64) -> Result<()> {
        if self.closed {
            return Err(Error::protocol(
                ErrorKind::InvalidStorage,
                "storage cursor already closed",
            ));
        }
        let end = offset
            .checked_add(length)
            .ok_or_else(|| Error::protocol(ErrorKind::InvalidStorage, "offset+length overflow"))?;
        if end > self.declared_size {
            return Err(Error::protocol(
                ErrorKind::InvalidStorage,
                format!(
                    "write [{offset}, {end}) exceeds declared size {}",
                    self.declared_size
                ),
            ));
        }
        Ok(())
    }

    pub fn advance(&mut self, offset: u64, length: u64) {
        self.offset = offset + length;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_writes_within_declared_size() {
        let cursor = StorageCursor::open("a.tar".into(), 10);
        assert!(cursor.validate_write(0, 10).is_ok());
        assert!(cursor.validate_write(8, 2).is_ok());
    }

    #[test]
    fn rejects_writes_beyond_declared_size() {
        let cursor = StorageCursor::open("a.tar".into(), 10);
        let err = cursor.validate_write(8, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStorage);
    }

    #[test]
    fn close_is_idempotent_via_is_closed_check() {
        let mut cursor = StorageCursor::open("a.tar".into(), 10);
        assert!(!cursor.is_closed());
        cursor.close();
        cursor.close();
        assert!(cursor.is_closed());
    }

    #[test]
    fn write_after_close_is_rejected() {
        let mut cursor = StorageCursor::open("a.tar".into(), 10);
        cursor.close();
        let err = cursor.validate_write(0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStorage);
    }
}
