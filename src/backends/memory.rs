//! In-process `StorageSink`/`IndexHandle` implementations. Useful for
//! the connector's own tests and as a demo backend for the binaries;
//! not meant to survive a process restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::index::{IndexHandle, IndexRow, IndexState};
use crate::storage::StorageSink;

/// Holds each archive's bytes in a growable `Vec<u8>` keyed by name.
#[derive(Default)]
pub struct MemoryStorageSink {
    archives: Mutex<HashMap<String, Archive>>,
}

struct Archive {
    bytes: Vec<u8>,
    closed: bool,
}

#[async_trait]
impl StorageSink for MemoryStorageSink {
    async fn create(&self, name: &str, size: u64) -> Result<()> {
        let mut archives = self.archives.lock().await;
        archives.insert(
            name.to_string(),
            Archive { bytes: vec![0u8; size as usize], closed: false },
        );
        Ok(())
    }

    async fn write_at(&self, name: &str, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut archives = self.archives.lock().await;
        let archive = archives
            .get_mut(name)
            .ok_or_else(|| Error::protocol(ErrorKind::InvalidStorage, format!("unknown archive '{name}'")))?;
        if archive.closed {
            return Err(Error::protocol(ErrorKind::InvalidStorage, format!("archive '{name}' is closed")));
        }
        let start = offset as usize;
        let end = start + bytes.len();
        if end > archive.bytes.len() {
            archive.bytes.resize(end, 0);
        }
        archive.bytes[start..end].copy_from_slice(bytes);
        Ok(())
    }

    async fn close(&self, name: &str) -> Result<()> {
        let mut archives = self.archives.lock().await;
        let archive = archives
            .get_mut(name)
            .ok_or_else(|| Error::protocol(ErrorKind::InvalidStorage, format!("unknown archive '{name}'")))?;
        archive.closed = true;
        Ok(())
    }

    async fn size_of(&self, name: &str) -> Result<u64> {
        let archives = self.archives.lock().await;
        archives
            .get(name)
            .map(|a| a.bytes.len() as u64)
            .ok_or_else(|| Error::protocol(ErrorKind::InvalidStorage, format!("unknown archive '{name}'")))
    }
}

/// Keeps entities, storages, and catalog rows in a handful of maps
/// rather than real relational tables; good enough to exercise the
/// dispatcher's `INDEX_*` handling end to end.
#[derive(Default)]
pub struct MemoryIndex {
    next_id: AtomicU64,
    schedules: Mutex<HashMap<(String, String), u64>>,
    storages: Mutex<HashMap<u64, StorageRecord>>,
    rows: Mutex<Vec<IndexRow>>,
}

struct StorageRecord {
    name: String,
    size: u64,
    state: IndexState,
}

impl MemoryIndex {
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl IndexHandle for MemoryIndex {
    async fn new_uuid(&self, _job_uuid: &str) -> Result<u64> {
        Ok(self.allocate_id())
    }

    async fn find_uuid(&self, job_uuid: &str, schedule_uuid: &str) -> Result<Option<u64>> {
        let schedules = self.schedules.lock().await;
        Ok(schedules.get(&(job_uuid.to_string(), schedule_uuid.to_string())).copied())
    }

    async fn new_entity(
        &self,
        job_uuid: &str,
        schedule_uuid: &str,
        _archive_type: crate::job::ArchiveType,
        _created_date_time: u64,
        _locked: bool,
    ) -> Result<u64> {
        let id = self.allocate_id();
        let mut schedules = self.schedules.lock().await;
        schedules.insert((job_uuid.to_string(), schedule_uuid.to_string()), id);
        Ok(id)
    }

    async fn new_storage(
        &self,
        _entity_id: u64,
        storage_name: &str,
        _created_date_time: u64,
        size: u64,
        index_state: IndexState,
        _index_mode: crate::index::IndexMode,
    ) -> Result<u64> {
        let id = self.allocate_id();
        let mut storages = self.storages.lock().await;
        storages.insert(id, StorageRecord { name: storage_name.to_string(), size, state: index_state });
        Ok(id)
    }

    async fn add_row(&self, row: IndexRow) -> Result<()> {
        self.rows.lock().await.push(row);
        Ok(())
    }

    async fn set_state(
        &self,
        index_id: u64,
        state: IndexState,
        _last_checked_date_time: u64,
        _error_message: &str,
    ) -> Result<()> {
        let mut storages = self.storages.lock().await;
        let storage = storages
            .get_mut(&index_id)
            .ok_or_else(|| Error::protocol(ErrorKind::InvalidData, format!("unknown index id {index_id}")))?;
        storage.state = state;
        Ok(())
    }

    async fn storage_update(&self, storage_id: u64, storage_name: &str, storage_size: u64) -> Result<()> {
        let mut storages = self.storages.lock().await;
        let storage = storages
            .get_mut(&storage_id)
            .ok_or_else(|| Error::protocol(ErrorKind::InvalidData, format!("unknown storage id {storage_id}")))?;
        storage.name = storage_name.to_string();
        storage.size = storage_size;
        Ok(())
    }

    async fn update_storage_infos(&self, storage_id: u64) -> Result<()> {
        let storages = self.storages.lock().await;
        if !storages.contains_key(&storage_id) {
            return Err(Error::protocol(ErrorKind::InvalidData, format!("unknown storage id {storage_id}")));
        }
        Ok(())
    }

    async fn new_history(
        &self,
        _job_uuid: &str,
        _schedule_uuid: &str,
        _host_name: &str,
        _archive_type: crate::job::ArchiveType,
        _created_date_time: u64,
        _error_message: &str,
        _duration: u64,
        _total_entry_count: u64,
        _total_entry_size: u64,
        _skipped_entry_count: u64,
        _skipped_entry_size: u64,
        _error_entry_count: u64,
        _error_entry_size: u64,
    ) -> Result<u64> {
        Ok(self.allocate_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_past_declared_size_grows_the_archive() {
        let sink = MemoryStorageSink::default();
        sink.create("a.tar", 4).await.unwrap();
        sink.write_at("a.tar", 2, b"abcd").await.unwrap();
        assert_eq!(sink.size_of("a.tar").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn write_to_unknown_archive_is_invalid_storage() {
        let sink = MemoryStorageSink::default();
        let err = sink.write_at("missing.tar", 0, b"x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStorage);
    }

    #[tokio::test]
    async fn find_uuid_reflects_a_prior_new_entity() {
        let index = MemoryIndex::default();
        let id = index
            .new_entity("job-1", "sched-1", crate::job::ArchiveType::Normal, 0, false)
            .await
            .unwrap();
        assert_eq!(index.find_uuid("job-1", "sched-1").await.unwrap(), Some(id));
        assert_eq!(index.find_uuid("job-1", "sched-2").await.unwrap(), None);
    }
}
