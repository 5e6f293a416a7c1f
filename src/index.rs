//! Index-database row shapes and the `IndexHandle` collaborator
//! interface (§3, §6). The actual catalog storage is out of scope;
//! this module specifies the boundary the worker dispatcher calls
//! through.

use async_trait::async_trait;

use crate::error::Result;

/// Common per-file timestamp triple carried by most row variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps {
    pub last_access: u64,
    pub modified: u64,
    pub last_changed: u64,
}

/// Common per-file ownership/permission bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ownership {
    pub user_id: u32,
    pub group_id: u32,
    pub permission: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialType {
    CharacterDevice,
    BlockDevice,
    Fifo,
    Socket,
    Other,
}

impl SpecialType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CHARACTER_DEVICE" => Some(SpecialType::CharacterDevice),
            "BLOCK_DEVICE" => Some(SpecialType::BlockDevice),
            "FIFO" => Some(SpecialType::Fifo),
            "SOCKET" => Some(SpecialType::Socket),
            "OTHER" => Some(SpecialType::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemType {
    Unknown,
    Ext2,
    Ext3,
    Ext4,
    Fat,
    Ntfs,
}

impl FileSystemType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNKNOWN" => Some(FileSystemType::Unknown),
            "EXT2" => Some(FileSystemType::Ext2),
            "EXT3" => Some(FileSystemType::Ext3),
            "EXT4" => Some(FileSystemType::Ext4),
            "FAT" => Some(FileSystemType::Fat),
            "NTFS" => Some(FileSystemType::Ntfs),
            _ => None,
        }
    }
}

/// Whether a job's index entries are created manually or picked up by
/// an automatic scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Manual,
    Auto,
}

impl IndexMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MANUAL" => Some(IndexMode::Manual),
            "AUTO" => Some(IndexMode::Auto),
            _ => None,
        }
    }
}

/// State of a Storage row in the index (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    None,
    Ok,
    Create,
    UpdateRequested,
    Update,
    Error,
}

impl IndexState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(IndexState::None),
            "OK" => Some(IndexState::Ok),
            "CREATE" => Some(IndexState::Create),
            "UPDATE_REQUESTED" => Some(IndexState::UpdateRequested),
            "UPDATE" => Some(IndexState::Update),
            "ERROR" => Some(IndexState::Error),
            _ => None,
        }
    }
}

/// A fragment carried by File/Hardlink/Special rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fragment {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct FileRow {
    pub storage_id: u64,
    pub name: String,
    pub size: u64,
    pub timestamps: Timestamps,
    pub ownership: Ownership,
    pub fragment: Fragment,
}

#[derive(Debug, Clone)]
pub struct ImageRow {
    pub storage_id: u64,
    pub name: String,
    pub file_system_type: FileSystemType,
    pub size: u64,
    pub block_size: u64,
    pub block_offset: u64,
    pub block_count: u64,
}

#[derive(Debug, Clone)]
pub struct DirectoryRow {
    pub storage_id: u64,
    pub name: String,
    pub timestamps: Timestamps,
    pub ownership: Ownership,
}

#[derive(Debug, Clone)]
pub struct LinkRow {
    pub storage_id: u64,
    pub name: String,
    pub destination_name: String,
    pub timestamps: Timestamps,
    pub ownership: Ownership,
}

#[derive(Debug, Clone)]
pub struct HardlinkRow {
    pub storage_id: u64,
    pub name: String,
    pub size: u64,
    pub timestamps: Timestamps,
    pub ownership: Ownership,
    pub fragment: Fragment,
}

#[derive(Debug, Clone)]
pub struct SpecialRow {
    pub storage_id: u64,
    pub name: String,
    pub special_type: SpecialType,
    pub timestamps: Timestamps,
    pub ownership: Ownership,
    pub fragment: Fragment,
}

/// The catalog rows a worker can append to the index, polymorphic over
/// the ten row kinds named in §3. `Uuid`/`Entity`/`Storage`/`History`
/// are the creating variants (returning an id); the rest describe
/// directory-tree entries hung off a storage id.
#[derive(Debug, Clone)]
pub enum IndexRow {
    File(FileRow),
    Image(ImageRow),
    Directory(DirectoryRow),
    Link(LinkRow),
    Hardlink(HardlinkRow),
    Special(SpecialRow),
}

/// The worker-side collaborator that persists backup-catalog rows to
/// the master. Out of scope per §1; this trait is the boundary the
/// dispatcher (§4.7) calls through. `backends::memory` provides a
/// reference implementation for tests and demos.
#[async_trait]
pub trait IndexHandle: Send + Sync {
    async fn new_uuid(&self, job_uuid: &str) -> Result<u64>;

    async fn find_uuid(&self, job_uuid: &str, schedule_uuid: &str) -> Result<Option<u64>>;

    async fn new_entity(
        &self,
        job_uuid: &str,
        schedule_uuid: &str,
        archive_type: crate::job::ArchiveType,
        created_date_time: u64,
        locked: bool,
    ) -> Result<u64>;

    async fn new_storage(
        &self,
        entity_id: u64,
        storage_name: &str,
        created_date_time: u64,
        size: u64,
        index_state: IndexState,
        index_mode: IndexMode,
    ) -> Result<u64>;

    async fn add_row(&self, row: IndexRow) -> Result<()>;

    async fn set_state(
        &self,
        index_id: u64,
        state: IndexState,
        last_checked_date_time: u64,
        error_message: &str,
    ) -> Result<()>;

    async fn storage_update(&self, storage_id: u64, storage_name: &str, storage_size: u64) -> Result<()>;

    async fn update_storage_infos(&self, storage_id: u64) -> Result<()>;

    async fn new_history(
        &self,
        job_uuid: &str,
        schedule_uuid: &str,
        host_name: &str,
        archive_type: crate::job::ArchiveType,
        created_date_time: u64,
        error_message: &str,
        duration: u64,
        total_entry_count: u64,
        total_entry_size: u64,
        skipped_entry_count: u64,
        skipped_entry_size: u64,
        error_entry_count: u64,
        error_entry_size: u64,
    ) -> Result<u64>;
}
