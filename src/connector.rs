//! The master-side driver (§4.6): connects to a worker, authenticates
//! it, transmits a job, drives it to completion, and services the
//! `STORAGE_*`/`INDEX_*` commands the worker issues back in the other
//! direction while the job runs.
//!
//! Grounded on `connectorConnect`/`Connector_authorize` and the
//! `CONNECTOR_COMMANDS` table in `connector.c`. That table is, despite
//! its name, the *master*'s dispatcher for commands the worker
//! originates — the mirror image of [`crate::worker`]'s table for
//! commands the master originates. Both halves are implemented here
//! and in `worker`, respectively.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::codec::value::ArgumentMap;
use crate::error::{Error, ErrorKind, Result};
use crate::index::{IndexHandle, IndexMode, IndexRow, IndexState};
use crate::job::{ArchiveType, JobDescription, JobProgress, MountEntry, PatternEntry, PatternType};
use crate::server_io::ServerIo;
use crate::session::{EncryptType, Session};
use crate::storage::StorageSink;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_PASSWORD_REQUESTS: u32 = 5;

/// A candidate password source tried, in order, by [`Connector::authorize`].
pub enum PasswordSource {
    Supplied(String),
    ServerConfig(String),
    CachedDefault(String),
    /// Calls back into the operator for an interactively supplied
    /// password. Returns `None` if the operator declines.
    Prompt(Box<dyn Fn() -> Option<String> + Send + Sync>),
}

/// One logical channel to a remote worker, covering its lifetime from
/// connect through job completion.
pub struct Connector {
    io: Arc<ServerIo>,
    peer_public_key: Option<rsa::RsaPublicKey>,
    storage: Arc<dyn StorageSink>,
    index: Arc<dyn IndexHandle>,
}

impl Connector {
    /// Opens a non-blocking, no-delay TCP socket to `addr` and
    /// consumes the worker's `SESSION` greeting.
    #[instrument(skip(storage, index))]
    pub async fn connect(
        addr: (&str, u16),
        storage: Arc<dyn StorageSink>,
        index: Arc<dyn IndexHandle>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (io, peer_public_key) = ServerIo::connect(stream).await?;
        debug!("connected and received session greeting");
        Ok(Self { io: Arc::new(io), peer_public_key, storage, index })
    }

    /// Issues `AUTHORIZE` with this host's UUID encrypted under the
    /// worker's session public key (clear if only `NONE` was
    /// advertised). Tries each candidate in `passwords` in turn, up to
    /// [`MAX_PASSWORD_REQUESTS`], never looping past that bound.
    #[instrument(skip(self, passwords))]
    pub async fn authorize(&self, host_name: &str, host_uuid: Uuid, passwords: &[PasswordSource]) -> Result<()> {
        let (encrypt_type, encrypted_uuid) =
            Session::encrypt_for_peer(self.peer_public_key.as_ref(), host_uuid.as_bytes())?;

        let mut attempt = 0usize;
        let mut last_error = Error::protocol(ErrorKind::InvalidSshPassword, "no password candidates supplied");

        for source in passwords {
            if attempt as u32 >= MAX_PASSWORD_REQUESTS {
                break;
            }
            attempt += 1;

            let password = match source {
                PasswordSource::Supplied(p)
                | PasswordSource::ServerConfig(p)
                | PasswordSource::CachedDefault(p) => Some(p.clone()),
                PasswordSource::Prompt(callback) => callback(),
            };
            let Some(password) = password else { continue };

            let encoded_password =
                crate::codec::password::encode_password(&self.io.session.id, self.peer_public_key.as_ref(), &password)?;

            let mut args = ArgumentMap::new();
            args.set("encryptType", encrypt_type.as_wire());
            args.set("name", host_name);
            args.set("encryptedUUID", hex::encode(&encrypted_uuid));
            args.set("password", encoded_password);

            match self.io.execute_command("AUTHORIZE", args, DEFAULT_COMMAND_TIMEOUT).await {
                Ok(result) => return result.into_payload().map(|_| ()),
                Err(error) => {
                    warn!(%error, attempt, "authorize attempt rejected");
                    last_error = error;
                },
            }
        }

        Err(last_error)
    }

    /// Transmits `job`'s full configuration: `JOB_NEW`, then one
    /// `JOB_OPTION_SET` per option, then each list cleared and
    /// repopulated in order. On any failure, compensates with
    /// `JOB_DELETE` before returning the error.
    #[instrument(skip(self, job))]
    pub async fn transmit_job(&self, job: &JobDescription) -> Result<()> {
        if let Err(error) = self.transmit_job_inner(job).await {
            let mut args = ArgumentMap::new();
            args.set("jobUUID", job.job_uuid.clone());
            let _ = self.io.execute_command("JOB_DELETE", args, DEFAULT_COMMAND_TIMEOUT).await;
            return Err(error);
        }
        Ok(())
    }

    async fn transmit_job_inner(&self, job: &JobDescription) -> Result<()> {
        let mut args = ArgumentMap::new();
        args.set("name", job.name.clone());
        args.set("jobUUID", job.job_uuid.clone());
        args.set("scheduleUUID", job.schedule_uuid.clone());
        args.set("master", job.master.clone());
        self.io.execute_command("JOB_NEW", args, DEFAULT_COMMAND_TIMEOUT).await?.into_payload()?;

        for (key, value) in job.options.iter() {
            let mut args = ArgumentMap::new();
            args.set("jobUUID", job.job_uuid.clone());
            args.set("name", key);
            args.set("value", value);
            self.io.execute_command("JOB_OPTION_SET", args, DEFAULT_COMMAND_TIMEOUT).await?.into_payload()?;
        }

        self.send_pattern_list("INCLUDE_LIST", &job.job_uuid, &job.include_list).await?;
        self.send_pattern_list("EXCLUDE_LIST", &job.job_uuid, &job.exclude_list).await?;
        self.send_mount_list(&job.job_uuid, &job.mount_list).await?;
        self.send_pattern_list("EXCLUDE_COMPRESS_LIST", &job.job_uuid, &job.exclude_compress_list).await?;
        self.send_pattern_list("SOURCE_LIST", &job.job_uuid, &job.source_list).await?;

        Ok(())
    }

    async fn send_pattern_list(&self, list_name: &str, job_uuid: &str, entries: &[PatternEntry]) -> Result<()> {
        let mut clear_args = ArgumentMap::new();
        clear_args.set("jobUUID", job_uuid);
        self.io
            .execute_command(&format!("{list_name}_CLEAR"), clear_args, DEFAULT_COMMAND_TIMEOUT)
            .await?
            .into_payload()?;

        for entry in entries {
            let mut args = ArgumentMap::new();
            args.set("jobUUID", job_uuid);
            if let Some(entry_type) = &entry.entry_type {
                args.set("entryType", entry_type.clone());
            }
            args.set("patternType", wire_pattern_type(entry.pattern_type));
            args.set("pattern", entry.pattern.clone());
            self.io
                .execute_command(&format!("{list_name}_ADD"), args, DEFAULT_COMMAND_TIMEOUT)
                .await?
                .into_payload()?;
        }
        Ok(())
    }

    async fn send_mount_list(&self, job_uuid: &str, entries: &[MountEntry]) -> Result<()> {
        let mut clear_args = ArgumentMap::new();
        clear_args.set("jobUUID", job_uuid);
        self.io
            .execute_command("MOUNT_LIST_CLEAR", clear_args, DEFAULT_COMMAND_TIMEOUT)
            .await?
            .into_payload()?;

        for entry in entries {
            let mut args = ArgumentMap::new();
            args.set("jobUUID", job_uuid);
            args.set("name", entry.name.clone());
            args.set("alwaysUnmount", wire_bool(entry.always_unmount));
            self.io
                .execute_command("MOUNT_LIST_ADD", args, DEFAULT_COMMAND_TIMEOUT)
                .await?
                .into_payload()?;
        }
        Ok(())
    }

    /// `JOB_START` with the given archive type and dry-run flag.
    #[instrument(skip(self))]
    pub async fn start(
        &self,
        job_uuid: &str,
        schedule_uuid: &str,
        archive_type: ArchiveType,
        dry_run: bool,
    ) -> Result<()> {
        let mut args = ArgumentMap::new();
        args.set("jobUUID", job_uuid);
        args.set("scheduleUUID", schedule_uuid);
        args.set("archiveType", wire_archive_type(archive_type));
        args.set("dryRun", wire_bool(dry_run));
        self.io.execute_command("JOB_START", args, DEFAULT_COMMAND_TIMEOUT).await?.into_payload()?;
        Ok(())
    }

    pub async fn abort(&self, job_uuid: &str) -> Result<()> {
        let mut args = ArgumentMap::new();
        args.set("jobUUID", job_uuid);
        self.io.execute_command("JOB_ABORT", args, DEFAULT_COMMAND_TIMEOUT).await?.into_payload()?;
        Ok(())
    }

    /// Issues one `JOB_STATUS` and parses the response into a
    /// [`JobProgress`] plus the reported state/error.
    pub async fn poll_status(&self, job_uuid: &str) -> Result<(crate::job::JobState, JobProgress)> {
        let mut args = ArgumentMap::new();
        args.set("jobUUID", job_uuid);
        let result = self.io.execute_command("JOB_STATUS", args, DEFAULT_COMMAND_TIMEOUT).await?;
        let payload = ArgumentMap::parse(&result.payload)?;
        parse_job_status(&payload)
    }

    /// Services one inbound `STORAGE_*`/`INDEX_*` command from the
    /// worker, per the master-side table grounded on `connector.c`.
    /// Call this in a loop alongside `poll_status` while a job runs.
    pub async fn service_one_command(&self, open_storage: &mut Option<crate::storage::StorageCursor>) -> Result<bool> {
        let Some(command) = self.io.get_command().await else { return Ok(false) };
        let outcome = dispatch_master_command(&self.storage, &self.index, open_storage, &command).await;
        match outcome {
            Ok(payload) => self.io.send_result(command.id, true, ErrorKind::None, payload).await?,
            Err(error) => self.io.send_result(command.id, true, error.kind(), error.to_string()).await?,
        }
        Ok(true)
    }

    pub fn close(&self) {
        self.io.close();
    }
}

fn wire_bool(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn wire_pattern_type(t: PatternType) -> &'static str {
    match t {
        PatternType::Glob => "GLOB",
        PatternType::Regex => "REGEX",
        PatternType::ExtendedRegex => "EXTENDED_REGEX",
        PatternType::Exact => "EXACT",
    }
}

fn wire_archive_type(t: ArchiveType) -> &'static str {
    match t {
        ArchiveType::Normal => "NORMAL",
        ArchiveType::Full => "FULL",
        ArchiveType::Incremental => "INCREMENTAL",
        ArchiveType::Differential => "DIFFERENTIAL",
        ArchiveType::Continuous => "CONTINUOUS",
    }
}

fn parse_job_status(payload: &ArgumentMap) -> Result<(crate::job::JobState, JobProgress)> {
    use crate::job::JobState;

    let state = match payload.optional_str("state").unwrap_or("none") {
        "none" => JobState::None,
        "waiting" => JobState::Waiting,
        "running" => JobState::Running,
        "done" => JobState::Done,
        "error" => JobState::Error,
        "aborted" => JobState::Aborted,
        other => return Err(Error::protocol(ErrorKind::InvalidResponse, format!("unknown job state '{other}'"))),
    };

    let progress = JobProgress {
        done_count: payload.optional_u64("doneCount", 0),
        done_size: payload.optional_u64("doneSize", 0),
        total_entry_count: payload.optional_u64("totalEntryCount", 0),
        total_entry_size: payload.optional_u64("totalEntrySize", 0),
        collect_total_sum_done: payload.optional_bool("collectTotalSumDone", false),
        skipped_entry_count: payload.optional_u64("skippedEntryCount", 0),
        skipped_entry_size: payload.optional_u64("skippedEntrySize", 0),
        error_entry_count: payload.optional_u64("errorEntryCount", 0),
        error_entry_size: payload.optional_u64("errorEntrySize", 0),
        archive_size: payload.optional_u64("archiveSize", 0),
        compression_ratio: payload.optional_str("compressionRatio").and_then(|s| s.parse().ok()).unwrap_or(0.0),
        entry_name: payload.optional_str("entryName").unwrap_or("").to_string(),
        entry_done_size: payload.optional_u64("entryDoneSize", 0),
        entry_total_size: payload.optional_u64("entryTotalSize", 0),
        storage_name: payload.optional_str("storageName").unwrap_or("").to_string(),
        storage_done_size: payload.optional_u64("storageDoneSize", 0),
        storage_total_size: payload.optional_u64("storageTotalSize", 0),
        volume_number: payload.optional_u64("volumeNumber", 0) as u32,
        volume_progress: payload.optional_str("volumeProgress").and_then(|s| s.parse().ok()).unwrap_or(0.0),
        message: payload.optional_str("message").unwrap_or("").to_string(),
    };

    Ok((state, progress))
}

/// The master-side command table for commands the worker originates:
/// archive-byte writes (`STORAGE_*`) and index mutations (`INDEX_*`).
async fn dispatch_master_command(
    storage: &Arc<dyn StorageSink>,
    index: &Arc<dyn IndexHandle>,
    open_storage: &mut Option<crate::storage::StorageCursor>,
    command: &crate::protocol::Command,
) -> Result<String> {
    match command.name.as_str() {
        "STORAGE_CREATE" => {
            let name = command.args.require_str("archiveName")?.to_string();
            let size = command.args.require_u64("archiveSize")?;
            storage.create(&name, size).await?;
            *open_storage = Some(crate::storage::StorageCursor::open(name, size));
            Ok(String::new())
        },
        "STORAGE_WRITE" => {
            let cursor = open_storage
                .as_mut()
                .ok_or_else(|| Error::protocol(ErrorKind::InvalidStorage, "no open storage cursor"))?;
            let offset = command.args.require_u64("offset")?;
            let length = command.args.require_u64("length")?;
            cursor.validate_write(offset, length)?;

            let data = command.args.require_str("data")?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|_| Error::protocol(ErrorKind::InvalidData, "invalid base64 in data"))?;
            if bytes.len() as u64 != length {
                return Err(Error::protocol(ErrorKind::InvalidData, "decoded length does not match declared length"));
            }

            storage.write_at(&cursor.archive_name, offset, &bytes).await?;
            cursor.advance(offset, length);
            Ok(String::new())
        },
        "STORAGE_CLOSE" => {
            if let Some(cursor) = open_storage.as_mut() {
                if !cursor.is_closed() {
                    storage.close(&cursor.archive_name).await?;
                    cursor.close();
                }
            }
            Ok(String::new())
        },
        "INDEX_FIND_UUID" => {
            let job_uuid = command.args.require_str("jobUUID")?;
            let schedule_uuid = command.args.require_str("scheduleUUID")?;
            match index.find_uuid(job_uuid, schedule_uuid).await? {
                Some(uuid_id) => Ok(format!("uuidId={uuid_id}")),
                None => Err(Error::protocol(ErrorKind::InvalidData, "uuid not found")),
            }
        },
        "INDEX_NEW_UUID" => {
            let job_uuid = command.args.require_str("jobUUID")?;
            let uuid_id = index.new_uuid(job_uuid).await?;
            Ok(format!("uuidId={uuid_id}"))
        },
        "INDEX_NEW_ENTITY" => {
            let job_uuid = command.args.require_str("jobUUID")?;
            let schedule_uuid = command.args.require_str("scheduleUUID")?;
            let archive_type = ArchiveType::parse(command.args.require_str("archiveType")?)
                .ok_or_else(|| Error::protocol(ErrorKind::InvalidData, "archiveType=<NORMAL|FULL|INCREMENTAL|DIFFERENTIAL|CONTINUOUS>"))?;
            let created = command.args.require_u64("createdDateTime")?;
            let locked = command.args.require_bool("locked")?;
            let entity_id = index.new_entity(job_uuid, schedule_uuid, archive_type, created, locked).await?;
            Ok(format!("entityId={entity_id}"))
        },
        "INDEX_NEW_STORAGE" => {
            let entity_id = command.args.require_u64("entityId")?;
            let storage_name = command.args.require_str("storageName")?;
            let created = command.args.require_u64("createdDateTime")?;
            let size = command.args.require_u64("size")?;
            let index_state = IndexState::parse(command.args.require_str("indexState")?)
                .ok_or_else(|| Error::protocol(ErrorKind::InvalidData, "indexState=<NONE|OK|CREATE|UPDATE_REQUESTED|UPDATE|ERROR>"))?;
            let index_mode = IndexMode::parse(command.args.require_str("indexMode")?)
                .ok_or_else(|| Error::protocol(ErrorKind::InvalidData, "indexMode=<MANUAL|AUTO>"))?;
            let storage_id = index.new_storage(entity_id, storage_name, created, size, index_state, index_mode).await?;
            Ok(format!("storageId={storage_id}"))
        },
        "INDEX_ADD_FILE" => {
            index.add_row(IndexRow::File(parse_file_row(&command.args)?)).await?;
            Ok(String::new())
        },
        "INDEX_ADD_IMAGE" => {
            index.add_row(IndexRow::Image(parse_image_row(&command.args)?)).await?;
            Ok(String::new())
        },
        "INDEX_ADD_DIRECTORY" => {
            index.add_row(IndexRow::Directory(parse_directory_row(&command.args)?)).await?;
            Ok(String::new())
        },
        "INDEX_ADD_LINK" => {
            index.add_row(IndexRow::Link(parse_link_row(&command.args)?)).await?;
            Ok(String::new())
        },
        "INDEX_ADD_HARDLINK" => {
            index.add_row(IndexRow::Hardlink(parse_hardlink_row(&command.args)?)).await?;
            Ok(String::new())
        },
        "INDEX_ADD_SPECIAL" => {
            index.add_row(IndexRow::Special(parse_special_row(&command.args)?)).await?;
            Ok(String::new())
        },
        "INDEX_SET_STATE" => {
            let index_id = command.args.require_u64("indexId")?;
            let state = IndexState::parse(command.args.require_str("indexState")?)
                .ok_or_else(|| Error::protocol(ErrorKind::InvalidData, "indexState=<NONE|OK|CREATE|UPDATE_REQUESTED|UPDATE|ERROR>"))?;
            let last_checked = command.args.require_u64("lastCheckedDateTime")?;
            let message = command.args.optional_str("errorMessage").unwrap_or("");
            index.set_state(index_id, state, last_checked, message).await?;
            Ok(String::new())
        },
        "INDEX_STORAGE_UPDATE" => {
            let storage_id = command.args.require_u64("storageId")?;
            let storage_name = command.args.require_str("storageName")?;
            let storage_size = command.args.require_u64("storageSize")?;
            index.storage_update(storage_id, storage_name, storage_size).await?;
            Ok(String::new())
        },
        "INDEX_UPDATE_STORAGE_INFOS" => {
            let storage_id = command.args.require_u64("storageId")?;
            index.update_storage_infos(storage_id).await?;
            Ok(String::new())
        },
        "INDEX_NEW_HISTORY" => {
            let job_uuid = command.args.require_str("jobUUID")?;
            let schedule_uuid = command.args.require_str("scheduleUUID")?;
            let host_name = command.args.require_str("hostName")?;
            let archive_type = ArchiveType::parse(command.args.require_str("archiveType")?)
                .ok_or_else(|| Error::protocol(ErrorKind::InvalidData, "archiveType=<NORMAL|FULL|INCREMENTAL|DIFFERENTIAL|CONTINUOUS>"))?;
            let created = command.args.require_u64("createdDateTime")?;
            let error_message = command.args.optional_str("errorMessage").unwrap_or("");
            let duration = command.args.require_u64("duration")?;
            let history_id = index
                .new_history(
                    job_uuid,
                    schedule_uuid,
                    host_name,
                    archive_type,
                    created,
                    error_message,
                    duration,
                    command.args.optional_u64("totalEntryCount", 0),
                    command.args.optional_u64("totalEntrySize", 0),
                    command.args.optional_u64("skippedEntryCount", 0),
                    command.args.optional_u64("skippedEntrySize", 0),
                    command.args.optional_u64("errorEntryCount", 0),
                    command.args.optional_u64("errorEntrySize", 0),
                )
                .await?;
            Ok(format!("historyId={history_id}"))
        },
        "PREPROCESS" | "POSTPROCESS" => {
            // Pre/post-process notifications carry no index/storage side
            // effect the master needs to apply; acknowledge and move on.
            Ok(String::new())
        },
        other => Err(Error::protocol(ErrorKind::Parse, format!("unknown command '{other}'"))),
    }
}

fn parse_timestamps(args: &ArgumentMap) -> Result<crate::index::Timestamps> {
    Ok(crate::index::Timestamps {
        last_access: args.optional_u64("timeLastAccess", 0),
        modified: args.optional_u64("timeModified", 0),
        last_changed: args.optional_u64("timeLastChanged", 0),
    })
}

fn parse_ownership(args: &ArgumentMap) -> Result<crate::index::Ownership> {
    Ok(crate::index::Ownership {
        user_id: args.require_u32("userId")?,
        group_id: args.require_u32("groupId")?,
        permission: args.require_u32("permission")?,
    })
}

fn parse_fragment(args: &ArgumentMap) -> crate::index::Fragment {
    crate::index::Fragment {
        offset: args.optional_u64("fragmentOffset", 0),
        size: args.optional_u64("fragmentSize", 0),
    }
}

fn parse_file_row(args: &ArgumentMap) -> Result<crate::index::FileRow> {
    Ok(crate::index::FileRow {
        storage_id: args.require_u64("storageId")?,
        name: args.require_str("name")?.to_string(),
        size: args.require_u64("size")?,
        timestamps: parse_timestamps(args)?,
        ownership: parse_ownership(args)?,
        fragment: parse_fragment(args),
    })
}

fn parse_image_row(args: &ArgumentMap) -> Result<crate::index::ImageRow> {
    Ok(crate::index::ImageRow {
        storage_id: args.require_u64("storageId")?,
        name: args.require_str("name")?.to_string(),
        file_system_type: crate::index::FileSystemType::parse(args.require_str("fileSystemType")?)
            .ok_or_else(|| Error::protocol(ErrorKind::InvalidData, "fileSystemType=<UNKNOWN|EXT2|EXT3|EXT4|FAT|NTFS>"))?,
        size: args.require_u64("size")?,
        block_size: args.require_u64("blockSize")?,
        block_offset: args.require_u64("blockOffset")?,
        block_count: args.require_u64("blockCount")?,
    })
}

fn parse_directory_row(args: &ArgumentMap) -> Result<crate::index::DirectoryRow> {
    Ok(crate::index::DirectoryRow {
        storage_id: args.require_u64("storageId")?,
        name: args.require_str("name")?.to_string(),
        timestamps: parse_timestamps(args)?,
        ownership: parse_ownership(args)?,
    })
}

fn parse_link_row(args: &ArgumentMap) -> Result<crate::index::LinkRow> {
    Ok(crate::index::LinkRow {
        storage_id: args.require_u64("storageId")?,
        name: args.require_str("name")?.to_string(),
        destination_name: args.require_str("destinationName")?.to_string(),
        timestamps: parse_timestamps(args)?,
        ownership: parse_ownership(args)?,
    })
}

fn parse_hardlink_row(args: &ArgumentMap) -> Result<crate::index::HardlinkRow> {
    Ok(crate::index::HardlinkRow {
        storage_id: args.require_u64("storageId")?,
        name: args.require_str("name")?.to_string(),
        size: args.require_u64("size")?,
        timestamps: parse_timestamps(args)?,
        ownership: parse_ownership(args)?,
        fragment: parse_fragment(args),
    })
}

fn parse_special_row(args: &ArgumentMap) -> Result<crate::index::SpecialRow> {
    Ok(crate::index::SpecialRow {
        storage_id: args.require_u64("storageId")?,
        name: args.require_str("name")?.to_string(),
        special_type: crate::index::SpecialType::parse(args.require_str("specialType")?)
            .ok_or_else(|| Error::protocol(ErrorKind::InvalidData, "specialType=<CHARACTER_DEVICE|BLOCK_DEVICE|FIFO|SOCKET|OTHER>"))?,
        timestamps: parse_timestamps(args)?,
        ownership: parse_ownership(args)?,
        fragment: parse_fragment(args),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::{MemoryIndex, MemoryStorageSink};

    #[tokio::test]
    async fn storage_create_write_close_round_trips_through_memory_sink() {
        let storage: Arc<dyn StorageSink> = Arc::new(MemoryStorageSink::default());
        let index: Arc<dyn IndexHandle> = Arc::new(MemoryIndex::default());
        let mut open_storage = None;

        let mut create_args = ArgumentMap::new();
        create_args.set("archiveName", "a.tar");
        create_args.set("archiveSize", 3u64.to_string());
        let create_cmd = crate::protocol::Command { id: 1, name: "STORAGE_CREATE".into(), args: create_args };
        dispatch_master_command(&storage, &index, &mut open_storage, &create_cmd).await.unwrap();

        let mut write_args = ArgumentMap::new();
        write_args.set("offset", 0u64.to_string());
        write_args.set("length", 3u64.to_string());
        write_args.set("data", base64::engine::general_purpose::STANDARD.encode(b"ABC"));
        let write_cmd = crate::protocol::Command { id: 2, name: "STORAGE_WRITE".into(), args: write_args };
        dispatch_master_command(&storage, &index, &mut open_storage, &write_cmd).await.unwrap();

        assert_eq!(storage.size_of("a.tar").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn storage_write_beyond_declared_size_is_rejected() {
        let storage: Arc<dyn StorageSink> = Arc::new(MemoryStorageSink::default());
        let index: Arc<dyn IndexHandle> = Arc::new(MemoryIndex::default());
        let mut open_storage = None;

        let mut create_args = ArgumentMap::new();
        create_args.set("archiveName", "a.tar");
        create_args.set("archiveSize", 10u64.to_string());
        let create_cmd = crate::protocol::Command { id: 1, name: "STORAGE_CREATE".into(), args: create_args };
        dispatch_master_command(&storage, &index, &mut open_storage, &create_cmd).await.unwrap();

        let mut write_args = ArgumentMap::new();
        write_args.set("offset", 8u64.to_string());
        write_args.set("length", 4u64.to_string());
        write_args.set("data", base64::engine::general_purpose::STANDARD.encode(b"AAAA"));
        let write_cmd = crate::protocol::Command { id: 2, name: "STORAGE_WRITE".into(), args: write_args };
        let err = dispatch_master_command(&storage, &index, &mut open_storage, &write_cmd).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStorage);
    }

    #[tokio::test]
    async fn storage_close_on_never_opened_storage_is_a_silent_success() {
        let storage: Arc<dyn StorageSink> = Arc::new(MemoryStorageSink::default());
        let index: Arc<dyn IndexHandle> = Arc::new(MemoryIndex::default());
        let mut open_storage = None;

        let close_cmd = crate::protocol::Command { id: 1, name: "STORAGE_CLOSE".into(), args: ArgumentMap::new() };
        assert!(dispatch_master_command(&storage, &index, &mut open_storage, &close_cmd).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_command_reports_parse_error() {
        let storage: Arc<dyn StorageSink> = Arc::new(MemoryStorageSink::default());
        let index: Arc<dyn IndexHandle> = Arc::new(MemoryIndex::default());
        let mut open_storage = None;

        let cmd = crate::protocol::Command { id: 1, name: "SOMETHING_UNKNOWN".into(), args: ArgumentMap::new() };
        let err = dispatch_master_command(&storage, &index, &mut open_storage, &cmd).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }
}
