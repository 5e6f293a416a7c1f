//! Individual command handlers backing the table in `worker::mod`.
//! Every handler returns exactly one result payload (or error); the
//! caller in `dispatch_worker_command` turns that into exactly one
//! `sendResult` call, per §4.7's "every handler ends in exactly one
//! sendResult" invariant.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{JobRegistry, WorkerAuthPolicy, WorkerJob};
use crate::codec::password::{decode_password, require_password};
use crate::codec::value::ArgumentMap;
use crate::error::{Error, ErrorKind, Result};
use crate::job::{ArchiveType, JobDescription, JobProgress, JobState, MountEntry, PatternEntry, PatternType};
use crate::server_io::ServerIo;
use crate::session::{EncryptType, Session};

fn missing(key: &str, shape: &str) -> Error {
    Error::protocol(ErrorKind::ExpectedParameter, format!("{key}={shape}"))
}

async fn with_job<F, R>(jobs: &Arc<JobRegistry>, job_uuid: &str, f: F) -> Result<R>
where
    F: FnOnce(&mut WorkerJob) -> Result<R>,
{
    let mut table = jobs.0.lock().await;
    let job = table
        .get_mut(job_uuid)
        .ok_or_else(|| Error::protocol(ErrorKind::InvalidData, format!("unknown jobUUID '{job_uuid}'")))?;
    f(job)
}

/// Verifies the master's host UUID against `policy`'s acceptable-master
/// set, decrypting `encryptedUUID` per the negotiated `encryptType`
/// first, then (if `policy` carries a stored password hash) decodes and
/// checks the `password` field the same way. Records the negotiated
/// encryption type on the session once both checks pass.
pub async fn authorize(session: &Session, policy: &WorkerAuthPolicy, args: &ArgumentMap) -> Result<String> {
    let encrypt_type = EncryptType::from_wire(args.require_str("encryptType")?)
        .ok_or_else(|| missing("encryptType", "<NONE|RSA>"))?;
    let name = args.require_str("name")?;
    let encrypted_uuid = args.require_str("encryptedUUID")?;

    let raw_uuid = hex::decode(encrypted_uuid)?;
    let decrypted = session.decrypt_field(encrypt_type, &raw_uuid)?;
    let host_uuid = Uuid::from_slice(&decrypted)
        .map_err(|_| Error::protocol(ErrorKind::InvalidData, "encryptedUUID did not decrypt to a UUID"))?;

    if !policy.accepts_master(&host_uuid) {
        warn!(%name, %host_uuid, "rejected AUTHORIZE from unrecognized master");
        return Err(Error::protocol(ErrorKind::InvalidSshPassword, "master host UUID not in acceptable-master set"));
    }

    if let Some(expected_hash) = policy.password_hash() {
        let encoded_password = args
            .optional_str("password")
            .ok_or_else(|| Error::protocol(ErrorKind::NoSshPassword, "password required by this worker's configuration"))?;
        let password = decode_password(session, encrypt_type, encoded_password)?;
        require_password(&password, expected_hash)?;
    }

    session.select_encrypt_type(encrypt_type);
    Ok(String::new())
}

pub async fn job_new(jobs: &Arc<JobRegistry>, args: &ArgumentMap) -> Result<String> {
    let name = args.require_str("name")?.to_string();
    let job_uuid = args.require_str("jobUUID")?.to_string();
    let schedule_uuid = args.require_str("scheduleUUID")?.to_string();
    let master = args.require_str("master")?.to_string();

    let description = JobDescription::new(name, job_uuid.clone(), schedule_uuid, master);
    let mut table = jobs.0.lock().await;
    table.insert(job_uuid, WorkerJob { description, progress: JobProgress::default() });
    Ok(String::new())
}

pub async fn job_option_set(jobs: &Arc<JobRegistry>, args: &ArgumentMap) -> Result<String> {
    let job_uuid = args.require_str("jobUUID")?.to_string();
    let name = args.require_str("name")?.to_string();
    let value = args.require_str("value")?.to_string();
    with_job(jobs, &job_uuid, |job| {
        job.description.options.set(name, value);
        Ok(())
    })
    .await?;
    Ok(String::new())
}

pub async fn job_delete(jobs: &Arc<JobRegistry>, args: &ArgumentMap) -> Result<String> {
    let job_uuid = args.require_str("jobUUID")?;
    jobs.0.lock().await.remove(job_uuid);
    Ok(String::new())
}

pub async fn job_abort(jobs: &Arc<JobRegistry>, args: &ArgumentMap) -> Result<String> {
    let job_uuid = args.require_str("jobUUID")?.to_string();
    with_job(jobs, &job_uuid, |job| {
        job.description.state = JobState::Aborted;
        Ok(())
    })
    .await?;
    Ok(String::new())
}

/// Starts the job and spawns a task that drives it through
/// `Waiting → Running → Done` (§4.8). A faithful worker would invoke
/// the archive engine here and issue `STORAGE_*`/`INDEX_*` commands
/// back to the master as it progresses; that engine is out of scope
/// (§1), so this simulates the state transitions and progress counters
/// a real run would report.
#[instrument(skip(io, jobs, args))]
pub async fn job_start(io: &ServerIo, jobs: &Arc<JobRegistry>, args: &ArgumentMap) -> Result<String> {
    let job_uuid = args.require_str("jobUUID")?.to_string();
    let archive_type = ArchiveType::parse(args.require_str("archiveType")?)
        .ok_or_else(|| missing("archiveType", "<NORMAL|FULL|INCREMENTAL|DIFFERENTIAL|CONTINUOUS>"))?;
    let dry_run = args.require_bool("dryRun")?;

    with_job(jobs, &job_uuid, |job| {
        job.description.state = JobState::Waiting;
        Ok(())
    })
    .await?;

    let _ = io; // reserved for issuing STORAGE_*/INDEX_* commands once the archive engine lands
    let _ = archive_type;
    let _ = dry_run;

    let registry = jobs.clone();
    let job_uuid_for_task = job_uuid.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut table = registry.0.lock().await;
        if let Some(job) = table.get_mut(&job_uuid_for_task) {
            if job.description.state != JobState::Aborted {
                job.description.state = JobState::Running;
            }
        }
        drop(table);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut table = registry.0.lock().await;
        if let Some(job) = table.get_mut(&job_uuid_for_task) {
            if job.description.state == JobState::Running {
                job.description.state = JobState::Done;
                job.progress.done_count = job.progress.total_entry_count;
                info!(job_uuid = %job_uuid_for_task, "job finished");
            }
        }
    });

    Ok(String::new())
}

pub async fn job_status(jobs: &Arc<JobRegistry>, args: &ArgumentMap) -> Result<String> {
    let job_uuid = args.require_str("jobUUID")?.to_string();
    with_job(jobs, &job_uuid, |job| {
        let mut out = ArgumentMap::new();
        out.set("state", job.description.state.wire_name());
        out.set("errorCode", "0");
        out.set("errorData", "");
        out.set("doneCount", job.progress.done_count.to_string());
        out.set("doneSize", job.progress.done_size.to_string());
        out.set("totalEntryCount", job.progress.total_entry_count.to_string());
        out.set("totalEntrySize", job.progress.total_entry_size.to_string());
        out.set("skippedEntryCount", job.progress.skipped_entry_count.to_string());
        out.set("skippedEntrySize", job.progress.skipped_entry_size.to_string());
        out.set("errorEntryCount", job.progress.error_entry_count.to_string());
        out.set("errorEntrySize", job.progress.error_entry_size.to_string());
        out.set("archiveSize", job.progress.archive_size.to_string());
        out.set("compressionRatio", job.progress.compression_ratio.to_string());
        out.set("entryName", job.progress.entry_name.clone());
        out.set("storageName", job.progress.storage_name.clone());
        out.set("message", job.progress.message.clone());
        Ok(out.render())
    })
    .await
}

fn pattern_entry_from(args: &ArgumentMap, include_entry_type: bool) -> Result<PatternEntry> {
    let pattern_type = PatternType::parse(args.require_str("patternType")?)
        .ok_or_else(|| missing("patternType", "<GLOB|REGEX|EXTENDED_REGEX|EXACT>"))?;
    let pattern = args.require_str("pattern")?.to_string();
    let entry_type = if include_entry_type {
        Some(args.require_str("entryType")?.to_string())
    } else {
        None
    };
    Ok(PatternEntry { pattern_type, pattern, entry_type })
}

macro_rules! list_handlers {
    ($clear_fn:ident, $add_fn:ident, $field:ident, $include_entry_type:expr) => {
        pub async fn $clear_fn(jobs: &Arc<JobRegistry>, args: &ArgumentMap) -> Result<String> {
            let job_uuid = args.require_str("jobUUID")?.to_string();
            with_job(jobs, &job_uuid, |job| {
                job.description.$field.clear();
                Ok(())
            })
            .await?;
            Ok(String::new())
        }

        pub async fn $add_fn(jobs: &Arc<JobRegistry>, args: &ArgumentMap) -> Result<String> {
            let job_uuid = args.require_str("jobUUID")?.to_string();
            let entry = pattern_entry_from(args, $include_entry_type)?;
            with_job(jobs, &job_uuid, |job| {
                job.description.$field.push(entry);
                Ok(())
            })
            .await?;
            Ok(String::new())
        }
    };
}

list_handlers!(include_list_clear, include_list_add, include_list, true);
list_handlers!(exclude_list_clear, exclude_list_add, exclude_list, false);
list_handlers!(exclude_compress_list_clear, exclude_compress_list_add, exclude_compress_list, false);
list_handlers!(source_list_clear, source_list_add, source_list, false);

pub async fn mount_list_clear(jobs: &Arc<JobRegistry>, args: &ArgumentMap) -> Result<String> {
    let job_uuid = args.require_str("jobUUID")?.to_string();
    with_job(jobs, &job_uuid, |job| {
        job.description.mount_list.clear();
        Ok(())
    })
    .await?;
    Ok(String::new())
}

pub async fn mount_list_add(jobs: &Arc<JobRegistry>, args: &ArgumentMap) -> Result<String> {
    let job_uuid = args.require_str("jobUUID")?.to_string();
    let name = args.require_str("name")?.to_string();
    let always_unmount = args.require_bool("alwaysUnmount")?;
    with_job(jobs, &job_uuid, |job| {
        job.description.mount_list.push(MountEntry { name, always_unmount });
        Ok(())
    })
    .await?;
    Ok(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encrypts `uuid` the way a master's `Connector::authorize` does,
    /// against the worker-side `session`'s own public key (standing in
    /// for the peer key the master would normally hold).
    fn encrypt_uuid_for(session: &Session, uuid: Uuid) -> (EncryptType, String) {
        let public_key = &session.keys.as_ref().unwrap().public;
        let (encrypt_type, ciphertext) = Session::encrypt_for_peer(Some(public_key), uuid.as_bytes()).unwrap();
        (encrypt_type, hex::encode(ciphertext))
    }

    #[tokio::test]
    async fn authorize_records_negotiated_encrypt_type_on_the_session() {
        let session = Session::accept();
        let host_uuid = Uuid::new_v4();
        let masters = WorkerAuthPolicy::new([host_uuid], None);
        let (encrypt_type, encrypted_uuid) = encrypt_uuid_for(&session, host_uuid);

        let mut args = ArgumentMap::new();
        args.set("encryptType", encrypt_type.as_wire());
        args.set("name", "backup-master");
        args.set("encryptedUUID", encrypted_uuid);

        authorize(&session, &masters, &args).await.unwrap();
        assert_eq!(session.selected_encrypt_type(), EncryptType::Rsa);
    }

    #[tokio::test]
    async fn authorize_rejects_a_master_outside_the_acceptable_set() {
        let session = Session::accept();
        let host_uuid = Uuid::new_v4();
        let masters = WorkerAuthPolicy::new([Uuid::new_v4()], None);
        let (encrypt_type, encrypted_uuid) = encrypt_uuid_for(&session, host_uuid);

        let mut args = ArgumentMap::new();
        args.set("encryptType", encrypt_type.as_wire());
        args.set("name", "backup-master");
        args.set("encryptedUUID", encrypted_uuid);

        let err = authorize(&session, &masters, &args).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSshPassword);
    }

    #[tokio::test]
    async fn authorize_rejects_missing_encrypt_type() {
        let session = Session::accept();
        let masters = WorkerAuthPolicy::default();
        let mut args = ArgumentMap::new();
        args.set("name", "backup-master");
        args.set("encryptedUUID", "deadbeef");

        let err = authorize(&session, &masters, &args).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExpectedParameter);
    }

    fn sha256(bytes: &[u8]) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher.finalize().into()
    }

    fn authorize_args(session: &Session, host_uuid: Uuid, password: Option<&str>) -> ArgumentMap {
        let (encrypt_type, encrypted_uuid) = encrypt_uuid_for(session, host_uuid);
        let mut args = ArgumentMap::new();
        args.set("encryptType", encrypt_type.as_wire());
        args.set("name", "backup-master");
        args.set("encryptedUUID", encrypted_uuid);
        if let Some(password) = password {
            let public_key = &session.keys.as_ref().unwrap().public;
            let encoded = crate::codec::password::encode_password(&session.id, Some(public_key), password).unwrap();
            args.set("password", encoded);
        }
        args
    }

    #[tokio::test]
    async fn authorize_accepts_a_matching_password() {
        let session = Session::accept();
        let host_uuid = Uuid::new_v4();
        let policy = WorkerAuthPolicy::new([host_uuid], Some(sha256(b"hunter2")));
        let args = authorize_args(&session, host_uuid, Some("hunter2"));

        authorize(&session, &policy, &args).await.unwrap();
    }

    #[tokio::test]
    async fn authorize_rejects_a_mismatched_password() {
        let session = Session::accept();
        let host_uuid = Uuid::new_v4();
        let policy = WorkerAuthPolicy::new([host_uuid], Some(sha256(b"hunter2")));
        let args = authorize_args(&session, host_uuid, Some("wrong-password"));

        let err = authorize(&session, &policy, &args).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSshPassword);
    }

    #[tokio::test]
    async fn authorize_rejects_a_missing_password_when_one_is_required() {
        let session = Session::accept();
        let host_uuid = Uuid::new_v4();
        let policy = WorkerAuthPolicy::new([host_uuid], Some(sha256(b"hunter2")));
        let args = authorize_args(&session, host_uuid, None);

        let err = authorize(&session, &policy, &args).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSshPassword);
    }
}
