//! Transferable job configuration and the worker-side job state
//! machine (§3, §4.8).

use std::collections::HashMap;

/// One backup run's materialized configuration on the worker side,
/// keyed by the master-supplied job UUID.
#[derive(Debug, Clone)]
pub struct JobDescription {
    pub name: String,
    pub job_uuid: String,
    pub schedule_uuid: String,
    pub master: String,
    pub options: JobOptions,
    pub include_list: PatternList,
    pub exclude_list: PatternList,
    pub mount_list: MountList,
    pub exclude_compress_list: PatternList,
    pub source_list: PatternList,
    pub state: JobState,
}

impl JobDescription {
    pub fn new(name: String, job_uuid: String, schedule_uuid: String, master: String) -> Self {
        Self {
            name,
            job_uuid,
            schedule_uuid,
            master,
            options: JobOptions::default(),
            include_list: Vec::new(),
            exclude_list: Vec::new(),
            mount_list: Vec::new(),
            exclude_compress_list: Vec::new(),
            source_list: Vec::new(),
            state: JobState::None,
        }
    }
}

/// The `JOB_OPTION_SET` key-value bag. Unknown keys are kept (forward
/// compatibility with job-option keys this binary doesn't interpret
/// yet) rather than rejected.
#[derive(Debug, Clone, Default)]
pub struct JobOptions(HashMap<String, String>);

impl JobOptions {
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The tagging that tells the engine how to interpret an
/// include/exclude/source pattern string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    Glob,
    Regex,
    ExtendedRegex,
    Exact,
}

impl PatternType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GLOB" => Some(PatternType::Glob),
            "REGEX" => Some(PatternType::Regex),
            "EXTENDED_REGEX" => Some(PatternType::ExtendedRegex),
            "EXACT" => Some(PatternType::Exact),
            _ => None,
        }
    }
}

/// One entry in an include/exclude/exclude-compress/source list.
#[derive(Debug, Clone)]
pub struct PatternEntry {
    pub pattern_type: PatternType,
    pub pattern: String,
    /// Only populated for `INCLUDE_LIST_ADD`, which additionally tags
    /// the entry as file or image.
    pub entry_type: Option<String>,
}

pub type PatternList = Vec<PatternEntry>;

/// One entry in a `MOUNT_LIST`.
#[derive(Debug, Clone)]
pub struct MountEntry {
    pub name: String,
    pub always_unmount: bool,
}

pub type MountList = Vec<MountEntry>;

/// One of `NORMAL | FULL | INCREMENTAL | DIFFERENTIAL | CONTINUOUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    Normal,
    Full,
    Incremental,
    Differential,
    Continuous,
}

impl ArchiveType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NORMAL" => Some(ArchiveType::Normal),
            "FULL" => Some(ArchiveType::Full),
            "INCREMENTAL" => Some(ArchiveType::Incremental),
            "DIFFERENTIAL" => Some(ArchiveType::Differential),
            "CONTINUOUS" => Some(ArchiveType::Continuous),
            _ => None,
        }
    }
}

/// The worker-side job lifecycle (§4.8). `RequestFtpPassword` and
/// friends are transient: the worker reports `Running` externally
/// while in one of them, and a client response returns it to
/// `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    None,
    Waiting,
    Running,
    RequestFtpPassword,
    RequestSshPassword,
    RequestWebdavPassword,
    RequestCryptPassword,
    RequestVolume,
    Done,
    Error,
    Aborted,
}

impl JobState {
    /// `true` for states JOB_STATUS reports externally as `running`
    /// even though internally the worker is waiting on client input.
    pub fn is_transient_request(self) -> bool {
        matches!(
            self,
            JobState::RequestFtpPassword
                | JobState::RequestSshPassword
                | JobState::RequestWebdavPassword
                | JobState::RequestCryptPassword
                | JobState::RequestVolume
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Error | JobState::Aborted)
    }

    /// The name reported on the wire by `JOB_STATUS`'s `state` key.
    pub fn wire_name(self) -> &'static str {
        match self {
            JobState::None => "none",
            JobState::Waiting => "waiting",
            JobState::Running
            | JobState::RequestFtpPassword
            | JobState::RequestSshPassword
            | JobState::RequestWebdavPassword
            | JobState::RequestCryptPassword
            | JobState::RequestVolume => "running",
            JobState::Done => "done",
            JobState::Error => "error",
            JobState::Aborted => "aborted",
        }
    }
}

/// Cumulative, monotonic-within-a-run progress counters reported by
/// `JOB_STATUS`.
#[derive(Debug, Clone, Default)]
pub struct JobProgress {
    pub done_count: u64,
    pub done_size: u64,
    pub total_entry_count: u64,
    pub total_entry_size: u64,
    pub collect_total_sum_done: bool,
    pub skipped_entry_count: u64,
    pub skipped_entry_size: u64,
    pub error_entry_count: u64,
    pub error_entry_size: u64,
    pub archive_size: u64,
    pub compression_ratio: f64,
    pub entry_name: String,
    pub entry_done_size: u64,
    pub entry_total_size: u64,
    pub storage_name: String,
    pub storage_done_size: u64,
    pub storage_total_size: u64,
    pub volume_number: u32,
    pub volume_progress: f64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_request_states_report_running_externally() {
        assert_eq!(JobState::RequestSshPassword.wire_name(), "running");
        assert!(JobState::RequestSshPassword.is_transient_request());
        assert!(!JobState::RequestSshPassword.is_terminal());
    }

    #[test]
    fn terminal_states_are_exactly_done_error_aborted() {
        for state in [JobState::Done, JobState::Error, JobState::Aborted] {
            assert!(state.is_terminal());
        }
        for state in [JobState::None, JobState::Waiting, JobState::Running] {
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn job_options_preserves_unknown_keys() {
        let mut options = JobOptions::default();
        options.set("archive-name", "nightly");
        options.set("future-option-not-yet-understood", "42");
        assert_eq!(options.get("archive-name"), Some("nightly"));
        assert_eq!(
            options.get("future-option-not-yet-understood"),
            Some("42")
        );
    }
}
