/// Core types and structures for the runbox system
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Maximum number of environment entries a request may carry
pub const MAX_ENVIRONMENT_VARIABLES: usize = 256;

/// Absolute ceiling for the memory soft limit, in bytes
pub const MAX_MEMORY_FOR_SANDBOX_PROCESS: u64 = 0x7FFF_FFFF;

/// Upper bound (exclusive) on the number of argv tokens of a command line
pub const MAX_ARGUMENTS: usize = 128;

/// Packed `0x00MMmmpp` version of the request/result layout
pub const SANDBOX_VERSION: i32 = 0x01_03_02;

/// Task description handed to the sandbox.
///
/// Every numeric limit uses `0` for "unlimited", except `max_process_count`
/// where `-1` means unlimited and `0` means no additional processes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRequest {
    /// Label used in log lines
    pub task_name: String,
    /// Program followed by its arguments, whitespace separated
    pub command: String,
    /// Directory the subject starts in
    pub working_directory: Option<PathBuf>,
    /// `KEY=VALUE` entries; empty inherits the caller's environment
    pub environment: Vec<String>,
    pub input_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub error_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    /// Address-space ceiling that kills the subject (bytes)
    pub memory_to_crash: u64,
    /// Memory soft limit (bytes)
    pub max_memory: u64,
    /// Stack size limit (bytes)
    pub max_stack: u64,
    /// CPU time limit (milliseconds)
    pub max_cpu_time_ms: u64,
    /// Wall-clock limit (milliseconds)
    pub max_real_time_ms: u64,
    /// Largest file the subject may write (bytes)
    pub max_output_size: u64,
    pub max_process_count: i32,
    /// Identifier looked up in the policy registry
    pub policy: i32,
}

/// Final classification of one run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SandboxStatus {
    #[default]
    #[serde(rename = "OK")]
    Success = 0,
    #[serde(rename = "MLE")]
    MemoryLimitExceeded = 1,
    #[serde(rename = "RE")]
    RuntimeError = 2,
    #[serde(rename = "TLE")]
    CpuTimeLimitExceeded = 3,
    #[serde(rename = "RTLE")]
    RealTimeLimitExceeded = 4,
    #[serde(rename = "PLE")]
    ProcessLimitExceeded = 5,
    #[serde(rename = "OLE")]
    OutputLimitExceeded = 6,
    #[serde(rename = "IO")]
    IllegalOperation = 7,
    #[serde(rename = "IE")]
    InternalError = 0xFFFF,
}

impl SandboxStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::MemoryLimitExceeded),
            2 => Some(Self::RuntimeError),
            3 => Some(Self::CpuTimeLimitExceeded),
            4 => Some(Self::RealTimeLimitExceeded),
            5 => Some(Self::ProcessLimitExceeded),
            6 => Some(Self::OutputLimitExceeded),
            7 => Some(Self::IllegalOperation),
            0xFFFF => Some(Self::InternalError),
            _ => None,
        }
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "Success",
            Self::MemoryLimitExceeded => "Memory Limit Exceeded",
            Self::RuntimeError => "Runtime Error",
            Self::CpuTimeLimitExceeded => "CPU Time Limit Exceeded",
            Self::RealTimeLimitExceeded => "Real Time Limit Exceeded",
            Self::ProcessLimitExceeded => "Process Limit Exceeded",
            Self::OutputLimitExceeded => "Output Limit Exceeded",
            Self::IllegalOperation => "Illegal Operation",
            Self::InternalError => "Internal Error",
        };
        f.write_str(text)
    }
}

/// Result of a single run, all-zero until the subject has been reaped
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub status: SandboxStatus,
    pub exit_code: i32,
    /// Terminating signal, 0 for a normal exit
    pub signal: i32,
    pub cpu_time_ms: u64,
    pub real_time_ms: u64,
    pub memory_bytes: u64,
}

impl SandboxOutcome {
    pub fn internal_error() -> Self {
        Self {
            status: SandboxStatus::InternalError,
            ..Self::default()
        }
    }
}

/// Categorized sandbox failures. All of them surface as
/// [`SandboxStatus::InternalError`] to the caller.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid command arguments: {0}")]
    InvalidCommand(String),

    #[error("Invalid working directory: {0}")]
    InvalidWorkingDirectory(String),

    #[error("Resource limit failed: {0}")]
    ResourceLimit(String),

    #[error("Input file open failed: {0}")]
    InputFileOpen(String),

    #[error("Output file open failed: {0}")]
    OutputFileOpen(String),

    #[error("Error file open failed: {0}")]
    ErrorFileOpen(String),

    #[error("File redirect failed: {0}")]
    FileRedirect(String),

    #[error("Fork failed: {0}")]
    Fork(String),

    #[error("Exec failed: {0}")]
    Exec(String),

    #[error("Wait failed: {0}")]
    Wait(String),

    #[error("Policy application failed: {0}")]
    PolicyApplication(String),

    #[error("Monitor thread start failed: {0}")]
    MonitorStart(String),
}

impl SandboxError {
    /// Status reported to the caller for this failure
    pub fn status(&self) -> SandboxStatus {
        SandboxStatus::InternalError
    }
}

impl From<nix::errno::Errno> for SandboxError {
    fn from(errno: nix::errno::Errno) -> Self {
        SandboxError::Io(std::io::Error::from(errno))
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
