use crate::api::facade::start_sandbox;
use crate::config::policy::PolicyId;
use crate::config::types::{SandboxRequest, SandboxStatus};
use crate::kernel::signal;
use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;

/// Policy names accepted on the command line
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PolicyArg {
    /// No syscall filter
    Default,
    /// Restrictive allow-list for compiled programs
    Cxx,
}

impl From<PolicyArg> for PolicyId {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Default => PolicyId::Default,
            PolicyArg::Cxx => PolicyId::CxxProgram,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a program under resource limits and a syscall policy", long_about = None)]
pub struct Cli {
    /// Task name used in log lines (default: random UUID)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Working directory of the sandboxed process
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// Redirect stdin from this file
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Redirect stdout to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Redirect stderr to this file
    #[arg(short, long)]
    pub error: Option<PathBuf>,

    /// Append sandbox diagnostics to this file
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Memory soft limit in bytes (0 = unlimited)
    #[arg(short, long, default_value_t = 0)]
    pub memory: u64,

    /// Memory hard limit in bytes (0 = twice the soft limit)
    #[arg(long, default_value_t = 0)]
    pub memory_hard: u64,

    /// Stack limit in bytes (0 = unlimited)
    #[arg(short, long, default_value_t = 0)]
    pub stack: u64,

    /// CPU time limit in milliseconds (0 = unlimited)
    #[arg(short, long, default_value_t = 0)]
    pub cpu: u64,

    /// Wall-clock limit in milliseconds (0 = unlimited)
    #[arg(short, long, default_value_t = 0)]
    pub real: u64,

    /// Maximum process count (-1 = unlimited)
    #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
    pub process: i32,

    /// Output file size limit in bytes (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub output_size: u64,

    /// Syscall policy
    #[arg(short = 'P', long, value_enum, default_value_t = PolicyArg::Default)]
    pub policy: PolicyArg,

    /// Command to run, with its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    pub fn into_request(self) -> Result<SandboxRequest> {
        if self.command.is_empty() {
            bail!("No command specified");
        }

        Ok(SandboxRequest {
            task_name: self
                .name
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            command: self.command.join(" "),
            working_directory: Some(self.dir),
            environment: Vec::new(),
            input_file: self.input,
            output_file: self.output,
            error_file: self.error,
            log_file: self.log,
            memory_to_crash: self.memory_hard,
            max_memory: self.memory,
            max_stack: self.stack,
            max_cpu_time_ms: self.cpu,
            max_real_time_ms: self.real,
            max_output_size: self.output_size,
            max_process_count: self.process,
            policy: PolicyId::from(self.policy).code(),
        })
    }
}

/// JSON report printed after a completed run
#[derive(Serialize)]
struct RunReport<'a> {
    task: &'a str,
    status: SandboxStatus,
    status_code: i32,
    exit_code: i32,
    signal: i32,
    signal_description: &'static str,
    cpu_time_ms: u64,
    real_time_ms: u64,
    memory_bytes: u64,
}

pub fn run() -> Result<()> {
    env_logger::init();

    if !cfg!(target_os = "linux") {
        bail!("runbox requires Linux (rlimits and seccomp)");
    }

    let cli = Cli::parse();
    let request = cli.into_request()?;

    let (status, outcome) = start_sandbox(&request);
    if status != SandboxStatus::Success {
        bail!(
            "Failed to run task '{}': sandbox reported {}",
            request.task_name,
            status
        );
    }

    let report = RunReport {
        task: &request.task_name,
        status: outcome.status,
        status_code: outcome.status.code(),
        exit_code: outcome.exit_code,
        signal: outcome.signal,
        signal_description: signal::describe(outcome.signal),
        cpu_time_ms: outcome.cpu_time_ms,
        real_time_ms: outcome.real_time_ms,
        memory_bytes: outcome.memory_bytes,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
