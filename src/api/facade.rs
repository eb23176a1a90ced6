/// Stable Rust entry points: create + run
use crate::config::types::{Result, SandboxOutcome, SandboxRequest, SandboxStatus, SANDBOX_VERSION};
use crate::config::validator::validate_request;
use crate::exec::executor::SandboxExecutor;
use crate::observability::run_log::RunLog;

/// A validated, ready-to-run sandbox task
pub struct Sandbox {
    executor: SandboxExecutor,
}

impl Sandbox {
    /// Validate `request`; nothing is forked until [`Sandbox::run`]
    pub fn create(request: SandboxRequest) -> Result<Self> {
        Ok(Self {
            executor: SandboxExecutor::new(request)?,
        })
    }

    /// Block until the subject terminates
    pub fn run(&self) -> Result<SandboxOutcome> {
        self.executor.execute()
    }

    pub fn request(&self) -> &SandboxRequest {
        self.executor.request()
    }

    pub fn version() -> i32 {
        SANDBOX_VERSION
    }
}

/// Create and run in one call. The status is `Success` whenever the subject
/// ran, whatever it did; any sandbox failure, including a child-side setup
/// failure, yields `InternalError`.
pub fn start_sandbox(request: &SandboxRequest) -> (SandboxStatus, SandboxOutcome) {
    match Sandbox::create(request.clone()).and_then(|sandbox| sandbox.run()) {
        Ok(outcome) if outcome.status == SandboxStatus::InternalError => {
            (SandboxStatus::InternalError, outcome)
        }
        Ok(outcome) => (SandboxStatus::Success, outcome),
        Err(e) => {
            log::debug!("Sandbox for task '{}' failed: {}", request.task_name, e);
            (e.status(), SandboxOutcome::internal_error())
        }
    }
}

/// Side-effect free structural check
pub fn is_request_valid(request: Option<&SandboxRequest>) -> bool {
    let result = validate_request(request);
    if !result.is_valid() {
        if let Some(request) = request {
            RunLog::new(&request.task_name, None).debug(format!(
                "Invalid sandbox configuration: {}",
                result.message()
            ));
        }
    }
    result.is_valid()
}

pub fn version_major(version: i32) -> i32 {
    (version >> 16) & 0xFF
}

pub fn version_minor(version: i32) -> i32 {
    (version >> 8) & 0xFF
}

pub fn version_patch(version: i32) -> i32 {
    version & 0xFF
}
