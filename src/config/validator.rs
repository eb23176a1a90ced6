// Request validation
// Runs before any fork; a failed validation never creates a process.

use crate::config::policy;
use crate::config::types::{
    Result, SandboxError, SandboxRequest, MAX_ENVIRONMENT_VARIABLES, MAX_MEMORY_FOR_SANDBOX_PROCESS,
};

/// Validation result with detailed errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// First error, or an empty string when valid
    pub fn message(&self) -> &str {
        self.errors.first().map(String::as_str).unwrap_or("")
    }

    /// Convert into an error carrying every collected message
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.valid {
            Ok(self.warnings)
        } else {
            Err(SandboxError::InvalidConfiguration(self.errors.join("; ")))
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a request. `None` stands for an absent (null) request.
pub fn validate_request(request: Option<&SandboxRequest>) -> ValidationResult {
    let mut result = ValidationResult::new();

    let Some(request) = request else {
        result.add_error("Sandbox configuration is null".to_string());
        return result;
    };

    validate_identity(request, &mut result);
    validate_policy(request, &mut result);
    validate_environment(request, &mut result);
    validate_limits(request, &mut result);

    result
}

fn validate_identity(request: &SandboxRequest, result: &mut ValidationResult) {
    if request.task_name.is_empty() {
        result.add_error("Task name is empty".to_string());
    }
    if request.command.trim().is_empty() {
        result.add_error("User command is empty".to_string());
    }
}

fn validate_policy(request: &SandboxRequest, result: &mut ValidationResult) {
    if !policy::is_known(request.policy) {
        result.add_error(format!("Unknown policy id {}", request.policy));
    }
}

fn validate_environment(request: &SandboxRequest, result: &mut ValidationResult) {
    if request.environment.len() > MAX_ENVIRONMENT_VARIABLES {
        result.add_error(format!(
            "Too many environment variables: {} (max {})",
            request.environment.len(),
            MAX_ENVIRONMENT_VARIABLES
        ));
    }
    if let Some(entry) = request.environment.iter().find(|entry| !entry.contains('=')) {
        result.add_warning(format!(
            "Environment entry without '=' passed through verbatim: {}",
            entry
        ));
    }
}

fn validate_limits(request: &SandboxRequest, result: &mut ValidationResult) {
    if request.max_memory > MAX_MEMORY_FOR_SANDBOX_PROCESS {
        result.add_error(format!(
            "Memory limit {} exceeds maximum {}",
            request.max_memory, MAX_MEMORY_FOR_SANDBOX_PROCESS
        ));
    }

    if request.max_process_count < -1 {
        result.add_error(format!(
            "Process count limit {} is below -1",
            request.max_process_count
        ));
    }

    if request.memory_to_crash != 0 && request.memory_to_crash < request.max_memory {
        result.add_warning(format!(
            "Memory-to-crash {} is below the soft limit {}; using twice the soft limit",
            request.memory_to_crash, request.max_memory
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> SandboxRequest {
        SandboxRequest {
            task_name: "unit".to_string(),
            command: "/bin/true".to_string(),
            max_memory: 64 * 1024 * 1024,
            max_process_count: -1,
            ..SandboxRequest::default()
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        let result = validate_request(Some(&valid_request()));
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.message(), "");
    }

    #[test]
    fn rejects_null_request() {
        let result = validate_request(None);
        assert!(!result.is_valid());
        assert!(result.message().contains("null"));
    }

    #[test]
    fn rejects_missing_task_name_and_command() {
        let mut request = valid_request();
        request.task_name.clear();
        assert!(!validate_request(Some(&request)).is_valid());

        let mut request = valid_request();
        request.command = "   ".to_string();
        assert!(!validate_request(Some(&request)).is_valid());
    }

    #[test]
    fn rejects_unknown_policy() {
        let mut request = valid_request();
        request.policy = policy::MAX_POLICY;
        let result = validate_request(Some(&request));
        assert!(!result.is_valid());
        assert!(result.message().contains("policy"));
    }

    #[test]
    fn rejects_memory_above_ceiling() {
        let mut request = valid_request();
        request.max_memory = MAX_MEMORY_FOR_SANDBOX_PROCESS + 1;
        assert!(!validate_request(Some(&request)).is_valid());

        request.max_memory = MAX_MEMORY_FOR_SANDBOX_PROCESS;
        assert!(validate_request(Some(&request)).is_valid());
    }

    #[test]
    fn rejects_process_count_below_unlimited() {
        let mut request = valid_request();
        request.max_process_count = -2;
        assert!(!validate_request(Some(&request)).is_valid());

        request.max_process_count = 0;
        assert!(validate_request(Some(&request)).is_valid());
    }

    #[test]
    fn rejects_too_many_environment_entries() {
        let mut request = valid_request();
        request.environment = (0..=MAX_ENVIRONMENT_VARIABLES)
            .map(|i| format!("VAR{}=1", i))
            .collect();
        assert!(!validate_request(Some(&request)).is_valid());

        request.environment.pop();
        assert!(validate_request(Some(&request)).is_valid());
    }

    #[test]
    fn low_memory_to_crash_only_warns() {
        let mut request = valid_request();
        request.memory_to_crash = 1;
        let result = validate_request(Some(&request));
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn collects_every_error() {
        let request = SandboxRequest {
            policy: 42,
            max_process_count: -5,
            ..SandboxRequest::default()
        };
        let result = validate_request(Some(&request));
        assert_eq!(result.errors.len(), 4);
        assert!(result.into_result().is_err());
    }

    #[test]
    fn validation_is_repeatable() {
        let request = valid_request();
        let before = request.clone();
        let first = validate_request(Some(&request));
        let second = validate_request(Some(&request));
        assert_eq!(first, second);
        assert_eq!(request, before);
    }
}
