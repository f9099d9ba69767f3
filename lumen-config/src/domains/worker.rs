//! Worker process launch configuration

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command used to start a worker process
///
/// The pool appends `--worker-id <id>` to `args` for every worker it spawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerCommandConfig {
    /// Executable to launch; the running binary when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,

    /// Arguments placed before `--worker-id`
    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,
}

impl Default for WorkerCommandConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: default_worker_args(),
        }
    }
}

impl WorkerCommandConfig {
    /// Resolve the program, falling back to the current executable
    pub fn resolve_program(&self) -> std::io::Result<PathBuf> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe(),
        }
    }
}

impl Validatable for WorkerCommandConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(program) = &self.program {
            validate_required_string(
                &program.to_string_lossy(),
                "program",
                self.domain_name(),
            )?;
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "worker"
    }
}

fn default_worker_args() -> Vec<String> {
    vec!["worker".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_current_exe() {
        let config = WorkerCommandConfig::default();
        assert_eq!(config.args, vec!["worker"]);
        assert_eq!(
            config.resolve_program().unwrap(),
            std::env::current_exe().unwrap()
        );
    }

    #[test]
    fn test_empty_program_rejected() {
        let config = WorkerCommandConfig {
            program: Some(PathBuf::new()),
            args: vec![],
        };
        assert!(config.validate().is_err());
    }
}
