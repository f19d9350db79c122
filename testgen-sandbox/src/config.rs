//! Sandbox configuration

use crate::error::SandboxError;
use crate::limits::ResourceLimits;
use crate::policy::{FilesystemPolicy, NetworkPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Component, PathBuf};
use std::time::Duration;

/// Placeholder replaced by the test file name in [`SandboxConfig::command`]
pub const TEST_FILE_PLACEHOLDER: &str = "{test_file}";
/// Placeholder replaced by the source file name in [`SandboxConfig::command`]
pub const SOURCE_FILE_PLACEHOLDER: &str = "{source_file}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Program and arguments run inside the scratch directory
    #[serde(default = "SandboxConfig::default_command")]
    pub command: Vec<String>,

    /// File the submitted source is written to
    #[serde(default = "SandboxConfig::default_source_file")]
    pub source_file: String,

    /// File the test code is written to
    #[serde(default = "SandboxConfig::default_test_file")]
    pub test_file: String,

    /// Write a pytest `conftest.py` exposing the source's public names
    #[serde(default = "SandboxConfig::default_expose_solution_globals")]
    pub expose_solution_globals: bool,

    #[serde(default)]
    pub network: NetworkPolicy,

    #[serde(default)]
    pub filesystem: FilesystemPolicy,

    /// Host directories visible read-only under an isolated filesystem.
    /// Entries missing on the host are skipped.
    #[serde(default = "SandboxConfig::default_readonly_paths")]
    pub readonly_paths: Vec<PathBuf>,

    #[serde(default)]
    pub limits: ResourceLimits,

    /// Default wall-clock budget per execution
    #[serde(default = "SandboxConfig::default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Upper bound for caller-supplied timeouts
    #[serde(default = "SandboxConfig::default_max_timeout", with = "humantime_serde")]
    pub max_timeout: Duration,

    /// Executions allowed to run at once
    #[serde(default = "SandboxConfig::default_max_concurrent")]
    pub max_concurrent: usize,

    /// How long a request may wait for a free slot before being rejected
    #[serde(default = "SandboxConfig::default_queue_timeout", with = "humantime_serde")]
    pub queue_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            command: Self::default_command(),
            source_file: Self::default_source_file(),
            test_file: Self::default_test_file(),
            expose_solution_globals: Self::default_expose_solution_globals(),
            network: NetworkPolicy::default(),
            filesystem: FilesystemPolicy::default(),
            readonly_paths: Self::default_readonly_paths(),
            limits: ResourceLimits::default(),
            timeout: Self::default_timeout(),
            max_timeout: Self::default_max_timeout(),
            max_concurrent: Self::default_max_concurrent(),
            queue_timeout: Self::default_queue_timeout(),
        }
    }
}

impl SandboxConfig {
    fn default_command() -> Vec<String> {
        ["python3", "-m", "pytest", "-q", "-p", "no:cacheprovider", TEST_FILE_PLACEHOLDER]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn default_source_file() -> String {
        "solution.py".to_string()
    }

    fn default_test_file() -> String {
        "test_solution.py".to_string()
    }

    fn default_expose_solution_globals() -> bool {
        true
    }

    fn default_readonly_paths() -> Vec<PathBuf> {
        [
            "/usr", "/bin", "/sbin", "/lib", "/lib32", "/lib64", "/libx32", "/etc", "/opt",
        ]
        .iter()
        .map(PathBuf::from)
        .collect()
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }

    fn default_max_timeout() -> Duration {
        Duration::from_secs(60)
    }

    fn default_max_concurrent() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
    }

    fn default_queue_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(SandboxError::Config("command is empty".to_string()));
        }
        for name in [&self.source_file, &self.test_file] {
            if !is_plain_file_name(name) {
                return Err(SandboxError::Config(format!(
                    "'{}' must be a plain file name",
                    name
                )));
            }
        }
        if self.source_file == self.test_file {
            return Err(SandboxError::Config(
                "source_file and test_file must differ".to_string(),
            ));
        }
        for path in &self.readonly_paths {
            let normal = path.is_absolute()
                && path
                    .components()
                    .all(|c| matches!(c, Component::RootDir | Component::Normal(_)));
            if !normal {
                return Err(SandboxError::Config(format!(
                    "readonly path '{}' must be absolute without '..'",
                    path.display()
                )));
            }
        }
        if self.max_concurrent == 0 {
            return Err(SandboxError::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() || self.timeout > self.max_timeout {
            return Err(SandboxError::Config(format!(
                "timeout {:?} must be positive and at most max_timeout {:?}",
                self.timeout, self.max_timeout
            )));
        }
        Ok(())
    }

    /// Command with file placeholders substituted
    pub fn resolved_command(&self) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| {
                arg.replace(TEST_FILE_PLACEHOLDER, &self.test_file)
                    .replace(SOURCE_FILE_PLACEHOLDER, &self.source_file)
            })
            .collect()
    }

    /// Python module name derived from `source_file`
    pub fn source_module(&self) -> &str {
        self.source_file
            .strip_suffix(".py")
            .unwrap_or(&self.source_file)
    }

    /// Clamp a caller-supplied timeout into the configured range
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|t| !t.is_zero())
            .unwrap_or(self.timeout)
            .min(self.max_timeout)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}
