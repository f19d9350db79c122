//! Resource limits configuration for sandboxed execution

use serde::{Deserialize, Serialize};

/// Per-process resource limits, applied as rlimits before exec
///
/// Fields missing from a config file keep their defaults. A limit set to `0`
/// is lifted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum address space in bytes
    #[serde(with = "limit_value")]
    pub max_memory_bytes: Option<u64>,

    /// Maximum CPU time in seconds
    #[serde(with = "limit_value")]
    pub max_cpu_time_secs: Option<u64>,

    /// Maximum number of open file descriptors
    #[serde(with = "limit_value")]
    pub max_open_files: Option<u64>,

    /// Largest file the process may write, in bytes
    #[serde(with = "limit_value")]
    pub max_file_size_bytes: Option<u64>,

    /// Captured bytes kept per output stream
    pub max_output_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: Some(512 * 1024 * 1024), // 512 MB
            max_cpu_time_secs: Some(30),
            max_open_files: Some(256),
            max_file_size_bytes: Some(16 * 1024 * 1024), // 16 MB
            max_output_bytes: Self::default_max_output_bytes(),
        }
    }
}

impl ResourceLimits {
    fn default_max_output_bytes() -> usize {
        64 * 1024
    }

    /// No rlimits at all; output stays capped (dangerous!)
    pub fn unlimited() -> Self {
        Self {
            max_memory_bytes: None,
            max_cpu_time_secs: None,
            max_open_files: None,
            max_file_size_bytes: None,
            max_output_bytes: Self::default_max_output_bytes(),
        }
    }

    /// Tight limits for hostile code
    pub fn strict() -> Self {
        Self {
            max_memory_bytes: Some(256 * 1024 * 1024),
            max_cpu_time_secs: Some(5),
            max_open_files: Some(64),
            max_file_size_bytes: Some(1024 * 1024),
            max_output_bytes: 16 * 1024,
        }
    }
}

/// `0` on the wire stands for "no limit"
mod limit_value {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let value = u64::deserialize(deserializer)?;
        Ok((value != 0).then_some(value))
    }
}
