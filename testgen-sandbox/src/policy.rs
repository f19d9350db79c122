//! Isolation policies for sandboxed processes

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Network access granted to sandboxed processes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    /// Fresh user + network namespace: loopback only, and down (Linux)
    #[default]
    Disabled,
    /// Share the host network; for hosts without unprivileged user namespaces
    Inherit,
}

impl FromStr for NetworkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "none" | "off" => Ok(NetworkPolicy::Disabled),
            "inherit" | "host" => Ok(NetworkPolicy::Inherit),
            other => Err(format!("Unknown network policy: {}", other)),
        }
    }
}

impl std::fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkPolicy::Disabled => write!(f, "disabled"),
            NetworkPolicy::Inherit => write!(f, "inherit"),
        }
    }
}

/// Host filesystem view granted to sandboxed processes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemPolicy {
    /// Private mount namespace: read-only system directories, the workspace,
    /// and fresh tmpfs scratch dirs; nothing else of the host (Linux)
    #[default]
    Isolated,
    /// Run against the host filesystem with the invoking user's permissions
    Inherit,
}

impl FromStr for FilesystemPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolated" | "private" => Ok(FilesystemPolicy::Isolated),
            "inherit" | "host" => Ok(FilesystemPolicy::Inherit),
            other => Err(format!("Unknown filesystem policy: {}", other)),
        }
    }
}

impl std::fmt::Display for FilesystemPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilesystemPolicy::Isolated => write!(f, "isolated"),
            FilesystemPolicy::Inherit => write!(f, "inherit"),
        }
    }
}
