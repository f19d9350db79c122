//! Application configuration
//!
//! Layers, lowest precedence first: built-in defaults, a TOML file, a `.env`
//! file, and `TESTGEN_*` environment variables.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use testgen_llm::ModelConfig;
use testgen_sandbox::{FilesystemPolicy, NetworkPolicy, SandboxConfig};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "TESTGEN_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

impl ServerConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        5000
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Budget for a whole request, generation and execution included
    #[serde(default = "OrchestratorConfig::default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Suggest implementations for well-known missing functions
    #[serde(default)]
    pub stub_hints: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Self::default_request_timeout(),
            stub_hints: false,
        }
    }
}

impl OrchestratorConfig {
    fn default_request_timeout() -> Duration {
        Duration::from_secs(120)
    }
}

impl AppConfig {
    /// Load from every source.
    ///
    /// `explicit` wins over `$TESTGEN_CONFIG`, which wins over the per-user
    /// file. Only an explicitly named file is required to exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();

        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// `~/.config/testgen/config.toml` (platform config dir)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("testgen").join("config.toml"))
    }

    /// Apply `TESTGEN_*` overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("TESTGEN_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("TESTGEN_PORT") {
            self.server.port = parse_env("TESTGEN_PORT", &port)?;
        }
        if let Some(model) = get("TESTGEN_MODEL") {
            self.model.model = model;
        }
        if let Some(endpoint) = get("TESTGEN_ENDPOINT") {
            self.model.endpoint = endpoint;
        }
        if let Some(key) = get("TESTGEN_API_KEY").or_else(|| get("GROQ_API_KEY")) {
            self.model.api_key = Some(key);
        }
        if let Some(max) = get("TESTGEN_MAX_CONCURRENT") {
            self.sandbox.max_concurrent = parse_env("TESTGEN_MAX_CONCURRENT", &max)?;
        }
        if let Some(network) = get("TESTGEN_NETWORK") {
            self.sandbox.network = parse_env::<NetworkPolicy>("TESTGEN_NETWORK", &network)?;
        }
        if let Some(filesystem) = get("TESTGEN_FILESYSTEM") {
            self.sandbox.filesystem =
                parse_env::<FilesystemPolicy>("TESTGEN_FILESYSTEM", &filesystem)?;
        }
        Ok(())
    }

    /// Check everything except the API key, which only model-calling
    /// commands need
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate()?;
        self.sandbox.validate()?;
        if self.orchestrator.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "orchestrator.request_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
