// anvil-config/src/config.rs
// ============================================================================
// Module: Anvil Configuration
// Description: Configuration loading and validation for the Anvil server.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: anvil-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file resolved from an explicit
//! path, the `ANVIL_CONFIG` environment variable, or `anvil.toml` in the
//! working directory. Explicitly named files must parse and validate;
//! every limit is enforced before the server starts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use anvil_store_sqlite::SqliteStoreConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "anvil.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "ANVIL_CONFIG";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;
/// Default server bind address.
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8150";
/// Default maximum request body size in bytes.
const DEFAULT_MAX_BODY_BYTES: usize = 256 * 1024;
/// Maximum allowed request body size in bytes.
const MAX_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
/// Default iPXE NIC probe count for the bootstrap script.
const DEFAULT_NIC_MAX: u32 = 4;
/// Maximum allowed iPXE NIC probe count.
const MAX_NIC_MAX: u32 = 16;
/// Default repo loader poll interval in milliseconds.
const DEFAULT_LOADER_POLL_MS: u64 = 5_000;
/// Minimum repo loader poll interval in milliseconds.
const MIN_LOADER_POLL_MS: u64 = 100;
/// Maximum repo loader poll interval in milliseconds.
const MAX_LOADER_POLL_MS: u64 = 300_000;
/// Default maximum repo image size in bytes (8 GiB).
const DEFAULT_MAX_FETCH_BYTES: u64 = 8 * 1024 * 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {detail}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Failure detail.
        detail: String,
    },
    /// The config file exceeded the size limit.
    #[error("config {path} exceeds {MAX_CONFIG_FILE_SIZE} bytes")]
    TooLarge {
        /// Config path.
        path: PathBuf,
    },
    /// The config file failed to parse.
    #[error("failed to parse config {path}: {detail}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Parser detail.
        detail: String,
    },
    /// A config value failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address the server binds.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// External base URL advertised in generated boot scripts; defaults
    /// to `http://<bind_addr>`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Maximum accepted request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            base_url: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Provision store backend selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreBackend {
    /// Volatile in-memory store for demos and tests.
    Memory,
    /// Durable `SQLite` store.
    Sqlite(SqliteStoreConfig),
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::Memory
    }
}

/// Microkernel bootstrap settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MicrokernelConfig {
    /// Extra kernel arguments appended to the microkernel command line.
    #[serde(default)]
    pub kernel_args: Option<String>,
    /// Default NIC probe count for the iPXE bootstrap script.
    #[serde(default = "default_nic_max")]
    pub nic_max: u32,
}

impl Default for MicrokernelConfig {
    fn default() -> Self {
        Self {
            kernel_args: None,
            nic_max: default_nic_max(),
        }
    }
}

/// Repo loader tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Outbox poll interval in milliseconds; the loader is also woken by
    /// commit notifications.
    #[serde(default = "default_loader_poll_ms")]
    pub poll_interval_ms: u64,
    /// Maximum accepted repo image size in bytes.
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_loader_poll_ms(),
            max_fetch_bytes: default_max_fetch_bytes(),
        }
    }
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root Anvil configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnvilConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Provision store backend.
    #[serde(default)]
    pub store: StoreBackend,
    /// Root directory for locally fetched repo content.
    #[serde(default = "default_repo_store_root")]
    pub repo_store_root: PathBuf,
    /// Root directory for installer and broker templates.
    #[serde(default = "default_templates_root")]
    pub templates_root: PathBuf,
    /// Microkernel bootstrap settings.
    #[serde(default)]
    pub microkernel: MicrokernelConfig,
    /// Repo loader tuning.
    #[serde(default)]
    pub loader: LoaderConfig,
}

impl Default for AnvilConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreBackend::default(),
            repo_store_root: default_repo_store_root(),
            templates_root: default_templates_root(),
            microkernel: MicrokernelConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

impl AnvilConfig {
    /// Loads configuration from an explicit path, `ANVIL_CONFIG`, or
    /// `anvil.toml`, falling back to defaults only when no file was named
    /// anywhere and the default file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a named file cannot be read, parsed,
    /// or validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path.map(Path::to_path_buf).or_else(|| {
            env::var_os(CONFIG_ENV_VAR).map(PathBuf::from)
        });
        let (path, required) = match explicit {
            Some(path) => (path, true),
            None => (PathBuf::from(DEFAULT_CONFIG_NAME), false),
        };
        if !required && !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let config = Self::load_file(&path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses one config file with the size limit applied.
    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let metadata = fs::metadata(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        toml::from_str(&text).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })
    }

    /// Validates every limit; called on each load.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_body_bytes == 0 || self.server.max_body_bytes > MAX_MAX_BODY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "server.max_body_bytes must be between 1 and {MAX_MAX_BODY_BYTES}"
            )));
        }
        if let Some(base_url) = &self.server.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(ConfigError::Invalid(
                    "server.base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        if self.microkernel.nic_max == 0 || self.microkernel.nic_max > MAX_NIC_MAX {
            return Err(ConfigError::Invalid(format!(
                "microkernel.nic_max must be between 1 and {MAX_NIC_MAX}"
            )));
        }
        if self.loader.poll_interval_ms < MIN_LOADER_POLL_MS
            || self.loader.poll_interval_ms > MAX_LOADER_POLL_MS
        {
            return Err(ConfigError::Invalid(format!(
                "loader.poll_interval_ms must be between {MIN_LOADER_POLL_MS} and \
                 {MAX_LOADER_POLL_MS}"
            )));
        }
        if self.loader.max_fetch_bytes == 0 {
            return Err(ConfigError::Invalid(
                "loader.max_fetch_bytes must be greater than zero".to_string(),
            ));
        }
        if self.repo_store_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("repo_store_root must not be empty".to_string()));
        }
        if self.templates_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("templates_root must not be empty".to_string()));
        }
        Ok(())
    }

    /// Returns the advertised base URL, trailing slash stripped.
    #[must_use]
    pub fn base_url(&self) -> String {
        match &self.server.base_url {
            Some(base_url) => base_url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.server.bind_addr),
        }
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Returns the default bind address.
fn default_bind_addr() -> SocketAddr {
    // The literal is a valid socket address; parsing it cannot fail.
    DEFAULT_BIND_ADDR.parse().unwrap_or(SocketAddr::from(([127, 0, 0, 1], 8150)))
}

/// Returns the default maximum body size.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Returns the default NIC probe count.
const fn default_nic_max() -> u32 {
    DEFAULT_NIC_MAX
}

/// Returns the default loader poll interval.
const fn default_loader_poll_ms() -> u64 {
    DEFAULT_LOADER_POLL_MS
}

/// Returns the default maximum repo image size.
const fn default_max_fetch_bytes() -> u64 {
    DEFAULT_MAX_FETCH_BYTES
}

/// Returns the default repo store root.
fn default_repo_store_root() -> PathBuf {
    PathBuf::from("repo-store")
}

/// Returns the default templates root.
fn default_templates_root() -> PathBuf {
    PathBuf::from("templates")
}
