use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geometry::DEFAULT_CONTROL_BAR_HEIGHT;
use crate::launch::LaunchProfile;
use crate::reconnect::ReconnectPolicy;
use crate::tail::DEFAULT_TAIL_CAPACITY;

/// Top-level supervisor config, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub embed: EmbedConfig,
    #[serde(default)]
    pub surface: SurfaceConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Where to find the streaming client and how to talk to the remote device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Explicit client executable. Takes priority over the search paths.
    pub executable: Option<PathBuf>,
    /// Extra directories searched for the client.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
    /// Default launch profile for the CLI.
    #[serde(default)]
    pub profile: LaunchProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_cap_delay_ms")]
    pub cap_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_cap_delay_ms() -> u64 {
    16_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            cap_delay_ms: default_cap_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.cap_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Grace period between SIGTERM and SIGKILL on stop.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// Bytes of client stderr retained for diagnostics.
    #[serde(default = "default_stderr_capacity")]
    pub stderr_capacity: usize,
    /// Bytes of stderr attached to error disconnects.
    #[serde(default = "default_stderr_excerpt")]
    pub stderr_excerpt: usize,
}

fn default_kill_grace_ms() -> u64 {
    3_000
}

fn default_stderr_capacity() -> usize {
    DEFAULT_TAIL_CAPACITY
}

fn default_stderr_excerpt() -> usize {
    1_024
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            kill_grace_ms: default_kill_grace_ms(),
            stderr_capacity: default_stderr_capacity(),
            stderr_excerpt: default_stderr_excerpt(),
        }
    }
}

impl ProcessConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Window embedding helper. Embedding is disabled when `helper` is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    pub helper: Option<PathBuf>,
    /// Arguments placed before the generated target/bounds arguments.
    #[serde(default)]
    pub helper_args: Vec<String>,
    #[serde(default = "default_control_bar_height")]
    pub control_bar_height: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
}

fn default_control_bar_height() -> u32 {
    DEFAULT_CONTROL_BAR_HEIGHT
}

fn default_debounce_ms() -> u64 {
    50
}

fn default_exit_grace_ms() -> u64 {
    500
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            helper: None,
            helper_args: Vec::new(),
            control_bar_height: default_control_bar_height(),
            debounce_ms: default_debounce_ms(),
            exit_grace_ms: default_exit_grace_ms(),
        }
    }
}

impl EmbedConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}

/// Browser-hosted streaming for the platform without a native client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceConfig {
    #[serde(default = "default_surface_url")]
    pub default_url: String,
    #[serde(default = "default_surface_platform")]
    pub platform: String,
}

fn default_surface_url() -> String {
    "https://www.xbox.com/play".to_string()
}

fn default_surface_platform() -> String {
    "xbox".to_string()
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            default_url: default_surface_url(),
            platform: default_surface_platform(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Platform tag that scopes title matching for native sessions.
    #[serde(default = "default_catalog_platform")]
    pub platform: String,
    /// JSON snapshot used by the CLI's in-memory catalog.
    pub path: Option<PathBuf>,
}

fn default_catalog_platform() -> String {
    "psn".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            platform: default_catalog_platform(),
            path: None,
        }
    }
}

impl SupervisorConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        // The client profile may carry a registration key.
        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    /// Save config to a TOML file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Default config location: `<config dir>/streamhost/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("streamhost").join("config.toml"))
}

/// Errors that can occur when loading or saving config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {1}", .0.display())]
    ReadFailed(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config {}: {1}", .0.display())]
    ParseFailed(PathBuf, #[source] toml::de::Error),
    #[error("failed to write config {}: {1}", .0.display())]
    WriteFailed(PathBuf, #[source] std::io::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[source] toml::ser::Error),
}

/// Warn if a config file is world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "config file {} is world-readable (mode {:o}); \
             it may hold a registration key, consider chmod 600",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
