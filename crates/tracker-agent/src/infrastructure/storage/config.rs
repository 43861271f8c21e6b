//! TOML-based configuration for input-tracker.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\InputTracker\config.toml`
//! - Linux:    `~/.config/input-tracker/config.toml`
//! - macOS:    `~/Library/Application Support/InputTracker/config.toml`
//!
//! Example:
//!
//! ```toml
//! [tracker]
//! log_level = "debug"
//! backend = "auto"
//! restart_policy = "replace"
//!
//! [linux]
//! device_path = "/dev/input/event3"
//! ```
//!
//! # Serde default values
//!
//! Every section and field has a default, so an absent file, an empty file,
//! or a file written by an older version all load.  Fields annotated with
//! `#[serde(default = "some_fn")]` take the value of `some_fn()` when missing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::capture_session::RestartPolicy;
use crate::infrastructure::input_capture::BackendChoice;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub linux: LinuxConfig,
}

/// Backend selection and session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerConfig {
    /// Schema version string – bump when breaking changes are introduced.
    #[serde(default = "default_version")]
    pub version: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Which capture backend to build.
    #[serde(default)]
    pub backend: BackendChoice,
    /// What `start` does while a session is already active.
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// Upper bound on waiting for capture and dispatch threads to exit.
    #[serde(default = "default_stop_join_timeout_ms")]
    pub stop_join_timeout_ms: u64,
}

/// Settings for the evdev backend.  Ignored on other platforms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinuxConfig {
    /// Explicit device node.  When absent, the lowest-numbered `eventN` in
    /// `input_dir` is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_path: Option<PathBuf>,
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// How often an idle capture thread re-checks for a stop request.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_version() -> String {
    "1.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_stop_join_timeout_ms() -> u64 {
    2000
}
fn default_input_dir() -> PathBuf {
    PathBuf::from("/dev/input")
}
fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            log_level: default_log_level(),
            backend: BackendChoice::default(),
            restart_policy: RestartPolicy::default(),
            stop_join_timeout_ms: default_stop_join_timeout_ms(),
        }
    }
}

impl TrackerConfig {
    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }
}

impl Default for LinuxConfig {
    fn default() -> Self {
        Self {
            device_path: None,
            input_dir: default_input_dir(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file, returning
/// `AppConfig::default()` if the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from an explicit path.  A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform config file.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("InputTracker"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("input-tracker"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("InputTracker")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_config_path() -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("tracker_cfg_test_{}", Uuid::new_v4()));
        let path = dir.join("nested").join("config.toml");
        (dir, path)
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_default_config_auto_selects_backend_and_rejects_restart() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.tracker.backend, BackendChoice::Auto);
        assert_eq!(cfg.tracker.restart_policy, RestartPolicy::Reject);
        assert_eq!(cfg.tracker.log_level, "info");
        assert_eq!(cfg.tracker.stop_join_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_default_linux_config_scans_dev_input() {
        let cfg = LinuxConfig::default();

        assert_eq!(cfg.device_path, None);
        assert_eq!(cfg.input_dir, PathBuf::from("/dev/input"));
        assert_eq!(cfg.poll_interval_ms, 100);
    }

    // ── TOML parsing ──────────────────────────────────────────────────────────

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");

        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides_only_given_fields() {
        // Arrange
        let toml_str = r#"
[tracker]
backend = "linux"
restart_policy = "replace"

[linux]
device_path = "/dev/input/event3"
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.tracker.backend, BackendChoice::Linux);
        assert_eq!(cfg.tracker.restart_policy, RestartPolicy::Replace);
        assert_eq!(cfg.tracker.stop_join_timeout_ms, 2000);
        assert_eq!(
            cfg.linux.device_path,
            Some(PathBuf::from("/dev/input/event3"))
        );
        assert_eq!(cfg.linux.poll_interval_ms, 100);
    }

    #[test]
    fn test_unknown_backend_is_a_parse_error() {
        let result: Result<AppConfig, _> = toml::from_str("[tracker]\nbackend = \"wayland\"\n");

        assert!(result.is_err());
    }

    #[test]
    fn test_absent_device_path_is_not_serialized() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");

        assert!(!toml_str.contains("device_path"));
        assert!(toml_str.contains("backend = \"auto\""));
    }

    // ── File round trip ───────────────────────────────────────────────────────

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let (dir, path) = temp_config_path();

        let cfg = load_config_from(&path).expect("missing file is not an error");

        assert_eq!(cfg, AppConfig::default());
        assert!(!dir.exists());
    }

    #[test]
    fn test_save_and_load_round_trip_via_temp_dir() {
        // Arrange
        let (dir, path) = temp_config_path();
        let mut cfg = AppConfig::default();
        cfg.tracker.log_level = "debug".to_string();
        cfg.tracker.stop_join_timeout_ms = 500;
        cfg.linux.device_path = Some(PathBuf::from("/dev/input/event7"));

        // Act
        save_config_to(&cfg, &path).expect("save");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_config_from_malformed_file_returns_parse_error() {
        let (dir, path) = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    // ── config_dir path formation ─────────────────────────────────────────────

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
        // NoPlatformConfigDir is acceptable in a stripped CI environment.
    }
}
