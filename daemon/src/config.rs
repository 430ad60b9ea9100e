//! Configuration management for deckd
//!
//! Handles loading and validation of the daemon's JSON configuration file.
//! Configuration is stored at `~/.config/deckd/config.json`. Controller
//! profiles are separate `.ini` files found through [`Config::profile_search_path`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runner::{RunnerOptions, DEFAULT_SHELL};

// ============================================================================
// Constants
// ============================================================================

/// Default config directory name
const CONFIG_DIR: &str = "deckd";

/// Default config file name
const CONFIG_FILE: &str = "config.json";

/// Profile directory name under the config directory
const PROFILE_DIR: &str = "profiles";

/// System-wide profile directory
const SYSTEM_PROFILE_DIR: &str = "/etc/deckd/profiles";

/// Profile file extension
pub const PROFILE_EXTENSION: &str = "ini";

/// Allowed reaper poll interval range in milliseconds
const MIN_POLL_INTERVAL_MS: u64 = 10;
const MAX_POLL_INTERVAL_MS: u64 = 5000;

// ============================================================================
// Runner Configuration
// ============================================================================

/// Command runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Interval between checks for exited commands (default: 100)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Time to wait for each running command at shutdown before sending
    /// SIGTERM. Unset means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_grace_ms: Option<u64>,

    /// Shell used to run commands (default: /bin/sh)
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
}

fn default_poll_interval() -> u64 { 100 }
fn default_shell() -> PathBuf { PathBuf::from(DEFAULT_SHELL) }

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            shutdown_grace_ms: None,
            shell: default_shell(),
        }
    }
}

impl RunnerConfig {
    /// Validate and clamp all values
    pub fn validate(&mut self) {
        self.poll_interval_ms = self
            .poll_interval_ms
            .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);
        if self.shell.as_os_str().is_empty() {
            self.shell = default_shell();
        }
    }

    /// Runner options described by this configuration
    pub fn options(&self) -> RunnerOptions {
        RunnerOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            shutdown_grace: self.shutdown_grace_ms.map(Duration::from_millis),
            shell: self.shell.clone(),
        }
    }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Profile loaded at startup
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Extra directories searched for profiles, before the standard ones
    #[serde(default)]
    pub profile_dirs: Vec<PathBuf>,

    /// Command runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Recompile the active profile when its file changes
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    /// Configuration file path (not serialized)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_true() -> bool { true }

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            profile_dirs: Vec::new(),
            runner: RunnerConfig::default(),
            hot_reload: true,
            config_path: None,
        }
    }
}

impl Config {
    /// Get the default config directory path
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Per-user profile directory
    pub fn user_profile_dir() -> Option<PathBuf> {
        Self::default_config_dir().map(|p| p.join(PROFILE_DIR))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if file doesn't exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from file path
    ///
    /// Returns default config if file doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let contents = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut config: Config =
            serde_json::from_str(&contents).map_err(ConfigError::ParseError)?;

        config.validate()?;
        config.config_path = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            profile = %config.profile,
            poll_interval_ms = config.runner.poll_interval_ms,
            hot_reload = config.hot_reload,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate and clamp values
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.runner.validate();

        let name = self.profile.trim();
        if name.is_empty() {
            return Err(ConfigError::ValidationError(
                "Startup profile name is empty".to_string(),
            ));
        }
        self.profile = name.to_string();
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = match &self.config_path {
            Some(p) => p.clone(),
            None => Self::default_config_path()
                .ok_or_else(|| ConfigError::ValidationError("No config path".to_string()))?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::ParseError)?;
        fs::write(&path, contents).map_err(ConfigError::IoError)?;

        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Create default config file if it doesn't exist
    pub fn create_default_if_missing() -> Result<Self, ConfigError> {
        let config = Self::load_default()?;

        if let Some(path) = &config.config_path {
            if !path.exists() {
                config.save()?;
                tracing::info!(path = %path.display(), "Created default configuration file");
            }
        }

        Ok(config)
    }

    /// Directories searched for profiles, in priority order
    ///
    /// Configured directories first, then the per-user directory, then the
    /// system directory.
    pub fn profile_search_path(&self) -> Vec<PathBuf> {
        let mut search = self.profile_dirs.clone();
        search.extend(Self::user_profile_dir());
        search.push(PathBuf::from(SYSTEM_PROFILE_DIR));
        search
    }

    /// Locate a profile in the profile search path
    ///
    /// `.ini` is appended when `name` has no extension of its own.
    pub fn find_profile(&self, name: &str) -> Option<PathBuf> {
        let file = profile_file_name(name);
        self.profile_search_path()
            .into_iter()
            .map(|dir| dir.join(&file))
            .find(|path| path.is_file())
    }

    /// Every profile in the search path
    ///
    /// A profile in a higher priority directory shadows one with the same
    /// name further down.
    pub fn list_profiles(&self) -> Vec<ProfileEntry> {
        let mut found: Vec<ProfileEntry> = Vec::new();

        for dir in self.profile_search_path() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };

            let mut in_dir: Vec<ProfileEntry> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .filter(|path| path.extension().is_some_and(|ext| ext == PROFILE_EXTENSION))
                .filter_map(|path| {
                    let name = path.file_stem()?.to_str()?.to_string();
                    Some(ProfileEntry { name, path })
                })
                .collect();
            in_dir.sort_by(|a, b| a.name.cmp(&b.name));

            for entry in in_dir {
                if !found.iter().any(|f| f.name == entry.name) {
                    found.push(entry);
                }
            }
        }

        found
    }

    /// Create the per-user profile directory and install the shipped profiles
    pub fn install_user_profiles() -> Result<Vec<PathBuf>, ConfigError> {
        let dir = Self::user_profile_dir()
            .ok_or_else(|| ConfigError::ValidationError("No profile directory".to_string()))?;
        install_profiles(&dir)
    }
}

/// A profile file found in the search path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Profiles shipped with deckd, installed on first run
const SHIPPED_PROFILES: &[(&str, &str)] = &[("default.ini", include_str!("../profiles/default.ini"))];

/// File name for a profile name, adding the extension only when missing
fn profile_file_name(name: &str) -> String {
    if Path::new(name).extension().is_some() {
        name.to_string()
    } else {
        format!("{}.{}", name, PROFILE_EXTENSION)
    }
}

/// Write the shipped profiles into `dir`, never overwriting existing files
///
/// Returns the files that were written.
pub fn install_profiles(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    fs::create_dir_all(dir).map_err(ConfigError::IoError)?;

    let mut written = Vec::new();
    for (file, contents) in SHIPPED_PROFILES {
        let path = dir.join(file);
        if path.exists() {
            tracing::debug!(path = %path.display(), "Profile already present, keeping it");
            continue;
        }
        fs::write(&path, contents).map_err(ConfigError::IoError)?;
        tracing::info!(path = %path.display(), "Installed profile");
        written.push(path);
    }

    Ok(written)
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading/writing file
    IoError(std::io::Error),
    /// JSON parsing error
    ParseError(serde_json::Error),
    /// Validation error
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
            ConfigError::ValidationError(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.profile, "default");
        assert!(config.profile_dirs.is_empty());
        assert!(config.hot_reload);
        assert_eq!(config.runner.poll_interval_ms, 100);
        assert_eq!(config.runner.shutdown_grace_ms, None);
    }

    #[test]
    fn test_runner_options() {
        let runner = RunnerConfig {
            poll_interval_ms: 250,
            shutdown_grace_ms: Some(2000),
            shell: PathBuf::from("/bin/bash"),
        };
        let opts = runner.options();
        assert_eq!(opts.poll_interval, Duration::from_millis(250));
        assert_eq!(opts.shutdown_grace, Some(Duration::from_secs(2)));
        assert_eq!(opts.shell, PathBuf::from("/bin/bash"));

        assert_eq!(RunnerConfig::default().options(), RunnerOptions::default());
    }

    #[test]
    fn test_runner_config_validation() {
        let mut runner = RunnerConfig {
            poll_interval_ms: 0, // Should be clamped
            shutdown_grace_ms: None,
            shell: PathBuf::new(),
        };
        runner.validate();
        assert_eq!(runner.poll_interval_ms, 10);
        assert_eq!(runner.shell, PathBuf::from("/bin/sh"));

        runner.poll_interval_ms = 60_000;
        runner.validate();
        assert_eq!(runner.poll_interval_ms, 5000);
    }

    #[test]
    fn test_config_json_parsing() {
        let json = r#"{
            "profile": "desktop",
            "profile_dirs": ["/opt/deckd/profiles"],
            "runner": {
                "shutdown_grace_ms": 1500
            },
            "hot_reload": false
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.profile, "desktop");
        assert_eq!(config.profile_dirs, vec![PathBuf::from("/opt/deckd/profiles")]);
        assert_eq!(config.runner.shutdown_grace_ms, Some(1500));
        // Defaults should fill in missing fields
        assert_eq!(config.runner.poll_interval_ms, 100);
        assert!(!config.hot_reload);
    }

    #[test]
    fn test_config_json_minimal() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.profile, "default");
        assert!(config.hot_reload);
        assert_eq!(config.runner, RunnerConfig::default());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.profile, "default");
        assert_eq!(config.config_path, Some(path));
    }

    #[test]
    fn test_load_clamps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"profile": "  steam  ", "runner": {"poll_interval_ms": 1}}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.profile, "steam");
        assert_eq!(config.runner.poll_interval_ms, 10);
    }

    #[test]
    fn test_load_rejects_empty_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"profile": " "}"#).unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_load_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.profile = "racing".to_string();
        config.runner.shutdown_grace_ms = Some(500);
        config.config_path = Some(path.clone());
        config.save().unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.profile, "racing");
        assert_eq!(loaded.runner.shutdown_grace_ms, Some(500));
    }

    #[test]
    fn test_profile_search_order() {
        let mut config = Config::default();
        config.profile_dirs = vec![PathBuf::from("/first"), PathBuf::from("/second")];

        let path = config.profile_search_path();
        assert_eq!(path[0], PathBuf::from("/first"));
        assert_eq!(path[1], PathBuf::from("/second"));
        assert_eq!(path.last(), Some(&PathBuf::from("/etc/deckd/profiles")));
    }

    #[test]
    fn test_find_profile() {
        let high = tempfile::tempdir().unwrap();
        let low = tempfile::tempdir().unwrap();
        fs::write(high.path().join("desktop.ini"), "[Profile]\n").unwrap();
        fs::write(low.path().join("desktop.ini"), "[Profile]\n").unwrap();
        fs::write(low.path().join("racing.ini"), "[Profile]\n").unwrap();

        let mut config = Config::default();
        config.profile_dirs = vec![high.path().to_path_buf(), low.path().to_path_buf()];

        assert_eq!(
            config.find_profile("desktop"),
            Some(high.path().join("desktop.ini"))
        );
        assert_eq!(
            config.find_profile("racing"),
            Some(low.path().join("racing.ini"))
        );
        assert_eq!(config.find_profile("deckd-test-no-such-profile"), None);
    }

    #[test]
    fn test_find_profile_with_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("desktop.ini"), "[Profile]\n").unwrap();

        let mut config = Config::default();
        config.profile_dirs = vec![dir.path().to_path_buf()];

        let expected = Some(dir.path().join("desktop.ini"));
        assert_eq!(config.find_profile("desktop"), expected);
        assert_eq!(config.find_profile("desktop.ini"), expected);
    }

    #[test]
    fn test_profile_file_name() {
        assert_eq!(profile_file_name("desktop"), "desktop.ini");
        assert_eq!(profile_file_name("desktop.ini"), "desktop.ini");
        assert_eq!(profile_file_name("racing.conf"), "racing.conf");
    }

    #[test]
    fn test_install_profiles() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("deckd").join("profiles");

        let written = install_profiles(&dir).unwrap();
        assert_eq!(written, vec![dir.join("default.ini")]);
        let installed = fs::read_to_string(dir.join("default.ini")).unwrap();
        assert!(installed.contains("[Bindings]"));

        // A second run keeps the user's edits
        fs::write(dir.join("default.ini"), "[Profile]\nName = Mine\n").unwrap();
        assert!(install_profiles(&dir).unwrap().is_empty());
        assert_eq!(
            fs::read_to_string(dir.join("default.ini")).unwrap(),
            "[Profile]\nName = Mine\n"
        );
    }

    #[test]
    fn test_list_profiles() {
        let high = tempfile::tempdir().unwrap();
        let low = tempfile::tempdir().unwrap();
        fs::write(high.path().join("deckd-test-b.ini"), "").unwrap();
        fs::write(high.path().join("deckd-test-a.ini"), "").unwrap();
        fs::write(high.path().join("notes.txt"), "").unwrap();
        fs::write(low.path().join("deckd-test-a.ini"), "").unwrap();
        fs::write(low.path().join("deckd-test-c.ini"), "").unwrap();

        let mut config = Config::default();
        config.profile_dirs = vec![high.path().to_path_buf(), low.path().to_path_buf()];

        let listed: Vec<ProfileEntry> = config
            .list_profiles()
            .into_iter()
            .filter(|p| p.name.starts_with("deckd-test-"))
            .collect();
        assert_eq!(
            listed,
            vec![
                ProfileEntry {
                    name: "deckd-test-a".to_string(),
                    path: high.path().join("deckd-test-a.ini"),
                },
                ProfileEntry {
                    name: "deckd-test-b".to_string(),
                    path: high.path().join("deckd-test-b.ini"),
                },
                ProfileEntry {
                    name: "deckd-test-c".to_string(),
                    path: low.path().join("deckd-test-c.ini"),
                },
            ]
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();

        assert!(json.contains("profile"));
        assert!(json.contains("poll_interval_ms"));
        assert!(!json.contains("shutdown_grace_ms"));
        assert!(!json.contains("config_path"));
    }
}
