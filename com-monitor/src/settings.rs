//! Monitor settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use com_detect::{PortId, ScannerConfig, DEFAULT_RESERVED_PORT};
use com_watch::WatcherConfig;
use serde::{Deserialize, Serialize};

/// Monitor settings, persisted as JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// How often to look for port changes, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Hide the reserved port
    #[serde(default = "default_true")]
    pub ignore_reserved_port: bool,
    /// Port treated as reserved (platform default when unset)
    #[serde(default)]
    pub reserved_port: Option<String>,
    /// Skip ports whose name or product contains one of these
    #[serde(default = "default_skip_patterns")]
    pub skip_patterns: Vec<String>,
    /// Print events as JSON lines
    #[serde(default)]
    pub json_output: bool,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_skip_patterns() -> Vec<String> {
    vec![
        "Bluetooth".to_string(),
        "debug".to_string(),
        "emulator".to_string(),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            ignore_reserved_port: true,
            reserved_port: None,
            skip_patterns: default_skip_patterns(),
            json_output: false,
        }
    }
}

impl Settings {
    /// Get the XDG config directory for comwatch
    /// Uses $XDG_CONFIG_HOME/comwatch on Linux/macOS, falls back to ~/.config/comwatch
    fn config_dir() -> Option<PathBuf> {
        // First try XDG_CONFIG_HOME environment variable
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("comwatch"));
            }
        }

        // Fall back to ~/.config/comwatch (XDG default)
        dirs::home_dir().map(|h| h.join(".config").join("comwatch"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Self {
        Self::settings_path()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Load settings from an explicit file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("invalid settings in {}", path.display()))
    }

    /// Save settings to `path`, or the default location
    pub fn save(&self, path: Option<&Path>) -> anyhow::Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::settings_path().context("could not determine settings path")?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create settings directory")?;
        }

        let json = serde_json::to_string_pretty(self).context("failed to serialize settings")?;
        std::fs::write(&path, json).context("failed to write settings")?;

        Ok(path)
    }

    /// Watcher configuration derived from these settings
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            ignore_reserved_port: self.ignore_reserved_port,
            reserved_port: PortId::from(
                self.reserved_port
                    .as_deref()
                    .unwrap_or(DEFAULT_RESERVED_PORT),
            ),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }

    /// Scanner configuration derived from these settings
    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            skip_patterns: self.skip_patterns.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"json_output": true}"#).unwrap();
        assert!(settings.json_output);
        assert_eq!(settings.poll_interval_ms, 1000);
        assert!(settings.ignore_reserved_port);
        assert_eq!(settings.skip_patterns, default_skip_patterns());
    }

    #[test]
    fn test_watcher_config_mapping() {
        let settings = Settings {
            poll_interval_ms: 0,
            ignore_reserved_port: false,
            reserved_port: Some("COM2".to_string()),
            ..Default::default()
        };
        let config = settings.watcher_config();
        assert!(!config.ignore_reserved_port);
        assert_eq!(config.reserved_port, PortId::from("COM2"));
        assert_eq!(config.poll_interval, Duration::from_millis(1));

        let config = Settings::default().watcher_config();
        assert_eq!(config.reserved_port.as_str(), DEFAULT_RESERVED_PORT);
    }

    #[test]
    fn test_save_and_load_from_file() {
        let path = std::env::temp_dir()
            .join(format!("comwatch-settings-{}", std::process::id()))
            .join("settings.json");
        let settings = Settings {
            poll_interval_ms: 250,
            skip_patterns: vec!["usbmodem".to_string()],
            ..Default::default()
        };

        let written = settings.save(Some(&path)).unwrap();
        assert_eq!(written, path);
        assert_eq!(Settings::load_from(&path).unwrap(), settings);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let path = std::env::temp_dir().join("comwatch-definitely-missing.json");
        assert!(Settings::load_from(&path).is_err());
    }
}
