//! Configuration management for vmbcam
//!
//! Host-side defaults that the native layer does not persist: the access
//! mode and capture timeout applied to newly discovered cameras, the scope
//! used for settings persistence and the log level.

use crate::errors::CameraError;
use crate::native::AccessMode;
use crate::settings::{PersistSettings, PersistType};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VmbConfig {
    pub camera: CameraConfig,
    pub settings: SettingsConfig,
    pub logging: LoggingConfig,
}

/// Defaults applied to cameras discovered after the config is applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub access_mode: AccessMode,
    /// Capture timeout in milliseconds
    pub capture_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub persist_type: PersistType,
    pub max_iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of error, warn, info, debug, trace
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::Full,
            capture_timeout_ms: 2000,
        }
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            persist_type: PersistType::Streamable,
            max_iterations: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CameraConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

impl SettingsConfig {
    pub fn persist_settings(&self) -> PersistSettings {
        PersistSettings::new(self.persist_type).with_max_iterations(self.max_iterations)
    }
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl VmbConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CameraError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: VmbConfig = toml::from_str(&contents)
            .map_err(|e| CameraError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CameraError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CameraError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("vmbcam.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.camera.capture_timeout_ms == 0 {
            return Err("Capture timeout must be positive".to_string());
        }
        if self.camera.access_mode == AccessMode::None {
            return Err("Camera access mode must not be None".to_string());
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(format!(
                "Unknown log level '{}' (expected one of {})",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VmbConfig::default();
        assert_eq!(config.camera.access_mode, AccessMode::Full);
        assert_eq!(config.camera.capture_timeout(), Duration::from_millis(2000));
        assert_eq!(config.settings.persist_type, PersistType::Streamable);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad_timeout = VmbConfig::default();
        bad_timeout.camera.capture_timeout_ms = 0;
        assert!(bad_timeout.validate().is_err());

        let mut bad_mode = VmbConfig::default();
        bad_mode.camera.access_mode = AccessMode::None;
        assert!(bad_mode.validate().is_err());

        let mut bad_level = VmbConfig::default();
        bad_level.logging.level = "chatty".to_string();
        assert!(bad_level.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("vmbcam.toml");

        let mut config = VmbConfig::default();
        config.camera.access_mode = AccessMode::Read;
        config.settings.max_iterations = 5;
        config.save_to_file(&config_path).unwrap();

        let loaded = VmbConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&VmbConfig::default()).unwrap();

        assert!(toml_string.contains("[camera]"));
        assert!(toml_string.contains("[settings]"));
        assert!(toml_string.contains("[logging]"));
        assert!(toml_string.contains("capture_timeout_ms"));
        assert!(toml_string.contains("persist_type"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: VmbConfig = toml::from_str("[camera]\ncapture_timeout_ms = 500\n").unwrap();
        assert_eq!(config.camera.capture_timeout_ms, 500);
        assert_eq!(config.camera.access_mode, AccessMode::Full);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = VmbConfig::load_from_file(dir.path().join("missing.toml"));
        assert_eq!(result.unwrap(), VmbConfig::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[camera\naccess_mode = ").unwrap();
        assert!(matches!(
            VmbConfig::load_from_file(&path),
            Err(CameraError::ConfigError(_))
        ));
    }
}
