//! Surface configuration
//!
//! TOML-backed settings for which card to open and how to pick outputs.

use crate::card::DRI_DIR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// System-wide configuration directory
pub const CONFIG_DIR: &str = "/etc/drm-surface";

/// Environment variable overriding the configured card index
pub const CARD_ENV: &str = "DRM_SURFACE_CARD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceConfig {
    /// Card index N in `<dri_dir>/cardN`
    #[serde(default)]
    pub card: u32,

    #[serde(default = "default_dri_dir")]
    pub dri_dir: PathBuf,

    /// Only drive connectors that report a connected sink
    #[serde(default = "default_require_connected")]
    pub require_connected: bool,
}

fn default_dri_dir() -> PathBuf {
    PathBuf::from(DRI_DIR)
}

fn default_require_connected() -> bool {
    true
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            card: 0,
            dri_dir: default_dri_dir(),
            require_connected: default_require_connected(),
        }
    }
}

impl SurfaceConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from the user file, then the system file, else defaults; the
    /// card index can then be overridden through [`CARD_ENV`].
    pub fn load_default() -> Result<Self, ConfigError> {
        let mut config = Self::default_paths()
            .into_iter()
            .find(|path| path.exists())
            .map(|path| Self::load(&path))
            .transpose()?
            .unwrap_or_else(|| {
                tracing::debug!("No configuration file found, using defaults");
                Self::default()
            });

        if let Ok(value) = std::env::var(CARD_ENV) {
            config.apply_card_override(&value)?;
        }

        Ok(config)
    }

    /// Candidate configuration files, most specific first
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        let user_dir = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
        if let Some(dir) = user_dir {
            paths.push(dir.join("drm-surface").join("config.toml"));
        }

        paths.push(Path::new(CONFIG_DIR).join("config.toml"));
        paths
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Parse and apply a card index given as text
    pub fn apply_card_override(&mut self, value: &str) -> Result<(), ConfigError> {
        self.card = value.trim().parse().map_err(|_| {
            ConfigError::Invalid(format!("{} must be a card index, got {:?}", CARD_ENV, value))
        })?;
        Ok(())
    }

    /// Device node for the configured card
    pub fn device_path(&self) -> PathBuf {
        self.dri_dir.join(format!("card{}", self.card))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = SurfaceConfig::default();
        assert_eq!(config.card, 0);
        assert!(config.require_connected);
        assert_eq!(config.device_path(), PathBuf::from("/dev/dri/card0"));
    }

    #[test]
    fn test_load_partial_config() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "card = 2").unwrap();

        let config = SurfaceConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.card, 2);
        assert_eq!(config.dri_dir, PathBuf::from("/dev/dri"));
        assert!(config.require_connected);
        assert_eq!(config.device_path(), PathBuf::from("/dev/dri/card2"));
    }

    #[test]
    fn test_load_full_config() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let config_content = r#"
card = 1
dri_dir = "/tmp/dri"
require_connected = false
"#;
        write!(temp_file, "{}", config_content).unwrap();

        let config = SurfaceConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.device_path(), PathBuf::from("/tmp/dri/card1"));
        assert!(!config.require_connected);
    }

    #[test]
    fn test_load_missing_file() {
        let err = SurfaceConfig::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "card = \"zero\"").unwrap();

        let err = SurfaceConfig::load(temp_file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let config = SurfaceConfig {
            card: 3,
            require_connected: false,
            ..SurfaceConfig::default()
        };
        config.save(&path).unwrap();

        assert_eq!(SurfaceConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_card_override() {
        let mut config = SurfaceConfig::default();
        config.apply_card_override(" 4 ").unwrap();
        assert_eq!(config.card, 4);

        let err = config.apply_card_override("four").unwrap_err();
        assert!(format!("{}", err).contains(CARD_ENV));
        assert_eq!(config.card, 4);
    }

    #[test]
    fn test_default_paths_end_with_system_config() {
        let paths = SurfaceConfig::default_paths();
        assert_eq!(
            paths.last(),
            Some(&PathBuf::from("/etc/drm-surface/config.toml"))
        );
    }
}
