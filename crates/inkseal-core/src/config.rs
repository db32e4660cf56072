//! Configuration management for inkseal.
//!
//! Configuration is stored in TOML format.
//!
//! # Configuration File Locations
//!
//! - Linux: `~/.config/inkseal/inkseal.toml`
//! - macOS: `~/Library/Application Support/org.inkseal.inkseal/inkseal.toml`
//! - Windows: `%APPDATA%\inkseal\inkseal\config\inkseal.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use inkseal_crypto::KdfParams;

use crate::bundle::{PrefixError, Prefixes};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid token prefixes
    #[error("Invalid prefixes: {0}")]
    Prefix(#[from] PrefixError),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// What to do with a message whose content hash or signature fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityPolicy {
    /// Deliver the plaintext together with the failed flags.
    #[default]
    Advisory,
    /// Refuse with `INTEGRITY_FAIL`; no plaintext is released.
    Strict,
}

/// inkseal configuration
///
/// # Example TOML
///
/// ```toml
/// [prefixes]
/// message = "INKSEAL|"
/// exchange = "INKSEAL-KEYX|"
///
/// [messaging]
/// sign_messages = true
/// integrity = "advisory"  # "advisory" | "strict"
///
/// [custody.kdf]
/// memory_kib = 19456
/// iterations = 2
/// parallelism = 1
///
/// [storage]
/// dir = ""  # Empty = platform data dir
///
/// [logging]
/// level = "info"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub prefixes: Prefixes,

    #[serde(default)]
    pub messaging: MessagingConfig,

    #[serde(default)]
    pub custody: CustodyConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Sign outgoing envelopes
    #[serde(default = "default_sign_messages")]
    pub sign_messages: bool,

    #[serde(default)]
    pub integrity: IntegrityPolicy,
}

fn default_sign_messages() -> bool {
    true
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            sign_messages: default_sign_messages(),
            integrity: IntegrityPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustodyConfig {
    /// Argon2id cost for passphrase-protected blobs
    #[serde(default)]
    pub kdf: KdfParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory (empty = default location)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured directory, or the platform data directory.
    pub fn resolve_dir(&self) -> Option<PathBuf> {
        match &self.dir {
            Some(dir) if !dir.as_os_str().is_empty() => Some(dir.clone()),
            _ => crate::store::FileStore::default_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load and validate configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from `path`, the default location, or fall back to defaults
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = custom_path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "inkseal", "inkseal")
            .map(|dirs| dirs.config_dir().join("inkseal.toml"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml_string()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.prefixes.validate()?;

        self.custody
            .kdf
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.prefixes.message, "INKSEAL|");
        assert_eq!(config.prefixes.exchange, "INKSEAL-KEYX|");
        assert!(config.messaging.sign_messages);
        assert_eq!(config.messaging.integrity, IntegrityPolicy::Advisory);
        assert_eq!(config.custody.kdf, KdfParams::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_file_is_defaults() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_parse_full() {
        let config = Config::from_toml_str(
            r#"
[prefixes]
message = "MSG|"
exchange = "KEY|"

[messaging]
sign_messages = false
integrity = "strict"

[custody.kdf]
memory_kib = 65536
iterations = 3
parallelism = 2

[storage]
dir = "/tmp/inkseal"

[logging]
level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.prefixes.message, "MSG|");
        assert!(!config.messaging.sign_messages);
        assert_eq!(config.messaging.integrity, IntegrityPolicy::Strict);
        assert_eq!(config.custody.kdf.memory_kib, 65536);
        assert_eq!(config.custody.kdf.parallelism, 2);
        assert_eq!(config.storage.resolve_dir(), Some(PathBuf::from("/tmp/inkseal")));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_storage_dir_is_platform_dir() {
        let config = Config::from_toml_str("[storage]\ndir = \"\"\n").unwrap();
        assert_eq!(config.storage.resolve_dir(), crate::store::FileStore::default_dir());
        assert_eq!(
            Config::default().storage.resolve_dir(),
            crate::store::FileStore::default_dir()
        );
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let config = Config::from_toml_str("[custody.kdf]\niterations = 4\n").unwrap();
        assert_eq!(config.custody.kdf.iterations, 4);
        assert_eq!(config.custody.kdf.memory_kib, KdfParams::default().memory_kib);
        assert_eq!(config.prefixes, Prefixes::default());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_toml_str("[prefixes]\nmessage = \"A|\"\nexchange = \"A|\"\n"),
            Err(ConfigError::Prefix(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[logging]\nlevel = \"loud\"\n"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[custody.kdf]\nparallelism = 0\n"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[messaging]\nintegrity = \"sometimes\"\n"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf").join("inkseal.toml");

        let mut config = Config::default();
        config.messaging.integrity = IntegrityPolicy::Strict;
        config.storage.dir = Some(temp_dir.path().join("data"));
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(Config::load_from(Some(&path)).unwrap(), config);
    }
}
