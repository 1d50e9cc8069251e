//! Stream Settings Module
//!
//! Provides settings loading for the streaming message core.
//! Supports loading from TOML files with environment-specific overrides.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main settings structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct StreamSettings {
    /// Message representation settings
    pub message: MessageSettings,

    /// Stage-to-stage streaming and bridge settings
    pub streaming: StreamingSettings,

    /// Logging settings
    pub logging: LoggingSettings,
}

/// Message representation settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MessageSettings {
    /// Largest payload `preserve()` keeps in memory, in bytes
    pub memory_threshold: u64,

    /// Directory for spilled payloads; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,

    /// Fallback charset label
    pub default_charset: String,
}

/// Streaming and push/pull bridge settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StreamingSettings {
    /// Whether stages may negotiate direct output streams
    pub active: bool,

    /// Slots in the bounded bridge channel
    pub channel_capacity: usize,

    /// Maximum bytes per channel slot
    pub chunk_size: usize,

    /// Prefix for bridge consumer thread names
    pub thread_name_prefix: String,
}

/// Logging settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level filter used when `RUST_LOG` is not set
    pub level: String,

    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            memory_threshold: defaults::message::MEMORY_THRESHOLD,
            temp_dir: None,
            default_charset: defaults::message::DEFAULT_CHARSET.to_string(),
        }
    }
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            active: defaults::streaming::ACTIVE,
            channel_capacity: defaults::streaming::CHANNEL_CAPACITY,
            chunk_size: defaults::streaming::CHUNK_SIZE,
            thread_name_prefix: defaults::streaming::THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::logging::LEVEL.to_string(),
            json: false,
        }
    }
}

impl StreamSettings {
    /// Load settings from files with environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new(defaults::loading::BASE_FILE));

        let mut builder = Config::builder().add_source(File::from(base).required(true));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_dir = base
                .parent()
                .map(|parent| parent.join("environments"))
                .unwrap_or_else(|| PathBuf::from(defaults::loading::ENVIRONMENT_DIR));
            let env_file = env_dir.join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment settings: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment settings not found: {:?}", env_file);
            }
        }

        // Override with environment variables (STREAM_ prefix, `__` between levels)
        builder = builder.add_source(
            Environment::with_prefix(defaults::loading::ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build settings")?;

        let settings: StreamSettings = config
            .try_deserialize()
            .context("Failed to deserialize settings")?;
        settings.validate()?;

        debug!(
            memory_threshold = settings.message.memory_threshold,
            channel_capacity = settings.streaming.channel_capacity,
            "stream settings loaded"
        );
        Ok(settings)
    }

    /// Parse settings from a TOML document, filling gaps with defaults
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let settings: StreamSettings =
            toml::from_str(document).context("Failed to parse settings document")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the core cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.streaming.channel_capacity == 0 {
            bail!("streaming.channel_capacity must be greater than 0");
        }
        if self.streaming.chunk_size == 0 {
            bail!("streaming.chunk_size must be greater than 0");
        }
        if self.streaming.thread_name_prefix.is_empty() {
            bail!("streaming.thread_name_prefix must not be empty");
        }
        if encoding_rs::Encoding::for_label(self.message.default_charset.as_bytes()).is_none() {
            bail!(
                "message.default_charset '{}' is not a known charset",
                self.message.default_charset
            );
        }
        if let Some(dir) = &self.message.temp_dir {
            if dir.as_os_str().is_empty() {
                bail!("message.temp_dir must not be empty when set");
            }
        }
        Ok(())
    }
}

/// Convenience function to load settings with defaults
pub fn load_settings(environment: Option<&str>) -> Result<StreamSettings> {
    StreamSettings::load(None, environment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_base_settings() {
        let dir = tempdir().unwrap();
        let settings_path = dir.path().join("stream.toml");

        let content = r#"
[message]
memory_threshold = 1024
default_charset = "ISO-8859-1"

[streaming]
channel_capacity = 4

[logging]
level = "debug"
"#;

        fs::write(&settings_path, content).unwrap();

        let settings = StreamSettings::load(Some(&settings_path), None).unwrap();

        assert_eq!(settings.message.memory_threshold, 1024);
        assert_eq!(settings.message.default_charset, "ISO-8859-1");
        assert_eq!(settings.streaming.channel_capacity, 4);
        // untouched values keep their defaults
        assert_eq!(settings.streaming.chunk_size, defaults::streaming::CHUNK_SIZE);
        assert!(settings.streaming.active);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn test_environment_overlay() {
        let dir = tempdir().unwrap();
        let settings_path = dir.path().join("stream.toml");
        fs::create_dir_all(dir.path().join("environments")).unwrap();
        fs::write(&settings_path, "[streaming]\nchannel_capacity = 4\n").unwrap();
        fs::write(
            dir.path().join("environments").join("test.toml"),
            "[streaming]\nchannel_capacity = 2\nactive = false\n",
        )
        .unwrap();

        let settings = StreamSettings::load(Some(&settings_path), Some("test")).unwrap();

        assert_eq!(settings.streaming.channel_capacity, 2);
        assert!(!settings.streaming.active);
    }

    #[test]
    fn test_missing_base_file_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        assert!(StreamSettings::load(Some(&missing), None).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut settings = StreamSettings::default();
        settings.streaming.channel_capacity = 0;

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_charset() {
        let result = StreamSettings::from_toml_str("[message]\ndefault_charset = \"no-such-charset\"\n");

        assert!(result.is_err());
    }

    #[test]
    fn test_from_toml_str_defaults() {
        let settings = StreamSettings::from_toml_str("").unwrap();

        assert_eq!(settings, StreamSettings::default());
    }
}
