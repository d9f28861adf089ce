//! Bus configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name the bus registers under
pub const DEFAULT_BUS_NAME: &str = "mxusbserial";

/// Prefix of the character devices published for bound ports
pub const DEFAULT_TTY_PREFIX: &str = "ttyMXUSB";

/// Size of the tty minor table
pub const DEFAULT_TTY_MINORS: u32 = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub tty: TtySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSettings {
    /// Bus type name used in log output
    #[serde(default = "BusSettings::default_name")]
    pub name: String,
    #[serde(default = "BusSettings::default_log_level")]
    pub log_level: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            log_level: Self::default_log_level(),
        }
    }
}

impl BusSettings {
    fn default_name() -> String {
        DEFAULT_BUS_NAME.to_string()
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Character-device endpoint settings
///
/// # Example Configuration
/// ```toml
/// [tty]
/// name_prefix = "ttyMXUSB"
/// minors = 32
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtySettings {
    /// Endpoint name is `<name_prefix><port number>`
    #[serde(default = "TtySettings::default_prefix")]
    pub name_prefix: String,
    /// Port numbers must be below this value
    #[serde(default = "TtySettings::default_minors")]
    pub minors: u32,
}

impl Default for TtySettings {
    fn default() -> Self {
        Self {
            name_prefix: Self::default_prefix(),
            minors: Self::default_minors(),
        }
    }
}

impl TtySettings {
    fn default_prefix() -> String {
        DEFAULT_TTY_PREFIX.to_string()
    }

    fn default_minors() -> u32 {
        DEFAULT_TTY_MINORS
    }
}

impl BusConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/mxusbserial/bus.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: BusConfig = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join(DEFAULT_BUS_NAME).join("bus.toml")
        } else {
            PathBuf::from(".config/mxusbserial/bus.toml")
        }
    }

    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.bus.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.bus.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.bus.name.trim().is_empty() {
            return Err(anyhow!("Bus name must not be empty"));
        }

        if self.tty.name_prefix.trim().is_empty() {
            return Err(anyhow!("tty name_prefix must not be empty"));
        }

        if self.tty.minors == 0 {
            return Err(anyhow!("tty minors must be greater than zero"));
        }

        Ok(())
    }
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<BusConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    BusConfig::load(Some(path_buf))
}
