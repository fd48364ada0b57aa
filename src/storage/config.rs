use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::BuiltInScheme;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
}

/// General configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Name of the selected scheme
    #[serde(default = "default_current_scheme")]
    pub current_scheme: String,

    /// Directory holding user scheme files (default: <config dir>/schemes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schemes_dir: Option<PathBuf>,

    /// Built-in schemes to register at startup
    #[serde(default = "default_bundled")]
    pub bundled: Vec<String>,

    /// Log level for the log file
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log file path; logs go to stderr via env_logger when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Echo debug output to stderr as well
    #[serde(default)]
    pub debug_logging: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            current_scheme: default_current_scheme(),
            schemes_dir: None,
            bundled: default_bundled(),
            log_level: default_log_level(),
            log_file: None,
            debug_logging: false,
        }
    }
}

impl GeneralConfig {
    /// Scheme directory, resolved against the config directory
    pub fn schemes_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.schemes_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => config_dir.join(dir),
            None => config_dir.join("schemes"),
        }
    }
}

// Default value functions for serde
fn default_current_scheme() -> String {
    BuiltInScheme::CatppuccinMocha.name().to_string()
}

fn default_bundled() -> Vec<String> {
    BuiltInScheme::all()
        .iter()
        .map(|b| b.name().to_string())
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Trait for configuration storage
pub trait ConfigStorage: Send + Sync {
    /// Load configuration from file
    fn load(&self) -> Result<Config>;

    /// Save configuration to file
    fn save(&self, config: &Config) -> Result<()>;

    /// Get the config file path
    fn path(&self) -> &PathBuf;

    /// Create default configuration file if it doesn't exist
    fn create_default(&self) -> Result<()>;
}

/// TOML-based implementation of ConfigStorage
pub struct TomlConfigStorage {
    path: PathBuf,
}

impl TomlConfigStorage {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigStorage { path }
    }
}

impl ConfigStorage for TomlConfigStorage {
    fn load(&self) -> Result<Config> {
        use anyhow::Context;
        use std::fs;

        if !self.path.exists() {
            log::info!(
                "Config file not found at {:?}, creating default configuration",
                self.path
            );
            self.create_default()?;
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config from {:?}", self.path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", self.path))?;

        log::info!("Loaded configuration from {:?}", self.path);
        log::debug!(
            "Config: current_scheme={}, {} bundled scheme(s)",
            config.general.current_scheme,
            config.general.bundled.len()
        );

        Ok(config)
    }

    fn save(&self, config: &Config) -> Result<()> {
        use anyhow::Context;
        use std::fs;

        let toml_str = toml::to_string_pretty(config)
            .with_context(|| "Failed to serialize configuration")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        fs::write(&self.path, toml_str)
            .with_context(|| format!("Failed to write config to {:?}", self.path))?;

        log::debug!("Saved configuration to {:?}", self.path);

        Ok(())
    }

    fn path(&self) -> &PathBuf {
        &self.path
    }

    fn create_default(&self) -> Result<()> {
        use anyhow::Context;
        use std::fs;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        // Use the example config compiled into the binary
        let example_config = include_str!("../../schemer.toml.example");

        fs::write(&self.path, example_config)
            .with_context(|| format!("Failed to create default config at {:?}", self.path))?;

        log::info!("Created default configuration at {:?}", self.path);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults() {
        let config = GeneralConfig::default();
        assert_eq!(config.current_scheme, "catppuccin-mocha");
        assert_eq!(config.bundled.len(), BuiltInScheme::all().len());
        assert_eq!(config.log_level, "info");
        assert!(config.schemes_dir.is_none());
        assert!(!config.debug_logging);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
        [general]
        current_scheme = "_@user_Mine"
        bundled = ["tokyonight-day"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.current_scheme, "_@user_Mine");
        assert_eq!(config.general.bundled, vec!["tokyonight-day"]);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_schemes_dir_resolution() {
        let mut general = GeneralConfig::default();
        let config_dir = Path::new("/home/me/.config/schemer");
        assert_eq!(general.schemes_dir(config_dir), config_dir.join("schemes"));

        general.schemes_dir = Some(PathBuf::from("mine"));
        assert_eq!(general.schemes_dir(config_dir), config_dir.join("mine"));

        general.schemes_dir = Some(PathBuf::from("/srv/schemes"));
        assert_eq!(general.schemes_dir(config_dir), PathBuf::from("/srv/schemes"));
    }

    #[test]
    fn test_missing_config_writes_example() {
        let dir = TempDir::new().unwrap();
        let storage = TomlConfigStorage::new(dir.path().join("schemer.toml"));

        let config = storage.load().unwrap();
        assert!(storage.path().exists());
        assert_eq!(config.general.current_scheme, "catppuccin-mocha");

        // The example file itself must parse
        let reloaded = storage.load().unwrap();
        assert_eq!(reloaded.general.current_scheme, "catppuccin-mocha");
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = TomlConfigStorage::new(dir.path().join("nested").join("schemer.toml"));

        let mut config = Config::default();
        config.general.current_scheme = "tokyonight-night".to_string();
        storage.save(&config).unwrap();

        let loaded = storage.load().unwrap();
        assert_eq!(loaded.general.current_scheme, "tokyonight-night");
    }
}
