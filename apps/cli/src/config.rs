//! CLI configuration management.
//!
//! Reads/writes TOML at `~/.config/quire/cli.toml`. A default file is
//! written on first run so users have something to edit.

use std::path::{Path, PathBuf};

use quire_upload::UploadConfig;
use serde::{Deserialize, Serialize};

/// On-disk CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Directory backing the local storage.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    #[serde(default)]
    pub upload: UploadConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            upload: UploadConfig::default(),
        }
    }
}

impl CliConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing file is created with defaults. A file that does not parse
    /// is left alone and defaults are used.
    pub fn load(path: Option<&Path>) -> anyhow::Result<(Self, PathBuf)> {
        let file_path = match path {
            Some(path) => path.to_path_buf(),
            None => config_file_path(),
        };

        if !file_path.exists() {
            let config = Self::default();
            config.save(&file_path)?;
            tracing::debug!(path = %file_path.display(), "wrote default config");
            return Ok((config, file_path));
        }

        let content = std::fs::read_to_string(&file_path)?;
        let config = match toml::from_str::<CliConfig>(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %file_path.display(),
                    error = %e,
                    "failed to parse cli config, using defaults"
                );
                Self::default()
            }
        };
        Ok((config, file_path))
    }

    /// Saves configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".into()))
}

fn config_file_path() -> PathBuf {
    home_dir().join(".config").join("quire").join("cli.toml")
}

fn default_store_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("quire").join("store")
}
