//! Configuration loading for warden.
//!
//! The file is read once at startup from `~/.warden/config.toml`. A missing
//! file is not an error: every setting has a default.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use warden_lsp::SupervisorConfig;

#[derive(Debug, Default, Deserialize)]
pub struct WardenConfig {
    /// Server launch, output routing, and request settings.
    pub server: Option<SupervisorConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl WardenConfig {
    /// Load from the default location. `Ok(None)` if there is no home
    /// directory or no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// The supervisor settings, defaulted when the section is absent.
    #[must_use]
    pub fn supervisor(self) -> SupervisorConfig {
        self.server.unwrap_or_default()
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".warden").join("config.toml"))
}
