//! Layered configuration.
//!
//! Built-in defaults < global `<data_dir>/config.toml` < project
//! `.agent-avatar.toml` < CLI flags. Every key is optional in every layer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use agent_avatar_cli::ViewerSettings;

pub const DEFAULT_PORT: u16 = 4747;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One partial layer, as read from a file or built from CLI flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub avatar: Option<String>,
    pub frame_rate: Option<u32>,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub row_offset: Option<u16>,
    pub reconnect_delay_ms: Option<u64>,
}

impl ConfigLayer {
    /// Read a layer from `path`. A missing file is an empty layer.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarConfig {
    pub host: String,
    pub port: u16,
    pub avatar: Option<String>,
    pub frame_rate: u32,
    pub width: u16,
    pub height: u16,
    pub row_offset: u16,
    pub reconnect_delay_ms: u64,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            avatar: None,
            frame_rate: 8,
            width: 40,
            height: 20,
            row_offset: 0,
            reconnect_delay_ms: 2000,
        }
    }
}

impl AvatarConfig {
    /// Merge `global`, `project` and `flags` over the defaults, in that order.
    pub fn resolve(
        global: Option<&Path>,
        project: Option<&Path>,
        flags: &ConfigLayer,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for path in [global, project].into_iter().flatten() {
            config.apply(&ConfigLayer::from_file(path)?);
        }
        config.apply(flags);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, layer: &ConfigLayer) {
        if let Some(host) = &layer.host {
            self.host = host.clone();
        }
        if let Some(port) = layer.port {
            self.port = port;
        }
        if let Some(avatar) = &layer.avatar {
            self.avatar = Some(avatar.clone());
        }
        if let Some(frame_rate) = layer.frame_rate {
            self.frame_rate = frame_rate;
        }
        if let Some(width) = layer.width {
            self.width = width;
        }
        if let Some(height) = layer.height {
            self.height = height;
        }
        if let Some(row_offset) = layer.row_offset {
            self.row_offset = row_offset;
        }
        if let Some(delay) = layer.reconnect_delay_ms {
            self.reconnect_delay_ms = delay;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_rate == 0 || self.frame_rate > 60 {
            return Err(ConfigError::Invalid(format!(
                "frame_rate must be between 1 and 60, got {}",
                self.frame_rate
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "render region must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/ws", self.host, self.port)
    }

    pub fn viewer_settings(&self) -> ViewerSettings {
        ViewerSettings {
            frame_rate: self.frame_rate,
            width: self.width,
            height: self.height,
            row_offset: self.row_offset,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            ..ViewerSettings::default()
        }
    }
}
