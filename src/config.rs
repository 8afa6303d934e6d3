//! Walker configuration, loaded from the optional ~/.songwalker/config.yaml.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings shared by every walk. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    /// Tempo of the root track.
    pub beats_per_minute: f64,
    /// How far ahead of the audio clock playback schedules notes.
    pub lookahead_seconds: f64,
    pub sample_rate: u32,
    /// Output channels requested from the audio device.
    pub channels: u16,
    /// Silence appended to renders so release tails and echoes are kept.
    pub render_tail_seconds: f64,
    /// Master volume for live playback, `0.0..=1.0`.
    pub volume: f32,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            beats_per_minute: 60.0,
            lookahead_seconds: 0.5,
            sample_rate: 44_100,
            channels: 2,
            render_tail_seconds: 1.0,
            volume: 0.8,
        }
    }
}

/// Get the config file path.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".songwalker").join("config.yaml"))
}

impl WalkerConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load from the standard path. `Ok(None)` if there is no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path).map(Some),
            _ => Ok(None),
        }
    }

    /// Like [`WalkerConfig::load`], falling back to defaults. A broken
    /// config file is logged and ignored.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(Some(config)) => {
                log::debug!("loaded config from {:?}", config_path());
                config
            }
            Ok(None) => Self::default(),
            Err(e) => {
                log::warn!("ignoring config file: {e}");
                Self::default()
            }
        }
    }

    /// Apply command-line overrides, then validate the result.
    pub fn with_overrides(
        mut self,
        beats_per_minute: Option<f64>,
        sample_rate: Option<u32>,
    ) -> Result<Self, ConfigError> {
        if let Some(bpm) = beats_per_minute {
            self.beats_per_minute = bpm;
        }
        if let Some(rate) = sample_rate {
            self.sample_rate = rate;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.beats_per_minute > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "beats_per_minute must be positive, got {}",
                self.beats_per_minute
            )));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(ConfigError::Invalid("channels must be positive".into()));
        }
        if self.lookahead_seconds < 0.0 || self.render_tail_seconds < 0.0 {
            return Err(ConfigError::Invalid(
                "lookahead_seconds and render_tail_seconds cannot be negative".into(),
            ));
        }
        Ok(())
    }
}
