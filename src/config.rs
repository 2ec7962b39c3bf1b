//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pill::SettleTiming;

/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV: &str = "AUDIO_PILL_CONFIG";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Settling poll cadence
    pub settle: SettleTiming,

    /// Feedback sounds
    pub sound: SoundConfig,
}

/// Sound playback settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub enabled: bool,
    /// Player program, given the sound file as its last argument
    pub player: String,
    pub player_args: Vec<String>,
    pub start: Option<PathBuf>,
    pub ending: Option<PathBuf>,
    pub error: Option<PathBuf>,
}

impl Default for SoundConfig {
    fn default() -> Self {
        let player = if cfg!(target_os = "macos") {
            "afplay"
        } else {
            "paplay"
        };
        Self {
            enabled: true,
            player: player.to_string(),
            player_args: Vec::new(),
            start: None,
            ending: None,
            error: None,
        }
    }
}

/// On-disk overrides, all optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    poll_interval_ms: Option<u64>,
    settle_window_ms: Option<u64>,
    sound: Option<SoundConfig>,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("audio-pill");

        let file = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("config.toml"));

        Self::with_defaults(data_dir).merge_file(&file)
    }

    /// Defaults rooted at `data_dir`
    pub fn with_defaults(data_dir: PathBuf) -> Self {
        Self {
            socket_path: data_dir.join("daemon.sock"),
            data_dir,
            settle: SettleTiming::default(),
            sound: SoundConfig::default(),
        }
    }

    /// Apply overrides from a TOML file; a missing file changes nothing
    pub fn merge_file(mut self, path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(self);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file: FileConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config in {}", path.display()))?;

        if let Some(socket_path) = file.socket_path {
            self.socket_path = socket_path;
        }
        if let Some(ms) = file.poll_interval_ms {
            anyhow::ensure!(ms > 0, "poll_interval_ms must be positive");
            self.settle.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.settle_window_ms {
            self.settle.window = Duration::from_millis(ms);
        }
        if let Some(sound) = file.sound {
            self.sound = sound;
        }
        Ok(self)
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
