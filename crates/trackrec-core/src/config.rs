use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory recordings (and the dedupe index) are written to.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Pulse/PipeWire source ffmpeg records from, e.g. `rec.monitor`.
    #[serde(default = "default_source")]
    pub source: String,
    /// FLAC compression level 0..8.
    #[serde(default = "default_compression_level")]
    pub compression_level: u8,
    /// Recordings shorter than this are dropped (skips, scrubs, ads).
    #[serde(default = "default_min_seconds")]
    pub min_seconds: u64,
    /// Skip tracks whose external URL was already kept before.
    #[serde(default = "default_dedupe")]
    pub dedupe: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerConfig {
    /// Preferred MPRIS player, with or without the
    /// `org.mpris.MediaPlayer2.` prefix (e.g. `spotify`).
    #[serde(default)]
    pub preferred: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            compression_level: default_compression_level(),
            min_seconds: default_min_seconds(),
            dedupe: default_dedupe(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recordings")
}

fn default_source() -> String {
    "@DEFAULT_MONITOR@".to_string()
}

fn default_compression_level() -> u8 {
    5
}

fn default_min_seconds() -> u64 {
    30
}

fn default_dedupe() -> bool {
    true
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
