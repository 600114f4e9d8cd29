use anyhow::{Context, Result};
use common::RendererBackend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use player::session::PlayoutSettings;
use player::surface::parse_hex_color;
use crate::validate_enum;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub playout: PlayoutConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// General player settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Pacing and backpressure tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayoutConfig {
    /// Decoded frames buffered before admission pauses
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    #[serde(default = "default_admission_interval_ms")]
    pub admission_interval_ms: u64,

    /// Display refresh rate (Hz) used to coalesce status records
    #[serde(default = "default_refresh_rate")]
    pub refresh_rate: u32,

    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            high_water_mark: default_high_water_mark(),
            admission_interval_ms: default_admission_interval_ms(),
            refresh_rate: default_refresh_rate(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

fn default_high_water_mark() -> usize {
    100
}
fn default_admission_interval_ms() -> u64 {
    10
}
fn default_refresh_rate() -> u32 {
    60
}
fn default_stats_interval_secs() -> u64 {
    3
}

/// What to play and where
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// `test://WIDTHxHEIGHT@FPS/FRAMES` or a path to an MP4 file
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default = "default_renderer")]
    pub renderer: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// File the surface is mapped from; anonymous when unset
    #[serde(default)]
    pub surface_path: Option<String>,

    #[serde(default = "default_background")]
    pub background: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source: None,
            renderer: default_renderer(),
            width: default_width(),
            height: default_height(),
            surface_path: None,
            background: default_background(),
        }
    }
}

fn default_renderer() -> String {
    "raster".to_string()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_background() -> String {
    "#000000".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("playout");

        Ok(config_dir.join("config.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_log_level(&self.general.log_level)?;
        self.validate_renderer(&self.session.renderer)?;

        let playout = &self.playout;
        if !(1..=10_000).contains(&playout.high_water_mark) {
            anyhow::bail!(
                "Invalid high_water_mark: {} (must be 1-10000)",
                playout.high_water_mark
            );
        }
        if playout.admission_interval_ms == 0 {
            anyhow::bail!("Invalid admission_interval_ms: must be at least 1");
        }
        if !(1..=480).contains(&playout.refresh_rate) {
            anyhow::bail!(
                "Invalid refresh_rate: {} (must be 1-480 Hz)",
                playout.refresh_rate
            );
        }

        if self.session.width == 0 || self.session.height == 0 {
            anyhow::bail!(
                "Invalid surface size: {}x{}",
                self.session.width,
                self.session.height
            );
        }
        if parse_hex_color(&self.session.background).is_none() {
            anyhow::bail!("Invalid background color: {}", self.session.background);
        }

        Ok(())
    }

    fn validate_log_level(&self, level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }

    fn validate_renderer(&self, renderer: &str) -> Result<()> {
        validate_enum!(
            renderer,
            "raster",
            "2d",
            "gpu-immediate",
            "gpu_immediate",
            "webgl",
            "gpu-modern",
            "gpu_modern",
            "webgpu"
        )
    }

    pub fn renderer(&self) -> RendererBackend {
        RendererBackend::from_str(&self.session.renderer).unwrap_or_default()
    }

    pub fn background(&self) -> (u8, u8, u8, u8) {
        parse_hex_color(&self.session.background).unwrap_or((0, 0, 0, 255))
    }

    /// Surface file path with `~` expanded
    pub fn surface_path(&self) -> Option<PathBuf> {
        self.session
            .surface_path
            .as_deref()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
    }

    pub fn playout_settings(&self) -> PlayoutSettings {
        PlayoutSettings {
            high_water_mark: self.playout.high_water_mark,
            admission_interval: Duration::from_millis(self.playout.admission_interval_ms),
            refresh_rate: self.playout.refresh_rate,
            stats_interval: Duration::from_secs(self.playout.stats_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.playout.high_water_mark, 100);
        assert_eq!(config.playout.refresh_rate, 60);
        assert_eq!(config.session.renderer, "raster");
        assert!(config.validate().is_ok());

        let settings = config.playout_settings();
        assert_eq!(settings, PlayoutSettings::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [playout]
            high_water_mark = 12

            [session]
            source = "test://320x240@25"
            renderer = "webgpu"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.playout.high_water_mark, 12);
        assert_eq!(config.playout.admission_interval_ms, 10);
        assert_eq!(config.session.width, 1280);
        assert_eq!(config.renderer(), RendererBackend::GpuModern);
    }

    #[test]
    fn test_validate_log_level() {
        let config = Config::default();
        assert!(config.validate_log_level("debug").is_ok());
        assert!(config.validate_log_level("verbose").is_err());
    }

    #[test]
    fn test_validate_renderer() {
        let config = Config::default();
        assert!(config.validate_renderer("raster").is_ok());
        assert!(config.validate_renderer("gpu-immediate").is_ok());
        assert!(config.validate_renderer("opengl").is_err());
    }

    #[test]
    fn test_validate_bounds() {
        let mut config = Config::default();
        config.playout.high_water_mark = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.playout.refresh_rate = 1000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.playout.admission_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.background = "nope".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.toml");
        assert_eq!(Config::load_from_path(&missing).unwrap().general.log_level, "info");

        let path = dir.path().join("config.toml");
        fs::write(&path, "[general]\nlog_level = \"debug\"\n").unwrap();
        assert_eq!(Config::load_from_path(&path).unwrap().general.log_level, "debug");

        fs::write(&path, "[general]\nlog_level = \"loud\"\n").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_surface_path_expansion() {
        let mut config = Config::default();
        assert!(config.surface_path().is_none());

        config.session.surface_path = Some("/tmp/playout.bgra".into());
        assert_eq!(
            config.surface_path(),
            Some(PathBuf::from("/tmp/playout.bgra"))
        );
    }
}
