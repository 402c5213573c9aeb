//! Engine settings and config file resolution
//!
//! Settings are read-only input to the engine. They are loaded from a TOML
//! file located with the following priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MCAE_CONFIG`)
//! 3. Platform config directory (`<config_dir>/mcae/config.toml`)
//! 4. Built-in defaults (fallback)
//!
//! A missing config file is not an error: the engine starts on defaults.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "MCAE_CONFIG";

/// Channel layout names accepted for `channel_layout`
pub const KNOWN_LAYOUTS: &[&str] = &[
    "1.0", "2.0", "2.1", "3.0", "3.1", "4.0", "4.1", "5.0", "5.1", "7.0", "7.1",
];

/// Resampler quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleQuality {
    Low,
    #[default]
    Medium,
    High,
}

/// Engine settings as read from `config.toml`
///
/// Every field has a built-in default so a partial (or empty) file is valid.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Output device name ("default" selects the host default device)
    #[serde(default = "default_device")]
    pub device: String,

    /// Device used for compressed bitstream output; falls back to `device`
    #[serde(default)]
    pub passthrough_device: Option<String>,

    /// Master volume (0.0-1.0)
    #[serde(default = "default_master_volume")]
    pub master_volume: f32,

    #[serde(default)]
    pub muted: bool,

    /// User channel layout preference, tried after the hardware's own layout
    #[serde(default = "default_channel_layout")]
    pub channel_layout: String,

    /// Mix UI sounds while a media stream is playing
    #[serde(default)]
    pub ui_sounds_during_playback: bool,

    /// Per-stream ring buffer length in seconds of output audio
    #[serde(default = "default_buffer_seconds")]
    pub buffer_seconds: f32,

    /// Data callback fires when a stream holds less than this much audio
    #[serde(default = "default_low_water_ms")]
    pub low_water_ms: u32,

    /// Requested hardware period in frames
    #[serde(default = "default_period_frames")]
    pub period_frames: u32,

    /// PCM rate used when no stream dictates one
    #[serde(default = "default_sample_rate")]
    pub default_sample_rate: u32,

    #[serde(default)]
    pub resample_quality: ResampleQuality,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_device() -> String {
    "default".to_string()
}

fn default_master_volume() -> f32 {
    1.0
}

fn default_channel_layout() -> String {
    "2.0".to_string()
}

fn default_buffer_seconds() -> f32 {
    1.0
}

fn default_low_water_ms() -> u32 {
    100
}

fn default_period_frames() -> u32 {
    512
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            device: default_device(),
            passthrough_device: None,
            master_volume: default_master_volume(),
            muted: false,
            channel_layout: default_channel_layout(),
            ui_sounds_during_playback: false,
            buffer_seconds: default_buffer_seconds(),
            low_water_ms: default_low_water_ms(),
            period_frames: default_period_frames(),
            default_sample_rate: default_sample_rate(),
            resample_quality: ResampleQuality::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineSettings {
    /// Parse settings from TOML text and validate them
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: EngineSettings = toml::from_str(text).map_err(|source| Error::Parse {
            path: "<string>".to_string(),
            source,
        })?;
        Ok(settings.validated())
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: EngineSettings = toml::from_str(&text).map_err(|source| Error::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loaded engine settings from {}", path.display());
        Ok(settings.validated())
    }

    /// Resolve the config file and load it, falling back to defaults
    ///
    /// Only an explicitly named file (CLI or environment) that fails to parse
    /// is an error. A missing default-location file yields defaults.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            ConfigSource::Explicit(path) => Self::load(&path),
            ConfigSource::Platform(path) => Self::load(&path),
            ConfigSource::None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Clamp out-of-range values, logging each correction
    pub fn validated(mut self) -> Self {
        if !(0.0..=1.0).contains(&self.master_volume) || self.master_volume.is_nan() {
            let clamped = if self.master_volume.is_nan() {
                1.0
            } else {
                self.master_volume.clamp(0.0, 1.0)
            };
            warn!(
                "master_volume {} out of range, using {}",
                self.master_volume, clamped
            );
            self.master_volume = clamped;
        }

        if !KNOWN_LAYOUTS.contains(&self.channel_layout.as_str()) {
            warn!(
                "Unknown channel_layout '{}', using {}",
                self.channel_layout,
                default_channel_layout()
            );
            self.channel_layout = default_channel_layout();
        }

        if !(self.buffer_seconds > 0.05 && self.buffer_seconds <= 10.0) {
            warn!(
                "buffer_seconds {} out of range (0.05-10.0], using {}",
                self.buffer_seconds,
                default_buffer_seconds()
            );
            self.buffer_seconds = default_buffer_seconds();
        }

        if self.period_frames == 0 || self.period_frames > 16_384 {
            warn!(
                "period_frames {} out of range, using {}",
                self.period_frames,
                default_period_frames()
            );
            self.period_frames = default_period_frames();
        }

        if !(8_000..=384_000).contains(&self.default_sample_rate) {
            warn!(
                "default_sample_rate {} out of range, using {}",
                self.default_sample_rate,
                default_sample_rate()
            );
            self.default_sample_rate = default_sample_rate();
        }

        self
    }

    /// Output device for bitstream (passthrough) playback
    pub fn passthrough_device(&self) -> &str {
        self.passthrough_device.as_deref().unwrap_or(&self.device)
    }
}

/// Where the settings came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// CLI argument or environment variable
    Explicit(PathBuf),
    /// Existing file in the platform config directory
    Platform(PathBuf),
    /// Nothing found; use defaults
    None,
}

/// Locate the config file following the priority order in the module docs
pub fn resolve_config_path(cli_path: Option<&Path>) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return ConfigSource::Explicit(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return ConfigSource::Explicit(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    if let Some(path) = default_config_path() {
        if path.exists() {
            return ConfigSource::Platform(path);
        }
    }

    ConfigSource::None
}

/// `<config_dir>/mcae/config.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mcae").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let settings = EngineSettings::from_toml_str("").unwrap();
        assert_eq!(settings.device, "default");
        assert_eq!(settings.master_volume, 1.0);
        assert_eq!(settings.channel_layout, "2.0");
        assert_eq!(settings.resample_quality, ResampleQuality::Medium);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.ui_sounds_during_playback);
    }

    #[test]
    fn test_validation_clamps_volume() {
        let settings = EngineSettings::from_toml_str("master_volume = 1.5").unwrap();
        assert_eq!(settings.master_volume, 1.0);

        let settings = EngineSettings::from_toml_str("master_volume = -0.5").unwrap();
        assert_eq!(settings.master_volume, 0.0);
    }

    #[test]
    fn test_unknown_layout_falls_back() {
        let settings = EngineSettings::from_toml_str("channel_layout = \"9.2\"").unwrap();
        assert_eq!(settings.channel_layout, "2.0");
    }

    #[test]
    fn test_passthrough_device_fallback() {
        let mut settings = EngineSettings::default();
        settings.device = "hdmi".to_string();
        assert_eq!(settings.passthrough_device(), "hdmi");

        settings.passthrough_device = Some("spdif".to_string());
        assert_eq!(settings.passthrough_device(), "spdif");
    }

    #[test]
    fn test_bad_quality_is_parse_error() {
        let result = EngineSettings::from_toml_str("resample_quality = \"extreme\"");
        assert!(matches!(result, Err(Error::Parse { .. })));
    }
}
