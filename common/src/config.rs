use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Telegram-style bot endpoint. Without it detections are only logged.
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Stream target started on launch (video id or channel name). When absent
    /// the watcher idles until a `start` control event arrives.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_url_template")]
    pub url_template: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_puller")]
    pub puller: String,
    #[serde(default = "default_transcoder")]
    pub transcoder: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_read_poll")]
    pub read_poll_ms: u64,
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_secs: u64,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// Hue in degrees, saturation and value in percent.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ColorWindow {
    pub hue: [f32; 2],
    pub saturation: [f32; 2],
    pub value: [f32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Per-channel intensity difference above which a pixel counts as changed.
    #[serde(default = "default_diff_threshold")]
    pub diff_threshold: u8,
    #[serde(default = "default_glyph_radius")]
    pub glyph_radius: u32,
    #[serde(default = "default_min_blob_area")]
    pub min_blob_area: u32,
    #[serde(default = "default_typical_letter_width")]
    pub typical_letter_width: u32,
    #[serde(default = "default_min_header_letters")]
    pub min_header_letters: u32,
    #[serde(default = "default_min_donation_letters")]
    pub min_donation_letters: u32,
    #[serde(default = "default_min_border_width")]
    pub min_border_width: u32,
    #[serde(default = "default_cooldown_frames")]
    pub cooldown_frames: u64,
    /// When false the region spans the full frame width.
    #[serde(default = "default_true")]
    pub crop_horizontally: bool,
    #[serde(default)]
    pub search_from_y: u32,
    /// Exclusive lower edge of the analysed rows; the full height when unset.
    #[serde(default)]
    pub search_to_y: Option<u32>,
    #[serde(default = "default_header_color")]
    pub header_color: ColorWindow,
    #[serde(default = "default_donation_color")]
    pub donation_color: ColorWindow,
    /// Intermediate frames and masks are written here as PNG when set.
    #[serde(default)]
    pub debug_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_donations_dir")]
    pub donations_dir: PathBuf,
    /// Raw P/C/N evidence for every detection. Disabled when unset.
    #[serde(default)]
    pub triplets_dir: Option<PathBuf>,
    #[serde(default = "default_screenshots_dir")]
    pub screenshots_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
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

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            diff_threshold: default_diff_threshold(),
            glyph_radius: default_glyph_radius(),
            min_blob_area: default_min_blob_area(),
            typical_letter_width: default_typical_letter_width(),
            min_header_letters: default_min_header_letters(),
            min_donation_letters: default_min_donation_letters(),
            min_border_width: default_min_border_width(),
            cooldown_frames: default_cooldown_frames(),
            crop_horizontally: true,
            search_from_y: 0,
            search_to_y: None,
            header_color: default_header_color(),
            donation_color: default_donation_color(),
            debug_dir: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            donations_dir: default_donations_dir(),
            triplets_dir: None,
            screenshots_dir: default_screenshots_dir(),
        }
    }
}

impl StreamConfig {
    /// Size in bytes of one raw BGR24 frame on the pipe.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn stream_url(&self, target: &str) -> String {
        self.url_template.replace("{target}", target)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms.max(1))
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }
}

impl ColorWindow {
    /// Saturation bounds on the 0..=255 scale.
    pub fn saturation_255(&self) -> [f32; 2] {
        percent_to_255(self.saturation)
    }

    /// Value bounds on the 0..=255 scale.
    pub fn value_255(&self) -> [f32; 2] {
        percent_to_255(self.value)
    }
}

fn percent_to_255(range: [f32; 2]) -> [f32; 2] {
    [range[0] * 255.0 / 100.0, (range[1] * 255.0 + 99.0) / 100.0]
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "config loaded");
        if config.output.triplets_dir.is_none() {
            debug!("evidence triplets disabled");
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(ConfigError::Invalid("stream width and height must be non-zero".into()));
        }
        if self.stream.fps <= 0.0 {
            return Err(ConfigError::Invalid("stream.fps must be positive".into()));
        }
        if let Some(to_y) = self.detector.search_to_y {
            if to_y <= self.detector.search_from_y {
                return Err(ConfigError::Invalid(
                    "detector.search_to_y must be greater than search_from_y".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_url_template() -> String {
    "https://www.youtube.com/watch?v={target}".into()
}
fn default_quality() -> String {
    "1080p,1080p60".into()
}
fn default_puller() -> String {
    "streamlink".into()
}
fn default_transcoder() -> String {
    "ffmpeg".into()
}
fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}
fn default_fps() -> f64 {
    1.0
}
fn default_stall_timeout() -> u64 {
    60
}
fn default_read_poll() -> u64 {
    50
}
fn default_terminate_grace() -> u64 {
    10
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("stream_video_logs")
}
fn default_diff_threshold() -> u8 {
    20
}
fn default_glyph_radius() -> u32 {
    25
}
fn default_min_blob_area() -> u32 {
    10
}
fn default_typical_letter_width() -> u32 {
    14
}
fn default_min_header_letters() -> u32 {
    7
}
fn default_min_donation_letters() -> u32 {
    8
}
fn default_min_border_width() -> u32 {
    600
}
fn default_cooldown_frames() -> u64 {
    13
}
fn default_true() -> bool {
    true
}
fn default_header_color() -> ColorWindow {
    ColorWindow {
        hue: [196.0, 213.0],
        saturation: [70.0, 100.0],
        value: [70.0, 100.0],
    }
}
fn default_donation_color() -> ColorWindow {
    ColorWindow {
        hue: [40.0, 58.0],
        saturation: [50.0, 100.0],
        value: [70.0, 100.0],
    }
}
fn default_donations_dir() -> PathBuf {
    PathBuf::from("donates")
}
fn default_screenshots_dir() -> PathBuf {
    PathBuf::from("screenshots")
}
fn default_api_base() -> String {
    "https://api.telegram.org".into()
}
fn default_notify_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}
