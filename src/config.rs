use clap::ValueEnum;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CaptureSettings;
use crate::constants::{
    DEFAULT_AUTO_SAVE_INTERVAL_SECS, DEFAULT_DATABASE_PATH, DEFAULT_DURATION_LIMIT_MINUTES,
    DEFAULT_FRAME_RATE, DEFAULT_MAX_BUFFERED_MIB, DEFAULT_RETENTION_HOURS,
    DEFAULT_SWEEP_INTERVAL_MINUTES,
};
use crate::error::ConfigError;
use crate::session::SessionLimits;

/// Capture resolution preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// 1280x720
    Low,
    /// 1920x1080
    #[default]
    Medium,
    /// 2560x1440
    High,
    /// 3840x2160
    Ultra,
}

impl Quality {
    pub fn resolution(self) -> (u32, u32) {
        match self {
            Quality::Low => (1280, 720),
            Quality::Medium => (1920, 1080),
            Quality::High => (2560, 1440),
            Quality::Ultra => (3840, 2160),
        }
    }
}

/// Video bitrate preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bitrate {
    /// 2.5 Mbps
    Low,
    /// 5 Mbps
    #[default]
    Medium,
    /// 10 Mbps
    High,
    /// 20 Mbps
    Ultra,
}

impl Bitrate {
    pub fn bits_per_second(self) -> u64 {
        match self {
            Bitrate::Low => 2_500_000,
            Bitrate::Medium => 5_000_000,
            Bitrate::High => 10_000_000,
            Bitrate::Ultra => 20_000_000,
        }
    }
}

/// Encoder process configuration (maps to [capture] section in TOML)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaptureProgram {
    /// Executable to run (e.g. ffmpeg)
    pub program: String,
    /// Arguments; {width}, {height}, {frame_rate} and {bitrate} are substituted
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra input arguments added when system audio is requested
    pub system_audio_args: Option<Vec<String>>,
    /// Extra input arguments added when the microphone is requested
    pub microphone_args: Option<Vec<String>>,
    /// Extra input arguments added when the camera is requested
    pub camera_args: Option<Vec<String>>,
    /// Containers the encoder can produce
    #[serde(default = "default_mime_types")]
    pub mime_types: Vec<String>,
    /// Written to the encoder's stdin on stop so it can finalize its output
    /// (ffmpeg quits on "q"); stdin is closed either way
    pub quit_input: Option<String>,
}

fn default_mime_types() -> Vec<String> {
    vec!["video/webm".to_string()]
}

impl Default for CaptureProgram {
    /// ffmpeg grabbing the X11 display into VP9/WebM on stdout
    fn default() -> Self {
        let args = [
            "-loglevel", "error", "-f", "x11grab", "-video_size", "{width}x{height}",
            "-framerate", "{frame_rate}", "-i", ":0.0", "-c:v", "libvpx-vp9",
            "-deadline", "realtime", "-b:v", "{bitrate}", "-f", "webm", "pipe:1",
        ];
        Self {
            program: "ffmpeg".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            system_audio_args: Some(pulse_input("@DEFAULT_MONITOR@")),
            microphone_args: Some(pulse_input("default")),
            camera_args: None,
            mime_types: vec![
                "video/webm;codecs=vp9,opus".to_string(),
                "video/webm".to_string(),
            ],
            quit_input: Some("q".to_string()),
        }
    }
}

fn pulse_input(source: &str) -> Vec<String> {
    ["-f", "pulse", "-i", source].iter().map(|s| s.to_string()).collect()
}

/// Recorder configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecorderConfig {
    /// SQLite database path (default: tmp/recordings.sqlite)
    pub database: Option<PathBuf>,
    /// Resolution preset (default: medium)
    pub quality: Option<Quality>,
    /// Frames per second (default: 30)
    pub frame_rate: Option<u32>,
    /// Bitrate preset (default: medium)
    pub bitrate: Option<Bitrate>,
    /// Capture system audio (default: true)
    pub system_audio: Option<bool>,
    /// Capture the microphone (default: false)
    pub microphone: Option<bool>,
    /// Capture the camera (default: false)
    pub camera: Option<bool>,
    /// Stop automatically after this many recorded minutes (default: 60)
    pub duration_limit_minutes: Option<u64>,
    /// Ask the encoder for buffered data every N seconds (default: 5)
    pub auto_save_interval_secs: Option<u64>,
    /// Clear the in-memory buffer above this many MiB (default: 50)
    pub max_buffered_mib: Option<u64>,
    /// Purge staged chunks older than this many hours (default: 24)
    pub retention_hours: Option<u64>,
    /// Run the staged chunk sweep every N minutes (default: 60)
    pub sweep_interval_minutes: Option<u64>,
    /// Encoder process (default: ffmpeg x11grab)
    pub capture: Option<CaptureProgram>,
}

impl RecorderConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RecorderConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_rate == Some(0) {
            return Err(ConfigError::Invalid("frame_rate must be greater than 0".to_string()));
        }
        let intervals = [
            ("duration_limit_minutes", self.duration_limit_minutes),
            ("auto_save_interval_secs", self.auto_save_interval_secs),
            ("max_buffered_mib", self.max_buffered_mib),
            ("retention_hours", self.retention_hours),
            ("sweep_interval_minutes", self.sweep_interval_minutes),
        ];
        for (name, value) in intervals {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
            }
        }
        if let Some(capture) = &self.capture {
            if capture.program.trim().is_empty() {
                return Err(ConfigError::Invalid("capture.program must not be empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH))
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        let (width, height) = self.quality.unwrap_or_default().resolution();
        CaptureSettings {
            width,
            height,
            frame_rate: self.frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
            bitrate_bps: self.bitrate.unwrap_or_default().bits_per_second(),
            system_audio: self.system_audio.unwrap_or(true),
            microphone: self.microphone.unwrap_or(false),
            camera: self.camera.unwrap_or(false),
        }
    }

    pub fn limits(&self) -> SessionLimits {
        let minutes = self
            .duration_limit_minutes
            .unwrap_or(DEFAULT_DURATION_LIMIT_MINUTES);
        let mib = self.max_buffered_mib.unwrap_or(DEFAULT_MAX_BUFFERED_MIB);
        let flush_secs = self
            .auto_save_interval_secs
            .unwrap_or(DEFAULT_AUTO_SAVE_INTERVAL_SECS);
        SessionLimits {
            max_duration: Duration::from_secs(minutes * 60),
            max_buffered_bytes: mib * 1024 * 1024,
            flush_interval: Duration::from_secs(flush_secs),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.unwrap_or(DEFAULT_RETENTION_HOURS) * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.sweep_interval_minutes
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_MINUTES)
                * 60,
        )
    }

    pub fn capture_program(&self) -> CaptureProgram {
        self.capture.clone().unwrap_or_default()
    }
}
