use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::analytics::PixelFormat;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("frame_step must be at least 1, got {0}")]
    InvalidFrameStep(u64),
    #[error("queue_depth must be at least 1")]
    InvalidQueueDepth,
    #[error("motion scale must be a positive finite number, got {0}")]
    InvalidScale(f64),
    #[error("motion breakpoints must be finite and strictly increasing, got ({0}, {1})")]
    InvalidBreakpoints(f64, f64),
    #[error("confidence threshold must be within [0, 1], got {0}")]
    InvalidConfidence(f32),
    #[error("model {0} configured but object detection support was not compiled in (enable the `yolo` feature)")]
    DetectorUnavailable(PathBuf),
}

fn default_frame_step() -> u64 {
    30
}

fn default_queue_depth() -> usize {
    8
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Detection sampling stride; 1 offers every frame to the classifier.
    #[serde(default = "default_frame_step")]
    pub frame_step: u64,
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_step: default_frame_step(),
            concurrent: false,
            queue_depth: default_queue_depth(),
        }
    }
}

fn default_noise_threshold() -> u8 {
    30
}

fn default_motion_scale() -> f64 {
    1e7
}

fn default_breakpoints() -> (f64, f64) {
    (0.5, 1.0)
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Per-pixel intensity delta a pixel must exceed to count as changed.
    #[serde(default = "default_noise_threshold")]
    pub noise_threshold: u8,
    /// Divisor applied to the changed-pixel total. Not a per-frame average.
    #[serde(default = "default_motion_scale")]
    pub scale: f64,
    #[serde(default = "default_breakpoints")]
    pub breakpoints: (f64, f64),
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            noise_threshold: default_noise_threshold(),
            scale: default_motion_scale(),
            breakpoints: default_breakpoints(),
        }
    }
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_intra_threads() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// ONNX model path or URL. Without one the run is motion-only.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default)]
    pub target_labels: Vec<String>,
    /// Label for each model class id, in order. Empty falls back to COCO.
    #[serde(default)]
    pub class_names: Vec<String>,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: None,
            confidence_threshold: default_confidence_threshold(),
            target_labels: Vec::new(),
            class_names: Vec::new(),
            intra_threads: default_intra_threads(),
        }
    }
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    #[serde(default)]
    pub pixel_format: PixelFormat,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            pixel_format: PixelFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
}

impl Config {
    /// Loads `config.toml` from the working directory, or the built-in
    /// defaults when that file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from(DEFAULT_CONFIG_PATH)
        } else {
            tracing::debug!("no {} found, using defaults", DEFAULT_CONFIG_PATH);
            Ok(Self::default())
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.frame_step == 0 {
            return Err(ConfigError::InvalidFrameStep(self.pipeline.frame_step));
        }

        if self.pipeline.queue_depth == 0 {
            return Err(ConfigError::InvalidQueueDepth);
        }

        let scale = self.motion.scale;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ConfigError::InvalidScale(scale));
        }

        let (low, high) = self.motion.breakpoints;
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(ConfigError::InvalidBreakpoints(low, high));
        }

        let confidence = self.detector.confidence_threshold;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ConfigError::InvalidConfidence(confidence));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.pipeline.frame_step, 30);
        assert!(!config.pipeline.concurrent);
        assert_eq!(config.motion.noise_threshold, 30);
        assert_eq!(config.motion.scale, 1e7);
        assert_eq!(config.motion.breakpoints, (0.5, 1.0));
        assert_eq!(config.detector.confidence_threshold, 0.5);
        assert!(config.detector.model.is_none());
        assert!(config.detector.target_labels.is_empty());
        assert_eq!(config.decoder.pixel_format, PixelFormat::Bgr24);
    }

    #[test]
    fn test_parse_full() {
        let config = Config::parse(
            r#"
            [pipeline]
            frame_step = 5
            concurrent = true

            [motion]
            noise_threshold = 12
            scale = 2e6
            breakpoints = [0.25, 2.0]

            [detector]
            model = "models/best.onnx"
            confidence_threshold = 0.6
            target_labels = ["pen", "cup"]

            [decoder]
            pixel_format = "gray"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.frame_step, 5);
        assert!(config.pipeline.concurrent);
        assert_eq!(config.motion.noise_threshold, 12);
        assert_eq!(config.motion.scale, 2e6);
        assert_eq!(config.motion.breakpoints, (0.25, 2.0));
        assert_eq!(config.detector.model.as_deref(), Some("models/best.onnx"));
        assert_eq!(config.detector.target_labels, vec!["pen", "cup"]);
        assert_eq!(config.decoder.pixel_format, PixelFormat::Gray);
    }

    #[test]
    fn test_rejects_zero_frame_step() {
        let err = Config::parse("[pipeline]\nframe_step = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFrameStep(0)));
    }

    #[test]
    fn test_rejects_negative_frame_step() {
        let err = Config::parse("[pipeline]\nframe_step = -3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_rejects_unordered_breakpoints() {
        let err = Config::parse("[motion]\nbreakpoints = [1.0, 1.0]\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBreakpoints(_, _)));

        let err = Config::parse("[motion]\nbreakpoints = [2.0, 1.0]\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBreakpoints(_, _)));
    }

    #[test]
    fn test_rejects_confidence_out_of_range() {
        let err = Config::parse("[detector]\nconfidence_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfidence(_)));

        let err = Config::parse("[detector]\nconfidence_threshold = -0.1\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfidence(_)));
    }

    #[test]
    fn test_rejects_bad_scale() {
        let err = Config::parse("[motion]\nscale = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidScale(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[detector]\ntarget_labels = [\"pen\"]").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.detector.target_labels, vec!["pen"]);
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
