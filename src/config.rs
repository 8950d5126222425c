use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub pipeline: PipelineQueues,
    pub vad: VadSettings,
    pub recognition: RecognitionConfig,
    pub audio: AudioConfig,
    pub models: ModelPaths,
    pub log: LogConfig,
}

/// Ingress/egress URLs and the consent capture directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub ingress_url: String,
    pub egress_url: String,
    pub capture_dir: PathBuf,
}

/// Channel capacities and worker counts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineQueues {
    pub video_queue: usize,
    pub audio_queue: usize,
    pub speech_queue: usize,
    pub output_queue: usize,
    pub speech_workers: usize,
}

/// Voice activity detection tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadSettings {
    pub threshold: f32,
    pub trailing_silence_ms: u32,
    pub min_segment_ms: u32,
    pub auto_level: bool,
}

/// Face recognition tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub match_threshold: f32,
    pub min_confidence: f32,
}

/// Egress audio codec parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub bitrate: usize,
    pub channels: u16,
}

/// On-disk model locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    pub asr: PathBuf,
    pub classifier_repo: String,
}

/// Diagnostic verbosity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ingress_url: "rtmp://0.0.0.0:1935/live/stream".to_string(),
            egress_url: "rtsp://127.0.0.1:8554/filtered".to_string(),
            capture_dir: PathBuf::from("./consent_captures"),
        }
    }
}

impl Default for PipelineQueues {
    fn default() -> Self {
        Self {
            video_queue: defaults::VIDEO_QUEUE_CAPACITY,
            audio_queue: defaults::AUDIO_QUEUE_CAPACITY,
            speech_queue: defaults::SPEECH_QUEUE_CAPACITY,
            output_queue: defaults::OUTPUT_QUEUE_CAPACITY,
            speech_workers: defaults::SPEECH_WORKERS,
        }
    }
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: defaults::VAD_THRESHOLD,
            trailing_silence_ms: defaults::TRAILING_SILENCE_MS,
            min_segment_ms: defaults::MIN_SEGMENT_MS,
            auto_level: true,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            match_threshold: defaults::MATCH_THRESHOLD,
            min_confidence: defaults::FACE_MIN_CONFIDENCE,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            bitrate: defaults::AUDIO_BITRATE,
            channels: defaults::AUDIO_CHANNELS,
        }
    }
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
            recognizer: PathBuf::from("models/face_recognition_sface_2021dec.onnx"),
            asr: PathBuf::from("models/ggml-small.en.bin"),
            classifier_repo: "jbochi/candle-coedit-quantized".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't
    /// exist. Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject configurations that cannot produce a working pipeline.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pipeline.speech_workers == 0 {
            anyhow::bail!("pipeline.speech_workers must be at least 1");
        }
        if self.pipeline.video_queue == 0
            || self.pipeline.audio_queue == 0
            || self.pipeline.speech_queue == 0
            || self.pipeline.output_queue == 0
        {
            anyhow::bail!("pipeline queue capacities must be positive");
        }
        if !(0.0..=1.0).contains(&self.recognition.match_threshold) {
            anyhow::bail!("recognition.match_threshold must be in [0, 1]");
        }
        if self.audio.channels == 0 || self.audio.channels > 2 {
            anyhow::bail!("audio.channels must be 1 or 2");
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - FACEVEIL_IN_URL → stream.ingress_url
    /// - FACEVEIL_OUT_URL → stream.egress_url
    /// - FACEVEIL_CAPTURE_DIR → stream.capture_dir
    /// - FACEVEIL_SPEECH_WORKERS → pipeline.speech_workers
    /// - FACEVEIL_LOG_LEVEL → log.level
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("FACEVEIL_IN_URL") {
            if !url.is_empty() {
                self.stream.ingress_url = url;
            }
        }

        if let Ok(url) = std::env::var("FACEVEIL_OUT_URL") {
            if !url.is_empty() {
                self.stream.egress_url = url;
            }
        }

        if let Ok(dir) = std::env::var("FACEVEIL_CAPTURE_DIR") {
            if !dir.is_empty() {
                self.stream.capture_dir = PathBuf::from(dir);
            }
        }

        if let Ok(n) = std::env::var("FACEVEIL_SPEECH_WORKERS") {
            if let Ok(n) = n.parse::<usize>() {
                if n > 0 {
                    self.pipeline.speech_workers = n;
                }
            }
        }

        if let Ok(level) = std::env::var("FACEVEIL_LOG_LEVEL") {
            if !level.is_empty() {
                self.log.level = level;
            }
        }

        self
    }

    /// Default configuration file path: ~/.config/faceveil/config.toml
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("faceveil")
            .join("config.toml")
    }
}
