//! Whisper-based speech-to-text transcription.
//!
//! Implements the `Transcriber` trait with whisper-rs. Requires the
//! `whisper` feature and cmake at build time.

use std::path::PathBuf;

#[cfg(feature = "whisper")]
use crate::error::{FaceveilError, Result};
#[cfg(feature = "whisper")]
use crate::speech::transcriber::Transcriber;
#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    install_logging_hooks, FullParams, SamplingStrategy, WhisperContext,
    WhisperContextParameters,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Configuration for the Whisper transcriber.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to the ggml model file.
    pub model_path: PathBuf,
    /// Language code; the stream is expected to be English.
    pub language: String,
    /// Number of inference threads (None = whisper default).
    pub threads: Option<usize>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-small.en.bin"),
            language: "en".to_string(),
            threads: None,
        }
    }
}

/// Whisper transcriber. The context is wrapped in a Mutex: a single
/// instance serializes inference, so the pipeline creates one per speech
/// worker.
#[cfg(feature = "whisper")]
pub struct WhisperTranscriber {
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl WhisperTranscriber {
    pub fn new(config: WhisperConfig) -> Result<Self> {
        // Route whisper.cpp's own logging through the log facade once.
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(FaceveilError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = config
            .model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let context_params = WhisperContextParameters::default();
        let context = WhisperContext::new_with_params(
            config
                .model_path
                .to_str()
                .ok_or_else(|| FaceveilError::Transcription {
                    message: "invalid UTF-8 in model path".to_string(),
                })?,
            context_params,
        )
        .map_err(|e| FaceveilError::Transcription {
            message: format!("failed to load Whisper model: {e}"),
        })?;

        Ok(Self {
            context: Mutex::new(context),
            config,
            model_name,
        })
    }

    /// Whisper expects f32 samples normalized to [-1.0, 1.0].
    pub fn convert_audio(samples: &[i16]) -> Vec<f32> {
        samples
            .iter()
            .map(|&sample| sample as f32 / 32768.0)
            .collect()
    }
}

#[cfg(feature = "whisper")]
impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[i16]) -> Result<String> {
        let audio_f32 = Self::convert_audio(audio);

        let context = self
            .context
            .lock()
            .map_err(|e| FaceveilError::Transcription {
                message: format!("failed to acquire context lock: {e}"),
            })?;

        let mut state = context
            .create_state()
            .map_err(|e| FaceveilError::Transcription {
                message: format!("failed to create Whisper state: {e}"),
            })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.config.language));
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio_f32)
            .map_err(|e| FaceveilError::Transcription {
                message: format!("Whisper inference failed: {e}"),
            })?;

        let mut transcription = String::new();
        for segment in state.as_iter() {
            if let Ok(text) = segment.to_str_lossy() {
                transcription.push_str(&text);
            }
        }

        Ok(transcription.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
