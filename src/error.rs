//! Error types for faceveil.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceveilError {
    // Configuration errors (fatal on start)
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Stream / container errors (transient, retried by the input worker)
    #[error("Stream connect failed for {url}: {message}")]
    StreamConnect { url: String, message: String },

    #[error("Stream read failed: {message}")]
    StreamRead { message: String },

    #[error("Stream write failed: {message}")]
    StreamWrite { message: String },

    // Codec errors (log, skip the affected unit)
    #[error("Decode failed for {stream} packet: {message}")]
    Decode { stream: String, message: String },

    #[error("Encode failed for {stream}: {message}")]
    Encode { stream: String, message: String },

    // Model errors (log, fall back to the safe path)
    #[error("Model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Face detection failed: {message}")]
    Detection { message: String },

    #[error("Face recognition failed: {message}")]
    Recognition { message: String },

    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    #[error("Consent classification failed: {message}")]
    Classification { message: String },

    // Registry / capture errors (skip the offending file, continue)
    #[error("Capture write failed at {path}: {message}")]
    CaptureWrite { path: String, message: String },

    #[error("Registry load failed for {path}: {message}")]
    RegistryLoad { path: String, message: String },

    // Not an error: propagates to a graceful stop
    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl FaceveilError {
    /// True when the error should terminate the process rather than be
    /// recovered worker-locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FaceveilError::ConfigFileNotFound { .. }
                | FaceveilError::ConfigInvalidValue { .. }
                | FaceveilError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FaceveilError>;
