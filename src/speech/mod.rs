//! Speech recognition and consent classification.

pub mod candle_t5;
pub mod classifier;
pub mod station;
pub mod transcriber;
pub mod whisper;

pub use classifier::{ConsentClassifier, ConsentVerdict, MockConsentClassifier};
pub use station::SpeechWorker;
pub use transcriber::{MockTranscriber, Transcriber};
