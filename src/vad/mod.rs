//! Voice activity detection and speech segmentation.

pub mod detector;
pub mod station;

pub use detector::{calculate_rms, Vad, VadConfig, VadEvent, VadState};
pub use station::VadStation;
