//! Consent subsystem: capture files, the in-memory registry, the directory
//! monitor, and the speech-to-video capture latch.

pub mod capture;
pub mod filename;
pub mod latch;
pub mod monitor;
pub mod registry;

pub use capture::CaptureWriter;
pub use latch::{CaptureLatch, CaptureRequest};
pub use monitor::{load_existing, ConsentMonitor};
pub use registry::{ConsentRecord, ConsentRegistry};
