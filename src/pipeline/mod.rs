//! Pipeline plumbing: stations, channels, health, and the supervisor.
//!
//! Every worker runs in its own thread; bounded crossbeam channels connect
//! them and provide back-pressure. Receives are timed so the shared stop
//! flag is observed everywhere.

pub mod error;
pub mod health;
pub mod station;
pub mod supervisor;
pub mod types;

pub use error::{ErrorReporter, LogReporter, StationError};
pub use health::{HealthMonitor, Heartbeat, HeartbeatRegistry, PipelineMetrics};
pub use station::{SendMode, Station, StationRunner, WorkerContext};
pub use supervisor::{Pipeline, PipelineHandle, Seams, SpeechSeam};
pub use types::{
    AudioFrame, EncodedPacket, SpeechSegment, StreamInfo, StreamKind, Transcript, VideoPacket,
};
