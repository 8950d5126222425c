//! Media I/O: ingress demux/decode, audio transcoding, egress mux.

pub mod ffmpeg;
pub mod input_worker;
pub mod output_worker;
pub mod sink;
pub mod source;
pub mod transcode;

pub use input_worker::{InputWorker, InputWorkerChannels};
pub use output_worker::OutputWorker;
pub use sink::{MediaSink, MockMediaSink};
pub use source::{ConnectionState, MediaEvent, MediaSource, MockMediaSource};
pub use transcode::{AudioEncoder, AudioTranscoder, MockAudioEncoder};
