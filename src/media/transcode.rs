//! Audio transcoding station.
//!
//! Re-encodes decoded audio frames to the egress codec. The encoder seam
//! keeps the station testable; the production encoder lives in
//! `media::ffmpeg`.

use crate::error::{FaceveilError, Result};
use crate::pipeline::error::StationError;
use crate::pipeline::health::{bump, PipelineMetrics};
use crate::pipeline::station::Station;
use crate::pipeline::types::{AudioFrame, EncodedPacket, StreamKind};
use std::sync::Arc;

/// Trait for the egress audio encoder.
pub trait AudioEncoder: Send {
    /// Encodes one decoded frame into zero or more packets (encoders
    /// buffer internally until a full codec frame is available).
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<EncodedPacket>>;

    /// Drains any buffered audio at end of stream.
    fn finish(&mut self) -> Result<Vec<EncodedPacket>>;
}

/// Mock encoder: one packet per input frame, PTS mapped to the egress
/// clock against the first frame's timestamp, exactly once at stream
/// start.
pub struct MockAudioEncoder {
    first_pts: Option<i64>,
    fail: bool,
}

impl MockAudioEncoder {
    pub fn new() -> Self {
        Self {
            first_pts: None,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            first_pts: None,
            fail: true,
        }
    }
}

impl Default for MockAudioEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEncoder for MockAudioEncoder {
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<EncodedPacket>> {
        if self.fail {
            return Err(FaceveilError::Encode {
                stream: "audio".to_string(),
                message: "mock encode failure".to_string(),
            });
        }
        let base = *self.first_pts.get_or_insert(frame.pts);
        let pts = frame.pts - base;
        Ok(vec![EncodedPacket::new(
            StreamKind::Audio,
            vec![0u8; 16],
            pts,
            pts,
            false,
        )])
    }

    fn finish(&mut self) -> Result<Vec<EncodedPacket>> {
        Ok(Vec::new())
    }
}

/// Station wrapping the encoder between the audio fanout and the muxer.
pub struct AudioTranscoder {
    encoder: Box<dyn AudioEncoder>,
    metrics: Arc<PipelineMetrics>,
    packets_produced: u64,
}

impl AudioTranscoder {
    pub fn new(encoder: Box<dyn AudioEncoder>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            encoder,
            metrics,
            packets_produced: 0,
        }
    }
}

impl Station for AudioTranscoder {
    type Input = AudioFrame;
    type Output = EncodedPacket;

    fn name(&self) -> &'static str {
        "audio-transcoder"
    }

    fn process(&mut self, frame: AudioFrame) -> std::result::Result<Vec<EncodedPacket>, StationError> {
        let packets = self
            .encoder
            .encode(&frame)
            .map_err(|e| StationError::Recoverable(format!("encode: {e}")))?;

        for _ in &packets {
            bump(&self.metrics.audio_packets);
        }
        self.packets_produced += packets.len() as u64;
        Ok(packets)
    }

    fn flush(&mut self) -> Vec<EncodedPacket> {
        match self.encoder.finish() {
            Ok(packets) => packets,
            Err(e) => {
                log::warn!("audio encoder flush failed: {e}");
                Vec::new()
            }
        }
    }

    fn shutdown(&mut self) {
        log::info!("audio transcoder produced {} packets", self.packets_produced);
    }
}
