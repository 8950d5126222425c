//! Media egress seam.

use crate::error::{FaceveilError, Result};
use crate::pipeline::types::{EncodedPacket, StreamInfo, VideoPacket};
use std::sync::{Arc, Mutex};

/// Trait for the egress encoder/muxer.
pub trait MediaSink: Send {
    /// Opens the egress URL and configures output streams from the ingress
    /// metadata.
    fn open(&mut self, info: &StreamInfo) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Encodes and muxes one processed video frame.
    fn write_video(&mut self, frame: &VideoPacket) -> Result<()>;

    /// Muxes one already-encoded audio packet.
    fn write_audio(&mut self, packet: &EncodedPacket) -> Result<()>;

    /// Flushes and closes the output cleanly.
    fn close(&mut self);
}

/// What a mock sink records, for assertions.
#[derive(Default)]
pub struct SinkRecording {
    pub video_pts: Vec<i64>,
    pub audio_pts: Vec<i64>,
    pub opens: usize,
    pub closes: usize,
}

/// Mock sink capturing written PTS sequences.
pub struct MockMediaSink {
    recording: Arc<Mutex<SinkRecording>>,
    open: bool,
    fail_writes: bool,
}

impl MockMediaSink {
    pub fn new() -> Self {
        Self {
            recording: Arc::new(Mutex::new(SinkRecording::default())),
            open: false,
            fail_writes: false,
        }
    }

    /// Every write fails, for exercising the reopen path.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn recording(&self) -> Arc<Mutex<SinkRecording>> {
        self.recording.clone()
    }
}

impl Default for MockMediaSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSink for MockMediaSink {
    fn open(&mut self, _info: &StreamInfo) -> Result<()> {
        self.open = true;
        self.recording.lock().unwrap().opens += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write_video(&mut self, frame: &VideoPacket) -> Result<()> {
        if !self.open {
            return Err(FaceveilError::StreamWrite {
                message: "sink not open".to_string(),
            });
        }
        if self.fail_writes {
            return Err(FaceveilError::StreamWrite {
                message: "mock write failure".to_string(),
            });
        }
        self.recording.lock().unwrap().video_pts.push(frame.pts);
        Ok(())
    }

    fn write_audio(&mut self, packet: &EncodedPacket) -> Result<()> {
        if !self.open {
            return Err(FaceveilError::StreamWrite {
                message: "sink not open".to_string(),
            });
        }
        if self.fail_writes {
            return Err(FaceveilError::StreamWrite {
                message: "mock write failure".to_string(),
            });
        }
        self.recording.lock().unwrap().audio_pts.push(packet.pts);
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.recording.lock().unwrap().closes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::StreamKind;

    #[test]
    fn test_mock_sink_records_writes() {
        let mut sink = MockMediaSink::new();
        let recording = sink.recording();

        sink.open(&StreamInfo::default()).unwrap();
        sink.write_video(&VideoPacket::solid(4, 4, [0, 0, 0], 100, 0))
            .unwrap();
        sink.write_audio(&EncodedPacket::new(StreamKind::Audio, vec![1], 50, 50, false))
            .unwrap();
        sink.close();

        let recorded = recording.lock().unwrap();
        assert_eq!(recorded.video_pts, vec![100]);
        assert_eq!(recorded.audio_pts, vec![50]);
        assert_eq!(recorded.opens, 1);
        assert_eq!(recorded.closes, 1);
    }

    #[test]
    fn test_mock_sink_rejects_writes_when_closed() {
        let mut sink = MockMediaSink::new();
        let result = sink.write_video(&VideoPacket::solid(4, 4, [0, 0, 0], 0, 0));
        assert!(result.is_err());
    }

    #[test]
    fn test_mock_sink_double_close_counts_once() {
        let mut sink = MockMediaSink::new();
        let recording = sink.recording();
        sink.open(&StreamInfo::default()).unwrap();
        sink.close();
        sink.close();
        assert_eq!(recording.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_failing_sink() {
        let mut sink = MockMediaSink::new().failing_writes();
        sink.open(&StreamInfo::default()).unwrap();
        assert!(sink
            .write_video(&VideoPacket::solid(4, 4, [0, 0, 0], 0, 0))
            .is_err());
    }
}
