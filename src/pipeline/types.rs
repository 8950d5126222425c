//! Data types flowing between pipeline workers.

/// A decoded video frame in RGB24, one byte per channel, row-major.
#[derive(Debug, Clone)]
pub struct VideoPacket {
    /// Raw RGB24 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Presentation timestamp in microseconds. The demuxer rescales the
    /// ingress timebase once at decode; the muxer rescales into each
    /// egress stream.
    pub pts: i64,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
}

impl VideoPacket {
    pub fn new(data: Vec<u8>, width: u32, height: u32, pts: i64, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            pts,
            sequence,
        }
    }

    /// A uniformly colored frame, used by tests and the mock source.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], pts: i64, sequence: u64) -> Self {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..(width * height) {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height, pts, sequence)
    }
}

/// A decoded audio frame with interleaved 16-bit PCM samples.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved i16 samples (length = samples_per_channel * channels).
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
    /// Presentation timestamp in microseconds (see `VideoPacket::pts`).
    pub pts: i64,
    /// Sequence number for ordering.
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16, pts: i64, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            pts,
            sequence,
        }
    }

    /// Duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        (self.samples.len() / self.channels as usize) as f64 / self.sample_rate as f64
    }
}

/// Which output stream a compressed packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

/// A compressed packet bound for the output muxer. PTS/DTS are in
/// microseconds on the egress clock; the muxer rescales into the stream's
/// timebase when writing.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub kind: StreamKind,
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
    pub keyframe: bool,
}

impl EncodedPacket {
    pub fn new(kind: StreamKind, data: Vec<u8>, pts: i64, dts: i64, keyframe: bool) -> Self {
        Self {
            kind,
            data,
            pts,
            dts,
            keyframe,
        }
    }
}

/// One detected utterance: contiguous 16kHz mono samples plus its position
/// on the stream clock.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// 16kHz mono PCM samples.
    pub samples: Vec<i16>,
    /// Stream-clock second at which speech started.
    pub start_secs: f64,
    /// Stream-clock second at which speech ended.
    pub end_secs: f64,
}

impl SpeechSegment {
    pub fn new(samples: Vec<i16>, start_secs: f64, end_secs: f64) -> Self {
        Self {
            samples,
            start_secs,
            end_secs,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Recognized text for one speech segment.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// Stream metadata captured when the ingress publisher connects. The output
/// muxer needs it to configure egress streams before the first packet.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub has_audio: bool,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

impl Default for StreamInfo {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            has_audio: true,
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_packet_solid_fill() {
        let packet = VideoPacket::solid(4, 2, [10, 20, 30], 100, 7);
        assert_eq!(packet.data.len(), 4 * 2 * 3);
        assert_eq!(&packet.data[0..3], &[10, 20, 30]);
        assert_eq!(&packet.data[21..24], &[10, 20, 30]);
        assert_eq!(packet.pts, 100);
        assert_eq!(packet.sequence, 7);
    }

    #[test]
    fn test_audio_frame_duration() {
        // 48000 Hz stereo, 4800 interleaved samples = 2400 per channel = 50ms
        let frame = AudioFrame::new(vec![0i16; 4800], 48_000, 2, 0, 0);
        assert!((frame.duration_secs() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_audio_frame_duration_zero_rate() {
        let frame = AudioFrame::new(vec![0i16; 100], 0, 2, 0, 0);
        assert_eq!(frame.duration_secs(), 0.0);
    }

    #[test]
    fn test_speech_segment_duration() {
        let segment = SpeechSegment::new(vec![0i16; 16_000], 3.0, 4.0);
        assert!((segment.duration_secs() - 1.0).abs() < 1e-9);
        assert_eq!(segment.samples.len(), 16_000);
    }

    #[test]
    fn test_encoded_packet_fields() {
        let packet = EncodedPacket::new(StreamKind::Audio, vec![1, 2, 3], 960, 960, false);
        assert_eq!(packet.kind, StreamKind::Audio);
        assert_eq!(packet.data, vec![1, 2, 3]);
        assert_eq!(packet.pts, 960);
        assert!(!packet.keyframe);
    }

    #[test]
    fn test_stream_info_default() {
        let info = StreamInfo::default();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.fps, 30);
        assert!(info.has_audio);
    }
}
