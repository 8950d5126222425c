//! Default configuration constants shared across the crate.

use std::time::Duration;

/// Sample rate the VAD and speech recognizer operate at.
///
/// 16kHz mono is the standard input for speech models and keeps the VAD
/// cheap enough to run inline with real-time audio.
pub const SPEECH_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of the Opus egress audio stream.
pub const EGRESS_SAMPLE_RATE: u32 = 48_000;

/// Number of samples per VAD analysis chunk (32ms at 16kHz).
pub const VAD_CHUNK_SIZE: usize = 512;

/// Default RMS threshold for detecting speech (0.0 to 1.0).
pub const VAD_THRESHOLD: f32 = 0.02;

/// Trailing silence before a speech segment is closed.
pub const TRAILING_SILENCE_MS: u32 = 500;

/// Minimum utterance length; shorter segments are discarded.
pub const MIN_SEGMENT_MS: u32 = 300;

/// SFace cosine similarity cutoff for a consent match.
pub const MATCH_THRESHOLD: f32 = 0.363;

/// Detector score threshold below which candidate boxes are discarded
/// outright.
pub const FACE_SCORE_THRESHOLD: f32 = 0.7;

/// Minimum detector confidence for a face to be recognized or blurred
/// individually (lower-confidence detections are still blurred).
pub const FACE_MIN_CONFIDENCE: f32 = 0.5;

/// Padding added around a detected face before blurring, as a fraction of
/// the smaller bbox side.
pub const FACE_PADDING_RATIO: f32 = 0.1;

/// Larger padding used when cropping a head for a consent capture.
pub const HEAD_CAPTURE_PADDING_RATIO: f32 = 0.3;

/// Blur kernel size as a fraction of the padded bbox's larger side.
/// Scaling with the box keeps small faces unidentifiable.
pub const BLUR_KERNEL_RATIO: f32 = 0.45;

/// Queue capacities. The audio queue is deeper than the video queue because
/// audio frames arrive at a much higher rate than video frames.
pub const VIDEO_QUEUE_CAPACITY: usize = 60;
pub const AUDIO_QUEUE_CAPACITY: usize = 200;
pub const SPEECH_QUEUE_CAPACITY: usize = 20;
pub const OUTPUT_QUEUE_CAPACITY: usize = 60;

/// Number of parallel speech workers (ASR + consent classifier).
pub const SPEECH_WORKERS: usize = 2;

/// Timed-receive interval; every worker observes the stop flag at least
/// this often.
pub const QUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-attempt ingress connect timeout and retry backoff.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Heartbeat publication interval and staleness threshold.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const HEARTBEAT_STALE: Duration = Duration::from_secs(5);

/// Join deadlines on shutdown.
pub const JOIN_DEADLINE: Duration = Duration::from_secs(1);
pub const JOIN_DEADLINE_ASR: Duration = Duration::from_secs(5);

/// Egress audio defaults.
pub const AUDIO_BITRATE: usize = 64_000;
pub const AUDIO_CHANNELS: u16 = 2;

/// JPEG quality for consent captures.
pub const CAPTURE_JPEG_QUALITY: u8 = 95;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vad_chunk_is_a_power_of_two_at_speech_rate() {
        assert_eq!(VAD_CHUNK_SIZE, 512);
        assert_eq!(SPEECH_SAMPLE_RATE % 1000, 0);
    }

    #[test]
    fn queue_timeout_shorter_than_join_deadline() {
        assert!(QUEUE_TIMEOUT < JOIN_DEADLINE);
        assert!(JOIN_DEADLINE <= JOIN_DEADLINE_ASR);
    }
}
