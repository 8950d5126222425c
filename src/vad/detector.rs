//! Voice activity detection.
//!
//! RMS-based thresholding with a small state machine to ride out short
//! pauses, plus optional auto-leveling that tracks the noise floor and
//! adapts the speech threshold to it. Silence is measured in samples, not
//! wall clock, so behavior is deterministic for a given stream.

use crate::defaults;

/// Configuration for voice activity detection.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// RMS threshold for detecting speech (0.0 to 1.0).
    pub speech_threshold: f32,
    /// Duration of trailing silence that closes an utterance.
    pub trailing_silence_ms: u32,
    /// Adapt the threshold to the measured noise floor.
    pub auto_level: bool,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::VAD_THRESHOLD,
            trailing_silence_ms: defaults::TRAILING_SILENCE_MS,
            auto_level: true,
        }
    }
}

/// Current state of voice activity detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech detected.
    Idle,
    /// Speech is being detected.
    Speaking,
    /// Silence detected, waiting to confirm speech end.
    MaybeSilence,
}

/// Events emitted per processed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech has started with this chunk.
    SpeechStart,
    /// Ongoing speech.
    Speech,
    /// No speech in this chunk.
    Silence,
    /// Trailing silence exceeded; the utterance is over.
    SpeechEnd,
}

/// Voice activity detector state machine over fixed-size 16kHz mono chunks.
pub struct Vad {
    config: VadConfig,
    sample_rate: u32,
    state: VadState,
    threshold: f32,
    silence_samples: usize,
    stop_silence_samples: usize,
    level_history: Vec<f32>,
}

const LEVEL_HISTORY_MAX: usize = 100;

impl Vad {
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        let stop_silence_samples =
            (sample_rate as usize * config.trailing_silence_ms as usize) / 1000;
        Self {
            config,
            sample_rate,
            state: VadState::Idle,
            threshold: config.speech_threshold,
            silence_samples: 0,
            stop_silence_samples,
            level_history: Vec::new(),
        }
    }

    /// Processes one chunk of 16kHz mono samples.
    pub fn process_chunk(&mut self, chunk: &[i16]) -> VadEvent {
        let rms = calculate_rms(chunk);

        if self.config.auto_level {
            self.level_history.push(rms);
            if self.level_history.len() > LEVEL_HISTORY_MAX {
                self.level_history.remove(0);
            }
            self.adjust_threshold();
        }

        let is_speech = rms > self.threshold;

        match self.state {
            VadState::Idle => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.silence_samples = 0;
                    VadEvent::SpeechStart
                } else {
                    VadEvent::Silence
                }
            }
            VadState::Speaking => {
                if is_speech {
                    VadEvent::Speech
                } else {
                    self.state = VadState::MaybeSilence;
                    self.silence_samples = chunk.len();
                    VadEvent::Silence
                }
            }
            VadState::MaybeSilence => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.silence_samples = 0;
                    VadEvent::Speech
                } else {
                    self.silence_samples += chunk.len();
                    if self.silence_samples >= self.stop_silence_samples {
                        self.state = VadState::Idle;
                        self.silence_samples = 0;
                        VadEvent::SpeechEnd
                    } else {
                        VadEvent::Silence
                    }
                }
            }
        }
    }

    /// Adjusts the speech threshold from the 25th-percentile noise floor.
    fn adjust_threshold(&mut self) {
        if self.level_history.len() < 10 {
            return;
        }
        let mut sorted = self.level_history.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let noise_floor = sorted[sorted.len() / 4];
        self.threshold = (noise_floor * 2.0).clamp(self.config.speech_threshold, 0.2);
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Resets to idle, e.g. after an ingress disconnect.
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.silence_samples = 0;
    }
}

/// Normalized RMS of 16-bit samples: 0.0 silence, ~0.707 full-scale sine.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_auto(trailing_silence_ms: u32) -> VadConfig {
        VadConfig {
            speech_threshold: 0.02,
            trailing_silence_ms,
            auto_level: false,
        }
    }

    fn speech_chunk() -> Vec<i16> {
        vec![3000i16; 512]
    }

    fn silence_chunk() -> Vec<i16> {
        vec![0i16; 512]
    }

    #[test]
    fn test_rms_silence_is_zero() {
        assert_eq!(calculate_rms(&silence_chunk()), 0.0);
    }

    #[test]
    fn test_rms_empty_is_zero() {
        assert_eq!(calculate_rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_max_amplitude() {
        let rms = calculate_rms(&vec![i16::MAX; 1000]);
        assert!((rms - 1.0).abs() < 0.001, "RMS should be ~1.0, got {rms}");
    }

    #[test]
    fn test_rms_negative_samples_match_positive() {
        let positive = calculate_rms(&vec![1000i16; 500]);
        let negative = calculate_rms(&vec![-1000i16; 500]);
        assert!((positive - negative).abs() < 1e-6);
    }

    #[test]
    fn test_starts_idle() {
        let vad = Vad::new(no_auto(500), 16_000);
        assert_eq!(vad.state(), VadState::Idle);
    }

    #[test]
    fn test_speech_start_and_continue() {
        let mut vad = Vad::new(no_auto(500), 16_000);

        assert_eq!(vad.process_chunk(&silence_chunk()), VadEvent::Silence);
        assert_eq!(vad.process_chunk(&speech_chunk()), VadEvent::SpeechStart);
        assert_eq!(vad.process_chunk(&speech_chunk()), VadEvent::Speech);
        assert_eq!(vad.state(), VadState::Speaking);
    }

    #[test]
    fn test_short_pause_returns_to_speaking() {
        let mut vad = Vad::new(no_auto(500), 16_000);
        vad.process_chunk(&speech_chunk());

        assert_eq!(vad.process_chunk(&silence_chunk()), VadEvent::Silence);
        assert_eq!(vad.state(), VadState::MaybeSilence);

        assert_eq!(vad.process_chunk(&speech_chunk()), VadEvent::Speech);
        assert_eq!(vad.state(), VadState::Speaking);
    }

    #[test]
    fn test_trailing_silence_ends_speech() {
        // 500ms at 16kHz = 8000 samples; chunks are 512 samples, so speech
        // ends on the 16th consecutive silent chunk.
        let mut vad = Vad::new(no_auto(500), 16_000);
        vad.process_chunk(&speech_chunk());

        let mut end_seen_at = None;
        for i in 0..20 {
            if vad.process_chunk(&silence_chunk()) == VadEvent::SpeechEnd {
                end_seen_at = Some(i);
                break;
            }
        }
        assert_eq!(end_seen_at, Some(15));
        assert_eq!(vad.state(), VadState::Idle);
    }

    #[test]
    fn test_silence_counter_resets_on_speech() {
        let mut vad = Vad::new(no_auto(500), 16_000);
        vad.process_chunk(&speech_chunk());

        // 10 silent chunks (< 16), then speech, then silence again: the
        // counter restarts, so SpeechEnd needs 16 more silent chunks.
        for _ in 0..10 {
            assert_ne!(vad.process_chunk(&silence_chunk()), VadEvent::SpeechEnd);
        }
        vad.process_chunk(&speech_chunk());

        for i in 0..16 {
            let event = vad.process_chunk(&silence_chunk());
            if i < 15 {
                assert_ne!(event, VadEvent::SpeechEnd);
            } else {
                assert_eq!(event, VadEvent::SpeechEnd);
            }
        }
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut vad = Vad::new(no_auto(500), 16_000);
        vad.process_chunk(&speech_chunk());
        assert_eq!(vad.state(), VadState::Speaking);

        vad.reset();
        assert_eq!(vad.state(), VadState::Idle);
        assert_eq!(vad.process_chunk(&speech_chunk()), VadEvent::SpeechStart);
    }

    #[test]
    fn test_auto_level_raises_threshold_over_noise() {
        let config = VadConfig {
            speech_threshold: 0.002,
            trailing_silence_ms: 500,
            auto_level: true,
        };
        let mut vad = Vad::new(config, 16_000);

        // Sustained moderate noise: the threshold climbs above its floor.
        for _ in 0..50 {
            vad.process_chunk(&vec![1500i16; 512]);
        }
        assert!(vad.threshold() > 0.002);
        assert!(vad.threshold() <= 0.2);
    }

    #[test]
    fn test_auto_level_never_drops_below_configured_floor() {
        let config = VadConfig {
            speech_threshold: 0.02,
            trailing_silence_ms: 500,
            auto_level: true,
        };
        let mut vad = Vad::new(config, 16_000);

        for _ in 0..50 {
            vad.process_chunk(&silence_chunk());
        }
        assert!(vad.threshold() >= 0.02);
    }
}
