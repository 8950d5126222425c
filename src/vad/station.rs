//! VAD station: turns the decoded audio stream into speech segments.
//!
//! Downmixes to mono, resamples to 16kHz, runs the VAD state machine over
//! fixed-size chunks, and assembles one `SpeechSegment` per utterance. The
//! runner sends segments with drop-oldest semantics so this station never
//! blocks on slow speech workers.

use crate::defaults;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{AudioFrame, SpeechSegment};
use crate::vad::detector::{Vad, VadConfig, VadEvent};
use rubato::{FftFixedInOut, Resampler};

pub struct VadStation {
    vad: Vad,
    min_segment_samples: usize,

    resampler: Option<FftFixedInOut<f32>>,
    resampler_rate: u32,
    mix_buf: Vec<f32>,

    pcm: Vec<i16>,
    speech_buf: Vec<i16>,
    in_speech: bool,
    speech_start_secs: f64,
    stream_secs: f64,
    segments_produced: u64,
}

impl VadStation {
    pub fn new(config: VadConfig, min_segment_ms: u32) -> Self {
        let min_segment_samples =
            (defaults::SPEECH_SAMPLE_RATE as usize * min_segment_ms as usize) / 1000;
        Self {
            vad: Vad::new(config, defaults::SPEECH_SAMPLE_RATE),
            min_segment_samples,
            resampler: None,
            resampler_rate: 0,
            mix_buf: Vec::new(),
            pcm: Vec::new(),
            speech_buf: Vec::new(),
            in_speech: false,
            speech_start_secs: 0.0,
            stream_secs: 0.0,
            segments_produced: 0,
        }
    }

    /// Averages interleaved channels into normalized mono f32.
    fn downmix(frame: &AudioFrame) -> Vec<f32> {
        let channels = frame.channels.max(1) as usize;
        frame
            .samples
            .chunks_exact(channels)
            .map(|chunk| {
                let sum: f32 = chunk.iter().map(|&s| s as f32).sum();
                sum / channels as f32 / 32768.0
            })
            .collect()
    }

    /// Feeds downmixed input-rate samples through the resampler, appending
    /// 16kHz i16 output to the chunk buffer.
    fn resample_into_pcm(&mut self, mono: Vec<f32>, input_rate: u32) -> Result<(), StationError> {
        if input_rate == defaults::SPEECH_SAMPLE_RATE {
            self.pcm.extend(mono.iter().map(|&s| to_i16(s)));
            return Ok(());
        }

        if self.resampler.is_none() || self.resampler_rate != input_rate {
            let resampler = FftFixedInOut::<f32>::new(
                input_rate as usize,
                defaults::SPEECH_SAMPLE_RATE as usize,
                1024,
                1,
            )
            .map_err(|e| StationError::Fatal(format!("resampler init: {e}")))?;
            log::info!(
                "vad resampler configured: {}Hz -> {}Hz",
                input_rate,
                defaults::SPEECH_SAMPLE_RATE
            );
            self.resampler = Some(resampler);
            self.resampler_rate = input_rate;
            self.mix_buf.clear();
        }

        self.mix_buf.extend(mono);

        let resampler = self.resampler.as_mut().unwrap();
        loop {
            let needed = resampler.input_frames_next();
            if self.mix_buf.len() < needed {
                break;
            }
            let block: Vec<f32> = self.mix_buf.drain(..needed).collect();
            let output = resampler
                .process(&[block], None)
                .map_err(|e| StationError::Recoverable(format!("resample: {e}")))?;
            if let Some(channel) = output.into_iter().next() {
                self.pcm.extend(channel.iter().map(|&s| to_i16(s)));
            }
        }
        Ok(())
    }

    /// Runs the VAD over buffered chunks, returning any finished segments.
    fn drain_chunks(&mut self) -> Vec<SpeechSegment> {
        let mut segments = Vec::new();
        let chunk_secs = defaults::VAD_CHUNK_SIZE as f64 / defaults::SPEECH_SAMPLE_RATE as f64;

        while self.pcm.len() >= defaults::VAD_CHUNK_SIZE {
            let chunk: Vec<i16> = self.pcm.drain(..defaults::VAD_CHUNK_SIZE).collect();
            let event = self.vad.process_chunk(&chunk);

            match event {
                VadEvent::SpeechStart => {
                    self.in_speech = true;
                    self.speech_start_secs = self.stream_secs;
                    self.speech_buf.clear();
                    self.speech_buf.extend(&chunk);
                    log::debug!("speech started at {:.2}s", self.speech_start_secs);
                }
                VadEvent::Speech | VadEvent::Silence => {
                    if self.in_speech {
                        self.speech_buf.extend(&chunk);
                    }
                }
                VadEvent::SpeechEnd => {
                    self.speech_buf.extend(&chunk);
                    self.stream_secs += chunk_secs;
                    if let Some(segment) = self.finish_segment() {
                        segments.push(segment);
                    }
                    continue;
                }
            }

            self.stream_secs += chunk_secs;
        }

        segments
    }

    /// Closes the buffered utterance, discarding ones below the minimum
    /// duration.
    fn finish_segment(&mut self) -> Option<SpeechSegment> {
        self.in_speech = false;
        let samples = std::mem::take(&mut self.speech_buf);

        if samples.len() < self.min_segment_samples {
            log::debug!("speech segment too short ({} samples), skipping", samples.len());
            return None;
        }

        self.segments_produced += 1;
        log::debug!(
            "speech segment #{} closed ({:.2}s - {:.2}s)",
            self.segments_produced,
            self.speech_start_secs,
            self.stream_secs
        );
        Some(SpeechSegment::new(
            samples,
            self.speech_start_secs,
            self.stream_secs,
        ))
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

impl Station for VadStation {
    type Input = AudioFrame;
    type Output = SpeechSegment;

    fn name(&self) -> &'static str {
        "vad"
    }

    fn process(&mut self, frame: AudioFrame) -> Result<Vec<SpeechSegment>, StationError> {
        if frame.samples.is_empty() {
            return Ok(Vec::new());
        }

        let mono = Self::downmix(&frame);
        self.resample_into_pcm(mono, frame.sample_rate)?;
        Ok(self.drain_chunks())
    }

    fn flush(&mut self) -> Vec<SpeechSegment> {
        if self.in_speech {
            self.finish_segment().into_iter().collect()
        } else {
            Vec::new()
        }
    }

    fn shutdown(&mut self) {
        log::info!("vad produced {} speech segments", self.segments_produced);
    }
}
