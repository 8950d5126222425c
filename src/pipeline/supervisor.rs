//! Pipeline supervisor.
//!
//! Builds channels, spawns every worker, and coordinates shutdown: a
//! termination signal (or `stop()`) flips the shared stop flag, then
//! workers are joined in reverse dependency order, each with a deadline
//! after which a hard abort is logged.

use crate::config::Config;
use crate::consent::{self, CaptureLatch, CaptureWriter, ConsentMonitor, ConsentRegistry};
use crate::defaults;
use crate::error::Result;
use crate::media::sink::MediaSink;
use crate::media::source::{ConnectionState, MediaSource};
use crate::media::transcode::{AudioEncoder, AudioTranscoder};
use crate::media::{InputWorker, InputWorkerChannels, OutputWorker};
use crate::pipeline::error::LogReporter;
use crate::pipeline::health::{HealthMonitor, HeartbeatRegistry, PipelineMetrics};
use crate::pipeline::station::{SendMode, StationRunner, WorkerContext};
use crate::speech::classifier::ConsentClassifier;
use crate::speech::station::SpeechWorker;
use crate::speech::transcriber::Transcriber;
use crate::vad::{VadConfig, VadStation};
use crate::vision::recognize::{FaceIndexer, FaceRecognizer};
use crate::vision::station::VideoWorker;
use crate::vision::FaceDetector;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One speech worker's model pair.
pub struct SpeechSeam {
    pub transcriber: Box<dyn Transcriber>,
    pub classifier: Box<dyn ConsentClassifier>,
}

/// Every externally-provided implementation the pipeline runs against.
/// Production seams come from `Seams::from_config`; tests inject mocks.
pub struct Seams {
    pub source: Box<dyn MediaSource>,
    pub sink: Box<dyn MediaSink>,
    pub audio_encoder: Box<dyn AudioEncoder>,
    pub detector: Box<dyn FaceDetector>,
    pub recognizer: Box<dyn FaceRecognizer>,
    /// Detector/recognizer pair owned by the consent monitor.
    pub indexer: FaceIndexer,
    pub speech: Vec<SpeechSeam>,
}

impl Seams {
    /// Builds production seams from the configuration. Requires the crate's
    /// default features; a build without them can only run with injected
    /// seams (tests).
    #[cfg(all(
        feature = "ffmpeg",
        feature = "onnx",
        feature = "whisper",
        feature = "classifier"
    ))]
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        use crate::media::ffmpeg::{FfmpegMediaSink, FfmpegMediaSource, FfmpegOpusEncoder};
        use crate::speech::candle_t5::CandleT5Classifier;
        use crate::speech::whisper::{WhisperConfig, WhisperTranscriber};
        use crate::vision::detect::YunetDetector;
        use crate::vision::recognize::SfaceRecognizer;

        crate::media::ffmpeg::init()?;

        let detector = YunetDetector::load(
            &config.models.detector,
            defaults::FACE_SCORE_THRESHOLD,
        )?;
        let recognizer = SfaceRecognizer::load(&config.models.recognizer)?;

        let indexer = FaceIndexer::new(
            Box::new(YunetDetector::load(
                &config.models.detector,
                defaults::FACE_SCORE_THRESHOLD,
            )?),
            Box::new(SfaceRecognizer::load(&config.models.recognizer)?),
        );

        let mut speech = Vec::with_capacity(config.pipeline.speech_workers);
        for _ in 0..config.pipeline.speech_workers {
            let transcriber = WhisperTranscriber::new(WhisperConfig {
                model_path: config.models.asr.clone(),
                language: "en".to_string(),
                threads: None,
            })?;
            let classifier = CandleT5Classifier::load(&config.models.classifier_repo)?;
            speech.push(SpeechSeam {
                transcriber: Box::new(transcriber),
                classifier: Box::new(classifier),
            });
        }

        Ok(Self {
            source: Box::new(FfmpegMediaSource::new(&config.stream.ingress_url)),
            sink: Box::new(FfmpegMediaSink::new(
                &config.stream.egress_url,
                config.audio.bitrate,
                config.audio.channels,
            )),
            audio_encoder: Box::new(FfmpegOpusEncoder::new(
                config.audio.bitrate,
                config.audio.channels,
            )?),
            detector: Box::new(detector),
            recognizer: Box::new(recognizer),
            indexer,
            speech,
        })
    }

    #[cfg(not(all(
        feature = "ffmpeg",
        feature = "onnx",
        feature = "whisper",
        feature = "classifier"
    )))]
    pub fn from_config(_config: &Config) -> anyhow::Result<Self> {
        anyhow::bail!(
            "this build of faceveil lacks the media/model features; \
             rebuild with default features to run the pipeline"
        )
    }
}

struct NamedWorker {
    name: &'static str,
    handle: JoinHandle<()>,
    deadline: Duration,
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    workers: Vec<NamedWorker>,
    registry: Arc<ConsentRegistry>,
    metrics: Arc<PipelineMetrics>,
    // Keeps the speech workers' output channel open for their lifetime.
    _speech_done_rx: crossbeam_channel::Receiver<()>,
}

impl PipelineHandle {
    /// The shared stop flag; a signal handler stores `true` to request a
    /// graceful shutdown.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> Arc<ConsentRegistry> {
        self.registry.clone()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Blocks until the stop flag is set, then joins all workers.
    pub fn wait(mut self) {
        while !self.stop.load(Ordering::SeqCst) {
            std::thread::sleep(defaults::QUEUE_TIMEOUT);
        }
        self.join_all();
    }

    /// Requests shutdown and joins all workers.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.join_all();
    }

    fn join_all(&mut self) {
        for worker in self.workers.drain(..) {
            let deadline = Instant::now() + worker.deadline;
            while !worker.handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if worker.handle.is_finished() {
                let _ = worker.handle.join();
                log::info!("worker '{}' stopped", worker.name);
            } else {
                // Do not block shutdown on a stuck worker; the thread is
                // abandoned and the process exit reclaims it.
                log::error!(
                    "worker '{}' missed its join deadline, hard abort",
                    worker.name
                );
            }
        }
        self.metrics.log_summary();
    }
}

/// The privacy-filter pipeline.
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Starts every worker and returns a handle for lifecycle control.
    pub fn start(self, mut seams: Seams) -> Result<PipelineHandle> {
        let config = &self.config;
        let stop = Arc::new(AtomicBool::new(false));
        let heartbeats = HeartbeatRegistry::new();
        let metrics = PipelineMetrics::new();
        let connection = ConnectionState::new();
        let registry = Arc::new(ConsentRegistry::new());
        let latch = Arc::new(CaptureLatch::new());

        let ctx = |name: &str| WorkerContext {
            stop: stop.clone(),
            heartbeat: heartbeats.register(name),
            reporter: Arc::new(LogReporter),
        };

        // Load the registry from disk before any frame is processed, so the
        // first frames already recognize previously consented faces.
        consent::load_existing(&config.stream.capture_dir, &registry, &mut seams.indexer)?;

        // Channels between workers.
        let (video_tx, video_rx) = bounded(config.pipeline.video_queue);
        let (audio_transcode_tx, audio_transcode_rx) = bounded(config.pipeline.audio_queue);
        let (audio_vad_tx, audio_vad_rx) = bounded(config.pipeline.audio_queue);
        let (speech_tx, speech_rx) = bounded(config.pipeline.speech_queue);
        let (video_out_tx, video_out_rx) = bounded(config.pipeline.output_queue);
        let (audio_out_tx, audio_out_rx) = bounded(config.pipeline.output_queue);
        let (speech_done_tx, speech_done_rx) = bounded::<()>(1);

        let mut workers: Vec<NamedWorker> = Vec::new();
        let mut push = |name: &'static str, handle: Option<JoinHandle<()>>, deadline: Duration| {
            if let Some(handle) = handle {
                workers.push(NamedWorker {
                    name,
                    handle,
                    deadline,
                });
            }
        };

        // Input demuxer.
        let input = InputWorker::spawn(
            seams.source,
            InputWorkerChannels {
                video_tx,
                audio_transcode_tx,
                audio_vad_tx,
                drain_video: video_rx.clone(),
                drain_audio_transcode: audio_transcode_rx.clone(),
                drain_audio_vad: audio_vad_rx.clone(),
            },
            connection.clone(),
            metrics.clone(),
            ctx("input-demuxer"),
        );
        push("input-demuxer", input.into_handle(), defaults::JOIN_DEADLINE);

        // VAD, with drop-oldest into the speech queue.
        let vad_station = VadStation::new(
            VadConfig {
                speech_threshold: config.vad.threshold,
                trailing_silence_ms: config.vad.trailing_silence_ms,
                auto_level: config.vad.auto_level,
            },
            config.vad.min_segment_ms,
        );
        let vad_runner = StationRunner::spawn(
            vad_station,
            audio_vad_rx,
            speech_tx,
            SendMode::DropOldest {
                rx: speech_rx.clone(),
                dropped: metrics.segments_dropped.clone(),
            },
            ctx("vad"),
        );
        push("vad", vad_runner.into_handle(), defaults::JOIN_DEADLINE);

        // Audio transcoder.
        let transcoder = AudioTranscoder::new(seams.audio_encoder, metrics.clone());
        let transcoder_runner = StationRunner::spawn(
            transcoder,
            audio_transcode_rx,
            audio_out_tx,
            SendMode::Block,
            ctx("audio-transcoder"),
        );
        push(
            "audio-transcoder",
            transcoder_runner.into_handle(),
            defaults::JOIN_DEADLINE,
        );

        // Speech worker pool over the shared segment queue.
        for (worker_id, seam) in seams.speech.into_iter().enumerate() {
            let speech_worker = SpeechWorker::new(
                seam.transcriber,
                seam.classifier,
                latch.clone(),
                metrics.clone(),
                worker_id,
            );
            let runner = StationRunner::spawn(
                speech_worker,
                speech_rx.clone(),
                speech_done_tx.clone(),
                SendMode::Block,
                ctx("speech-worker"),
            );
            push(
                "speech-worker",
                runner.into_handle(),
                defaults::JOIN_DEADLINE_ASR,
            );
        }
        drop(speech_done_tx);

        // Video worker.
        let video_worker = VideoWorker::new(
            seams.detector,
            seams.recognizer,
            registry.clone(),
            latch.clone(),
            CaptureWriter::new(&config.stream.capture_dir),
            config.recognition.min_confidence,
            config.recognition.match_threshold,
            metrics.clone(),
        );
        let video_runner = StationRunner::spawn(
            video_worker,
            video_rx,
            video_out_tx,
            SendMode::Block,
            ctx("video-worker"),
        );
        push(
            "video-worker",
            video_runner.into_handle(),
            defaults::JOIN_DEADLINE,
        );

        // Output muxer.
        let output = OutputWorker::spawn(
            seams.sink,
            video_out_rx,
            audio_out_rx,
            connection.clone(),
            ctx("output-muxer"),
        );
        push("output-muxer", output.into_handle(), defaults::JOIN_DEADLINE);

        // Consent directory monitor.
        let monitor = ConsentMonitor::spawn(
            config.stream.capture_dir.clone(),
            registry.clone(),
            seams.indexer,
            stop.clone(),
            heartbeats.register("consent-monitor"),
        )?;
        push(
            "consent-monitor",
            monitor.into_handle(),
            defaults::JOIN_DEADLINE,
        );

        // Health monitor last: it only observes.
        let health = HealthMonitor::spawn(heartbeats, metrics.clone(), stop.clone());
        push(
            "health-monitor",
            Some(
                health
                    .into_handle()
                    .expect("health monitor handle taken twice"),
            ),
            Duration::from_secs(2),
        );

        log::info!(
            "pipeline started with {} workers ({} speech)",
            workers.len(),
            config.pipeline.speech_workers
        );

        Ok(PipelineHandle {
            stop,
            workers,
            registry,
            metrics,
            _speech_done_rx: speech_done_rx,
        })
    }
}
