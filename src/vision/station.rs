//! Video worker: consent capture, recognition, and selective blurring.

use crate::consent::{CaptureLatch, CaptureWriter, ConsentRecord, ConsentRegistry};
use crate::defaults;
use crate::pipeline::error::StationError;
use crate::pipeline::health::{bump, PipelineMetrics};
use crate::pipeline::station::Station;
use crate::pipeline::types::VideoPacket;
use crate::vision::compose;
use crate::vision::detect::FaceDetector;
use crate::vision::recognize::FaceRecognizer;
use crate::vision::types::{largest_face, FaceDetection};
use image::RgbImage;
use std::sync::Arc;

/// How a detection will be rendered.
enum Treatment {
    Blur,
    Label(String),
}

/// The video processing station.
///
/// For every frame, in order: consume a pending capture request, detect
/// faces, look each one up in the consent registry, then blur every face
/// that is not a registered match. Any uncertainty resolves to "blur" — a
/// failed detector run blurs the whole frame rather than passing it
/// through.
pub struct VideoWorker {
    detector: Box<dyn FaceDetector>,
    recognizer: Box<dyn FaceRecognizer>,
    registry: Arc<ConsentRegistry>,
    latch: Arc<CaptureLatch>,
    writer: CaptureWriter,
    min_confidence: f32,
    match_threshold: f32,
    metrics: Arc<PipelineMetrics>,
}

impl VideoWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector: Box<dyn FaceDetector>,
        recognizer: Box<dyn FaceRecognizer>,
        registry: Arc<ConsentRegistry>,
        latch: Arc<CaptureLatch>,
        writer: CaptureWriter,
        min_confidence: f32,
        match_threshold: f32,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            detector,
            recognizer,
            registry,
            latch,
            writer,
            min_confidence,
            match_threshold,
            metrics,
        }
    }

    /// Saves the largest detected head as a consent capture and registers
    /// its embedding immediately so the next frames already match. The
    /// directory monitor will re-observe the file; registry inserts are
    /// idempotent by path.
    fn capture_consent(
        &mut self,
        frame: &RgbImage,
        detections: &[FaceDetection],
        name: Option<&str>,
    ) {
        let Some(target) = largest_face(detections) else {
            log::warn!("consent request discarded: no face visible in triggering frame");
            return;
        };

        let (fw, fh) = frame.dimensions();
        let (x1, y1, x2, y2) =
            target.padded_bbox(defaults::HEAD_CAPTURE_PADDING_RATIO, fw, fh);
        let head = compose::crop_head(frame, x1, y1, x2, y2);

        let path = match self.writer.save(&head, name) {
            Ok(path) => path,
            Err(e) => {
                log::error!("consent capture failed: {e}");
                return;
            }
        };
        bump(&self.metrics.captures_written);

        match self.recognizer.embed(frame, target) {
            Ok(embedding) => {
                if let Some(registered_name) =
                    crate::consent::filename::name_from_path(&path)
                {
                    self.registry.insert(ConsentRecord {
                        path,
                        name: registered_name,
                        embedding,
                    });
                }
            }
            Err(e) => {
                // The monitor will pick the file up from disk instead.
                log::warn!("could not embed consent capture inline: {e}");
            }
        }
    }

    /// Decides per detection whether to blur or label, holding one registry
    /// snapshot for the whole frame.
    fn classify_faces(
        &mut self,
        frame: &RgbImage,
        detections: &[FaceDetection],
    ) -> Vec<Treatment> {
        let snapshot = self.registry.snapshot();

        detections
            .iter()
            .map(|detection| {
                if detection.score < self.min_confidence || snapshot.is_empty() {
                    return Treatment::Blur;
                }
                match self.recognizer.embed(frame, detection) {
                    Ok(embedding) => {
                        match snapshot.match_embedding(&embedding, self.match_threshold) {
                            Some((name, _score)) => Treatment::Label(name),
                            None => Treatment::Blur,
                        }
                    }
                    Err(e) => {
                        log::debug!("face recognition failed, blurring: {e}");
                        Treatment::Blur
                    }
                }
            })
            .collect()
    }
}

impl Station for VideoWorker {
    type Input = VideoPacket;
    type Output = VideoPacket;

    fn name(&self) -> &'static str {
        "video-worker"
    }

    fn process(&mut self, packet: VideoPacket) -> Result<Vec<VideoPacket>, StationError> {
        let VideoPacket {
            data,
            width,
            height,
            pts,
            sequence,
        } = packet;

        let Some(mut frame) = RgbImage::from_raw(width, height, data) else {
            // Undecodable frame: dropping it is the only safe output.
            return Err(StationError::Recoverable(format!(
                "frame {sequence} has inconsistent dimensions"
            )));
        };

        let detections = match self.detector.detect(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                // Fail closed: a frame we could not scan is blurred whole.
                log::warn!("face detection failed on frame {sequence}, blurring fully: {e}");
                compose::blur_full_frame(&mut frame);
                bump(&self.metrics.frames_processed);
                bump(&self.metrics.faces_blurred);
                return Ok(vec![VideoPacket::new(
                    frame.into_raw(),
                    width,
                    height,
                    pts,
                    sequence,
                )]);
            }
        };

        if let Some(request) = self.latch.take() {
            self.capture_consent(&frame, &detections, request.name.as_deref());
        }

        let treatments = self.classify_faces(&frame, &detections);

        for (detection, treatment) in detections.iter().zip(&treatments) {
            bump(&self.metrics.faces_detected);
            match treatment {
                Treatment::Blur => {
                    let (x1, y1, x2, y2) =
                        detection.padded_bbox(defaults::FACE_PADDING_RATIO, width, height);
                    compose::blur_region(&mut frame, x1, y1, x2, y2);
                    bump(&self.metrics.faces_blurred);
                }
                Treatment::Label(name) => {
                    compose::draw_label_above(
                        &mut frame,
                        name,
                        detection.x.max(0.0) as u32,
                        detection.y.max(0.0) as u32,
                    );
                }
            }
        }

        bump(&self.metrics.frames_processed);
        Ok(vec![VideoPacket::new(
            frame.into_raw(),
            width,
            height,
            pts,
            sequence,
        )])
    }
}
