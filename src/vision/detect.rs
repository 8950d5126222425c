//! Face detection.
//!
//! The production detector runs the YuNet ONNX model through `ort`. The
//! trait seam lets tests substitute scripted detections.

use crate::error::Result;
use crate::vision::types::FaceDetection;
use image::RgbImage;

/// Trait for face detection, allowing swapping implementations (real YuNet
/// vs mock).
pub trait FaceDetector: Send {
    /// Detects faces in an RGB frame. Coordinates are in frame space.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>>;

    /// Name of the loaded model, for logging.
    fn model_name(&self) -> &str;
}

/// Mock detector for tests: replays a fixed script of detection lists.
pub struct MockFaceDetector {
    script: Vec<Result<Vec<FaceDetection>>>,
    cursor: usize,
    repeat_last: bool,
}

impl MockFaceDetector {
    /// Always returns the same detections.
    pub fn fixed(detections: Vec<FaceDetection>) -> Self {
        Self {
            script: vec![Ok(detections)],
            cursor: 0,
            repeat_last: true,
        }
    }

    /// Returns each scripted result in turn, then repeats the last one.
    pub fn scripted(script: Vec<Result<Vec<FaceDetection>>>) -> Self {
        Self {
            script,
            cursor: 0,
            repeat_last: true,
        }
    }

    /// Always fails, for exercising the fail-closed path.
    pub fn failing(message: &str) -> Self {
        Self {
            script: vec![Err(crate::error::FaceveilError::Detection {
                message: message.to_string(),
            })],
            cursor: 0,
            repeat_last: true,
        }
    }
}

impl FaceDetector for MockFaceDetector {
    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<FaceDetection>> {
        let index = if self.cursor < self.script.len() {
            let i = self.cursor;
            self.cursor += 1;
            i
        } else if self.repeat_last && !self.script.is_empty() {
            self.script.len() - 1
        } else {
            return Ok(Vec::new());
        };

        match &self.script[index] {
            Ok(detections) => Ok(detections.clone()),
            Err(e) => Err(crate::error::FaceveilError::Detection {
                message: e.to_string(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "mock-detector"
    }
}

#[cfg(feature = "onnx")]
pub use yunet::YunetDetector;

#[cfg(feature = "onnx")]
mod yunet {
    use super::*;
    use crate::error::FaceveilError;
    use ndarray::Array4;
    use ort::session::Session;
    use std::path::Path;

    /// Detection input is capped at this side length; larger frames are
    /// scaled down before inference and boxes scaled back up.
    const TARGET_MAX_SIDE: u32 = 640;

    /// Strides of YuNet's three output scales.
    const STRIDES: [u32; 3] = [8, 16, 32];

    /// YuNet face detector.
    pub struct YunetDetector {
        session: Session,
        model_name: String,
        score_threshold: f32,
        nms_threshold: f32,
    }

    impl YunetDetector {
        pub fn load(model_path: &Path, score_threshold: f32) -> Result<Self> {
            if !model_path.exists() {
                return Err(FaceveilError::ModelNotFound {
                    path: model_path.display().to_string(),
                });
            }

            let session = Session::builder()
                .and_then(|b| b.with_intra_threads(2))
                .and_then(|b| b.commit_from_file(model_path))
                .map_err(|e| FaceveilError::Detection {
                    message: format!("failed to load detector: {e}"),
                })?;

            let model_name = model_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("yunet")
                .to_string();

            Ok(Self {
                session,
                model_name,
                score_threshold,
                nms_threshold: 0.3,
            })
        }

        fn run_inference(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>> {
            let (orig_w, orig_h) = frame.dimensions();

            // Resize large frames for detection speed; boxes are scaled back.
            let scale = if orig_w.max(orig_h) > TARGET_MAX_SIDE {
                TARGET_MAX_SIDE as f32 / orig_w.max(orig_h) as f32
            } else {
                1.0
            };
            let (in_w, in_h) = if scale < 1.0 {
                (
                    (orig_w as f32 * scale) as u32,
                    (orig_h as f32 * scale) as u32,
                )
            } else {
                (orig_w, orig_h)
            };
            // Model geometry requires dimensions divisible by the largest stride.
            let in_w = in_w / 32 * 32;
            let in_h = in_h / 32 * 32;
            if in_w == 0 || in_h == 0 {
                return Ok(Vec::new());
            }
            let scale_x = orig_w as f32 / in_w as f32;
            let scale_y = orig_h as f32 / in_h as f32;

            let resized = image::imageops::resize(
                frame,
                in_w,
                in_h,
                image::imageops::FilterType::Triangle,
            );

            // YuNet takes BGR CHW float input.
            let mut input = Array4::<f32>::zeros((1, 3, in_h as usize, in_w as usize));
            for (x, y, pixel) in resized.enumerate_pixels() {
                input[[0, 0, y as usize, x as usize]] = pixel[2] as f32;
                input[[0, 1, y as usize, x as usize]] = pixel[1] as f32;
                input[[0, 2, y as usize, x as usize]] = pixel[0] as f32;
            }

            let input_value =
                ort::value::Tensor::from_array(input).map_err(|e| FaceveilError::Detection {
                    message: format!("input tensor: {e}"),
                })?;

            let outputs = self
                .session
                .run(ort::inputs!["input" => input_value])
                .map_err(|e| FaceveilError::Detection {
                    message: format!("inference: {e}"),
                })?;

            // Per-scale outputs: cls_{s}, obj_{s}, bbox_{s}, kps_{s}.
            let mut candidates = Vec::new();
            for &stride in &STRIDES {
                let cols = (in_w / stride) as usize;
                let rows = (in_h / stride) as usize;

                let cls = tensor_data(outputs.get(&*format!("cls_{stride}")), "cls")?;
                let obj = tensor_data(outputs.get(&*format!("obj_{stride}")), "obj")?;
                let bbox = tensor_data(outputs.get(&*format!("bbox_{stride}")), "bbox")?;
                let kps = tensor_data(outputs.get(&*format!("kps_{stride}")), "kps")?;

                for row in 0..rows {
                    for col in 0..cols {
                        let idx = row * cols + col;
                        let score =
                            (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
                        if score < self.score_threshold {
                            continue;
                        }

                        let cx = (col as f32 + bbox[idx * 4]) * stride as f32;
                        let cy = (row as f32 + bbox[idx * 4 + 1]) * stride as f32;
                        let w = bbox[idx * 4 + 2].exp() * stride as f32;
                        let h = bbox[idx * 4 + 3].exp() * stride as f32;

                        let mut landmarks = [(0.0f32, 0.0f32); 5];
                        for (k, landmark) in landmarks.iter_mut().enumerate() {
                            landmark.0 = (col as f32 + kps[idx * 10 + k * 2]) * stride as f32
                                * scale_x;
                            landmark.1 = (row as f32 + kps[idx * 10 + k * 2 + 1])
                                * stride as f32
                                * scale_y;
                        }

                        candidates.push(
                            FaceDetection::new(
                                (cx - w / 2.0) * scale_x,
                                (cy - h / 2.0) * scale_y,
                                w * scale_x,
                                h * scale_y,
                                score,
                            )
                            .with_landmarks(landmarks),
                        );
                    }
                }
            }

            Ok(non_max_suppression(candidates, self.nms_threshold))
        }
    }

    fn tensor_data(value: Option<&ort::value::DynValue>, name: &str) -> Result<Vec<f32>> {
        let value = value.ok_or_else(|| FaceveilError::Detection {
            message: format!("missing output '{name}'"),
        })?;
        let (_, data) =
            value
                .try_extract_tensor::<f32>()
                .map_err(|e| FaceveilError::Detection {
                    message: format!("output '{name}': {e}"),
                })?;
        Ok(data.to_vec())
    }

    impl FaceDetector for YunetDetector {
        fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>> {
            self.run_inference(frame)
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }
}

/// Greedy IoU-based non-max suppression, highest score first.
pub fn non_max_suppression(
    mut detections: Vec<FaceDetection>,
    iou_threshold: f32,
) -> Vec<FaceDetection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<FaceDetection> = Vec::new();
    for candidate in detections {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &FaceDetection, b: &FaceDetection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.w).min(b.x + b.w);
    let y2 = (a.y + a.h).min(b.y + b.h);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_frame() -> RgbImage {
        RgbImage::new(64, 64)
    }

    #[test]
    fn test_mock_fixed_repeats() {
        let mut detector =
            MockFaceDetector::fixed(vec![FaceDetection::new(1.0, 2.0, 3.0, 4.0, 0.9)]);
        for _ in 0..3 {
            let faces = detector.detect(&blank_frame()).unwrap();
            assert_eq!(faces.len(), 1);
            assert_eq!(faces[0].x, 1.0);
        }
    }

    #[test]
    fn test_mock_scripted_sequence() {
        let mut detector = MockFaceDetector::scripted(vec![
            Ok(vec![FaceDetection::new(0.0, 0.0, 1.0, 1.0, 0.9)]),
            Ok(Vec::new()),
        ]);
        assert_eq!(detector.detect(&blank_frame()).unwrap().len(), 1);
        assert_eq!(detector.detect(&blank_frame()).unwrap().len(), 0);
        // Last entry repeats.
        assert_eq!(detector.detect(&blank_frame()).unwrap().len(), 0);
    }

    #[test]
    fn test_mock_failing() {
        let mut detector = MockFaceDetector::failing("model exploded");
        assert!(detector.detect(&blank_frame()).is_err());
        assert!(detector.detect(&blank_frame()).is_err());
    }

    #[test]
    fn test_nms_keeps_non_overlapping() {
        let detections = vec![
            FaceDetection::new(0.0, 0.0, 10.0, 10.0, 0.9),
            FaceDetection::new(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        let kept = non_max_suppression(detections, 0.3);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_nms_suppresses_duplicates() {
        let detections = vec![
            FaceDetection::new(0.0, 0.0, 10.0, 10.0, 0.9),
            FaceDetection::new(1.0, 1.0, 10.0, 10.0, 0.7),
        ];
        let kept = non_max_suppression(detections, 0.3);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.9);
    }

    #[test]
    fn test_nms_orders_by_score() {
        let detections = vec![
            FaceDetection::new(0.0, 0.0, 10.0, 10.0, 0.5),
            FaceDetection::new(30.0, 0.0, 10.0, 10.0, 0.95),
        ];
        let kept = non_max_suppression(detections, 0.3);
        assert_eq!(kept[0].score, 0.95);
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let a = FaceDetection::new(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = FaceDetection::new(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_identical_is_one() {
        let a = FaceDetection::new(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }
}
