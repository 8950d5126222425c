//! Face recognition (embedding extraction).
//!
//! The production recognizer runs the SFace ONNX model over an aligned
//! 112x112 crop and yields a 128-dimension embedding. The trait seam lets
//! tests substitute deterministic embeddings.

use crate::error::Result;
use crate::vision::detect::FaceDetector;
use crate::vision::types::{largest_face, FaceDetection, FaceEmbedding};
use image::RgbImage;

/// Trait for turning a detected face into an embedding.
pub trait FaceRecognizer: Send {
    /// Computes an embedding for one detection in the given frame.
    fn embed(&mut self, frame: &RgbImage, detection: &FaceDetection) -> Result<FaceEmbedding>;

    /// Name of the loaded model, for logging.
    fn model_name(&self) -> &str;
}

/// Mock recognizer: derives a deterministic embedding from the detection's
/// position so tests can pre-register matching embeddings.
pub struct MockFaceRecognizer {
    fail: bool,
}

impl MockFaceRecognizer {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }

    /// The embedding this mock will produce for a detection at (x, y).
    pub fn embedding_for(x: f32, y: f32) -> FaceEmbedding {
        FaceEmbedding::new(vec![x + 1.0, y + 1.0, 1.0])
    }
}

impl Default for MockFaceRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceRecognizer for MockFaceRecognizer {
    fn embed(&mut self, _frame: &RgbImage, detection: &FaceDetection) -> Result<FaceEmbedding> {
        if self.fail {
            return Err(crate::error::FaceveilError::Recognition {
                message: "mock recognition failure".to_string(),
            });
        }
        Ok(Self::embedding_for(detection.x, detection.y))
    }

    fn model_name(&self) -> &str {
        "mock-recognizer"
    }
}

/// Detector + recognizer pair used wherever an image must be reduced to the
/// embedding of its most prominent face (registry loads, capture inserts).
pub struct FaceIndexer {
    detector: Box<dyn FaceDetector>,
    recognizer: Box<dyn FaceRecognizer>,
}

impl FaceIndexer {
    pub fn new(detector: Box<dyn FaceDetector>, recognizer: Box<dyn FaceRecognizer>) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    /// Embeds the largest face in the image, or None when no face is found.
    pub fn embed_largest(&mut self, image: &RgbImage) -> Result<Option<FaceEmbedding>> {
        let detections = self.detector.detect(image)?;
        let Some(largest) = largest_face(&detections) else {
            return Ok(None);
        };
        self.recognizer.embed(image, largest).map(Some)
    }
}

#[cfg(feature = "onnx")]
pub use sface::SfaceRecognizer;

#[cfg(feature = "onnx")]
mod sface {
    use super::*;
    use crate::error::FaceveilError;
    use ndarray::Array4;
    use ort::session::Session;
    use std::path::Path;

    /// SFace input geometry.
    const INPUT_SIZE: u32 = 112;

    /// SFace face recognizer.
    pub struct SfaceRecognizer {
        session: Session,
        model_name: String,
    }

    impl SfaceRecognizer {
        pub fn load(model_path: &Path) -> Result<Self> {
            if !model_path.exists() {
                return Err(FaceveilError::ModelNotFound {
                    path: model_path.display().to_string(),
                });
            }

            let session = Session::builder()
                .and_then(|b| b.with_intra_threads(1))
                .and_then(|b| b.commit_from_file(model_path))
                .map_err(|e| FaceveilError::Recognition {
                    message: format!("failed to load recognizer: {e}"),
                })?;

            let model_name = model_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("sface")
                .to_string();

            Ok(Self {
                session,
                model_name,
            })
        }

        /// Crops the padded face region and resizes to the model input. A
        /// full 5-point affine alignment would track the landmarks exactly;
        /// a padded square crop is close enough for SFace on near-frontal
        /// wearable footage and avoids a solver dependency.
        fn aligned_crop(frame: &RgbImage, detection: &FaceDetection) -> RgbImage {
            let (fw, fh) = frame.dimensions();
            let (x1, y1, x2, y2) = detection.padded_bbox(0.1, fw, fh);
            let cropped =
                image::imageops::crop_imm(frame, x1, y1, (x2 - x1).max(1), (y2 - y1).max(1))
                    .to_image();
            image::imageops::resize(
                &cropped,
                INPUT_SIZE,
                INPUT_SIZE,
                image::imageops::FilterType::Triangle,
            )
        }
    }

    impl FaceRecognizer for SfaceRecognizer {
        fn embed(&mut self, frame: &RgbImage, detection: &FaceDetection) -> Result<FaceEmbedding> {
            let crop = Self::aligned_crop(frame, detection);

            // BGR CHW float input, raw 0-255 range as the model expects.
            let mut input =
                Array4::<f32>::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
            for (x, y, pixel) in crop.enumerate_pixels() {
                input[[0, 0, y as usize, x as usize]] = pixel[2] as f32;
                input[[0, 1, y as usize, x as usize]] = pixel[1] as f32;
                input[[0, 2, y as usize, x as usize]] = pixel[0] as f32;
            }

            let input_value =
                ort::value::Tensor::from_array(input).map_err(|e| FaceveilError::Recognition {
                    message: format!("input tensor: {e}"),
                })?;

            let outputs = self
                .session
                .run(ort::inputs!["data" => input_value])
                .map_err(|e| FaceveilError::Recognition {
                    message: format!("inference: {e}"),
                })?;

            let (_, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| FaceveilError::Recognition {
                    message: format!("output tensor: {e}"),
                })?;

            Ok(FaceEmbedding::new(data.to_vec()))
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }
}
