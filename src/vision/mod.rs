//! Face detection, recognition, and frame composition.

pub mod compose;
pub mod detect;
pub mod recognize;
pub mod station;
pub mod types;

pub use detect::{FaceDetector, MockFaceDetector};
pub use recognize::{FaceIndexer, FaceRecognizer, MockFaceRecognizer};
pub use station::VideoWorker;
pub use types::{largest_face, FaceDetection, FaceEmbedding};
