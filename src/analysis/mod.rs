//! Image analysis: the segmentation model seam, necrosis scoring and the
//! upload endpoints.

pub mod detector;
pub mod handlers;
pub mod necrosis;
pub mod service;

pub use detector::{Detection, Detector, HttpDetector};
pub use handlers::ImageResult;
pub use necrosis::{measure, ClassIds, NecrosisMeasurement};
pub use service::{AnalysisService, ImageAnalysis, Upload};
