use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageOutputFormat, RgbImage};
use serde_json::json;
use tracing::{info, warn};

use super::detector::Detector;
use super::necrosis::{annotate, measure, ClassIds, NecrosisMeasurement};
use crate::config::InferenceConfig;
use crate::db::NewCassavaImage;
use crate::error::AppError;
use crate::storage::{result_path_for, MediaStore};

/// An uploaded image as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ImageAnalysis {
    pub image_name: String,
    pub original_image: String,
    pub processed_image: String,
    pub measurement: NecrosisMeasurement,
}

impl ImageAnalysis {
    pub fn to_record(&self) -> NewCassavaImage {
        NewCassavaImage {
            original_image: self.original_image.clone(),
            processed_image: self.processed_image.clone(),
            image_name: self.image_name.clone(),
            total_lesions: self.measurement.lesion_count as i64,
            necrosis_percentage: self.measurement.percentage,
            confidence_score: self.measurement.root_confidence.map(f64::from),
            metadata: json!({
                "necrosis_lesions": self.measurement.lesions_json(),
                "root_area": self.measurement.root_area,
                "necrosis_area": self.measurement.necrosis_area,
            }),
        }
    }
}

pub struct AnalysisService {
    detector: Arc<dyn Detector>,
    media: MediaStore,
    classes: ClassIds,
    outline_thickness: u32,
}

impl AnalysisService {
    pub fn new(detector: Arc<dyn Detector>, media: MediaStore, config: &InferenceConfig) -> Self {
        Self {
            detector,
            media,
            classes: ClassIds::from(config),
            outline_thickness: config.outline_thickness,
        }
    }

    /// Stores the original, runs the model, scores and annotates the image and
    /// stores the annotated PNG next to the other results.
    pub async fn analyze(&self, upload: &Upload) -> Result<ImageAnalysis, AppError> {
        let bytes = upload.bytes.clone();
        let image: RgbImage = tokio::task::spawn_blocking(move || -> Result<RgbImage, AppError> {
            Ok(image::load_from_memory(&bytes)?.to_rgb8())
        })
        .await??;

        let original_image = self.media.save_upload(&upload.file_name, &upload.bytes).await?;

        let detections = match self.detector.detect(&upload.bytes).await {
            Ok(detections) => detections,
            Err(e) => {
                self.media.delete_quietly(&original_image).await;
                return Err(e);
            }
        };

        let classes = self.classes;
        let thickness = self.outline_thickness;
        let (measurement, png) = tokio::task::spawn_blocking(move || -> Result<_, AppError> {
            let mut image = image;
            let (width, height) = image.dimensions();
            let measurement = measure(&detections, width, height, classes);
            annotate(&mut image, &detections, classes, thickness, measurement.percentage);

            let mut png = Vec::new();
            DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)?;
            Ok((measurement, png))
        })
        .await??;

        let processed_image = result_path_for(&original_image);
        self.media.write(&processed_image, &png).await?;

        info!(
            image = %upload.file_name,
            percentage = measurement.percentage,
            lesions = measurement.lesion_count,
            "Analysed image"
        );

        Ok(ImageAnalysis {
            image_name: upload.file_name.clone(),
            original_image,
            processed_image,
            measurement,
        })
    }

    /// Analyses uploads in order. On failure the files already written for
    /// this batch are removed before the error is returned.
    pub async fn analyze_batch(&self, uploads: &[Upload]) -> Result<Vec<ImageAnalysis>, AppError> {
        let mut done = Vec::with_capacity(uploads.len());
        for upload in uploads {
            match self.analyze(upload).await {
                Ok(analysis) => done.push(analysis),
                Err(e) => {
                    warn!(image = %upload.file_name, error = %e, "Batch analysis aborted");
                    self.discard(&done).await;
                    return Err(e);
                }
            }
        }
        Ok(done)
    }

    pub async fn discard(&self, analyses: &[ImageAnalysis]) {
        for analysis in analyses {
            self.media.delete_quietly(&analysis.original_image).await;
            self.media.delete_quietly(&analysis.processed_image).await;
        }
    }
}
