use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::InferenceConfig;
use crate::error::{AnalysisError, AppError};

/// One instance returned by the segmentation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    #[serde(default)]
    pub confidence: f32,
    /// Mask outline in pixel coordinates of the submitted image.
    pub polygon: Vec<[f32; 2]>,
}

#[derive(Debug, Deserialize)]
struct DetectionResponse {
    detections: Vec<Detection>,
}

/// The segmentation model seam.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, AppError>;
}

/// Calls an external inference server that accepts the raw image bytes and
/// answers with `{"detections": [...]}`.
pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
}

impl HttpDetector {
    pub fn new(config: &InferenceConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, AppError> {
        let res = self.client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Inference server rejected image");
            return Err(AnalysisError::InferenceFailed(format!("status {}", status)).into());
        }

        let parsed: DetectionResponse = res
            .json()
            .await
            .map_err(|e| AnalysisError::InvalidResponse(e.to_string()))?;

        debug!(count = parsed.detections.len(), "Received detections");
        Ok(parsed.detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn detector_for(server: &MockServer) -> HttpDetector {
        let mut config = Settings::new_for_test().unwrap().inference;
        config.url = format!("{}/predict", server.uri());
        HttpDetector::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_detect_parses_detections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .and(header("content-type", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "detections": [
                    { "class_id": 0, "confidence": 0.97, "polygon": [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]] },
                    { "class_id": 1, "polygon": [[1.0, 1.0], [2.0, 1.0], [2.0, 2.0]] }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let detections = detector_for(&server).detect(b"image").await.unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_id, 0);
        assert_eq!(detections[1].confidence, 0.0);
        assert_eq!(detections[1].polygon[2], [2.0, 2.0]);
    }

    #[tokio::test]
    async fn test_detect_maps_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(&server)
            .await;

        let err = detector_for(&server).detect(b"image").await.unwrap_err();
        assert!(matches!(err, AppError::AnalysisError(AnalysisError::InferenceFailed(_))));
    }

    #[tokio::test]
    async fn test_detect_rejects_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "boxes": [] })))
            .mount(&server)
            .await;

        let err = detector_for(&server).detect(b"image").await.unwrap_err();
        assert!(matches!(err, AppError::AnalysisError(AnalysisError::InvalidResponse(_))));
    }
}
