#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use necrosis_server::analysis::{Detection, Upload};
use necrosis_server::db::AnalysisSession;
use necrosis_server::auth::NewAccount;
use necrosis_server::error::AnalysisError;
use necrosis_server::{AppError, AppState, Detector, Settings};
use tempfile::TempDir;

pub const PASSWORD: &str = "leafspot42";
pub const BOUNDARY: &str = "necrosis-test-boundary";

/// Reports the whole image as root and its top-left quarter as necrosis.
pub struct QuarterDetector;

#[async_trait]
impl Detector for QuarterDetector {
    async fn detect(&self, bytes: &[u8]) -> Result<Vec<Detection>, AppError> {
        let (w, h) = image::load_from_memory(bytes)
            .map(|img| (img.width() as f32, img.height() as f32))
            .map_err(|e| AnalysisError::InvalidResponse(e.to_string()))?;
        Ok(vec![
            Detection {
                class_id: 0,
                confidence: 0.9,
                polygon: vec![[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]],
            },
            Detection {
                class_id: 1,
                confidence: 0.8,
                polygon: vec![[0.0, 0.0], [w / 2.0, 0.0], [w / 2.0, h / 2.0], [0.0, h / 2.0]],
            },
        ])
    }
}

/// A model endpoint that is always down.
pub struct UnavailableDetector;

#[async_trait]
impl Detector for UnavailableDetector {
    async fn detect(&self, _image: &[u8]) -> Result<Vec<Detection>, AppError> {
        Err(AnalysisError::InferenceFailed("connection refused".into()).into())
    }
}

pub async fn test_state_with(detector: Arc<dyn Detector>) -> (AppState, TempDir) {
    test_state_configured(detector, |_| {}).await
}

/// Like `test_state_with`, with a hook to adjust settings before start-up.
pub async fn test_state_configured(
    detector: Arc<dyn Detector>,
    adjust: impl FnOnce(&mut Settings),
) -> (AppState, TempDir) {
    let media = tempfile::tempdir().expect("Failed to create media dir");
    let mut config = Settings::new_for_test().expect("Failed to load test config");
    config.media.root = media.path().to_path_buf();
    config.media.public_base_url = Some("http://testserver".to_string());
    adjust(&mut config);

    let state = AppState::with_detector(config, detector)
        .await
        .expect("Failed to build state");
    (state, media)
}

pub async fn test_state() -> (AppState, TempDir) {
    test_state_with(Arc::new(QuarterDetector)).await
}

/// Registers `username` directly through the service and returns a token.
pub async fn user_with_token(state: &AppState, username: &str) -> String {
    let email = format!("{}@example.com", username);
    state
        .auth_service
        .register(&NewAccount {
            username: Some(username.to_string()),
            email: Some(email.clone()),
            password: Some(PASSWORD.to_string()),
            confirm_password: Some(PASSWORD.to_string()),
            ..Default::default()
        })
        .await
        .expect("Failed to register user");

    let (_, token) = state
        .auth_service
        .authenticate(&email, PASSWORD)
        .await
        .expect("Failed to log in");
    token
}

pub fn auth_header(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Token {}", token))
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([40, 140, 60]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .expect("Failed to encode png");
    bytes
}

pub enum Part<'a> {
    File { name: &'a str, file_name: &'a str, bytes: Vec<u8> },
    Text { name: &'a str, value: &'a str },
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

pub fn multipart_body(parts: Vec<Part<'_>>) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File { name, file_name, bytes } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&bytes);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}", name, value).as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Analyses `names` as PNG uploads into a fresh session owned by `email`.
pub async fn seed_session(state: &AppState, email: &str, names: &[&str]) -> AnalysisSession {
    let user = state
        .db
        .get_user_by_email(email)
        .await
        .expect("Failed to query user")
        .expect("User should exist");

    let uploads: Vec<Upload> = names
        .iter()
        .map(|name| Upload { file_name: name.to_string(), bytes: png_bytes(50, 50) })
        .collect();
    let analyses = state.analysis.analyze_batch(&uploads).await.expect("Analysis failed");
    let records: Vec<_> = analyses.iter().map(|a| a.to_record()).collect();

    let session = state
        .db
        .create_analysis_session(user.id)
        .await
        .expect("Failed to create session");
    let (_, session) = state
        .db
        .record_batch(&session, &records)
        .await
        .expect("Failed to record batch");
    session
}
