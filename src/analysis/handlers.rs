use std::collections::HashMap;

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use super::service::{ImageAnalysis, Upload};
use crate::activity;
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::storage::media_url;
use crate::AppState;

/// One image in an analysis response.
#[derive(Debug, Serialize)]
pub struct ImageResult {
    pub filename: String,
    pub percentage_necrosis: f64,
    pub lesion_count: i64,
    pub result_image: Option<String>,
    pub necrosis_lesions: Option<serde_json::Value>,
}

/// Files and plain fields of a multipart form.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<(String, Upload)>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub fn take_files(&mut self, field: &str) -> Vec<Upload> {
        let (matching, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.files).into_iter().partition(|(name, _)| name == field);
        self.files = rest;
        matching.into_iter().map(|(_, upload)| upload).collect()
    }
}

/// Client file name without any directory part.
fn display_name(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_string()
}

pub async fn read_form(mut payload: Multipart, max_bytes: usize) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    let mut total = 0usize;

    while let Some(mut field) = payload.try_next().await? {
        let (name, file_name) = {
            let disposition = field.content_disposition();
            (
                disposition.get_name().unwrap_or_default().to_string(),
                disposition.get_filename().map(display_name),
            )
        };

        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            total += chunk.len();
            if total > max_bytes {
                return Err(AppError::PayloadTooLarge(format!("upload exceeds {} bytes", max_bytes)));
            }
            data.extend_from_slice(&chunk);
        }

        match file_name {
            Some(file_name) => form.files.push((name, Upload { file_name, bytes: data })),
            None => {
                form.fields.insert(name, String::from_utf8_lossy(&data).into_owned());
            }
        }
    }

    Ok(form)
}

/// `<scheme>://<host>` of the request unless a public base URL is configured.
pub fn public_base(req: &HttpRequest, state: &AppState) -> String {
    match &state.config.media.public_base_url {
        Some(base) => base.clone(),
        None => {
            let info = req.connection_info();
            format!("{}://{}", info.scheme(), info.host())
        }
    }
}

fn to_result(analysis: &ImageAnalysis, base: &str) -> ImageResult {
    ImageResult {
        filename: analysis.image_name.clone(),
        percentage_necrosis: analysis.measurement.percentage,
        lesion_count: analysis.measurement.lesion_count as i64,
        result_image: Some(media_url(base, &analysis.processed_image)),
        necrosis_lesions: Some(analysis.measurement.lesions_json()),
    }
}

/// Analyses a batch of images into a new or existing session.
pub async fn analyze_images(
    auth: AuthenticatedUser,
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let mut form = read_form(payload, state.config.media.max_upload_bytes).await?;
    let uploads = form.take_files("images");
    if uploads.is_empty() {
        return Err(AppError::ValidationError("No images found in request".into()));
    }

    // Reuse the caller's session when the id names one of theirs
    let existing = match form.fields.get("session_id").map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(session_id) => state.db.get_session_for_user(session_id, auth.user.id).await?,
        None => None,
    };

    let analyses = state.analysis.analyze_batch(&uploads).await?;

    let session = match existing {
        Some(session) => session,
        None => state.db.create_analysis_session(auth.user.id).await?,
    };

    let records: Vec<_> = analyses.iter().map(ImageAnalysis::to_record).collect();
    let session = match state.db.record_batch(&session, &records).await {
        Ok((_, session)) => session,
        Err(e) => {
            error!(session_id = %session.session_id, error = %e, "Failed to record batch");
            state.analysis.discard(&analyses).await;
            return Err(e);
        }
    };

    info!(
        user_id = %auth.user.id,
        session_id = %session.session_id,
        images = analyses.len(),
        "Batch analysed"
    );
    activity::record(
        &state.db,
        &req,
        auth.user.id,
        activity::UPLOAD,
        Some(json!({ "session_id": session.session_id, "images": analyses.len() })),
    )
    .await;

    let base = public_base(&req, &state);
    let results: Vec<ImageResult> = analyses.iter().map(|a| to_result(a, &base)).collect();

    Ok(HttpResponse::Ok().json(json!({
        "results": results,
        "session_id": session.session_id,
        "created_at": session.created_at,
    })))
}

/// Anonymous single image analysis; nothing is recorded in a session.
pub async fn image_upload(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let mut form = read_form(payload, state.config.media.max_upload_bytes).await?;
    let Some(upload) = form.take_files("image").into_iter().next() else {
        return Err(AppError::ValidationError("No image found in request".into()));
    };

    let analysis = state.analysis.analyze(&upload).await?;
    let result = to_result(&analysis, &public_base(&req, &state));

    Ok(HttpResponse::Created().json(json!({
        "result": {
            "percentage_necrosis": result.percentage_necrosis,
            "lesion_count": result.lesion_count,
            "image": result.result_image,
            "necrosis_lesions": result.necrosis_lesions,
        },
        "message": "Image submitted successfully",
    })))
}
