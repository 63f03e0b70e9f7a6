use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{archive, report};
use crate::activity;
use crate::analysis::ImageResult;
use crate::auth::AuthenticatedUser;
use crate::db::{AnalysisSession, CassavaImage};
use crate::error::AppError;
use crate::storage::content_type_for;
use crate::AppState;

const SESSION_NAME_MAX: usize = 128;

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub session_name: Option<String>,
}

impl From<&CassavaImage> for ImageResult {
    fn from(image: &CassavaImage) -> Self {
        Self {
            filename: image.image_name.clone(),
            percentage_necrosis: image.necrosis_percentage,
            lesion_count: image.total_lesions,
            result_image: None,
            necrosis_lesions: image.necrosis_lesions(),
        }
    }
}

fn attachment(file_name: String) -> ContentDisposition {
    ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(file_name)],
    }
}

async fn owned_session(
    state: &AppState,
    auth: &AuthenticatedUser,
    session_id: &str,
) -> Result<AnalysisSession, AppError> {
    state
        .db
        .get_session_for_user(session_id, auth.user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found.".into()))
}

async fn session_results(state: &AppState, session: &AnalysisSession) -> Result<Vec<ImageResult>, AppError> {
    let images = state.db.images_for_session(session.id).await?;
    Ok(images.iter().map(ImageResult::from).collect())
}

async fn delete_files(state: &AppState, images: &[CassavaImage]) {
    for image in images {
        for path in [&image.original_image, &image.processed_image].into_iter().flatten() {
            state.media.delete_quietly(path).await;
        }
    }
}

pub async fn list_sessions(
    auth: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let sessions = state.db.list_sessions(auth.user.id).await?;
    let sessions: Vec<_> = sessions
        .iter()
        .map(|s| {
            json!({
                "session_id": s.session_id,
                "created_at": s.created_at,
                "num_images": s.num_images,
                "session_name": s.session_name,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({ "sessions": sessions })))
}

pub async fn latest_session_results(
    auth: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let Some(session) = state.db.latest_session(auth.user.id).await? else {
        return Ok(HttpResponse::Ok().json(json!({ "results": [] })));
    };

    let results = session_results(&state, &session).await?;
    Ok(HttpResponse::Ok().json(json!({
        "results": results,
        "session_id": session.session_id,
    })))
}

pub async fn get_session_results(
    auth: AuthenticatedUser,
    session_id: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = owned_session(&state, &auth, &session_id).await?;
    let results = session_results(&state, &session).await?;

    Ok(HttpResponse::Ok().json(json!({
        "results": results,
        "session_id": session.session_id,
        "created_at": session.created_at,
    })))
}

pub async fn rename_session(
    auth: AuthenticatedUser,
    session_id: web::Path<String>,
    req: web::Json<RenameRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = owned_session(&state, &auth, &session_id).await?;

    let name = req.session_name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    if name.is_some_and(|n| n.chars().count() > SESSION_NAME_MAX) {
        return Err(AppError::field(
            "session_name",
            "Ensure this field has no more than 128 characters.",
        ));
    }

    let session = state.db.rename_session(session.id, name).await?;
    debug!(session_id = %session.session_id, name = ?session.session_name, "Session renamed");

    Ok(HttpResponse::Ok().json(json!({
        "session_id": session.session_id,
        "created_at": session.created_at,
        "num_images": session.num_images,
        "notes": session.notes,
        "session_name": session.session_name,
    })))
}

pub async fn delete_session(
    auth: AuthenticatedUser,
    req: HttpRequest,
    session_id: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = state
        .db
        .get_session(&session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found.".into()))?;

    if session.user_id != auth.user.id {
        warn!(user_id = %auth.user.id, session_id = %session.session_id, "Refused foreign session delete");
        return Err(AppError::Forbidden("Not authorized to delete this session.".into()));
    }

    let images = state.db.images_for_session(session.id).await?;
    delete_files(&state, &images).await;
    if let Some(report) = state.db.get_report(session.id).await? {
        state.media.delete_quietly(&report.report_file).await;
    }
    state.db.delete_session(session.id).await?;

    info!(user_id = %auth.user.id, session_id = %session.session_id, "Session deleted");
    activity::record(
        &state.db,
        &req,
        auth.user.id,
        activity::DELETE_SESSION,
        Some(json!({ "session_id": session.session_id })),
    )
    .await;

    Ok(HttpResponse::NoContent().finish())
}

pub async fn delete_session_images(
    auth: AuthenticatedUser,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = state
        .db
        .latest_session(auth.user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("No session found.".into()))?;

    let images = state.db.images_for_session(session.id).await?;
    delete_files(&state, &images).await;
    let cleared = state.db.clear_image_paths(session.id).await?;

    info!(session_id = %session.session_id, images = cleared, "Session images deleted");
    activity::record(
        &state.db,
        &req,
        auth.user.id,
        activity::DELETE_IMAGES,
        Some(json!({ "session_id": session.session_id })),
    )
    .await;

    Ok(HttpResponse::Ok().json(json!({ "message": "Images deleted, text results retained." })))
}

pub async fn download_images(
    auth: AuthenticatedUser,
    req: HttpRequest,
    session_id: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = owned_session(&state, &auth, &session_id).await?;
    let images = state.db.images_for_session(session.id).await?;
    if images.is_empty() {
        return Err(AppError::NotFound("No images found for this session.".into()));
    }

    // Rows whose files were purged are skipped, which may leave the archive empty
    let mut entries = Vec::with_capacity(images.len());
    for image in &images {
        let Some(path) = image.processed_image.as_deref() else {
            continue;
        };
        match state.media.read(path).await {
            Ok(bytes) => entries.push((image.image_name.clone(), bytes)),
            Err(e) => debug!(path, error = %e, "Skipping unreadable image"),
        }
    }

    let count = entries.len();
    let bytes = tokio::task::spawn_blocking(move || archive::build_zip(&entries)).await??;

    activity::record(
        &state.db,
        &req,
        auth.user.id,
        activity::DOWNLOAD,
        Some(json!({ "session_id": session.session_id, "images": count })),
    )
    .await;

    Ok(HttpResponse::Ok()
        .content_type("application/zip")
        .insert_header(attachment(format!("session_{}_images.zip", session.session_id)))
        .body(bytes))
}

pub async fn session_report(
    auth: AuthenticatedUser,
    req: HttpRequest,
    session_id: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = owned_session(&state, &auth, &session_id).await?;
    let images = state.db.images_for_session(session.id).await?;

    let body = report::render_csv(&images);
    let checksum = report::checksum(body.as_bytes());
    let path = report::report_path(&session.session_id);

    state.media.write(&path, body.as_bytes()).await?;
    let stored = state
        .db
        .upsert_report(session.id, &path, report::FILE_FORMAT, &checksum)
        .await?;

    info!(session_id = %session.session_id, checksum = %stored.checksum, "Report generated");
    activity::record(
        &state.db,
        &req,
        auth.user.id,
        activity::REPORT,
        Some(json!({ "session_id": session.session_id })),
    )
    .await;

    Ok(HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header(attachment(format!("session_{}.csv", session.session_id)))
        .insert_header(("X-Checksum-Sha256", stored.checksum))
        .body(body))
}

/// Serves a stored media file by its relative path.
pub async fn serve_media(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let bytes = state.media.read(&path).await?;
    Ok(HttpResponse::Ok()
        .content_type(content_type_for(&path))
        .body(bytes))
}
