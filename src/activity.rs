//! Audit trail of user actions.

use actix_web::HttpRequest;
use tracing::warn;
use uuid::Uuid;

use crate::db::{ActivityEntry, DbOperations};

pub const LOGIN: &str = "login";
pub const UPLOAD: &str = "upload";
pub const DOWNLOAD: &str = "download";
pub const REPORT: &str = "report";
pub const DELETE_SESSION: &str = "delete_session";
pub const DELETE_IMAGES: &str = "delete_images";
pub const PASSWORD_RESET: &str = "password_reset";

const DEVICE_INFO_MAX: usize = 255;

/// Address of the connected peer. Forwarding headers are client-controlled
/// and are not consulted.
pub fn client_ip(req: &HttpRequest) -> Option<String> {
    req.peer_addr().map(|addr| addr.ip().to_string())
}

pub fn device_info(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(actix_web::http::header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(|ua| ua.chars().take(DEVICE_INFO_MAX).collect())
}

/// Appends an activity row. Failures are logged and never fail the request.
pub async fn record(
    db: &DbOperations,
    req: &HttpRequest,
    user_id: Uuid,
    activity_type: &str,
    context: Option<serde_json::Value>,
) {
    let entry = ActivityEntry {
        user_id,
        activity_type: activity_type.to_string(),
        ip_address: client_ip(req),
        device_info: device_info(req),
        context_data: context,
    };

    if let Err(e) = db.log_activity(&entry).await {
        warn!(user_id = %user_id, activity = activity_type, error = %e, "Failed to record activity");
    }
}
