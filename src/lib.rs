pub mod activity;
pub mod analysis;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod sessions;
pub mod storage;

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use tracing::info;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use analysis::{AnalysisService, Detector, HttpDetector};
pub use auth::AuthService;
pub use db::DbOperations;
pub use storage::MediaStore;

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let pool = state.db.get_pool_status();

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "database": pool,
    }))
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub db: DbOperations,
    pub media: MediaStore,
    pub auth_service: Arc<AuthService>,
    pub analysis: Arc<AnalysisService>,
}

impl AppState {
    /// Builds the state with the HTTP segmentation client from `inference`.
    pub async fn new(config: Settings) -> Result<Self> {
        let detector = HttpDetector::new(&config.inference)?;
        Self::with_detector(config, Arc::new(detector)).await
    }

    pub async fn with_detector(config: Settings, detector: Arc<dyn Detector>) -> Result<Self> {
        let db = DbOperations::connect(&config.database).await?;
        info!(url = %config.database.url, "Database ready");

        let media = MediaStore::new(&config.media.root);
        media.init().await?;

        let auth_service = Arc::new(AuthService::new(db.clone(), &config.auth));
        let analysis = Arc::new(AnalysisService::new(detector, media.clone(), &config.inference));

        Ok(Self {
            config: Arc::new(config),
            db,
            media,
            auth_service,
            analysis,
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        let removed = self.db.cleanup_expired_tokens().await?;
        info!(removed, "Expired tokens removed");
        self.db.close().await;
        Ok(())
    }
}

/// Registers every route of the service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    use analysis::handlers as analyze;
    use auth::handlers as account;
    use sessions::handlers as session;

    let json = web::JsonConfig::default()
        .error_handler(|err, _req| AppError::ValidationError(err.to_string()).into());

    cfg.app_data(json)
        .route("/health", web::get().to(health_check))
        .route("/image_upload/", web::post().to(analyze::image_upload))
        .route("/media/{path:.*}", web::get().to(session::serve_media))
        .service(
            web::scope("/api")
                .route("/analyze/", web::post().to(analyze::analyze_images))
                .route("/register/", web::post().to(account::register))
                .route("/login/", web::post().to(account::login))
                .route("/logout/", web::post().to(account::logout))
                .route("/reset_password/", web::post().to(account::reset_password))
                .route("/user/{email}/", web::get().to(account::get_user))
                .route("/user/{email}/", web::patch().to(account::update_user))
                .route("/user_sessions/", web::get().to(session::list_sessions))
                .route("/latest_session_results/", web::get().to(session::latest_session_results))
                .route("/delete_session_images/", web::post().to(session::delete_session_images))
                .route("/session_results/{session_id}/", web::get().to(session::get_session_results))
                .route("/sessions/{session_id}/", web::delete().to(session::delete_session))
                .route("/sessions/{session_id}/name/", web::patch().to(session::rename_session))
                .route(
                    "/sessions/{session_id}/download_images/",
                    web::get().to(session::download_images),
                )
                .route("/sessions/{session_id}/report/", web::get().to(session::session_report)),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::detector::MockDetector;
    use actix_web::{test, App};

    async fn test_state(media: &tempfile::TempDir) -> AppState {
        let mut config = Settings::new_for_test().expect("Failed to load test config");
        config.media.root = media.path().to_path_buf();
        AppState::with_detector(config, Arc::new(MockDetector::new()))
            .await
            .expect("Failed to build state")
    }

    #[tokio::test]
    async fn test_app_state_creation() {
        let media = tempfile::tempdir().unwrap();
        let state = test_state(&media).await;

        assert!(media.path().join(storage::UPLOADS_DIR).is_dir());
        assert!(media.path().join(storage::RESULTS_DIR).is_dir());
        assert_eq!(state.config.environment, "test");
    }

    #[tokio::test]
    async fn test_app_state_clone() {
        let media = tempfile::tempdir().unwrap();
        let state = test_state(&media).await;
        let cloned = state.clone();

        assert!(Arc::ptr_eq(&state.config, &cloned.config));
        assert!(Arc::ptr_eq(&state.auth_service, &cloned.auth_service));
        assert!(Arc::ptr_eq(&state.analysis, &cloned.analysis));
    }

    #[actix_rt::test]
    async fn test_malformed_json_is_validation_error() {
        let media = tempfile::tempdir().unwrap();
        let state = test_state(&media).await;
        let app = test::init_service(
            App::new().app_data(web::Data::new(state)).configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/login/")
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_rt::test]
    async fn test_unknown_route_is_404() {
        let media = tempfile::tempdir().unwrap();
        let state = test_state(&media).await;
        let app = test::init_service(
            App::new().app_data(web::Data::new(state)).configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/nope/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }
}
