use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use super::extractor::AuthenticatedUser;
use super::service::{NewAccount, PasswordReset, ProfileChanges};
use crate::activity;
use crate::db::User;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct UserDetail {
    pub username: String,
    pub email: String,
    pub user_type: String,
    pub contact: Option<String>,
    pub organisation: Option<String>,
}

impl From<User> for UserDetail {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            email: user.email,
            user_type: user.user_type,
            contact: user.contact,
            organisation: user.organisation,
        }
    }
}

pub async fn register(
    req: web::Json<NewAccount>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received registration request for username: {:?}", req.username);

    match state.auth_service.register(&req).await {
        Ok(user) => {
            info!("Registration successful for email: {}", user.email);
            Ok(HttpResponse::Created().json(json!({ "message": "User registered successfully." })))
        }
        Err(e) => {
            error!("Registration failed: {}", e);
            Err(e)
        }
    }
}

pub async fn login(
    http: HttpRequest,
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let (Some(email), Some(password)) = (
        req.email.as_deref().filter(|e| !e.is_empty()),
        req.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::field("non_field_errors", "Email and password are required."));
    };

    info!("Received login request for email: {}", email);
    match state.auth_service.authenticate(email, password).await {
        Ok((user, token)) => {
            info!("Login successful for email: {}", email);
            activity::record(&state.db, &http, user.id, activity::LOGIN, None).await;
            Ok(HttpResponse::Ok().json(AuthResponse { token }))
        }
        Err(e) => {
            error!("Login failed for email: {}: {}", email, e);
            Err(e)
        }
    }
}

pub async fn logout(
    auth: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.invalidate_token(&auth.token).await?;
    info!(user_id = %auth.user.id, "Logged out");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Successfully logged out"
    })))
}

pub async fn get_user(
    _auth: AuthenticatedUser,
    email: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.db.get_user_by_email(&email).await?
        .ok_or_else(|| AppError::NotFound("User not found.".into()))?;

    Ok(HttpResponse::Ok().json(json!({
        "username": user.username,
        "email": user.email,
        "contact": user.contact,
        "organisation": user.organisation,
    })))
}

pub async fn update_user(
    auth: AuthenticatedUser,
    email: web::Path<String>,
    req: web::Json<ProfileChanges>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    // Only the owner may edit a profile
    if auth.user.email != *email {
        return Err(AppError::Forbidden("You can only update your own profile.".into()));
    }

    let updated = state.auth_service.update_profile(&auth.user, &req).await?;
    Ok(HttpResponse::Ok().json(UserDetail::from(updated)))
}

pub async fn reset_password(
    http: HttpRequest,
    req: web::Json<PasswordReset>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.reset_password(&req).await?;

    if let Some(user) = state.db.get_user_by_email(req.email.as_deref().unwrap_or_default().trim()).await? {
        activity::record(&state.db, &http, user.id, activity::PASSWORD_RESET, None).await;
    }

    Ok(HttpResponse::Ok().json(json!({ "message": "Password updated successfully." })))
}
