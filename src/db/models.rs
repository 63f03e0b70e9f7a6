use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub user_type: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_picture_url: Option<String>,
    pub theme_preference: String,
    pub social_id: Option<String>,
    pub social_extra_data: Option<String>,
    pub contact: Option<String>,
    pub organisation: Option<String>,
    pub is_active: bool,
    pub is_staff: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(username: String, email: String, password_hash: String, user_type: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            user_type,
            first_name: None,
            last_name: None,
            profile_picture_url: None,
            theme_preference: "light".to_string(),
            social_id: None,
            social_extra_data: None,
            contact: None,
            organisation: None,
            is_active: true,
            is_staff: false,
            date_joined: Utc::now(),
            last_login: None,
        }
    }
}

/// Issued bearer token. Deleting the row revokes the token.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl AuthToken {
    pub fn new(user_id: Uuid, token: String, expires_in_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            token,
            expires_at: now + chrono::Duration::hours(expires_in_hours),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisSession {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub user_id: Uuid,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub num_images: i64,
    pub notes: Option<String>,
    pub session_name: Option<String>,
}

/// Stored result of analysing one uploaded image.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CassavaImage {
    pub id: i64,
    pub session_id: i64,
    pub original_image: Option<String>,
    pub processed_image: Option<String>,
    pub image_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub total_lesions: i64,
    pub necrosis_percentage: f64,
    pub confidence_score: Option<f64>,
    pub metadata: Option<String>,
}

impl CassavaImage {
    /// The `necrosis_lesions` entry of the JSON metadata, if any.
    pub fn necrosis_lesions(&self) -> Option<serde_json::Value> {
        let metadata: serde_json::Value = serde_json::from_str(self.metadata.as_deref()?).ok()?;
        metadata.get("necrosis_lesions").cloned()
    }
}

/// Values for a `cassava_images` row that has not been inserted yet.
#[derive(Debug, Clone)]
pub struct NewCassavaImage {
    pub original_image: String,
    pub processed_image: String,
    pub image_name: String,
    pub total_lesions: i64,
    pub necrosis_percentage: f64,
    pub confidence_score: Option<f64>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisReport {
    pub id: i64,
    pub session_id: i64,
    pub report_file: String,
    pub generated_at: DateTime<Utc>,
    pub file_format: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserActivityLog {
    pub id: i64,
    pub user_id: Uuid,
    pub activity_type: String,
    pub timestamp: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub device_info: Option<String>,
    pub context_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OAuthToken {
    pub id: i64,
    pub user_id: Uuid,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: String,
}

impl OAuthToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}
