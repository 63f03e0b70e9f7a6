use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::models::{
    AnalysisReport, AnalysisSession, AuthToken, CassavaImage, NewCassavaImage, OAuthToken, User,
    UserActivityLog,
};
use crate::error::{AppError, DatabaseError};

/// Partial profile update; `None` leaves a column untouched.
#[derive(Debug, Default, Clone)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub contact: Option<String>,
    pub organisation: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub user_id: Uuid,
    pub activity_type: String,
    pub ip_address: Option<String>,
    pub device_info: Option<String>,
    pub context_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct NewOAuthToken {
    pub user_id: Uuid,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: String,
}

#[derive(Clone)]
pub struct DbOperations {
    pool: Arc<SqlitePool>,
}

impl DbOperations {
    /// Opens the pool and applies the embedded migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
        if config.url.contains(":memory:") {
            // Every connection to `:memory:` is a separate database.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &SqlitePool {
        self.pool.as_ref()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn get_pool_status(&self) -> DbPoolStatus {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        DbPoolStatus {
            total_connections: size,
            active_connections: size.saturating_sub(idle),
            idle_connections: idle,
        }
    }

    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Sqlite>, AppError> {
        Ok(self.pool.as_ref().begin().await?)
    }

    // Users

    pub async fn create_user(&self, user: &User) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, password_hash, user_type, first_name, last_name,
                profile_picture_url, theme_preference, social_id, social_extra_data, contact,
                organisation, is_active, is_staff, date_joined, last_login)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.user_type)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.profile_picture_url)
        .bind(&user.theme_preference)
        .bind(&user.social_id)
        .bind(&user.social_extra_data)
        .bind(&user.contact)
        .bind(&user.organisation)
        .bind(user.is_active)
        .bind(user.is_staff)
        .bind(user.date_joined)
        .bind(user.last_login)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(user)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(user)
    }

    pub async fn username_taken(&self, username: &str, except: Option<Uuid>) -> Result<bool, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE username = $1 AND ($2 IS NULL OR id != $2)",
        )
        .bind(username)
        .bind(except)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count > 0)
    }

    pub async fn email_taken(&self, email: &str, except: Option<Uuid>) -> Result<bool, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE email = $1 AND ($2 IS NULL OR id != $2)",
        )
        .bind(email)
        .bind(except)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count > 0)
    }

    pub async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                username = COALESCE($2, username),
                email = COALESCE($3, email),
                contact = COALESCE($4, contact),
                organisation = COALESCE($5, organisation),
                password_hash = COALESCE($6, password_hash)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&update.username)
        .bind(&update.email)
        .bind(&update.contact)
        .bind(&update.organisation)
        .bind(&update.password_hash)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(DatabaseError::NotFound)?;

        Ok(user)
    }

    pub async fn record_login(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET last_login = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    // Tokens

    pub async fn create_token(&self, token: &AuthToken) -> Result<AuthToken, AppError> {
        let token = sqlx::query_as::<_, AuthToken>(
            r#"
            INSERT INTO auth_tokens (id, user_id, token, expires_at, created_at, last_activity)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .bind(token.created_at)
        .bind(token.last_activity)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(token)
    }

    pub async fn get_token(&self, token: &str) -> Result<Option<AuthToken>, AppError> {
        let token = sqlx::query_as::<_, AuthToken>("SELECT * FROM auth_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(token)
    }

    pub async fn update_token_activity(&self, token: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE auth_tokens SET last_activity = $1 WHERE token = $2")
            .bind(Utc::now())
            .bind(token)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    pub async fn delete_token(&self, token: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM auth_tokens WHERE token = $1")
            .bind(token)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    pub async fn delete_tokens_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn cleanup_expired_tokens(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE expires_at < $1")
            .bind(Utc::now())
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }

    // Analysis sessions

    pub async fn create_analysis_session(&self, user_id: Uuid) -> Result<AnalysisSession, AppError> {
        let session = sqlx::query_as::<_, AnalysisSession>(
            r#"
            INSERT INTO analysis_sessions (user_id, session_id, created_at, num_images)
            VALUES ($1, $2, $3, 0)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(Uuid::new_v4().to_string())
        .bind(Utc::now())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<AnalysisSession>, AppError> {
        let session = sqlx::query_as::<_, AnalysisSession>(
            "SELECT * FROM analysis_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(session)
    }

    pub async fn get_session_for_user(
        &self,
        session_id: &str,
        user_id: Uuid,
    ) -> Result<Option<AnalysisSession>, AppError> {
        let session = sqlx::query_as::<_, AnalysisSession>(
            "SELECT * FROM analysis_sessions WHERE session_id = $1 AND user_id = $2",
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(session)
    }

    pub async fn latest_session(&self, user_id: Uuid) -> Result<Option<AnalysisSession>, AppError> {
        let session = sqlx::query_as::<_, AnalysisSession>(
            "SELECT * FROM analysis_sessions WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(session)
    }

    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<AnalysisSession>, AppError> {
        let sessions = sqlx::query_as::<_, AnalysisSession>(
            "SELECT * FROM analysis_sessions WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(sessions)
    }

    pub async fn rename_session(&self, id: i64, session_name: Option<&str>) -> Result<AnalysisSession, AppError> {
        let session = sqlx::query_as::<_, AnalysisSession>(
            "UPDATE analysis_sessions SET session_name = $1 WHERE id = $2 RETURNING *",
        )
        .bind(session_name)
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(DatabaseError::NotFound)?;

        Ok(session)
    }

    /// Deletes the session row; images and the report go with it.
    pub async fn delete_session(&self, id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM analysis_sessions WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    /// Inserts a batch of results and recomputes `num_images` in one transaction.
    pub async fn record_batch(
        &self,
        session: &AnalysisSession,
        images: &[NewCassavaImage],
    ) -> Result<(Vec<CassavaImage>, AnalysisSession), AppError> {
        let mut transaction = self.begin_transaction().await?;

        let result = Self::record_batch_with_transaction(session, images, &mut transaction).await;

        match result {
            Ok(recorded) => {
                transaction.commit().await?;
                Ok(recorded)
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e)
            }
        }
    }

    async fn record_batch_with_transaction(
        session: &AnalysisSession,
        images: &[NewCassavaImage],
        transaction: &mut Transaction<'_, Sqlite>,
    ) -> Result<(Vec<CassavaImage>, AnalysisSession), AppError> {
        let mut inserted = Vec::with_capacity(images.len());

        for image in images {
            let row = sqlx::query_as::<_, CassavaImage>(
                r#"
                INSERT INTO cassava_images (session_id, original_image, processed_image, image_name,
                    uploaded_at, total_lesions, necrosis_percentage, confidence_score, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING *
                "#,
            )
            .bind(session.id)
            .bind(&image.original_image)
            .bind(&image.processed_image)
            .bind(&image.image_name)
            .bind(Utc::now())
            .bind(image.total_lesions)
            .bind(image.necrosis_percentage)
            .bind(image.confidence_score)
            .bind(image.metadata.to_string())
            .fetch_one(&mut **transaction)
            .await?;

            inserted.push(row);
        }

        let session = sqlx::query_as::<_, AnalysisSession>(
            r#"
            UPDATE analysis_sessions
            SET num_images = (SELECT COUNT(*) FROM cassava_images WHERE session_id = $1)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(session.id)
        .fetch_one(&mut **transaction)
        .await?;

        Ok((inserted, session))
    }

    pub async fn images_for_session(&self, session_id: i64) -> Result<Vec<CassavaImage>, AppError> {
        let images = sqlx::query_as::<_, CassavaImage>(
            "SELECT * FROM cassava_images WHERE session_id = $1 ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(images)
    }

    /// Forgets the stored file paths of a session while keeping the metrics.
    pub async fn clear_image_paths(&self, session_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE cassava_images SET original_image = NULL, processed_image = NULL WHERE session_id = $1",
        )
        .bind(session_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    // Reports

    pub async fn upsert_report(
        &self,
        session_id: i64,
        report_file: &str,
        file_format: &str,
        checksum: &str,
    ) -> Result<AnalysisReport, AppError> {
        let report = sqlx::query_as::<_, AnalysisReport>(
            r#"
            INSERT INTO analysis_reports (session_id, report_file, generated_at, file_format, checksum)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(session_id) DO UPDATE SET
                report_file = excluded.report_file,
                generated_at = excluded.generated_at,
                file_format = excluded.file_format,
                checksum = excluded.checksum
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(report_file)
        .bind(Utc::now())
        .bind(file_format)
        .bind(checksum)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(report)
    }

    pub async fn get_report(&self, session_id: i64) -> Result<Option<AnalysisReport>, AppError> {
        let report = sqlx::query_as::<_, AnalysisReport>(
            "SELECT * FROM analysis_reports WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(report)
    }

    // Activity log

    pub async fn log_activity(&self, entry: &ActivityEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_activity_logs (user_id, activity_type, timestamp, ip_address, device_info, context_data)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.activity_type)
        .bind(Utc::now())
        .bind(&entry.ip_address)
        .bind(&entry.device_info)
        .bind(entry.context_data.as_ref().map(|c| c.to_string()))
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    pub async fn activity_for_user(&self, user_id: Uuid) -> Result<Vec<UserActivityLog>, AppError> {
        let logs = sqlx::query_as::<_, UserActivityLog>(
            "SELECT * FROM user_activity_logs WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(logs)
    }

    // OAuth tokens

    /// Stores a provider token, replacing any previous token for the same provider.
    pub async fn save_oauth_token(&self, token: &NewOAuthToken) -> Result<OAuthToken, AppError> {
        let mut transaction = self.begin_transaction().await?;

        sqlx::query("DELETE FROM oauth_tokens WHERE user_id = $1 AND provider = $2")
            .bind(token.user_id)
            .bind(&token.provider)
            .execute(&mut *transaction)
            .await?;

        let saved = sqlx::query_as::<_, OAuthToken>(
            r#"
            INSERT INTO oauth_tokens (user_id, provider, access_token, refresh_token, expires_at, token_type, scope)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(token.user_id)
        .bind(&token.provider)
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(token.expires_at)
        .bind(&token.token_type)
        .bind(&token.scope)
        .fetch_one(&mut *transaction)
        .await?;

        transaction.commit().await?;
        Ok(saved)
    }

    pub async fn oauth_tokens_for_user(&self, user_id: Uuid) -> Result<Vec<OAuthToken>, AppError> {
        let tokens = sqlx::query_as::<_, OAuthToken>(
            "SELECT * FROM oauth_tokens WHERE user_id = $1 ORDER BY provider",
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(tokens)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DbPoolStatus {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
}
