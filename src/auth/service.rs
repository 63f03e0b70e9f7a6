use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::password::{
    check_password_policy, check_reset_password, hash_password_blocking, verify_password_blocking,
};
use crate::config::AuthConfig;
use crate::db::models::{AuthToken, User};
use crate::db::operations::{DbOperations, ProfileUpdate};
use crate::error::{AppError, AuthError, DatabaseError};

const USER_TYPES: [&str; 3] = ["regular", "google", "github"];
const USERNAME_MAX: usize = 150;
const CONTACT_MAX: usize = 64;
const ORGANISATION_MAX: usize = 128;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // User ID
    pub exp: i64,     // Expiration time
    pub iat: i64,     // Issued at
    pub jti: String,  // Token ID, keeps tokens issued in the same second distinct
}

/// Registration input as received from the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccount {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
    pub user_type: Option<String>,
    pub contact: Option<String>,
    pub organisation: Option<String>,
}

/// Partial profile change; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub contact: Option<String>,
    pub organisation: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordReset {
    pub email: Option<String>,
    pub new_password: Option<String>,
    pub confirm_password: Option<String>,
}

type FieldErrors = BTreeMap<String, String>;

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

fn check_username(username: &str) -> Result<(), &'static str> {
    if !username.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err("Username must contain only letters.");
    }
    if username.len() > USERNAME_MAX {
        return Err("Ensure this field has no more than 150 characters.");
    }
    Ok(())
}

fn check_length(errors: &mut FieldErrors, field: &str, value: &Option<String>, max: usize) {
    if let Some(v) = value {
        if v.chars().count() > max {
            errors.insert(
                field.to_string(),
                format!("Ensure this field has no more than {} characters.", max),
            );
        }
    }
}

fn into_result(errors: FieldErrors) -> Result<(), AppError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::FieldErrors(errors))
    }
}

pub struct AuthService {
    db: DbOperations,
    jwt_secret: String,
    token_expiry_hours: i64,
}

impl AuthService {
    pub fn new(db: DbOperations, config: &AuthConfig) -> Self {
        Self {
            db,
            jwt_secret: config.jwt_secret.clone(),
            token_expiry_hours: config.token_expiry_hours,
        }
    }

    pub async fn register(&self, account: &NewAccount) -> Result<User, AppError> {
        let mut errors = FieldErrors::new();

        let username = non_blank(&account.username);
        match username {
            None => {
                errors.insert("username".into(), "This field is required.".into());
            }
            Some(name) => {
                if let Err(msg) = check_username(name) {
                    errors.insert("username".into(), msg.into());
                } else if self.db.username_taken(name, None).await? {
                    errors.insert("username".into(), "Username already exists.".into());
                }
            }
        }

        let email = non_blank(&account.email);
        match email {
            None => {
                errors.insert("email".into(), "This field is required.".into());
            }
            Some(email) if !is_valid_email(email) => {
                errors.insert("email".into(), "Enter a valid email address.".into());
            }
            Some(email) => {
                if self.db.email_taken(email, None).await? {
                    errors.insert("email".into(), "Email already exists.".into());
                }
            }
        }

        match account.password.as_deref().filter(|p| !p.is_empty()) {
            None => {
                errors.insert("password".into(), "This field is required.".into());
            }
            Some(password) => {
                if let Err(msg) = check_password_policy(password) {
                    errors.insert("password".into(), msg);
                }
            }
        }

        match account.confirm_password.as_deref().filter(|p| !p.is_empty()) {
            None => {
                errors.insert("confirm_password".into(), "This field is required.".into());
            }
            Some(confirm) => {
                if account.password.as_deref() != Some(confirm) {
                    errors.insert("confirm_password".into(), "Passwords do not match.".into());
                }
            }
        }

        let user_type = account.user_type.as_deref().unwrap_or("regular");
        if !USER_TYPES.contains(&user_type) {
            errors.insert("user_type".into(), format!("\"{}\" is not a valid choice.", user_type));
        }

        check_length(&mut errors, "contact", &account.contact, CONTACT_MAX);
        check_length(&mut errors, "organisation", &account.organisation, ORGANISATION_MAX);

        into_result(errors)?;

        // All four are present once validation passed.
        let (Some(username), Some(email), Some(password)) = (username, email, account.password.as_deref()) else {
            return Err(AppError::ValidationError("Incomplete registration".into()));
        };

        let mut user = User::new(
            username.to_string(),
            email.to_string(),
            hash_password_blocking(password).await?,
            user_type.to_string(),
        );
        user.contact = account.contact.clone().filter(|c| !c.is_empty());
        user.organisation = account.organisation.clone().filter(|o| !o.is_empty());

        let user = self.db.create_user(&user).await?;
        info!(user_id = %user.id, username = %user.username, "Registered user");
        Ok(user)
    }

    /// Checks the credentials and issues a new token.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<(User, String), AppError> {
        let user = self.db.get_user_by_email(email).await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.is_active || !verify_password_blocking(password, &user.password_hash).await? {
            return Err(AuthError::InvalidCredentials.into());
        }

        let token = self.generate_token(&user.id.to_string())?;
        self.db
            .create_token(&AuthToken::new(user.id, token.clone(), self.token_expiry_hours))
            .await?;
        self.db.record_login(user.id).await?;

        Ok((user, token))
    }

    pub async fn validate_token(&self, token: &str) -> Result<User, AppError> {
        // First check if the token was issued and not revoked
        let stored = self.db.get_token(token).await?
            .ok_or(AuthError::InvalidToken)?;

        if stored.is_expired() {
            self.db.delete_token(token).await?;
            return Err(AuthError::TokenExpired.into());
        }

        let claims = self.decode_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        if user_id != stored.user_id {
            return Err(AuthError::InvalidToken.into());
        }

        let user = self.db.get_user_by_id(user_id).await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::InvalidToken)?;

        self.db.update_token_activity(token).await?;

        Ok(user)
    }

    pub async fn invalidate_token(&self, token: &str) -> Result<(), AppError> {
        self.db.delete_token(token).await
    }

    pub async fn update_profile(&self, user: &User, changes: &ProfileChanges) -> Result<User, AppError> {
        let mut errors = FieldErrors::new();
        let mut update = ProfileUpdate::default();

        if let Some(username) = &changes.username {
            if let Err(msg) = check_username(username).and_then(|_| {
                if username.is_empty() { Err("This field may not be blank.") } else { Ok(()) }
            }) {
                errors.insert("username".into(), msg.into());
            } else if self.db.username_taken(username, Some(user.id)).await? {
                errors.insert("username".into(), "Username already exists.".into());
            } else {
                update.username = Some(username.clone());
            }
        }

        if let Some(email) = &changes.email {
            if !is_valid_email(email) {
                errors.insert("email".into(), "Enter a valid email address.".into());
            } else if self.db.email_taken(email, Some(user.id)).await? {
                errors.insert("email".into(), "Email already exists.".into());
            } else {
                update.email = Some(email.clone());
            }
        }

        check_length(&mut errors, "contact", &changes.contact, CONTACT_MAX);
        check_length(&mut errors, "organisation", &changes.organisation, ORGANISATION_MAX);
        update.contact = changes.contact.clone();
        update.organisation = changes.organisation.clone();

        if changes.password.is_some() || changes.confirm_password.is_some() {
            if changes.password != changes.confirm_password {
                errors.insert("confirm_password".into(), "Passwords do not match.".into());
            } else if let Some(password) = &changes.password {
                if let Err(msg) = check_password_policy(password) {
                    errors.insert("password".into(), msg);
                }
            }
        }

        into_result(errors)?;

        if let Some(password) = changes.password.as_deref() {
            update.password_hash = Some(hash_password_blocking(password).await?);
        }

        let updated = self.db.update_profile(user.id, &update).await?;
        info!(user_id = %user.id, "Updated profile");
        Ok(updated)
    }

    /// Replaces the password of the account with the given email and revokes
    /// its tokens.
    pub async fn reset_password(&self, reset: &PasswordReset) -> Result<(), AppError> {
        let mut errors = FieldErrors::new();

        let user = match non_blank(&reset.email) {
            None => {
                errors.insert("email".into(), "Email is required.".into());
                None
            }
            Some(email) => {
                let user = self.db.get_user_by_email(email).await?;
                if user.is_none() {
                    errors.insert("email".into(), "No user with this email.".into());
                }
                user
            }
        };

        let new_password = reset.new_password.as_deref().filter(|p| !p.is_empty());
        match new_password {
            None => {
                errors.insert("new_password".into(), "New password is required.".into());
            }
            Some(password) => {
                if let Err(msg) = check_reset_password(password) {
                    errors.insert("new_password".into(), msg.into());
                }
            }
        }

        match reset.confirm_password.as_deref().filter(|p| !p.is_empty()) {
            None => {
                errors.insert("confirm_password".into(), "Please confirm your password.".into());
            }
            Some(confirm) => {
                if new_password != Some(confirm) {
                    errors.insert("confirm_password".into(), "Passwords do not match.".into());
                }
            }
        }

        into_result(errors)?;

        let (Some(user), Some(password)) = (user, new_password) else {
            return Err(AppError::DatabaseError(DatabaseError::NotFound));
        };

        let update = ProfileUpdate {
            password_hash: Some(hash_password_blocking(password).await?),
            ..ProfileUpdate::default()
        };
        self.db.update_profile(user.id, &update).await?;
        let revoked = self.db.delete_tokens_for_user(user.id).await?;
        warn!(user_id = %user.id, revoked_tokens = revoked, "Password reset");

        Ok(())
    }

    pub fn generate_token(&self, user_id: &str) -> Result<String, AppError> {
        let now = Utc::now();
        let exp = (now + Duration::hours(self.token_expiry_hours)).timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp,
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;

        Ok(token)
    }

    fn decode_token(&self, token: &str) -> Result<Claims, AppError> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;

        Ok(claims.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    async fn setup() -> AuthService {
        let settings = Settings::new_for_test().unwrap();
        let db = DbOperations::connect(&settings.database).await.unwrap();
        AuthService::new(db, &settings.auth)
    }

    fn account(username: &str, email: &str) -> NewAccount {
        NewAccount {
            username: Some(username.to_string()),
            email: Some(email.to_string()),
            password: Some("DummyPass123".to_string()),
            confirm_password: Some("DummyPass123".to_string()),
            ..NewAccount::default()
        }
    }

    fn field_errors(err: AppError) -> FieldErrors {
        match err {
            AppError::FieldErrors(fields) => fields,
            other => panic!("expected field errors, got {:?}", other),
        }
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a b@c.de"));
        assert!(!is_valid_email("a@@b.co"));
    }

    #[tokio::test]
    async fn test_register_and_authenticate() {
        let auth = setup().await;
        let user = auth.register(&account("Alice", "alice@example.com")).await.unwrap();
        assert_eq!(user.user_type, "regular");

        let (logged_in, token) = auth.authenticate("alice@example.com", "DummyPass123").await.unwrap();
        assert_eq!(logged_in.id, user.id);

        let validated = auth.validate_token(&token).await.unwrap();
        assert_eq!(validated.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_register_collects_field_errors() {
        let auth = setup().await;
        let mut bad = account("Alice99", "not-an-email");
        bad.confirm_password = Some("Different1".to_string());
        bad.user_type = Some("facebook".to_string());

        let fields = field_errors(auth.register(&bad).await.unwrap_err());
        assert_eq!(fields["username"], "Username must contain only letters.");
        assert_eq!(fields["email"], "Enter a valid email address.");
        assert_eq!(fields["confirm_password"], "Passwords do not match.");
        assert!(fields.contains_key("user_type"));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let auth = setup().await;
        auth.register(&account("Alice", "alice@example.com")).await.unwrap();

        let fields = field_errors(auth.register(&account("Alice", "alice@example.com")).await.unwrap_err());
        assert_eq!(fields["username"], "Username already exists.");
        assert_eq!(fields["email"], "Email already exists.");
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let auth = setup().await;
        auth.register(&account("Alice", "alice@example.com")).await.unwrap();

        let err = auth.authenticate("alice@example.com", "nope").await.unwrap_err();
        assert!(matches!(err, AppError::AuthError(AuthError::InvalidCredentials)));

        let err = auth.authenticate("nobody@example.com", "DummyPass123").await.unwrap_err();
        assert!(matches!(err, AppError::AuthError(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_invalidated_token_rejected() {
        let auth = setup().await;
        auth.register(&account("Alice", "alice@example.com")).await.unwrap();
        let (_, token) = auth.authenticate("alice@example.com", "DummyPass123").await.unwrap();

        auth.invalidate_token(&token).await.unwrap();

        let err = auth.validate_token(&token).await.unwrap_err();
        assert!(matches!(err, AppError::AuthError(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_unissued_token_rejected() {
        let auth = setup().await;
        let forged = auth.generate_token(&Uuid::new_v4().to_string()).unwrap();

        assert!(auth.validate_token(&forged).await.is_err());
        assert!(auth.validate_token("invalid_token").await.is_err());
    }

    #[tokio::test]
    async fn test_reset_password_revokes_tokens() {
        let auth = setup().await;
        auth.register(&account("Alice", "alice@example.com")).await.unwrap();
        let (_, token) = auth.authenticate("alice@example.com", "DummyPass123").await.unwrap();

        auth.reset_password(&PasswordReset {
            email: Some("alice@example.com".to_string()),
            new_password: Some("Fresh12345".to_string()),
            confirm_password: Some("Fresh12345".to_string()),
        })
        .await
        .unwrap();

        assert!(auth.validate_token(&token).await.is_err());
        assert!(auth.authenticate("alice@example.com", "DummyPass123").await.is_err());
        assert!(auth.authenticate("alice@example.com", "Fresh12345").await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_password_field_errors() {
        let auth = setup().await;
        let fields = field_errors(
            auth.reset_password(&PasswordReset {
                email: Some("ghost@example.com".to_string()),
                new_password: Some("abcdefgh".to_string()),
                confirm_password: None,
            })
            .await
            .unwrap_err(),
        );

        assert_eq!(fields["email"], "No user with this email.");
        assert_eq!(fields["new_password"], "Password must contain letters and numbers.");
        assert_eq!(fields["confirm_password"], "Please confirm your password.");
    }

    #[tokio::test]
    async fn test_update_profile_partial() {
        let auth = setup().await;
        let alice = auth.register(&account("Alice", "alice@example.com")).await.unwrap();
        auth.register(&account("Bob", "bob@example.com")).await.unwrap();

        let updated = auth
            .update_profile(&alice, &ProfileChanges {
                contact: Some("+256 700 000000".to_string()),
                organisation: Some("NaCRRI".to_string()),
                ..ProfileChanges::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.contact.as_deref(), Some("+256 700 000000"));
        assert_eq!(updated.username, "Alice");

        let fields = field_errors(
            auth.update_profile(&alice, &ProfileChanges {
                email: Some("bob@example.com".to_string()),
                ..ProfileChanges::default()
            })
            .await
            .unwrap_err(),
        );
        assert_eq!(fields["email"], "Email already exists.");
    }
}
