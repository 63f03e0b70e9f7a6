use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::AppError;

const MIN_PASSWORD_LENGTH: usize = 8;

/// PHC encoded Argon2id hash with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::InternalError(format!("Password hashing failed: {}", e)))
}

/// False for a wrong password and for anything that is not a PHC hash.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    match PasswordHash::new(encoded) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Runs the hash on the blocking pool.
pub async fn hash_password_blocking(password: &str) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password)).await?
}

pub async fn verify_password_blocking(password: &str, encoded: &str) -> Result<bool, AppError> {
    let (password, encoded) = (password.to_string(), encoded.to_string());
    Ok(tokio::task::spawn_blocking(move || verify_password(&password, &encoded)).await?)
}

/// Policy applied at registration and profile update.
pub fn check_password_policy(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "This password is too short. It must contain at least {} characters.",
            MIN_PASSWORD_LENGTH
        ));
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err("This password is entirely numeric.".to_string());
    }
    Ok(())
}

/// Policy applied by the password reset endpoint.
pub fn check_reset_password(password: &str) -> Result<(), &'static str> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err("Password must be at least 8 characters.");
    }
    let has_letter = password.chars().any(char::is_alphabetic);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err("Password must contain letters and numbers.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let encoded = hash_password("DummyPass123").unwrap();
        assert!(encoded.starts_with("$argon2id$"));
        assert!(verify_password("DummyPass123", &encoded));
        assert!(!verify_password("DummyPass124", &encoded));
    }

    #[test]
    fn test_hashes_are_salted() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "md5$1$abc$def"));
        assert!(!verify_password("x", "sha256$16$c2FsdA==$ZGlnZXN0"));
    }

    #[tokio::test]
    async fn test_blocking_helpers() {
        let encoded = hash_password_blocking("leafspot42").await.unwrap();
        assert!(verify_password_blocking("leafspot42", &encoded).await.unwrap());
        assert!(!verify_password_blocking("leafspot43", &encoded).await.unwrap());
    }

    #[test]
    fn test_password_policy() {
        assert!(check_password_policy("short1").is_err());
        assert!(check_password_policy("12345678").is_err());
        assert!(check_password_policy("longenough").is_ok());
    }

    #[test]
    fn test_reset_policy() {
        assert_eq!(check_reset_password("abc1"), Err("Password must be at least 8 characters."));
        assert_eq!(check_reset_password("abcdefgh"), Err("Password must contain letters and numbers."));
        assert_eq!(check_reset_password("12345678"), Err("Password must contain letters and numbers."));
        assert!(check_reset_password("abcd1234").is_ok());
    }
}
