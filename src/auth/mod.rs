//! Authentication module for the necrosis server
//!
//! Password hashing, bearer token issuing and validation, the request
//! extractor for authenticated routes and the account endpoints.

pub mod extractor;
pub mod handlers;
mod password;
mod service;

pub use extractor::AuthenticatedUser;
pub use password::{check_password_policy, hash_password, verify_password};
pub use service::{AuthService, Claims, NewAccount, PasswordReset, ProfileChanges};
