//! Database module for the necrosis server
//!
//! Row models and the data access layer over the SQLite pool.

pub mod models;
pub mod operations;

pub use models::{
    AnalysisReport, AnalysisSession, AuthToken, CassavaImage, NewCassavaImage, OAuthToken, User,
    UserActivityLog,
};
pub use operations::{ActivityEntry, DbOperations, DbPoolStatus, NewOAuthToken, ProfileUpdate};
