//! Error types for the auth subsystem

use ha_registries::StorageError;
use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors raised by the auth manager
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user is not active: {0}")]
    UserInactive(String),

    #[error("long-lived access tokens require a client name")]
    MissingClientName,

    #[error("user {user_id} already has a long-lived access token named {client_name}")]
    DuplicateClientName { user_id: String, client_name: String },

    #[error("invalid access token: {0}")]
    InvalidToken(&'static str),

    #[error("auth storage error: {0}")]
    Storage(#[from] StorageError),
}
