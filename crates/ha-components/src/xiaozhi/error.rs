//! Error types for the Xiaozhi bridge

use ha_auth::AuthError;
use ha_registries::StorageError;
use std::time::Duration;
use thiserror::Error;

pub type XiaozhiResult<T> = Result<T, XiaozhiError>;

#[derive(Debug, Error)]
pub enum XiaozhiError {
    #[error("loader socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("loader did not answer within {0:?}")]
    Timeout(Duration),

    #[error("unreadable loader response: {0}")]
    InvalidResponse(#[source] serde_json::Error),

    #[error("upload rejected ({status_code}): {message}")]
    Rejected { status_code: i64, message: String },

    #[error("failed to encode upload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("token lifespan of {0} days runs past the supported date range")]
    InvalidLifespan(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}
