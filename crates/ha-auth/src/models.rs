//! Users and refresh tokens

use chrono::{DateTime, Utc};
use ha_registries::Storable;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Storage key for the auth data
pub const STORAGE_KEY: &str = "auth";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Access token lifetime for interactive sessions (30 minutes)
pub const ACCESS_TOKEN_EXPIRATION_SECS: i64 = 1800;

/// A user of the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Users created by the hub itself, never shown in the UI
    #[serde(default)]
    pub system_generated: bool,
}

fn default_true() -> bool {
    true
}

impl User {
    pub fn new(name: impl Into<String>, is_owner: bool) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            is_owner,
            is_active: true,
            system_generated: false,
        }
    }
}

/// Kind of refresh token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Issued by a login flow
    Normal,
    /// Issued to an external service; carries a unique client name
    LongLivedAccessToken,
    /// Used by system users
    System,
}

/// A refresh token
///
/// Access tokens are JWTs signed with the token's `jwt_key`; removing the
/// refresh token invalidates every access token issued from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub token_type: TokenType,
    /// Lifetime of the access tokens issued from this token, in seconds
    pub access_token_expiration: i64,
    pub token: String,
    pub jwt_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl RefreshToken {
    pub(crate) fn new(
        user_id: &str,
        client_name: Option<String>,
        token_type: TokenType,
        access_token_expiration: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.to_string(),
            client_name,
            token_type,
            access_token_expiration,
            token: random_hex(64),
            jwt_key: random_hex(64),
            created_at: now,
            last_used_at: None,
        }
    }
}

/// Persisted form of the auth data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthData {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub refresh_tokens: Vec<RefreshToken>,
}

impl Storable for AuthData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
