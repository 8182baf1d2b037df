//! Authentication
//!
//! Users, refresh tokens and the HS256 access tokens issued from them.
//! Everything is persisted under the `auth` storage key whenever it changes.

pub mod error;
pub mod jwt;
pub mod models;

pub use error::{AuthError, AuthResult};
pub use models::{AuthData, RefreshToken, TokenType, User, ACCESS_TOKEN_EXPIRATION_SECS};

use chrono::{DateTime, Duration, Utc};
use ha_registries::{Storable, Storage};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Manages users and tokens
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct AuthManager {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    storage: Arc<Storage>,
    users: RwLock<IndexMap<String, User>>,
    refresh_tokens: RwLock<IndexMap<String, RefreshToken>>,
}

impl AuthManager {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                storage,
                users: RwLock::new(IndexMap::new()),
                refresh_tokens: RwLock::new(IndexMap::new()),
            }),
        }
    }

    /// Load users and tokens from storage
    pub async fn load(&self) -> AuthResult<()> {
        let Some(file) = self.inner.storage.load::<AuthData>(models::STORAGE_KEY).await? else {
            return Ok(());
        };

        info!(
            "Loading {} users and {} refresh tokens from storage",
            file.data.users.len(),
            file.data.refresh_tokens.len()
        );

        let mut users = self.inner.users.write().await;
        let mut tokens = self.inner.refresh_tokens.write().await;
        users.clear();
        tokens.clear();
        for user in file.data.users {
            users.insert(user.id.clone(), user);
        }
        for token in file.data.refresh_tokens {
            tokens.insert(token.id.clone(), token);
        }
        Ok(())
    }

    /// Save users and tokens to storage
    pub async fn save(&self) -> AuthResult<()> {
        let data = {
            let users = self.inner.users.read().await;
            let tokens = self.inner.refresh_tokens.read().await;
            AuthData {
                users: users.values().cloned().collect(),
                refresh_tokens: tokens.values().cloned().collect(),
            }
        };

        self.inner.storage.save(&data.into_storage_file()).await?;
        debug!("Saved auth data");
        Ok(())
    }

    /// Create a user
    pub async fn create_user(&self, name: impl Into<String>, is_owner: bool) -> AuthResult<User> {
        let user = User::new(name, is_owner);
        self.inner
            .users
            .write()
            .await
            .insert(user.id.clone(), user.clone());
        info!("Created user {} ({})", user.name, user.id);

        self.save().await?;
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Option<User> {
        self.inner.users.read().await.get(user_id).cloned()
    }

    /// The first owner user, if any
    pub async fn get_owner(&self) -> Option<User> {
        self.inner
            .users
            .read()
            .await
            .values()
            .find(|u| u.is_owner)
            .cloned()
    }

    pub async fn users(&self) -> Vec<User> {
        self.inner.users.read().await.values().cloned().collect()
    }

    /// Create a refresh token for `user_id`
    ///
    /// Long-lived tokens need a client name that is unique for the user.
    pub async fn create_refresh_token(
        &self,
        user_id: &str,
        client_name: Option<&str>,
        token_type: TokenType,
        access_token_expiration: Duration,
    ) -> AuthResult<RefreshToken> {
        let user = self
            .get_user(user_id)
            .await
            .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))?;
        if !user.is_active {
            return Err(AuthError::UserInactive(user_id.to_string()));
        }

        let token = {
            let mut tokens = self.inner.refresh_tokens.write().await;

            if token_type == TokenType::LongLivedAccessToken {
                let name = client_name.ok_or(AuthError::MissingClientName)?;
                let duplicate = tokens.values().any(|t| {
                    t.user_id == user_id
                        && t.token_type == TokenType::LongLivedAccessToken
                        && t.client_name.as_deref() == Some(name)
                });
                if duplicate {
                    return Err(AuthError::DuplicateClientName {
                        user_id: user_id.to_string(),
                        client_name: name.to_string(),
                    });
                }
            }

            let token = RefreshToken::new(
                user_id,
                client_name.map(str::to_string),
                token_type,
                access_token_expiration.num_seconds(),
                Utc::now(),
            );
            tokens.insert(token.id.clone(), token.clone());
            token
        };
        debug!(
            "Created {:?} refresh token {} for user {}",
            token.token_type, token.id, user_id
        );

        self.save().await?;
        Ok(token)
    }

    pub async fn get_refresh_token(&self, token_id: &str) -> Option<RefreshToken> {
        self.inner.refresh_tokens.read().await.get(token_id).cloned()
    }

    pub async fn refresh_tokens_for_user(&self, user_id: &str) -> Vec<RefreshToken> {
        self.inner
            .refresh_tokens
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Remove a refresh token, invalidating its access tokens
    ///
    /// Returns false if the token did not exist.
    pub async fn remove_refresh_token(&self, token_id: &str) -> AuthResult<bool> {
        let removed = self
            .inner
            .refresh_tokens
            .write()
            .await
            .shift_remove(token_id)
            .is_some();

        if removed {
            debug!("Removed refresh token {}", token_id);
            self.save().await?;
        }
        Ok(removed)
    }

    /// Issue an access token from a refresh token
    pub async fn create_access_token(&self, refresh_token: &RefreshToken) -> AuthResult<String> {
        self.create_access_token_at(refresh_token, Utc::now()).await
    }

    pub async fn create_access_token_at(
        &self,
        refresh_token: &RefreshToken,
        now: DateTime<Utc>,
    ) -> AuthResult<String> {
        let claims = jwt::Claims {
            iss: refresh_token.id.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + refresh_token.access_token_expiration,
        };
        let access_token = jwt::encode(&claims, &refresh_token.jwt_key)?;

        if let Some(stored) = self
            .inner
            .refresh_tokens
            .write()
            .await
            .get_mut(&refresh_token.id)
        {
            stored.last_used_at = Some(now);
        }
        Ok(access_token)
    }

    /// Validate an access token and return the refresh token it came from
    pub async fn validate_access_token(&self, access_token: &str) -> AuthResult<RefreshToken> {
        self.validate_access_token_at(access_token, Utc::now()).await
    }

    pub async fn validate_access_token_at(
        &self,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<RefreshToken> {
        let claims = jwt::decode_unverified(access_token)?;
        let refresh_token = self
            .get_refresh_token(&claims.iss)
            .await
            .ok_or(AuthError::InvalidToken("unknown refresh token"))?;

        jwt::verify(access_token, &refresh_token.jwt_key)?;
        if claims.exp <= now.timestamp() {
            return Err(AuthError::InvalidToken("expired"));
        }

        match self.get_user(&refresh_token.user_id).await {
            Some(user) if user.is_active => Ok(refresh_token),
            Some(_) => Err(AuthError::UserInactive(refresh_token.user_id)),
            None => Err(AuthError::UserNotFound(refresh_token.user_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> AuthManager {
        AuthManager::new(Arc::new(Storage::new(dir.path())))
    }

    #[tokio::test]
    async fn test_owner_lookup() {
        let dir = TempDir::new().unwrap();
        let auth = manager(&dir);
        assert!(auth.get_owner().await.is_none());

        auth.create_user("Guest", false).await.unwrap();
        let owner = auth.create_user("Owner", true).await.unwrap();

        assert_eq!(auth.get_owner().await.unwrap().id, owner.id);
        assert_eq!(auth.users().await.len(), 2);
    }

    #[tokio::test]
    async fn test_long_lived_token_requires_unique_client_name() {
        let dir = TempDir::new().unwrap();
        let auth = manager(&dir);
        let user = auth.create_user("Owner", true).await.unwrap();
        let lifespan = Duration::days(3650);

        assert!(matches!(
            auth.create_refresh_token(&user.id, None, TokenType::LongLivedAccessToken, lifespan)
                .await,
            Err(AuthError::MissingClientName)
        ));

        auth.create_refresh_token(
            &user.id,
            Some("Xiaozhi"),
            TokenType::LongLivedAccessToken,
            lifespan,
        )
        .await
        .unwrap();

        assert!(matches!(
            auth.create_refresh_token(
                &user.id,
                Some("Xiaozhi"),
                TokenType::LongLivedAccessToken,
                lifespan
            )
            .await,
            Err(AuthError::DuplicateClientName { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let dir = TempDir::new().unwrap();
        let auth = manager(&dir);
        let result = auth
            .create_refresh_token("nobody", None, TokenType::Normal, Duration::minutes(30))
            .await;
        assert!(matches!(result, Err(AuthError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn test_access_token_lifecycle() {
        let dir = TempDir::new().unwrap();
        let auth = manager(&dir);
        let user = auth.create_user("Owner", true).await.unwrap();
        let refresh = auth
            .create_refresh_token(&user.id, None, TokenType::Normal, Duration::minutes(30))
            .await
            .unwrap();

        let now = Utc::now();
        let access = auth.create_access_token_at(&refresh, now).await.unwrap();

        let validated = auth.validate_access_token_at(&access, now).await.unwrap();
        assert_eq!(validated.id, refresh.id);
        assert!(validated.last_used_at.is_some());

        let later = now + Duration::minutes(31);
        assert!(matches!(
            auth.validate_access_token_at(&access, later).await,
            Err(AuthError::InvalidToken("expired"))
        ));

        assert!(auth.remove_refresh_token(&refresh.id).await.unwrap());
        assert!(!auth.remove_refresh_token(&refresh.id).await.unwrap());
        assert!(matches!(
            auth.validate_access_token_at(&access, now).await,
            Err(AuthError::InvalidToken("unknown refresh token"))
        ));
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let auth = manager(&dir);
        let user = auth.create_user("Owner", true).await.unwrap();
        let token = auth
            .create_refresh_token(
                &user.id,
                Some("Xiaozhi"),
                TokenType::LongLivedAccessToken,
                Duration::days(10),
            )
            .await
            .unwrap();

        let reloaded = manager(&dir);
        reloaded.load().await.unwrap();

        assert_eq!(reloaded.get_owner().await.unwrap().id, user.id);
        let stored = reloaded.get_refresh_token(&token.id).await.unwrap();
        assert_eq!(stored.jwt_key, token.jwt_key);
        assert_eq!(stored.access_token_expiration, 10 * 86_400);
        assert_eq!(reloaded.refresh_tokens_for_user(&user.id).await.len(), 1);
    }
}
