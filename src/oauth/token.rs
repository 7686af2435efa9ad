//! Access and refresh tokens, and the issuer that mints them.

use crate::errors::OAuthError;
use crate::oauth::application::Application;
use crate::oauth::types::{AuthorizationGrantType, Clock, TokenGenerator};
use crate::storage::traits::OAuthStorage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// OAuth Access Token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// The access token
    pub token: String,
    /// User ID (absent for client credentials)
    pub user_id: Option<String>,
    /// Client ID
    pub client_id: String,
    /// Expiration timestamp; a token without one is never valid
    pub expires: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires {
            Some(expires) => now >= expires,
            None => true,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now)
    }
}

/// OAuth Refresh Token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    /// The refresh token
    pub token: String,
    /// User ID, mirroring the owned access token
    pub user_id: Option<String>,
    /// Client ID
    pub client_id: String,
    /// Key of the single access token this refresh token owns
    pub access_token_id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Tokens minted by one issue operation.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
}

impl TokenPair {
    /// Seconds until the access token expires, floored at zero.
    pub fn expires_in(&self, now: DateTime<Utc>) -> u64 {
        self.access_token
            .expires
            .map(|expires| (expires - now).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

/// Mints and retires tokens against the store.
pub struct TokenIssuer {
    storage: Arc<dyn OAuthStorage>,
    generator: Arc<dyn TokenGenerator>,
    clock: Arc<dyn Clock>,
    access_token_lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(
        storage: Arc<dyn OAuthStorage>,
        generator: Arc<dyn TokenGenerator>,
        clock: Arc<dyn Clock>,
        access_token_lifetime: Duration,
    ) -> Self {
        Self {
            storage,
            generator,
            clock,
            access_token_lifetime,
        }
    }

    /// Issue a token pair for `user_id` on `application`.
    ///
    /// A refresh token is only created for grant types that may later be
    /// refreshed. When the refresh token cannot be stored the access token is
    /// removed again so no half-issued pair remains.
    pub async fn issue(
        &self,
        user_id: Option<&str>,
        application: &Application,
        grant_type: AuthorizationGrantType,
    ) -> Result<TokenPair, OAuthError> {
        let now = self.clock.now();

        let access_token = AccessToken {
            token: self.generator.generate_token(),
            user_id: user_id.map(str::to_string),
            client_id: application.client_id.clone(),
            expires: Some(now + self.access_token_lifetime),
            created_at: now,
        };
        self.storage.store_access_token(&access_token).await?;

        let refresh_token = if grant_type.supports_refresh() {
            let refresh_token = RefreshToken {
                token: self.generator.generate_token(),
                user_id: access_token.user_id.clone(),
                client_id: application.client_id.clone(),
                access_token_id: access_token.token.clone(),
                created_at: now,
            };

            if let Err(err) = self.storage.store_refresh_token(&refresh_token).await {
                self.storage.delete_access_token(&access_token.token).await?;
                return Err(err.into());
            }
            Some(refresh_token)
        } else {
            None
        };

        tracing::debug!(
            client_id = %application.client_id,
            grant_type = %grant_type,
            refreshable = refresh_token.is_some(),
            "issued access token"
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Delete an access token. Refresh tokens pointing at it are left in place.
    pub async fn revoke_access_token(&self, token: &AccessToken) -> Result<bool, OAuthError> {
        let removed = self.storage.delete_access_token(&token.token).await?;
        tracing::debug!(client_id = %token.client_id, removed, "revoked access token");
        Ok(removed)
    }

    /// Look up an access token that is present and unexpired.
    pub async fn validate_access_token(&self, token: &str) -> Result<AccessToken, OAuthError> {
        let access_token = self
            .storage
            .get_access_token(token)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("Unknown access token".to_string()))?;

        if access_token.is_expired(self.clock.now()) {
            return Err(OAuthError::ExpiredToken(
                "Access token has expired".to_string(),
            ));
        }

        Ok(access_token)
    }

    /// Look up a refresh token whose linked access token still exists.
    pub async fn validate_refresh_token(&self, token: &str) -> Result<RefreshToken, OAuthError> {
        let refresh_token = self
            .storage
            .get_refresh_token(token)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("Unknown refresh token".to_string()))?;

        if self
            .storage
            .get_access_token(&refresh_token.access_token_id)
            .await?
            .is_none()
        {
            tracing::warn!(
                client_id = %refresh_token.client_id,
                "refresh token rejected, linked access token is gone"
            );
            return Err(OAuthError::InvalidGrant(
                "Refresh token is no longer linked to an access token".to_string(),
            ));
        }

        Ok(refresh_token)
    }
}
