//! Refresh token revocation with its access token cascade.

use crate::errors::OAuthError;
use crate::oauth::token::RefreshToken;
use crate::storage::traits::OAuthStorage;
use std::sync::Arc;

/// Revokes refresh tokens together with the access token each one owns.
#[derive(Clone)]
pub struct RevocationCoordinator {
    storage: Arc<dyn OAuthStorage>,
}

impl RevocationCoordinator {
    pub fn new(storage: Arc<dyn OAuthStorage>) -> Self {
        Self { storage }
    }

    /// Delete the linked access token, then the refresh token itself.
    ///
    /// Returns whether this call removed the linked access token. A missing
    /// access token is not an error. Deleting a refresh token that is already
    /// gone succeeds as well, so concurrent revocations of the same token both
    /// return `Ok`.
    pub async fn revoke_refresh_token(&self, token: &RefreshToken) -> Result<bool, OAuthError> {
        let cascaded = self.storage.delete_access_token(&token.access_token_id).await?;
        if !cascaded {
            tracing::debug!(
                client_id = %token.client_id,
                "linked access token already removed"
            );
        }

        let removed = self.storage.delete_refresh_token(&token.token).await?;
        tracing::debug!(client_id = %token.client_id, removed, "revoked refresh token");
        Ok(cascaded)
    }
}
