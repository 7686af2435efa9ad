//! Storage trait definitions for the OAuth provider state.
//!
//! Defines async storage interfaces for applications, grants, tokens and users
//! that can be implemented by various backend providers. Implementations must
//! enforce uniqueness of every key and the refresh-to-access one-to-one link,
//! reporting violations as [`StorageError::Conflict`].

use crate::errors::StorageError;
use crate::oauth::application::Application;
use crate::oauth::grant::Grant;
use crate::oauth::identity::User;
use crate::oauth::token::{AccessToken, RefreshToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for storing and retrieving client applications
#[async_trait]
pub trait ApplicationStore {
    /// Insert a new application; fails on a duplicate `client_id`
    async fn store_application(&self, application: &Application) -> Result<()>;

    /// Retrieve an application by client ID
    async fn get_application(&self, client_id: &str) -> Result<Option<Application>>;

    /// Replace an existing application
    async fn update_application(&self, application: &Application) -> Result<()>;

    /// Delete an application, returning whether it existed
    async fn delete_application(&self, client_id: &str) -> Result<bool>;

    /// List applications, optionally restricted to one owner
    async fn list_applications(&self, owner_user_id: Option<&str>) -> Result<Vec<Application>>;
}

/// Trait for storing and retrieving authorization grants
#[async_trait]
pub trait GrantStore {
    /// Insert a new grant; fails on a duplicate code
    async fn store_grant(&self, grant: &Grant) -> Result<()>;

    /// Retrieve a grant without consuming it
    async fn get_grant(&self, code: &str) -> Result<Option<Grant>>;

    /// Atomically remove and return a grant. Of two concurrent callers for the
    /// same code exactly one receives `Some`.
    async fn take_grant(&self, code: &str) -> Result<Option<Grant>>;

    /// Delete every grant issued to a client
    async fn delete_client_grants(&self, client_id: &str) -> Result<usize>;

    /// Delete grants that are expired at `now`
    async fn cleanup_expired_grants(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Trait for storing and retrieving access tokens
#[async_trait]
pub trait AccessTokenStore {
    /// Insert a new access token; fails on a duplicate token
    async fn store_access_token(&self, token: &AccessToken) -> Result<()>;

    /// Retrieve an access token, expired or not
    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>>;

    /// Delete an access token, returning whether it existed
    async fn delete_access_token(&self, token: &str) -> Result<bool>;

    /// Get all tokens for a client
    async fn get_client_access_tokens(&self, client_id: &str) -> Result<Vec<AccessToken>>;

    /// Delete access tokens expired at `now` that no refresh token references
    async fn cleanup_expired_access_tokens(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Trait for storing and retrieving refresh tokens
#[async_trait]
pub trait RefreshTokenStore {
    /// Insert a new refresh token; fails on a duplicate token or when the
    /// linked access token is already owned by another refresh token
    async fn store_refresh_token(&self, token: &RefreshToken) -> Result<()>;

    /// Retrieve a refresh token without consuming it
    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>>;

    /// Atomically remove and return a refresh token
    async fn take_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>>;

    /// Delete a refresh token, returning whether it existed
    async fn delete_refresh_token(&self, token: &str) -> Result<bool>;

    /// Get all refresh tokens for a client
    async fn get_client_refresh_tokens(&self, client_id: &str) -> Result<Vec<RefreshToken>>;
}

/// Trait for storing and retrieving persisted users
#[async_trait]
pub trait UserStore {
    /// Insert or replace a user; fails when the username belongs to another user
    async fn store_user(&self, user: &User) -> Result<()>;

    /// Retrieve a user by ID
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;

    /// Retrieve a user by username
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Delete a user, returning whether it existed
    async fn delete_user(&self, user_id: &str) -> Result<bool>;
}

// ===== Combined Storage Trait =====

/// Combined OAuth storage trait
pub trait OAuthStorage:
    ApplicationStore + GrantStore + AccessTokenStore + RefreshTokenStore + UserStore + Send + Sync
{
}

impl<T> OAuthStorage for T where
    T: ApplicationStore
        + GrantStore
        + AccessTokenStore
        + RefreshTokenStore
        + UserStore
        + Send
        + Sync
{
}
