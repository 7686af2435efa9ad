//! In-memory OAuth storage implementation
//!
//! This module provides in-memory implementations for OAuth-related storage traits.

use crate::errors::StorageError;
use crate::oauth::application::Application;
use crate::oauth::grant::Grant;
use crate::oauth::identity::User;
use crate::oauth::token::{AccessToken, RefreshToken};
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// In-memory implementation for OAuth storage
///
/// Every table sits behind its own mutex. The only operation that holds two
/// locks at once takes `access_tokens` before `refresh_tokens`.
#[derive(Default)]
pub struct MemoryOAuthStorage {
    applications: Mutex<HashMap<String, Application>>,
    grants: Mutex<HashMap<String, Grant>>,
    access_tokens: Mutex<HashMap<String, AccessToken>>,
    refresh_tokens: Mutex<HashMap<String, RefreshToken>>,
    users: Mutex<HashMap<String, User>>,
}

impl MemoryOAuthStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| StorageError::LockPoisoned(format!("Lock error: {}", e)))
}

#[async_trait]
impl ApplicationStore for MemoryOAuthStorage {
    async fn store_application(&self, application: &Application) -> Result<()> {
        let mut applications = lock(&self.applications)?;
        if applications.contains_key(&application.client_id) {
            return Err(StorageError::Conflict(format!(
                "client_id {} already registered",
                application.client_id
            )));
        }
        applications.insert(application.client_id.clone(), application.clone());
        Ok(())
    }

    async fn get_application(&self, client_id: &str) -> Result<Option<Application>> {
        let applications = lock(&self.applications)?;
        Ok(applications.get(client_id).cloned())
    }

    async fn update_application(&self, application: &Application) -> Result<()> {
        let mut applications = lock(&self.applications)?;
        match applications.get_mut(&application.client_id) {
            Some(existing) => {
                *existing = application.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!(
                "application {}",
                application.client_id
            ))),
        }
    }

    async fn delete_application(&self, client_id: &str) -> Result<bool> {
        let mut applications = lock(&self.applications)?;
        Ok(applications.remove(client_id).is_some())
    }

    async fn list_applications(&self, owner_user_id: Option<&str>) -> Result<Vec<Application>> {
        let applications = lock(&self.applications)?;
        let mut result: Vec<_> = applications
            .values()
            .filter(|app| owner_user_id.is_none_or(|owner| app.owner_user_id == owner))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }
}

#[async_trait]
impl GrantStore for MemoryOAuthStorage {
    async fn store_grant(&self, grant: &Grant) -> Result<()> {
        let mut grants = lock(&self.grants)?;
        if grants.contains_key(&grant.code) {
            return Err(StorageError::Conflict("authorization code collision".to_string()));
        }
        grants.insert(grant.code.clone(), grant.clone());
        Ok(())
    }

    async fn get_grant(&self, code: &str) -> Result<Option<Grant>> {
        let grants = lock(&self.grants)?;
        Ok(grants.get(code).cloned())
    }

    async fn take_grant(&self, code: &str) -> Result<Option<Grant>> {
        let mut grants = lock(&self.grants)?;
        Ok(grants.remove(code))
    }

    async fn delete_client_grants(&self, client_id: &str) -> Result<usize> {
        let mut grants = lock(&self.grants)?;
        let before = grants.len();
        grants.retain(|_, grant| grant.client_id != client_id);
        Ok(before - grants.len())
    }

    async fn cleanup_expired_grants(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut grants = lock(&self.grants)?;
        let before = grants.len();
        grants.retain(|_, grant| !grant.is_expired(now));
        Ok(before - grants.len())
    }
}

#[async_trait]
impl AccessTokenStore for MemoryOAuthStorage {
    async fn store_access_token(&self, token: &AccessToken) -> Result<()> {
        let mut tokens = lock(&self.access_tokens)?;
        if tokens.contains_key(&token.token) {
            return Err(StorageError::Conflict("access token collision".to_string()));
        }
        tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>> {
        let tokens = lock(&self.access_tokens)?;
        Ok(tokens.get(token).cloned())
    }

    async fn delete_access_token(&self, token: &str) -> Result<bool> {
        let mut tokens = lock(&self.access_tokens)?;
        Ok(tokens.remove(token).is_some())
    }

    async fn get_client_access_tokens(&self, client_id: &str) -> Result<Vec<AccessToken>> {
        let tokens = lock(&self.access_tokens)?;
        Ok(tokens
            .values()
            .filter(|token| token.client_id == client_id)
            .cloned()
            .collect())
    }

    async fn cleanup_expired_access_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tokens = lock(&self.access_tokens)?;
        let refresh_tokens = lock(&self.refresh_tokens)?;
        let linked: HashSet<&str> = refresh_tokens
            .values()
            .map(|refresh| refresh.access_token_id.as_str())
            .collect();

        let before = tokens.len();
        tokens.retain(|key, token| !token.is_expired(now) || linked.contains(key.as_str()));
        Ok(before - tokens.len())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryOAuthStorage {
    async fn store_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        let mut tokens = lock(&self.refresh_tokens)?;
        if tokens.contains_key(&token.token) {
            return Err(StorageError::Conflict("refresh token collision".to_string()));
        }
        if tokens
            .values()
            .any(|existing| existing.access_token_id == token.access_token_id)
        {
            return Err(StorageError::Conflict(
                "access token already has a refresh token".to_string(),
            ));
        }
        tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let tokens = lock(&self.refresh_tokens)?;
        Ok(tokens.get(token).cloned())
    }

    async fn take_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let mut tokens = lock(&self.refresh_tokens)?;
        Ok(tokens.remove(token))
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<bool> {
        let mut tokens = lock(&self.refresh_tokens)?;
        Ok(tokens.remove(token).is_some())
    }

    async fn get_client_refresh_tokens(&self, client_id: &str) -> Result<Vec<RefreshToken>> {
        let tokens = lock(&self.refresh_tokens)?;
        Ok(tokens
            .values()
            .filter(|token| token.client_id == client_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryOAuthStorage {
    async fn store_user(&self, user: &User) -> Result<()> {
        let mut users = lock(&self.users)?;
        if users
            .values()
            .any(|existing| existing.username == user.username && existing.user_id != user.user_id)
        {
            return Err(StorageError::Conflict(format!(
                "username {} is taken",
                user.username
            )));
        }
        users.insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let users = lock(&self.users)?;
        Ok(users.get(user_id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let users = lock(&self.users)?;
        Ok(users.values().find(|user| user.username == username).cloned())
    }

    async fn delete_user(&self, user_id: &str) -> Result<bool> {
        let mut users = lock(&self.users)?;
        Ok(users.remove(user_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::application::NewApplication;
    use crate::oauth::types::RandomTokenGenerator;
    use chrono::Duration;

    fn access_token(token: &str, client_id: &str, expires: DateTime<Utc>) -> AccessToken {
        AccessToken {
            token: token.to_string(),
            user_id: Some("user".to_string()),
            client_id: client_id.to_string(),
            expires: Some(expires),
            created_at: Utc::now(),
        }
    }

    fn refresh_token(token: &str, access_token_id: &str) -> RefreshToken {
        RefreshToken {
            token: token.to_string(),
            user_id: Some("user".to_string()),
            client_id: "client".to_string(),
            access_token_id: access_token_id.to_string(),
            created_at: Utc::now(),
        }
    }

    fn grant(code: &str, client_id: &str, expires: DateTime<Utc>) -> Grant {
        Grant {
            code: code.to_string(),
            user_id: "user".to_string(),
            client_id: client_id.to_string(),
            expires: Some(expires),
            redirect_uris: "https://example.com/callback".to_string(),
            state: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_application_storage() {
        let storage = MemoryOAuthStorage::new();
        let app = NewApplication {
            client_name: "Test Client".to_string(),
            redirect_uris: "https://example.com/callback".to_string(),
            ..Default::default()
        }
        .build("owner-1", &RandomTokenGenerator, Utc::now())
        .unwrap();

        storage.store_application(&app).await.unwrap();
        assert!(matches!(
            storage.store_application(&app).await,
            Err(StorageError::Conflict(_))
        ));

        let retrieved = storage.get_application(&app.client_id).await.unwrap().unwrap();
        assert_eq!(retrieved.client_name, "Test Client");

        assert_eq!(storage.list_applications(None).await.unwrap().len(), 1);
        assert_eq!(storage.list_applications(Some("owner-1")).await.unwrap().len(), 1);
        assert!(storage.list_applications(Some("owner-2")).await.unwrap().is_empty());

        let mut renamed = app.clone();
        renamed.client_name = "Renamed".to_string();
        storage.update_application(&renamed).await.unwrap();
        assert_eq!(
            storage.get_application(&app.client_id).await.unwrap().unwrap().client_name,
            "Renamed"
        );

        assert!(storage.delete_application(&app.client_id).await.unwrap());
        assert!(!storage.delete_application(&app.client_id).await.unwrap());
        assert!(matches!(
            storage.update_application(&renamed).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_take_grant_is_single_use() {
        let storage = MemoryOAuthStorage::new();
        let now = Utc::now();
        storage.store_grant(&grant("code-1", "client", now + Duration::minutes(10))).await.unwrap();
        assert!(matches!(
            storage.store_grant(&grant("code-1", "client", now)).await,
            Err(StorageError::Conflict(_))
        ));

        assert!(storage.get_grant("code-1").await.unwrap().is_some());
        assert!(storage.take_grant("code-1").await.unwrap().is_some());
        assert!(storage.take_grant("code-1").await.unwrap().is_none());
        assert!(storage.get_grant("code-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_grant_cleanup() {
        let storage = MemoryOAuthStorage::new();
        let now = Utc::now();
        storage.store_grant(&grant("old", "a", now - Duration::seconds(1))).await.unwrap();
        storage.store_grant(&grant("fresh", "a", now + Duration::minutes(5))).await.unwrap();
        storage.store_grant(&grant("other", "b", now + Duration::minutes(5))).await.unwrap();

        assert_eq!(storage.cleanup_expired_grants(now).await.unwrap(), 1);
        assert_eq!(storage.delete_client_grants("a").await.unwrap(), 1);
        assert!(storage.get_grant("other").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_token_owns_one_access_token() {
        let storage = MemoryOAuthStorage::new();
        let now = Utc::now();
        storage
            .store_access_token(&access_token("access-1", "client", now + Duration::hours(1)))
            .await
            .unwrap();

        storage.store_refresh_token(&refresh_token("refresh-1", "access-1")).await.unwrap();
        assert!(matches!(
            storage.store_refresh_token(&refresh_token("refresh-2", "access-1")).await,
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            storage.store_refresh_token(&refresh_token("refresh-1", "access-2")).await,
            Err(StorageError::Conflict(_))
        ));

        assert!(storage.take_refresh_token("refresh-1").await.unwrap().is_some());
        assert!(storage.take_refresh_token("refresh-1").await.unwrap().is_none());

        // The link is free again once its refresh token is gone.
        storage.store_refresh_token(&refresh_token("refresh-2", "access-1")).await.unwrap();
        assert_eq!(storage.get_client_refresh_tokens("client").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_access_token_cleanup_keeps_linked_tokens() {
        let storage = MemoryOAuthStorage::new();
        let now = Utc::now();
        let past = now - Duration::seconds(1);
        storage.store_access_token(&access_token("expired", "client", past)).await.unwrap();
        storage.store_access_token(&access_token("expired-linked", "client", past)).await.unwrap();
        storage
            .store_access_token(&access_token("live", "client", now + Duration::hours(1)))
            .await
            .unwrap();
        storage.store_refresh_token(&refresh_token("refresh", "expired-linked")).await.unwrap();

        assert_eq!(storage.cleanup_expired_access_tokens(now).await.unwrap(), 1);
        assert!(storage.get_access_token("expired").await.unwrap().is_none());
        assert!(storage.get_access_token("expired-linked").await.unwrap().is_some());
        assert_eq!(storage.get_client_access_tokens("client").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_user_storage() {
        let storage = MemoryOAuthStorage::new();
        let alice = User::new("alice", Utc::now());
        storage.store_user(&alice).await.unwrap();

        let mut updated = alice.clone();
        updated.is_active = false;
        storage.store_user(&updated).await.unwrap();
        assert!(!storage.get_user(&alice.user_id).await.unwrap().unwrap().is_active);

        let imposter = User::new("alice", Utc::now());
        assert!(matches!(
            storage.store_user(&imposter).await,
            Err(StorageError::Conflict(_))
        ));

        assert_eq!(
            storage.get_user_by_username("alice").await.unwrap().unwrap().user_id,
            alice.user_id
        );
        assert!(storage.delete_user(&alice.user_id).await.unwrap());
        assert!(storage.get_user_by_username("alice").await.unwrap().is_none());
    }
}
