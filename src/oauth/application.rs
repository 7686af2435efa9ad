//! Registered client applications and their administration.
//!
//! An [`Application`] is bound to exactly one [`AuthorizationGrantType`]. The
//! registry validates records on every create and update, generates client
//! credentials once per record, and cascades deletion through the grant and
//! token stores.

use crate::errors::OAuthError;
use crate::oauth::grant::redirect_uri_allowed;
use crate::oauth::identity::UserIdentity;
use crate::oauth::revocation::RevocationCoordinator;
use crate::oauth::types::*;
use crate::storage::traits::OAuthStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// OAuth client application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    /// Unique client identifier, immutable after creation
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// Human-readable client name
    pub client_name: String,
    /// Client type (public or confidential)
    pub client_type: ClientType,
    /// The only grant type this client may use (plus refresh where allowed)
    pub authorization_grant_type: AuthorizationGrantType,
    /// User that registered the client
    pub owner_user_id: String,
    /// Whether the consent step may be skipped for this client
    pub skip_authorization: bool,
    /// Whitespace-separated absolute redirect URIs
    pub redirect_uris: String,
    /// Free-form description
    pub remark: String,
    /// Registration timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Check the record's invariants.
    pub fn validate(&self) -> Result<(), OAuthError> {
        let uris = self.redirect_uri_list();

        if uris.is_empty() && self.authorization_grant_type.requires_redirect_uris() {
            return Err(OAuthError::Validation(format!(
                "redirect_uris are required for the {} grant type",
                self.authorization_grant_type
            )));
        }

        for uri in &uris {
            let parsed = Url::parse(uri).map_err(|e| {
                OAuthError::Validation(format!("invalid redirect URI '{}': {}", uri, e))
            })?;
            if !parsed.has_host() {
                return Err(OAuthError::Validation(format!(
                    "redirect URI '{}' must be absolute",
                    uri
                )));
            }
        }

        Ok(())
    }

    /// Registered redirect URIs, in order.
    pub fn redirect_uri_list(&self) -> Vec<String> {
        split_uris(&self.redirect_uris)
    }

    /// The first registered redirect URI.
    pub fn default_redirect_uri(&self) -> Result<String, OAuthError> {
        self.redirect_uris
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| {
                OAuthError::Configuration(format!(
                    "client {} has no redirect URIs registered",
                    self.client_id
                ))
            })
    }

    /// Whether `redirect_uri` is covered by one of the registered URIs.
    pub fn redirect_uri_allowed(&self, redirect_uri: &str) -> bool {
        redirect_uri_allowed(self.redirect_uris.split_whitespace(), redirect_uri)
    }

    /// Whether this client may use `requested` on a protocol flow.
    ///
    /// Refresh is allowed for every grant type except implicit.
    pub fn validate_grant_type(&self, requested: GrantType) -> bool {
        if requested == GrantType::RefreshToken {
            return self.authorization_grant_type.supports_refresh();
        }
        requested == GrantType::from(self.authorization_grant_type)
    }

    pub fn is_confidential(&self) -> bool {
        self.client_type == ClientType::Confidential
    }
}

/// Context handed to an [`ApplicationPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct UsageContext<'a> {
    pub grant_type: GrantType,
    pub user_id: Option<&'a str>,
}

/// Deployment hook deciding whether a client may be used at all.
pub trait ApplicationPolicy: Send + Sync {
    fn is_usable(&self, _application: &Application, _context: &UsageContext<'_>) -> bool {
        true
    }
}

/// Policy that accepts every client.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllApplications;

impl ApplicationPolicy for AllowAllApplications {}

/// Fields supplied when registering a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewApplication {
    pub client_name: String,
    pub client_type: ClientType,
    pub authorization_grant_type: AuthorizationGrantType,
    pub skip_authorization: bool,
    pub redirect_uris: String,
    pub remark: String,
}

impl NewApplication {
    /// Build and validate an application record with freshly generated
    /// credentials.
    pub fn build(
        self,
        owner_user_id: &str,
        generator: &dyn TokenGenerator,
        now: DateTime<Utc>,
    ) -> Result<Application, OAuthError> {
        let application = Application {
            client_id: generator.generate_client_id(),
            client_secret: generator.generate_token(),
            client_name: self.client_name,
            client_type: self.client_type,
            authorization_grant_type: self.authorization_grant_type,
            owner_user_id: owner_user_id.to_string(),
            skip_authorization: self.skip_authorization,
            redirect_uris: self.redirect_uris,
            remark: self.remark,
            created_at: now,
            updated_at: now,
        };
        application.validate()?;
        Ok(application)
    }
}

/// Changes applied by [`ClientRegistry::update`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationUpdate {
    pub client_name: Option<String>,
    pub client_type: Option<ClientType>,
    pub authorization_grant_type: Option<AuthorizationGrantType>,
    pub skip_authorization: Option<bool>,
    pub redirect_uris: Option<String>,
    pub remark: Option<String>,
}

/// Administrative service for client applications
pub struct ClientRegistry {
    storage: Arc<dyn OAuthStorage>,
    generator: Arc<dyn TokenGenerator>,
    clock: Arc<dyn Clock>,
}

impl ClientRegistry {
    pub fn new(
        storage: Arc<dyn OAuthStorage>,
        generator: Arc<dyn TokenGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            generator,
            clock,
        }
    }

    /// Register a new client owned by `actor`.
    pub async fn register(
        &self,
        actor: &dyn UserIdentity,
        request: NewApplication,
    ) -> Result<Application, OAuthError> {
        let owner = actor
            .user_id()
            .filter(|_| actor.is_authenticated())
            .ok_or_else(|| {
                OAuthError::AccessDenied("only authenticated users may register clients".to_string())
            })?;

        let application = request.build(owner, self.generator.as_ref(), self.clock.now())?;
        self.storage.store_application(&application).await?;

        tracing::info!(
            client_id = %application.client_id,
            grant_type = %application.authorization_grant_type,
            "registered client application"
        );
        Ok(application)
    }

    /// Get a client by ID
    pub async fn get(&self, client_id: &str) -> Result<Option<Application>, OAuthError> {
        Ok(self.storage.get_application(client_id).await?)
    }

    /// List clients, optionally restricted to one owner
    pub async fn list(&self, owner_user_id: Option<&str>) -> Result<Vec<Application>, OAuthError> {
        Ok(self.storage.list_applications(owner_user_id).await?)
    }

    /// Apply `changes` to a client and re-validate it.
    pub async fn update(
        &self,
        actor: &dyn UserIdentity,
        client_id: &str,
        changes: ApplicationUpdate,
    ) -> Result<Application, OAuthError> {
        let mut application = self.get_managed(actor, client_id).await?;

        if let Some(client_name) = changes.client_name {
            application.client_name = client_name;
        }
        if let Some(client_type) = changes.client_type {
            application.client_type = client_type;
        }
        if let Some(grant_type) = changes.authorization_grant_type {
            application.authorization_grant_type = grant_type;
        }
        if let Some(skip_authorization) = changes.skip_authorization {
            application.skip_authorization = skip_authorization;
        }
        if let Some(redirect_uris) = changes.redirect_uris {
            application.redirect_uris = redirect_uris;
        }
        if let Some(remark) = changes.remark {
            application.remark = remark;
        }

        application.validate()?;
        application.updated_at = self.clock.now();
        self.storage.update_application(&application).await?;

        tracing::info!(client_id = %application.client_id, "updated client application");
        Ok(application)
    }

    /// Replace a client's secret with a newly generated one.
    pub async fn rotate_secret(
        &self,
        actor: &dyn UserIdentity,
        client_id: &str,
    ) -> Result<Application, OAuthError> {
        let mut application = self.get_managed(actor, client_id).await?;
        application.client_secret = self.generator.generate_token();
        application.updated_at = self.clock.now();
        self.storage.update_application(&application).await?;

        tracing::info!(client_id = %application.client_id, "rotated client secret");
        Ok(application)
    }

    /// Delete a client together with its grants and tokens.
    pub async fn delete(&self, actor: &dyn UserIdentity, client_id: &str) -> Result<(), OAuthError> {
        let application = self.get_managed(actor, client_id).await?;
        let coordinator = RevocationCoordinator::new(self.storage.clone());

        let grants = self.storage.delete_client_grants(client_id).await?;

        let refresh_tokens = self.storage.get_client_refresh_tokens(client_id).await?;
        for refresh_token in &refresh_tokens {
            coordinator.revoke_refresh_token(refresh_token).await?;
        }

        let access_tokens = self.storage.get_client_access_tokens(client_id).await?;
        for access_token in &access_tokens {
            self.storage.delete_access_token(&access_token.token).await?;
        }

        self.storage
            .delete_application(&application.client_id)
            .await?;

        tracing::info!(
            client_id = %application.client_id,
            grants,
            refresh_tokens = refresh_tokens.len(),
            access_tokens = access_tokens.len(),
            "deleted client application"
        );
        Ok(())
    }

    async fn get_managed(
        &self,
        actor: &dyn UserIdentity,
        client_id: &str,
    ) -> Result<Application, OAuthError> {
        let application = self
            .storage
            .get_application(client_id)
            .await?
            .ok_or_else(|| OAuthError::InvalidClient(format!("client not found: {}", client_id)))?;

        let is_owner = actor.is_authenticated()
            && actor.user_id() == Some(application.owner_user_id.as_str());
        if !(actor.is_super() || is_owner) {
            return Err(OAuthError::AccessDenied(
                "only the owner or an administrator may manage this client".to_string(),
            ));
        }

        Ok(application)
    }
}
