//! Authorization server orchestrating the authorize, token and revocation flows.

use crate::config::Config;
use crate::errors::OAuthError;
use crate::oauth::application::{AllowAllApplications, Application, ApplicationPolicy, UsageContext};
use crate::oauth::grant::Grant;
use crate::oauth::identity::{HmacPasswordHasher, PasswordManager, UserDirectory, UserIdentity};
use crate::oauth::revocation::RevocationCoordinator;
use crate::oauth::token::{AccessToken, TokenIssuer, TokenPair};
use crate::oauth::types::*;
use crate::storage::traits::OAuthStorage;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::{Url, form_urlencoded};

/// Lifetimes applied to newly created grants and access tokens.
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub authorization_code: Duration,
    pub access_token: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            authorization_code: Duration::minutes(10),
            access_token: Duration::hours(10),
        }
    }
}

impl From<&Config> for TokenLifetimes {
    fn from(config: &Config) -> Self {
        Self {
            authorization_code: *config.authorization_code_expiration.as_ref(),
            access_token: *config.access_token_expiration.as_ref(),
        }
    }
}

/// OAuth 2.0 Authorization Server
pub struct AuthorizationServer {
    pub storage: Arc<dyn OAuthStorage>,
    users: UserDirectory,
    revocations: RevocationCoordinator,
    policy: Arc<dyn ApplicationPolicy>,
    generator: Arc<dyn TokenGenerator>,
    clock: Arc<dyn Clock>,
    lifetimes: TokenLifetimes,
}

impl AuthorizationServer {
    /// Create a new authorization server with the system clock, random token
    /// generation and a policy that accepts every client.
    pub fn new(storage: Arc<dyn OAuthStorage>, passwords: PasswordManager) -> Self {
        Self {
            users: UserDirectory::new(storage.clone(), passwords),
            revocations: RevocationCoordinator::new(storage.clone()),
            storage,
            policy: Arc::new(AllowAllApplications),
            generator: Arc::new(RandomTokenGenerator),
            clock: Arc::new(SystemClock),
            lifetimes: TokenLifetimes::default(),
        }
    }

    /// Create a server whose lifetimes and password salt come from `config`.
    pub fn from_config(storage: Arc<dyn OAuthStorage>, config: &Config) -> Result<Self, OAuthError> {
        let passwords =
            PasswordManager::new(Arc::new(HmacPasswordHasher), config.secret_key.as_ref())?;
        Ok(Self::new(storage, passwords).with_lifetimes(TokenLifetimes::from(config)))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.users = self.users.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TokenGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn ApplicationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lifetimes(mut self, lifetimes: TokenLifetimes) -> Self {
        self.lifetimes = lifetimes;
        self
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    fn issuer(&self) -> TokenIssuer {
        TokenIssuer::new(
            self.storage.clone(),
            self.generator.clone(),
            self.clock.clone(),
            self.lifetimes.access_token,
        )
    }

    /// Authorization code request (RFC 6749 Section 4.1.1)
    pub async fn authorize(
        &self,
        request: AuthorizationRequest,
        user: &dyn UserIdentity,
    ) -> Result<AuthorizationResponse, OAuthError> {
        let user_id = authenticated_user_id(user)?;
        let application = self
            .load_client_for(&request.client_id, GrantType::AuthorizationCode, Some(user_id))
            .await?;
        let redirect_uri = resolve_redirect_uri(&application, request.redirect_uri)?;

        let now = self.clock.now();
        let grant = Grant {
            code: self.generator.generate_token(),
            user_id: user_id.to_string(),
            client_id: application.client_id.clone(),
            expires: Some(now + self.lifetimes.authorization_code),
            redirect_uris: redirect_uri.clone(),
            state: request.state.clone(),
            created_at: now,
        };
        self.storage.store_grant(&grant).await?;

        tracing::info!(client_id = %application.client_id, "issued authorization code");

        Ok(AuthorizationResponse {
            code: grant.code,
            state: request.state,
            redirect_uri,
        })
    }

    /// Implicit grant request (RFC 6749 Section 4.2.1)
    pub async fn authorize_implicit(
        &self,
        request: AuthorizationRequest,
        user: &dyn UserIdentity,
    ) -> Result<ImplicitResponse, OAuthError> {
        let user_id = authenticated_user_id(user)?;
        let application = self
            .load_client_for(&request.client_id, GrantType::Implicit, Some(user_id))
            .await?;
        let redirect_uri = resolve_redirect_uri(&application, request.redirect_uri)?;

        let pair = self
            .issuer()
            .issue(Some(user_id), &application, AuthorizationGrantType::Implicit)
            .await?;

        Ok(ImplicitResponse {
            expires_in: pair.expires_in(self.clock.now()),
            access_token: pair.access_token.token,
            token_type: TokenType::Bearer,
            state: request.state,
            redirect_uri,
        })
    }

    /// Token endpoint (RFC 6749 Section 3.2)
    pub async fn token(
        &self,
        request: TokenRequest,
        client_auth: &ClientAuthentication,
    ) -> Result<TokenResponse, OAuthError> {
        if request.grant_type == GrantType::Implicit {
            return Err(OAuthError::UnsupportedGrantType(
                "implicit tokens are issued by the authorization endpoint".to_string(),
            ));
        }

        let application = self.authenticate_client(client_auth).await?;
        if !application.validate_grant_type(request.grant_type) {
            tracing::warn!(
                client_id = %application.client_id,
                grant_type = %request.grant_type,
                "grant type not allowed for client"
            );
            return Err(OAuthError::UnauthorizedClient(format!(
                "Client is not authorized for {}",
                request.grant_type
            )));
        }

        let pair = match request.grant_type {
            GrantType::AuthorizationCode => {
                self.handle_authorization_code_grant(&application, &request)
                    .await?
            }
            GrantType::Password => self.handle_password_grant(&application, &request).await?,
            GrantType::ClientCredentials => {
                self.handle_client_credentials_grant(&application).await?
            }
            GrantType::RefreshToken => {
                self.handle_refresh_token_grant(&application, &request)
                    .await?
            }
            GrantType::Implicit => {
                return Err(OAuthError::UnsupportedGrantType(
                    GrantType::Implicit.to_string(),
                ));
            }
        };

        Ok(TokenResponse::from_pair(pair, self.clock.now()))
    }

    /// Exchange an authorization code. The grant is checked first and only
    /// then removed; whoever removes it issues the tokens.
    async fn handle_authorization_code_grant(
        &self,
        application: &Application,
        request: &TokenRequest,
    ) -> Result<TokenPair, OAuthError> {
        let code = request
            .code
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("Missing authorization code".to_string()))?;

        let grant = self
            .storage
            .get_grant(code)
            .await?
            .filter(|grant| grant.client_id == application.client_id)
            .ok_or_else(|| OAuthError::InvalidGrant("Invalid authorization code".to_string()))?;

        if grant.is_expired(self.clock.now()) {
            return Err(OAuthError::ExpiredGrant(
                "Authorization code has expired".to_string(),
            ));
        }

        let redirect_uri = match request.redirect_uri.as_deref() {
            Some(uri) => uri.to_string(),
            None => application.default_redirect_uri()?,
        };
        if !grant.redirect_uri_allowed(&redirect_uri) {
            return Err(OAuthError::RedirectMismatch(
                "Redirect URI does not match the authorization request".to_string(),
            ));
        }

        self.ensure_usable(application, GrantType::AuthorizationCode, Some(&grant.user_id))?;

        let Some(grant) = self.storage.take_grant(code).await? else {
            tracing::warn!(
                client_id = %application.client_id,
                "authorization code consumed by a concurrent exchange"
            );
            return Err(OAuthError::InvalidGrant(
                "Invalid authorization code".to_string(),
            ));
        };

        self.issuer()
            .issue(
                Some(&grant.user_id),
                application,
                AuthorizationGrantType::AuthorizationCode,
            )
            .await
    }

    /// Resource owner password credentials grant
    async fn handle_password_grant(
        &self,
        application: &Application,
        request: &TokenRequest,
    ) -> Result<TokenPair, OAuthError> {
        let (Some(username), Some(password)) =
            (request.username.as_deref(), request.password.as_deref())
        else {
            return Err(OAuthError::InvalidRequest(
                "Missing username or password".to_string(),
            ));
        };

        let user = self.users.authenticate(username, password).await?;
        self.ensure_usable(application, GrantType::Password, Some(&user.user_id))?;

        self.issuer()
            .issue(Some(&user.user_id), application, AuthorizationGrantType::Password)
            .await
    }

    /// Client credentials grant, confidential clients only
    async fn handle_client_credentials_grant(
        &self,
        application: &Application,
    ) -> Result<TokenPair, OAuthError> {
        if !application.is_confidential() {
            return Err(OAuthError::UnauthorizedClient(
                "Public clients cannot use the client credentials grant".to_string(),
            ));
        }
        self.ensure_usable(application, GrantType::ClientCredentials, None)?;

        self.issuer()
            .issue(None, application, AuthorizationGrantType::ClientCredentials)
            .await
    }

    /// Refresh token grant with rotation
    async fn handle_refresh_token_grant(
        &self,
        application: &Application,
        request: &TokenRequest,
    ) -> Result<TokenPair, OAuthError> {
        let token = request
            .refresh_token
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("Missing refresh token".to_string()))?;

        let issuer = self.issuer();
        let refresh_token = issuer.validate_refresh_token(token).await?;
        if refresh_token.client_id != application.client_id {
            return Err(OAuthError::InvalidGrant("Invalid refresh token".to_string()));
        }

        self.ensure_usable(
            application,
            GrantType::RefreshToken,
            refresh_token.user_id.as_deref(),
        )?;

        let Some(refresh_token) = self.storage.take_refresh_token(token).await? else {
            tracing::warn!(
                client_id = %application.client_id,
                "refresh token consumed by a concurrent exchange"
            );
            return Err(OAuthError::InvalidGrant("Invalid refresh token".to_string()));
        };
        if !self.revocations.revoke_refresh_token(&refresh_token).await? {
            tracing::warn!(
                client_id = %application.client_id,
                "refresh token lost its access token during the exchange"
            );
            return Err(OAuthError::InvalidGrant("Invalid refresh token".to_string()));
        }

        issuer
            .issue(
                refresh_token.user_id.as_deref(),
                application,
                application.authorization_grant_type,
            )
            .await
    }

    /// Token revocation (RFC 7009). Returns whether a token was removed.
    pub async fn revoke(
        &self,
        token: &str,
        client_auth: &ClientAuthentication,
    ) -> Result<bool, OAuthError> {
        let application = self.authenticate_client(client_auth).await?;

        if let Some(refresh_token) = self.storage.get_refresh_token(token).await? {
            if refresh_token.client_id != application.client_id {
                return Err(OAuthError::InvalidClient(
                    "Token was issued to another client".to_string(),
                ));
            }
            self.revocations.revoke_refresh_token(&refresh_token).await?;
            return Ok(true);
        }

        if let Some(access_token) = self.storage.get_access_token(token).await? {
            if access_token.client_id != application.client_id {
                return Err(OAuthError::InvalidClient(
                    "Token was issued to another client".to_string(),
                ));
            }
            return self.issuer().revoke_access_token(&access_token).await;
        }

        Ok(false)
    }

    /// Resolve a bearer token presented to a resource server.
    pub async fn validate_access_token(&self, token: &str) -> Result<AccessToken, OAuthError> {
        self.issuer().validate_access_token(token).await
    }

    /// Authenticate the client. Confidential clients must present their secret.
    async fn authenticate_client(
        &self,
        client_auth: &ClientAuthentication,
    ) -> Result<Application, OAuthError> {
        let application = self
            .storage
            .get_application(&client_auth.client_id)
            .await?
            .ok_or_else(|| OAuthError::InvalidClient("Client not found".to_string()))?;

        if application.is_confidential()
            && client_auth.client_secret.as_deref() != Some(application.client_secret.as_str())
        {
            tracing::warn!(client_id = %application.client_id, "client authentication failed");
            return Err(OAuthError::InvalidClient(
                "Client authentication failed".to_string(),
            ));
        }

        Ok(application)
    }

    /// Load a client for a front-channel flow and check it may use `grant_type`.
    async fn load_client_for(
        &self,
        client_id: &str,
        grant_type: GrantType,
        user_id: Option<&str>,
    ) -> Result<Application, OAuthError> {
        let application = self
            .storage
            .get_application(client_id)
            .await?
            .ok_or_else(|| OAuthError::InvalidClient("Client not found".to_string()))?;

        if !application.validate_grant_type(grant_type) {
            return Err(OAuthError::UnauthorizedClient(format!(
                "Client is not authorized for {}",
                grant_type
            )));
        }
        self.ensure_usable(&application, grant_type, user_id)?;

        Ok(application)
    }

    fn ensure_usable(
        &self,
        application: &Application,
        grant_type: GrantType,
        user_id: Option<&str>,
    ) -> Result<(), OAuthError> {
        let context = UsageContext {
            grant_type,
            user_id,
        };
        if self.policy.is_usable(application, &context) {
            Ok(())
        } else {
            tracing::warn!(client_id = %application.client_id, "client rejected by policy");
            Err(OAuthError::UnauthorizedClient(
                "Client is not usable".to_string(),
            ))
        }
    }
}

fn authenticated_user_id(user: &dyn UserIdentity) -> Result<&str, OAuthError> {
    user.user_id()
        .filter(|_| user.is_authenticated())
        .ok_or_else(|| OAuthError::AccessDenied("User is not authenticated".to_string()))
}

fn resolve_redirect_uri(
    application: &Application,
    requested: Option<String>,
) -> Result<String, OAuthError> {
    match requested {
        Some(uri) if application.redirect_uri_allowed(&uri) => Ok(uri),
        Some(_) => Err(OAuthError::RedirectMismatch(
            "Redirect URI is not registered for this client".to_string(),
        )),
        None => application.default_redirect_uri(),
    }
}

/// Client Authentication extracted from request
#[derive(Clone, Debug)]
pub struct ClientAuthentication {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl ClientAuthentication {
    pub fn new(client_id: &str, client_secret: Option<&str>) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.map(str::to_string),
        }
    }
}

/// Parameters of an authorization endpoint request
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
}

/// Successful authorization code response
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: Option<String>,
    pub redirect_uri: String,
}

impl AuthorizationResponse {
    /// Redirect URI with `code` and `state` appended to its query.
    pub fn redirect_url(&self) -> Result<String, OAuthError> {
        let mut url = Url::parse(&self.redirect_uri)
            .map_err(|e| OAuthError::RedirectMismatch(format!("Invalid redirect URI: {}", e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", &self.code);
            if let Some(state) = &self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

/// Successful implicit grant response
#[derive(Debug, Clone, Serialize)]
pub struct ImplicitResponse {
    pub access_token: String,
    pub token_type: TokenType,
    pub expires_in: u64,
    pub state: Option<String>,
    pub redirect_uri: String,
}

impl ImplicitResponse {
    /// Redirect URI carrying the token in its fragment.
    pub fn redirect_url(&self) -> Result<String, OAuthError> {
        let mut url = Url::parse(&self.redirect_uri)
            .map_err(|e| OAuthError::RedirectMismatch(format!("Invalid redirect URI: {}", e)))?;

        let mut fragment = form_urlencoded::Serializer::new(String::new());
        fragment
            .append_pair("access_token", &self.access_token)
            .append_pair("token_type", "Bearer")
            .append_pair("expires_in", &self.expires_in.to_string());
        if let Some(state) = &self.state {
            fragment.append_pair("state", state);
        }
        url.set_fragment(Some(&fragment.finish()));
        Ok(url.to_string())
    }
}

/// Token endpoint request
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub grant_type: GrantType,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub refresh_token: Option<String>,
}

impl TokenRequest {
    pub fn new(grant_type: GrantType) -> Self {
        Self {
            grant_type,
            code: None,
            redirect_uri: None,
            username: None,
            password: None,
            refresh_token: None,
        }
    }
}

/// Form data for token endpoint
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl TokenForm {
    /// Client credentials carried in the form body, if any.
    pub fn client_authentication(&self) -> Option<ClientAuthentication> {
        self.client_id.as_deref().map(|client_id| {
            ClientAuthentication::new(client_id, self.client_secret.as_deref())
        })
    }
}

impl TryFrom<TokenForm> for TokenRequest {
    type Error = OAuthError;

    fn try_from(form: TokenForm) -> Result<Self, Self::Error> {
        Ok(Self {
            grant_type: form.grant_type.parse()?,
            code: form.code,
            redirect_uri: form.redirect_uri,
            username: form.username,
            password: form.password,
            refresh_token: form.refresh_token,
        })
    }
}

/// Token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: TokenType,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    pub fn from_pair(pair: TokenPair, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            expires_in: pair.expires_in(now),
            access_token: pair.access_token.token,
            token_type: TokenType::Bearer,
            refresh_token: pair.refresh_token.map(|refresh| refresh.token),
        }
    }
}
