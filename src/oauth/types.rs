//! OAuth 2 core types and collaborators.
//!
//! Defines grant and client type enums, the opaque-token generator and the clock
//! used for expiry comparisons.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::OAuthError;

/// The single grant type a client application is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorizationGrantType {
    AuthorizationCode,
    Implicit,
    #[default]
    Password,
    ClientCredentials,
}

impl AuthorizationGrantType {
    /// Whether tokens issued under this grant type come with a refresh token.
    pub fn supports_refresh(&self) -> bool {
        !matches!(self, AuthorizationGrantType::Implicit)
    }

    /// Whether clients of this grant type must register redirect URIs.
    pub fn requires_redirect_uris(&self) -> bool {
        matches!(
            self,
            AuthorizationGrantType::Implicit | AuthorizationGrantType::ClientCredentials
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationGrantType::AuthorizationCode => "authorization-code",
            AuthorizationGrantType::Implicit => "implicit",
            AuthorizationGrantType::Password => "password",
            AuthorizationGrantType::ClientCredentials => "client-credentials",
        }
    }
}

impl fmt::Display for AuthorizationGrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthorizationGrantType {
    type Err = OAuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match GrantType::from_str(value)? {
            GrantType::AuthorizationCode => Ok(AuthorizationGrantType::AuthorizationCode),
            GrantType::Implicit => Ok(AuthorizationGrantType::Implicit),
            GrantType::Password => Ok(AuthorizationGrantType::Password),
            GrantType::ClientCredentials => Ok(AuthorizationGrantType::ClientCredentials),
            GrantType::RefreshToken => Err(OAuthError::Validation(
                "refresh_token cannot be a registered grant type".to_string(),
            )),
        }
    }
}

/// Grant type requested by a client on a protocol flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    Implicit,
    Password,
    ClientCredentials,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::Implicit => "implicit",
            GrantType::Password => "password",
            GrantType::ClientCredentials => "client_credentials",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = OAuthError;

    /// Accepts both the RFC 6749 wire form (`authorization_code`) and the
    /// registration form (`authorization-code`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.replace('-', "_").as_str() {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "implicit" => Ok(GrantType::Implicit),
            "password" => Ok(GrantType::Password),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "refresh_token" => Ok(GrantType::RefreshToken),
            _ => Err(OAuthError::UnsupportedGrantType(value.to_string())),
        }
    }
}

impl From<AuthorizationGrantType> for GrantType {
    fn from(value: AuthorizationGrantType) -> Self {
        match value {
            AuthorizationGrantType::AuthorizationCode => GrantType::AuthorizationCode,
            AuthorizationGrantType::Implicit => GrantType::Implicit,
            AuthorizationGrantType::Password => GrantType::Password,
            AuthorizationGrantType::ClientCredentials => GrantType::ClientCredentials,
        }
    }
}

/// Client Type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    #[default]
    Confidential,
    Public,
}

impl FromStr for ClientType {
    type Err = OAuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "confidential" => Ok(ClientType::Confidential),
            "public" => Ok(ClientType::Public),
            _ => Err(OAuthError::Validation(format!(
                "unknown client type: {}",
                value
            ))),
        }
    }
}

/// Token Types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Bearer,
}

/// Opaque-token generator collaborator.
///
/// Called once per record, at the moment the record is built.
pub trait TokenGenerator: Send + Sync {
    /// Generate an opaque token for codes, secrets and tokens
    fn generate_token(&self) -> String;

    /// Generate a client identifier
    fn generate_client_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Generator backed by the thread-local CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate_token(&self) -> String {
        generate_token()
    }
}

/// Generate a secure random token
pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Clock collaborator used for every expiry comparison.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        match self.now.lock() {
            Ok(mut guard) => *guard += by,
            Err(poisoned) => *poisoned.into_inner() += by,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Split a whitespace-separated URI list.
pub fn split_uris(uris: &str) -> Vec<String> {
    uris.split_whitespace().map(|s| s.to_string()).collect()
}
