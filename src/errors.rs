//! Standardized error types following the `error-pen-<domain>-<number>` format.

use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-pen-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when a required environment variable is set but empty
    #[error("error-pen-config-2 {0} must not be empty")]
    EnvVarEmpty(String),

    /// Error when version information is not available
    #[error("error-pen-config-3 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-pen-config-4 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when boolean string cannot be parsed
    #[error(
        "error-pen-config-5 Failed to parse boolean '{0}': expected true/false/1/0/yes/no/on/off"
    )]
    BoolParsingFailed(String),

    /// Error when a duration is zero or out of range
    #[error("error-pen-config-6 Duration for {0} must be positive")]
    DurationOutOfRange(String),
}

/// OAuth protocol and state-model errors.
///
/// All variants are local, synchronous failures. The transport layer maps them
/// onto protocol responses with [`OAuthError::error_code`].
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Malformed application configuration
    #[error("error-pen-oauth-1 Validation failed: {0}")]
    Validation(String),

    /// Unknown or already consumed code or token
    #[error("error-pen-oauth-2 Invalid grant: {0}")]
    InvalidGrant(String),

    /// Authorization code found but past its expiry
    #[error("error-pen-oauth-3 Authorization code expired: {0}")]
    ExpiredGrant(String),

    /// Token found but past its expiry
    #[error("error-pen-oauth-4 Token expired: {0}")]
    ExpiredToken(String),

    /// Redirect URI not present in the allow-list
    #[error("error-pen-oauth-5 Redirect URI mismatch: {0}")]
    RedirectMismatch(String),

    /// Mutation attempted on an identity that cannot be persisted
    #[error("error-pen-oauth-6 Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Deployment misconfiguration
    #[error("error-pen-oauth-7 Configuration error: {0}")]
    Configuration(String),

    /// Unknown client or failed client authentication
    #[error("error-pen-oauth-8 Invalid client: {0}")]
    InvalidClient(String),

    /// Client is not allowed to use the requested flow
    #[error("error-pen-oauth-9 Unauthorized client: {0}")]
    UnauthorizedClient(String),

    /// Grant type not understood by this endpoint
    #[error("error-pen-oauth-10 Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Actor lacks the rights for the operation
    #[error("error-pen-oauth-11 Access denied: {0}")]
    AccessDenied(String),

    /// Missing or malformed request parameter
    #[error("error-pen-oauth-12 Invalid request: {0}")]
    InvalidRequest(String),

    /// Failure reported by the persistence collaborator
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl OAuthError {
    /// RFC 6749 error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidGrant(_)
            | OAuthError::ExpiredGrant(_)
            | OAuthError::ExpiredToken(_)
            | OAuthError::RedirectMismatch(_) => "invalid_grant",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::UnauthorizedClient(_) => "unauthorized_client",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::AccessDenied(_) => "access_denied",
            OAuthError::InvalidRequest(_) | OAuthError::Validation(_) => "invalid_request",
            OAuthError::UnsupportedOperation(_)
            | OAuthError::Configuration(_)
            | OAuthError::Storage(_) => "server_error",
        }
    }
}

/// Persistence collaborator errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when a unique key or one-to-one link is already taken
    #[error("error-pen-storage-1 Conflict: {0}")]
    Conflict(String),

    /// Error when requested record is not found
    #[error("error-pen-storage-2 Not found: {0}")]
    NotFound(String),

    /// Error when an in-memory lock was poisoned by a panicking writer
    #[error("error-pen-storage-3 Lock poisoned: {0}")]
    LockPoisoned(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            OAuthError::ExpiredGrant("code".to_string()).error_code(),
            "invalid_grant"
        );
        assert_eq!(
            OAuthError::RedirectMismatch("uri".to_string()).error_code(),
            "invalid_grant"
        );
        assert_eq!(
            OAuthError::UnauthorizedClient("implicit".to_string()).error_code(),
            "unauthorized_client"
        );
        assert_eq!(
            OAuthError::from(StorageError::Conflict("token".to_string())).error_code(),
            "server_error"
        );
    }

    #[test]
    fn test_error_message_prefix() {
        let error = OAuthError::Validation("redirect_uris required".to_string());
        assert!(error.to_string().starts_with("error-pen-oauth-1 "));
    }
}
