//! Environment-based configuration for the OAuth provider core.

use anyhow::Result;
use std::time::Duration;

use crate::errors::ConfigError;

/// Process-wide secret used to derive password salts and session fingerprints
#[derive(Clone)]
pub struct SecretKey(String);

/// Administrator credentials sourced from configuration
#[derive(Clone)]
pub struct AdminCredentials {
    pub name: String,
    pub password: String,
}

/// Authorization code lifetime configuration
#[derive(Clone)]
pub struct AuthorizationCodeExpiration(chrono::Duration);

/// Access token lifetime configuration
#[derive(Clone)]
pub struct AccessTokenExpiration(chrono::Duration);

/// Janitor sweep interval configuration
#[derive(Clone)]
pub struct JanitorInterval(Duration);

/// Janitor toggle configuration
#[derive(Clone)]
pub struct JanitorEnabled(bool);

/// Main application configuration
#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub secret_key: SecretKey,
    pub admin: AdminCredentials,
    pub authorization_code_expiration: AuthorizationCodeExpiration,
    pub access_token_expiration: AccessTokenExpiration,
    pub janitor_interval: JanitorInterval,
    pub janitor_enabled: JanitorEnabled,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret_key: SecretKey = require_env(&lookup, "SECRET_KEY")?.try_into()?;
        let admin = AdminCredentials {
            name: non_empty("ADMIN_NAME", default_env(&lookup, "ADMIN_NAME", "admin"))?,
            password: non_empty("ADMIN_PASSWORD", require_env(&lookup, "ADMIN_PASSWORD")?)?,
        };
        let authorization_code_expiration: AuthorizationCodeExpiration =
            default_env(&lookup, "AUTHORIZATION_CODE_EXPIRATION", "10m").try_into()?;
        let access_token_expiration: AccessTokenExpiration =
            default_env(&lookup, "ACCESS_TOKEN_EXPIRATION", "10h").try_into()?;
        let janitor_interval: JanitorInterval =
            default_env(&lookup, "JANITOR_INTERVAL", "5m").try_into()?;
        let janitor_enabled: JanitorEnabled =
            default_env(&lookup, "JANITOR_ENABLED", "true").try_into()?;

        Ok(Self {
            version: version()?,
            secret_key,
            admin,
            authorization_code_expiration,
            access_token_expiration,
            janitor_interval,
            janitor_enabled,
        })
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn require_env<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).ok_or_else(|| ConfigError::EnvVarRequired(name.to_string()).into())
}

fn default_env<F>(lookup: &F, name: &str, default_value: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).unwrap_or_else(|| default_value.to_string())
}

fn non_empty(name: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(ConfigError::EnvVarEmpty(name.to_string()).into());
    }
    Ok(value)
}

fn parse_positive_duration(name: &str, value: String) -> Result<Duration> {
    let duration = duration_str::parse(&value)
        .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
    if duration.is_zero() {
        return Err(ConfigError::DurationOutOfRange(name.to_string()).into());
    }
    Ok(duration)
}

impl TryFrom<String> for SecretKey {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self(non_empty("SECRET_KEY", value)?))
    }
}

impl AsRef<str> for SecretKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AuthorizationCodeExpiration {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = parse_positive_duration("AUTHORIZATION_CODE_EXPIRATION", value)?;
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl AsRef<chrono::Duration> for AuthorizationCodeExpiration {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for AccessTokenExpiration {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = parse_positive_duration("ACCESS_TOKEN_EXPIRATION", value)?;
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl AsRef<chrono::Duration> for AccessTokenExpiration {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for JanitorInterval {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self(parse_positive_duration("JANITOR_INTERVAL", value)?))
    }
}

impl AsRef<Duration> for JanitorInterval {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<String> for JanitorEnabled {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Self(true)),
            "false" | "0" | "no" | "off" => Ok(Self(false)),
            _ => Err(ConfigError::BoolParsingFailed(value).into()),
        }
    }
}

impl AsRef<bool> for JanitorEnabled {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("SECRET_KEY", "not-a-real-secret"),
            ("ADMIN_PASSWORD", "hunter2"),
        ]))
        .unwrap();

        assert_eq!(config.secret_key.as_ref(), "not-a-real-secret");
        assert_eq!(config.admin.name, "admin");
        assert_eq!(config.admin.password, "hunter2");
        assert_eq!(
            *config.authorization_code_expiration.as_ref(),
            chrono::Duration::minutes(10)
        );
        assert_eq!(
            *config.access_token_expiration.as_ref(),
            chrono::Duration::hours(10)
        );
        assert_eq!(*config.janitor_interval.as_ref(), Duration::from_secs(300));
        assert!(*config.janitor_enabled.as_ref());
    }

    #[test]
    fn test_config_requires_secret_and_admin_password() {
        let missing_secret = Config::from_lookup(lookup_from(&[("ADMIN_PASSWORD", "hunter2")]));
        let error = missing_secret.err().unwrap().to_string();
        assert!(error.contains("SECRET_KEY"), "unexpected error: {error}");

        let empty_password = Config::from_lookup(lookup_from(&[
            ("SECRET_KEY", "secret"),
            ("ADMIN_PASSWORD", "  "),
        ]));
        let error = empty_password.err().unwrap().to_string();
        assert!(error.contains("error-pen-config-2"), "unexpected error: {error}");
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let bad_duration = Config::from_lookup(lookup_from(&[
            ("SECRET_KEY", "secret"),
            ("ADMIN_PASSWORD", "hunter2"),
            ("ACCESS_TOKEN_EXPIRATION", "forever"),
        ]));
        assert!(bad_duration.is_err());

        let zero_duration = Config::from_lookup(lookup_from(&[
            ("SECRET_KEY", "secret"),
            ("ADMIN_PASSWORD", "hunter2"),
            ("AUTHORIZATION_CODE_EXPIRATION", "0s"),
        ]));
        assert!(zero_duration.is_err());

        let bad_bool = Config::from_lookup(lookup_from(&[
            ("SECRET_KEY", "secret"),
            ("ADMIN_PASSWORD", "hunter2"),
            ("JANITOR_ENABLED", "maybe"),
        ]));
        assert!(bad_bool.is_err());
    }

    #[test]
    fn test_janitor_enabled_parsing() {
        let enabled: JanitorEnabled = "ON".to_string().try_into().unwrap();
        assert!(*enabled.as_ref());
        let disabled: JanitorEnabled = "0".to_string().try_into().unwrap();
        assert!(!*disabled.as_ref());
    }
}
