//! User identities: persisted users, the anonymous user and the configured
//! administrator.
//!
//! All three share the [`UserIdentity`] capability set. Only [`User`] can be
//! written to the store; every mutation of the other two fails with
//! [`OAuthError::UnsupportedOperation`].

use crate::config::Config;
use crate::errors::OAuthError;
use crate::oauth::types::{Clock, SystemClock};
use crate::storage::traits::OAuthStorage;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Namespace for keyed hashes derived in this module.
pub const KEY_SALT_NAMESPACE: &str = "oauth_pen.identity.";

/// User ID reserved for the configured administrator.
pub const SUPER_USER_ID: &str = "1";

const HASH_ALGORITHM: &str = "hmac-sha256";

/// Credential hashing collaborator.
pub trait PasswordHasher: Send + Sync {
    /// Hash `password` with `salt` into an opaque, self-describing string
    fn hash(&self, password: &str, salt: &str) -> Result<String, OAuthError>;

    /// Check `password` against a value produced by [`PasswordHasher::hash`]
    fn verify(&self, password: &str, encoded: &str) -> bool;
}

/// HMAC-SHA256 hasher producing `hmac-sha256$<salt>$<hex digest>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacPasswordHasher;

impl PasswordHasher for HmacPasswordHasher {
    fn hash(&self, password: &str, salt: &str) -> Result<String, OAuthError> {
        if salt.contains('$') {
            return Err(OAuthError::Configuration(
                "password salt must not contain '$'".to_string(),
            ));
        }
        let digest = hmac_sha256(salt.as_bytes(), password.as_bytes())?;
        Ok(format!("{}${}${}", HASH_ALGORITHM, salt, hex::encode(digest)))
    }

    fn verify(&self, password: &str, encoded: &str) -> bool {
        let mut parts = encoded.splitn(3, '$');
        let (Some(algorithm), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        if algorithm != HASH_ALGORITHM {
            return false;
        }
        let Ok(expected) = hex::decode(digest) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(salt.as_bytes()) else {
            return false;
        };
        mac.update(password.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>, OAuthError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| OAuthError::Configuration(format!("invalid HMAC key: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HMAC of `value` under a key derived from `key_salt` and the process secret.
pub fn salted_hmac(key_salt: &str, secret_key: &str, value: &str) -> Result<String, OAuthError> {
    let key = Sha256::digest(format!("{}{}", key_salt, secret_key).as_bytes());
    Ok(hex::encode(hmac_sha256(&key, value.as_bytes())?))
}

/// Password hashing bound to the deployment's keyed salt.
#[derive(Clone)]
pub struct PasswordManager {
    hasher: Arc<dyn PasswordHasher>,
    salt: String,
}

impl PasswordManager {
    /// Derive the deployment salt from the module namespace and `secret_key`.
    pub fn new(hasher: Arc<dyn PasswordHasher>, secret_key: &str) -> Result<Self, OAuthError> {
        let salt = salted_hmac(KEY_SALT_NAMESPACE, secret_key, "password")?;
        Ok(Self { hasher, salt })
    }

    pub fn hash(&self, password: &str) -> Result<String, OAuthError> {
        self.hasher.hash(password, &self.salt)
    }

    pub fn verify(&self, password: &str, encoded: &str) -> bool {
        !encoded.is_empty() && self.hasher.verify(password, encoded)
    }
}

/// Capability set shared by every kind of user.
pub trait UserIdentity: Send + Sync {
    /// Stable identifier, absent for the anonymous user
    fn user_id(&self) -> Option<&str>;

    fn username(&self) -> &str;

    fn is_anonymous(&self) -> bool;

    fn is_authenticated(&self) -> bool;

    fn is_super(&self) -> bool;

    fn check_password(&self, candidate: &str, passwords: &PasswordManager) -> bool;

    fn set_password(
        &mut self,
        new_password: &str,
        passwords: &PasswordManager,
    ) -> Result<(), OAuthError>;

    /// The persistable record behind this identity.
    fn as_persisted(&self) -> Result<&User, OAuthError>;
}

/// Persisted user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub username: String,
    /// Password hash; empty means no usable password
    pub password: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Plaintext from the last `set_password`, never persisted
    #[serde(skip)]
    pub raw_password: Option<String>,
}

impl User {
    /// A new active user without a usable password.
    pub fn new(username: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password: String::new(),
            is_active: true,
            created_at: now,
            raw_password: None,
        }
    }
}

impl UserIdentity for User {
    fn user_id(&self) -> Option<&str> {
        Some(self.user_id.as_str())
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn is_anonymous(&self) -> bool {
        false
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    fn is_super(&self) -> bool {
        false
    }

    fn check_password(&self, candidate: &str, passwords: &PasswordManager) -> bool {
        passwords.verify(candidate, &self.password)
    }

    fn set_password(
        &mut self,
        new_password: &str,
        passwords: &PasswordManager,
    ) -> Result<(), OAuthError> {
        self.password = passwords.hash(new_password)?;
        self.raw_password = Some(new_password.to_string());
        Ok(())
    }

    fn as_persisted(&self) -> Result<&User, OAuthError> {
        Ok(self)
    }
}

/// The user behind an unauthenticated request
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousUser;

impl UserIdentity for AnonymousUser {
    fn user_id(&self) -> Option<&str> {
        None
    }

    fn username(&self) -> &str {
        ""
    }

    fn is_anonymous(&self) -> bool {
        true
    }

    fn is_authenticated(&self) -> bool {
        false
    }

    fn is_super(&self) -> bool {
        false
    }

    fn check_password(&self, _candidate: &str, _passwords: &PasswordManager) -> bool {
        false
    }

    fn set_password(
        &mut self,
        _new_password: &str,
        _passwords: &PasswordManager,
    ) -> Result<(), OAuthError> {
        Err(OAuthError::UnsupportedOperation(
            "AnonymousUser has no password".to_string(),
        ))
    }

    fn as_persisted(&self) -> Result<&User, OAuthError> {
        Err(OAuthError::UnsupportedOperation(
            "AnonymousUser cannot be saved or deleted".to_string(),
        ))
    }
}

/// Platform administrator, defined by configuration rather than the store
#[derive(Clone)]
pub struct SuperUser {
    username: String,
    password_hash: String,
    session_auth_hash: String,
}

impl SuperUser {
    pub fn new(
        username: &str,
        password: &str,
        secret_key: &str,
        passwords: &PasswordManager,
    ) -> Result<Self, OAuthError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(OAuthError::Configuration(
                "administrator name and password must be configured".to_string(),
            ));
        }

        let key_salt = format!("{}{}", KEY_SALT_NAMESPACE, "SuperUser");
        Ok(Self {
            username: username.to_string(),
            password_hash: passwords.hash(password)?,
            session_auth_hash: salted_hmac(&key_salt, secret_key, password)?,
        })
    }

    pub fn from_config(config: &Config, passwords: &PasswordManager) -> Result<Self, OAuthError> {
        Self::new(
            &config.admin.name,
            &config.admin.password,
            config.secret_key.as_ref(),
            passwords,
        )
    }

    /// Fingerprint of the configured password; changes whenever the password
    /// does, which invalidates sessions keyed on it.
    pub fn session_auth_hash(&self) -> &str {
        &self.session_auth_hash
    }
}

impl UserIdentity for SuperUser {
    fn user_id(&self) -> Option<&str> {
        Some(SUPER_USER_ID)
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn is_anonymous(&self) -> bool {
        false
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    fn is_super(&self) -> bool {
        true
    }

    fn check_password(&self, candidate: &str, passwords: &PasswordManager) -> bool {
        passwords.verify(candidate, &self.password_hash)
    }

    fn set_password(
        &mut self,
        _new_password: &str,
        _passwords: &PasswordManager,
    ) -> Result<(), OAuthError> {
        Err(OAuthError::UnsupportedOperation(
            "SuperUser password is managed by configuration".to_string(),
        ))
    }

    fn as_persisted(&self) -> Result<&User, OAuthError> {
        Err(OAuthError::UnsupportedOperation(
            "SuperUser cannot be saved or deleted".to_string(),
        ))
    }
}

/// Persistence and authentication of users
pub struct UserDirectory {
    storage: Arc<dyn OAuthStorage>,
    passwords: PasswordManager,
    clock: Arc<dyn Clock>,
}

impl UserDirectory {
    pub fn new(storage: Arc<dyn OAuthStorage>, passwords: PasswordManager) -> Self {
        Self {
            storage,
            passwords,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn passwords(&self) -> &PasswordManager {
        &self.passwords
    }

    /// Create and save a user with the given password.
    pub async fn create_user(&self, username: &str, password: &str) -> Result<User, OAuthError> {
        if username.trim().is_empty() {
            return Err(OAuthError::Validation("username must not be empty".to_string()));
        }

        let mut user = User::new(username, self.clock.now());
        user.set_password(password, &self.passwords)?;
        self.save(&user).await?;

        tracing::info!(user_id = %user.user_id, "created user");
        Ok(user)
    }

    /// Write a user to the store. The transient plaintext password is dropped
    /// before the record leaves this function.
    pub async fn save(&self, user: &dyn UserIdentity) -> Result<(), OAuthError> {
        let mut record = user.as_persisted()?.clone();
        record.raw_password = None;
        self.storage.store_user(&record).await?;
        Ok(())
    }

    pub async fn delete(&self, user: &dyn UserIdentity) -> Result<bool, OAuthError> {
        let record = user.as_persisted()?;
        Ok(self.storage.delete_user(&record.user_id).await?)
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<User>, OAuthError> {
        Ok(self.storage.get_user(user_id).await?)
    }

    /// Resource-owner password check used by the password grant.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, OAuthError> {
        let user = self
            .storage
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("Invalid resource owner credentials".to_string()))?;

        if !user.check_password(password, &self.passwords) {
            tracing::warn!(user_id = %user.user_id, "password check failed");
            return Err(OAuthError::InvalidGrant(
                "Invalid resource owner credentials".to_string(),
            ));
        }

        if !user.is_active {
            return Err(OAuthError::InvalidGrant("User is inactive".to_string()));
        }

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::types::ManualClock;
    use crate::storage::inmemory::MemoryOAuthStorage;
    use crate::storage::traits::UserStore;

    fn passwords() -> PasswordManager {
        PasswordManager::new(Arc::new(HmacPasswordHasher), "test-secret").unwrap()
    }

    #[test]
    fn test_hasher_round_trip() {
        let hasher = HmacPasswordHasher;
        let encoded = hasher.hash("correct horse", "salt").unwrap();
        assert!(encoded.starts_with("hmac-sha256$salt$"));
        assert!(hasher.verify("correct horse", &encoded));
        assert!(!hasher.verify("battery staple", &encoded));
        assert!(!hasher.verify("correct horse", "plain-text"));
        assert!(!hasher.verify("correct horse", "md5$salt$abcd"));
        assert!(hasher.hash("pw", "bad$salt").is_err());
    }

    #[test]
    fn test_salt_depends_on_secret() {
        let first = PasswordManager::new(Arc::new(HmacPasswordHasher), "secret-a").unwrap();
        let second = PasswordManager::new(Arc::new(HmacPasswordHasher), "secret-b").unwrap();
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.hash("pw").unwrap(), second.hash("pw").unwrap());
    }

    #[test]
    fn test_capability_flags() {
        let user = User::new("alice", Utc::now());
        assert!(!user.is_anonymous());
        assert!(user.is_authenticated());
        assert!(!user.is_super());

        let anonymous = AnonymousUser;
        assert!(anonymous.is_anonymous());
        assert!(!anonymous.is_authenticated());
        assert!(!anonymous.is_super());
        assert_eq!(anonymous.user_id(), None);

        let admin = SuperUser::new("admin", "hunter2", "test-secret", &passwords()).unwrap();
        assert!(!admin.is_anonymous());
        assert!(admin.is_authenticated());
        assert!(admin.is_super());
        assert_eq!(admin.user_id(), Some(SUPER_USER_ID));
    }

    #[test]
    fn test_user_password() {
        let passwords = passwords();
        let mut user = User::new("alice", Utc::now());
        assert!(!user.check_password("", &passwords));

        user.set_password("s3cret", &passwords).unwrap();
        assert_ne!(user.password, "s3cret");
        assert_eq!(user.raw_password.as_deref(), Some("s3cret"));
        assert!(user.check_password("s3cret", &passwords));
        assert!(!user.check_password("wrong", &passwords));
    }

    #[test]
    fn test_raw_password_is_not_serialized() {
        let mut user = User::new("alice", Utc::now());
        user.set_password("s3cret", &passwords()).unwrap();
        let serialized = serde_json::to_string(&user).unwrap();
        assert!(!serialized.contains("raw_password"));
        assert!(!serialized.contains("\"s3cret\""));
    }

    #[test]
    fn test_unsupported_mutations() {
        let passwords = passwords();
        let mut anonymous = AnonymousUser;
        assert!(matches!(
            anonymous.set_password("pw", &passwords),
            Err(OAuthError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            anonymous.as_persisted(),
            Err(OAuthError::UnsupportedOperation(_))
        ));
        assert!(!anonymous.check_password("", &passwords));

        let mut admin = SuperUser::new("admin", "hunter2", "test-secret", &passwords).unwrap();
        assert!(matches!(
            admin.set_password("pw", &passwords),
            Err(OAuthError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            admin.as_persisted(),
            Err(OAuthError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_super_user_password_and_session_hash() {
        let passwords = passwords();
        let admin = SuperUser::new("admin", "hunter2", "test-secret", &passwords).unwrap();
        assert!(admin.check_password("hunter2", &passwords));
        assert!(!admin.check_password("hunter3", &passwords));

        let same = SuperUser::new("admin", "hunter2", "test-secret", &passwords).unwrap();
        assert_eq!(admin.session_auth_hash(), same.session_auth_hash());
        assert_eq!(admin.session_auth_hash().len(), 64);

        let changed = SuperUser::new("admin", "hunter3", "test-secret", &passwords).unwrap();
        assert_ne!(admin.session_auth_hash(), changed.session_auth_hash());

        let other_secret = SuperUser::new("admin", "hunter2", "other-secret", &passwords).unwrap();
        assert_ne!(admin.session_auth_hash(), other_secret.session_auth_hash());

        assert!(matches!(
            SuperUser::new("", "hunter2", "test-secret", &passwords),
            Err(OAuthError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_save_strips_raw_password() {
        let storage = Arc::new(MemoryOAuthStorage::new());
        let directory = UserDirectory::new(storage.clone(), passwords());

        let user = directory.create_user("alice", "s3cret").await.unwrap();
        assert_eq!(user.raw_password.as_deref(), Some("s3cret"));

        let stored = storage.get_user(&user.user_id).await.unwrap().unwrap();
        assert!(stored.raw_password.is_none());
        assert_eq!(stored.password, user.password);
    }

    #[tokio::test]
    async fn test_directory_stamps_users_with_its_clock() {
        let storage = Arc::new(MemoryOAuthStorage::new());
        let created = Utc::now() - chrono::Duration::days(3);
        let directory = UserDirectory::new(storage.clone(), passwords())
            .with_clock(Arc::new(ManualClock::new(created)));

        let user = directory.create_user("alice", "s3cret").await.unwrap();
        assert_eq!(user.created_at, created);
        assert_eq!(
            storage.get_user(&user.user_id).await.unwrap().unwrap().created_at,
            created
        );
    }

    #[tokio::test]
    async fn test_directory_rejects_non_persisted_identities() {
        let storage = Arc::new(MemoryOAuthStorage::new());
        let passwords = passwords();
        let directory = UserDirectory::new(storage, passwords.clone());
        let admin = SuperUser::new("admin", "hunter2", "test-secret", &passwords).unwrap();

        assert!(matches!(
            directory.save(&AnonymousUser).await,
            Err(OAuthError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            directory.delete(&AnonymousUser).await,
            Err(OAuthError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            directory.save(&admin).await,
            Err(OAuthError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            directory.delete(&admin).await,
            Err(OAuthError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_authenticate() {
        let storage = Arc::new(MemoryOAuthStorage::new());
        let directory = UserDirectory::new(storage, passwords());

        let mut user = directory.create_user("alice", "s3cret").await.unwrap();
        assert_eq!(
            directory.authenticate("alice", "s3cret").await.unwrap().user_id,
            user.user_id
        );
        assert!(matches!(
            directory.authenticate("alice", "wrong").await,
            Err(OAuthError::InvalidGrant(_))
        ));
        assert!(matches!(
            directory.authenticate("bob", "s3cret").await,
            Err(OAuthError::InvalidGrant(_))
        ));

        user.is_active = false;
        directory.save(&user).await.unwrap();
        assert!(matches!(
            directory.authenticate("alice", "s3cret").await,
            Err(OAuthError::InvalidGrant(_))
        ));

        assert!(directory.delete(&user).await.unwrap());
        assert!(directory.get(&user.user_id).await.unwrap().is_none());
    }
}
