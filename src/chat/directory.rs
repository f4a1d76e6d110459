//! The user directory: credential store plus online registry.
//!
//! Both maps sit behind their own `RwLock`. Registry mutations are
//! check-and-insert / check-and-replace under the write lock, so readers
//! only ever observe whole mutations. Password hashing happens outside
//! any lock.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::router::{SessionHandle, SessionId};
use crate::auth::{validate_login, validate_password, verify_password, PasswordHasher};
use crate::config::{AccountConfig, Config};
use crate::{ParleyError, Result};

/// Authentication errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown login or wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// The new password does not meet the requirements.
    #[error("invalid password")]
    InvalidPassword,
}

/// The nickname is held by another online session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("name taken: {0}")]
pub struct NameTaken(pub String);

/// A stored credential.
#[derive(Clone)]
struct Credential {
    /// Argon2 PHC hash of the password.
    secret: String,
    /// Last nickname chosen by this account, if any.
    nickname: Option<String>,
}

/// Shared registry of accounts and online sessions.
pub struct UserDirectory {
    credentials: RwLock<HashMap<String, Credential>>,
    online: RwLock<HashMap<String, SessionHandle>>,
    hasher: PasswordHasher,
    auto_register: bool,
}

impl UserDirectory {
    /// Create an empty directory.
    pub fn new(hasher: PasswordHasher, auto_register: bool) -> Self {
        Self {
            credentials: RwLock::new(HashMap::new()),
            online: RwLock::new(HashMap::new()),
            hasher,
            auto_register,
        }
    }

    /// Create a directory seeded from the configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let hasher = PasswordHasher::from_config(&config.security)?;
        let directory = Self::new(hasher, config.directory.auto_register);
        for account in config.seed_accounts() {
            directory.provision(&account).await?;
        }
        info!(
            accounts = directory.account_count().await,
            auto_register = directory.auto_register,
            "user directory ready"
        );
        Ok(directory)
    }

    /// Add an account. Fails if the login already exists.
    pub async fn provision(&self, account: &AccountConfig) -> Result<()> {
        validate_login(&account.login).map_err(|e| ParleyError::Validation(e.to_string()))?;
        validate_password(&account.password)
            .map_err(|e| ParleyError::Validation(e.to_string()))?;
        if let Some(nickname) = &account.nickname {
            crate::auth::validate_nickname(nickname)
                .map_err(|e| ParleyError::Validation(e.to_string()))?;
        }

        let secret = self.hash(&account.password).await?;
        let mut credentials = self.credentials.write().await;
        if credentials.contains_key(&account.login) {
            return Err(ParleyError::Validation(format!(
                "login '{}' already exists",
                account.login
            )));
        }
        credentials.insert(
            account.login.clone(),
            Credential {
                secret,
                nickname: account.nickname.clone(),
            },
        );
        debug!(login = %account.login, "account provisioned");
        Ok(())
    }

    /// Get the number of accounts.
    pub async fn account_count(&self) -> usize {
        self.credentials.read().await.len()
    }

    /// Check a login and password.
    ///
    /// Returns the nickname to claim: the one on file, or the login if the
    /// account never chose one. Does not touch the online registry.
    pub async fn authenticate(
        &self,
        login: &str,
        secret: &str,
    ) -> std::result::Result<String, AuthError> {
        if validate_login(login).is_err() || validate_password(secret).is_err() {
            return Err(AuthError::InvalidCredentials);
        }

        let stored = self.credentials.read().await.get(login).cloned();
        match stored {
            Some(credential) => {
                if !self.verify(secret, &credential.secret).await {
                    debug!(login, "password mismatch");
                    return Err(AuthError::InvalidCredentials);
                }
                Ok(credential.nickname.unwrap_or_else(|| login.to_string()))
            }
            None if self.auto_register => self.register_on_first_login(login, secret).await,
            None => {
                debug!(login, "unknown login");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    async fn register_on_first_login(
        &self,
        login: &str,
        secret: &str,
    ) -> std::result::Result<String, AuthError> {
        let hash = self
            .hash(secret)
            .await
            .map_err(|_| AuthError::InvalidCredentials)?;

        let mut credentials = self.credentials.write().await;
        let existing = credentials.get(login).cloned();
        if let Some(existing) = existing {
            // Lost a race with another first login for the same account.
            drop(credentials);
            if self.verify(secret, &existing.secret).await {
                return Ok(existing.nickname.unwrap_or_else(|| login.to_string()));
            }
            return Err(AuthError::InvalidCredentials);
        }
        credentials.insert(
            login.to_string(),
            Credential {
                secret: hash,
                nickname: None,
            },
        );
        info!(login, "account created on first login");
        Ok(login.to_string())
    }

    /// Replace a password after checking the current one.
    pub async fn change_password(
        &self,
        login: &str,
        old_secret: &str,
        new_secret: &str,
    ) -> std::result::Result<(), AuthError> {
        let current = self
            .credentials
            .read()
            .await
            .get(login)
            .map(|c| c.secret.clone())
            .ok_or(AuthError::InvalidCredentials)?;

        if !self.verify(old_secret, &current).await {
            return Err(AuthError::InvalidCredentials);
        }
        validate_password(new_secret).map_err(|_| AuthError::InvalidPassword)?;
        let replacement = self
            .hash(new_secret)
            .await
            .map_err(|_| AuthError::InvalidPassword)?;

        let mut credentials = self.credentials.write().await;
        match credentials.get_mut(login) {
            // Only swap if nobody changed it since we verified.
            Some(credential) if credential.secret == current => {
                credential.secret = replacement;
                info!(login, "password changed");
                Ok(())
            }
            _ => {
                warn!(login, "password changed concurrently, rejecting");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// Remember `nickname` as the account's default for future logins.
    pub async fn remember_nickname(&self, login: &str, nickname: &str) {
        if let Some(credential) = self.credentials.write().await.get_mut(login) {
            credential.nickname = Some(nickname.to_string());
        }
    }

    /// Put a session online under `nickname`, unless the name is taken.
    pub async fn register(
        &self,
        nickname: &str,
        session: SessionHandle,
    ) -> std::result::Result<(), NameTaken> {
        self.register_then(nickname, session, || ()).await
    }

    /// Like [`register`](Self::register), but runs `on_insert` before the
    /// registry lock is released.
    ///
    /// Fan-out reads the registry under the same lock, so anything
    /// `on_insert` queues for the new session lands ahead of traffic
    /// addressed to it by name.
    pub async fn register_then<R>(
        &self,
        nickname: &str,
        session: SessionHandle,
        on_insert: impl FnOnce() -> R,
    ) -> std::result::Result<R, NameTaken> {
        let mut online = self.online.write().await;
        if online.contains_key(nickname) {
            return Err(NameTaken(nickname.to_string()));
        }
        debug!(nickname, session = %session.id(), "registered online");
        online.insert(nickname.to_string(), session);
        Ok(on_insert())
    }

    /// Take `nickname` offline if it belongs to `session`.
    ///
    /// Idempotent: returns false if there was nothing to remove.
    pub async fn unregister(&self, nickname: &str, session: SessionId) -> bool {
        let mut online = self.online.write().await;
        match online.get(nickname) {
            Some(handle) if handle.id() == session => {
                online.remove(nickname);
                debug!(nickname, %session, "unregistered");
                true
            }
            _ => false,
        }
    }

    /// Atomically move a session from `old` to `new`.
    ///
    /// Fails without any change if `new` is held by a different session,
    /// or if `session` is not currently online under `old`.
    pub async fn rename_online(
        &self,
        old: &str,
        new: &str,
        session: SessionHandle,
    ) -> std::result::Result<(), NameTaken> {
        let mut online = self.online.write().await;
        if !online.get(old).is_some_and(|h| h.id() == session.id()) {
            warn!(old, new, session = %session.id(), "rename from a name not held");
            return Err(NameTaken(new.to_string()));
        }
        if online.get(new).is_some_and(|h| h.id() != session.id()) {
            return Err(NameTaken(new.to_string()));
        }
        online.remove(old);
        debug!(old, new, session = %session.id(), "renamed online");
        online.insert(new.to_string(), session);
        Ok(())
    }

    /// Snapshot of online nicknames, sorted.
    pub async fn list_online_nicknames(&self) -> Vec<String> {
        let mut nicknames: Vec<String> = self.online.read().await.keys().cloned().collect();
        nicknames.sort();
        nicknames
    }

    /// Find the session currently named `nickname`.
    pub async fn lookup(&self, nickname: &str) -> Option<SessionHandle> {
        self.online.read().await.get(nickname).cloned()
    }

    /// Get the number of online sessions.
    pub async fn online_count(&self) -> usize {
        self.online.read().await.len()
    }

    /// Run `f` over the online registry under the read lock.
    pub async fn with_online<R>(&self, f: impl FnOnce(&HashMap<String, SessionHandle>) -> R) -> R {
        let online = self.online.read().await;
        f(&online)
    }

    /// Ask every online session to close.
    pub async fn close_all(&self) {
        for handle in self.online.read().await.values() {
            handle.close();
        }
    }

    async fn hash(&self, password: &str) -> Result<String> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| ParleyError::Auth(format!("hashing task failed: {e}")))?
            .map_err(ParleyError::from)
    }

    async fn verify(&self, password: &str, hash: &str) -> bool {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || verify_password(&password, &hash).is_ok())
            .await
            .unwrap_or(false)
    }
}
