//! Identity collaborator: who may submit jobs and read history.
//!
//! The coordinator consults an [`Authenticator`] once per submission, before
//! any rendering. Account management (registration, email verification,
//! password changes) is out of scope; [`CredentialStore`] reads a static
//! users file.

use crate::error::ExtractError;
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// Checks credentials and admin rights.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `login` is a username or an email address.
    async fn authenticate(&self, login: &str, password: &str) -> bool;

    /// Canonical username for a login that authenticated.
    fn username_for(&self, login: &str) -> String {
        login.to_string()
    }

    fn is_admin(&self, _username: &str) -> bool {
        false
    }

    /// Known usernames, sorted. Empty when accounts are not enumerable.
    fn usernames(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Accepts every caller. Used by the CLI, where the operator is the user.
#[derive(Debug, Clone, Default)]
pub struct TrustedLocalUser;

#[async_trait]
impl Authenticator for TrustedLocalUser {
    async fn authenticate(&self, _login: &str, _password: &str) -> bool {
        true
    }
}

/// One entry of the users file.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Lowercase hex SHA-256 of the password.
    pub password_sha256: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<UserEntry>,
}

/// Users loaded from a TOML file:
///
/// ```toml
/// [[users]]
/// username = "admin"
/// email = "admin@example.com"
/// password_sha256 = "8c6976e5b5410415bde908bd4dee15dfb167a9c873fc4bb8a81f6f2ab448a918"
/// admin = true
/// ```
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: Vec<UserEntry>,
}

impl CredentialStore {
    pub fn new(users: Vec<UserEntry>) -> Self {
        Self { users }
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        let file: UsersFile = toml::from_str(text)?;
        Ok(Self::new(file.users))
    }

    pub fn load(path: &Path) -> Result<Self, ExtractError> {
        let text = std::fs::read_to_string(path).map_err(|e| ExtractError::CredentialsFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let store = Self::from_toml(&text).map_err(|e| ExtractError::CredentialsFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        info!("Loaded {} users from {}", store.users.len(), path.display());
        Ok(store)
    }

    fn find(&self, login: &str) -> Option<&UserEntry> {
        self.users
            .iter()
            .find(|u| u.username == login || u.email.as_deref() == Some(login))
    }
}

#[async_trait]
impl Authenticator for CredentialStore {
    async fn authenticate(&self, login: &str, password: &str) -> bool {
        let Some(user) = self.find(login) else {
            debug!("Unknown login '{}'", login);
            return false;
        };
        user.password_sha256.eq_ignore_ascii_case(&hash_password(password))
    }

    fn username_for(&self, login: &str) -> String {
        self.find(login)
            .map(|u| u.username.clone())
            .unwrap_or_else(|| login.to_string())
    }

    fn is_admin(&self, username: &str) -> bool {
        self.users.iter().any(|u| u.username == username && u.admin)
    }

    fn usernames(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self.users.iter().map(|u| u.username.as_str()).collect();
        names.into_iter().map(str::to_string).collect()
    }
}

/// Lowercase hex SHA-256 digest, the format stored in the users file.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS: &str = r#"
[[users]]
username = "admin"
password_sha256 = "8c6976e5b5410415bde908bd4dee15dfb167a9c873fc4bb8a81f6f2ab448a918"
admin = true

[[users]]
username = "alice"
email = "alice@example.com"
password_sha256 = "2bd806c97f0e00af1a1fc3328fa763a9269723c8db8fac4f93af71db186d6e90"
"#;

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            hash_password("admin"),
            "8c6976e5b5410415bde908bd4dee15dfb167a9c873fc4bb8a81f6f2ab448a918"
        );
    }

    #[tokio::test]
    async fn authenticates_by_username_or_email() {
        let store = CredentialStore::from_toml(USERS).unwrap();
        assert!(store.authenticate("admin", "admin").await);
        assert!(store.authenticate("alice", "alice").await);
        assert!(store.authenticate("alice@example.com", "alice").await);
        assert!(!store.authenticate("alice", "wrong").await);
        assert!(!store.authenticate("mallory", "alice").await);
        assert_eq!(store.username_for("alice@example.com"), "alice");
    }

    #[test]
    fn admin_flag() {
        let store = CredentialStore::from_toml(USERS).unwrap();
        assert!(store.is_admin("admin"));
        assert!(!store.is_admin("alice"));
        assert!(!TrustedLocalUser.is_admin("admin"));
    }

    #[test]
    fn usernames_are_sorted_and_distinct() {
        let store = CredentialStore::from_toml(&format!("{USERS}\n[[users]]\nusername = \"alice\"\npassword_sha256 = \"00\"\n")).unwrap();
        assert_eq!(store.usernames(), vec!["admin", "alice"]);
        assert!(TrustedLocalUser.usernames().is_empty());
    }

    #[test]
    fn load_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.toml");
        std::fs::write(&path, "[[users]]\nusername = 3").unwrap();
        let err = CredentialStore::load(&path).unwrap_err();
        assert!(matches!(err, ExtractError::CredentialsFile { .. }));
    }
}
