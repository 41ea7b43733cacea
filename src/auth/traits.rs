//! Capability traits the authentication core depends on, and the records
//! that cross them.
//!
//! Concrete backends live in [`crate::store`]; the core only ever sees
//! `Arc<dyn ...>` of these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::StoreError;

// ── Accounts ─────────────────────────────────────────────────────

/// Account role. Only changed by an administrative operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Unknown strings degrade to `User`, never to `Admin`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored identity.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub email: String,
    /// PHC-format password hash. Never serialized or logged.
    pub password_hash: String,
    pub role: Role,
    pub activated: bool,
}

/// Input for [`AccountStore::create_account`]. The store assigns the id,
/// the `user` role and `activated = false`.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert an account in one transaction. Duplicate email is
    /// [`StoreError::Conflict`].
    async fn create_account(&self, account: NewAccount) -> Result<i64, StoreError>;

    async fn account_by_email(&self, email: &str) -> Result<Account, StoreError>;

    async fn account(&self, id: i64) -> Result<Account, StoreError>;

    async fn role(&self, id: i64) -> Result<Role, StoreError>;
}

// ── Registered applications ──────────────────────────────────────

/// A client application allowed to request tokens.
#[derive(Clone)]
pub struct RegisteredApp {
    pub id: i64,
    pub name: String,
    pub secret: Vec<u8>,
}

impl std::fmt::Debug for RegisteredApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredApp")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Read side of the application registry.
#[async_trait]
pub trait AppRegistry: Send + Sync {
    async fn app(&self, id: i64) -> Result<RegisteredApp, StoreError>;
}

// ── Token ledger ─────────────────────────────────────────────────

/// Server-side record of issued tokens, keyed by [`token_digest`].
///
/// Plaintext tokens pass through these methods but only their digest is
/// ever stored.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Store `{digest, owner, expires_at}`. An existing digest is
    /// [`StoreError::Conflict`].
    async fn record(
        &self,
        token: &str,
        owner_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// `true` only if a record exists and its expiry is strictly after `now`.
    /// A missing record is `Ok(false)`.
    async fn is_live(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Delete one record. Returns whether anything was removed.
    async fn revoke(&self, token: &str) -> Result<bool, StoreError>;

    /// Delete every record owned by `owner_id`.
    async fn revoke_all(&self, owner_id: i64) -> Result<u64, StoreError>;

    /// Delete records with `expires_at <= now`.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// SHA-256 of the token plaintext. Used as a lookup key only.
pub fn token_digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        assert_eq!(Role::from_str_lossy(Role::Admin.as_str()), Role::Admin);
        assert_eq!(Role::from_str_lossy(Role::User.as_str()), Role::User);
        assert_eq!(Role::from_str_lossy("superuser"), Role::User);
    }

    #[test]
    fn app_debug_redacts_secret() {
        let app = RegisteredApp {
            id: 1,
            name: "portal".into(),
            secret: b"hunter2".to_vec(),
        };
        let text = format!("{app:?}");
        assert!(text.contains("portal"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn digest_is_fixed_width_and_stable() {
        let a = token_digest("abc");
        let b = token_digest("abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, token_digest("abd"));
    }
}
