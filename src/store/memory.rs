//! Process-local store backed by maps under one mutex.
//!
//! Same contracts as [`SqliteStore`](super::SqliteStore), including email
//! uniqueness and digest-only token records. Nothing survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::auth::traits::{
    token_digest, Account, AccountStore, AppRegistry, NewAccount, RegisteredApp, Role,
    TokenLedger,
};

use super::StoreError;

struct LedgerRow {
    owner_id: i64,
    expires_at: i64,
}

#[derive(Default)]
struct Inner {
    next_account_id: i64,
    accounts: HashMap<i64, Account>,
    apps: HashMap<i64, RegisteredApp>,
    tokens: HashMap<[u8; 32], LedgerRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a registered application.
    pub fn insert_app(&self, id: i64, name: &str, secret: &[u8]) -> RegisteredApp {
        let app = RegisteredApp {
            id,
            name: name.to_string(),
            secret: secret.to_vec(),
        };
        self.inner.lock().apps.insert(id, app.clone());
        app
    }

    /// Administrative role change.
    pub fn set_role(&self, account_id: i64, role: Role) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let account = inner
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::NotFound)?;
        account.role = role;
        Ok(())
    }

    pub fn account_count(&self) -> usize {
        self.inner.lock().accounts.len()
    }

    pub fn token_count(&self) -> usize {
        self.inner.lock().tokens.len()
    }

    /// Digests currently held, for asserting nothing else is kept.
    pub fn token_digests(&self) -> Vec<[u8; 32]> {
        self.inner.lock().tokens.keys().copied().collect()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, new: NewAccount) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        if inner.accounts.values().any(|a| a.email == new.email) {
            return Err(StoreError::Conflict);
        }

        inner.next_account_id += 1;
        let id = inner.next_account_id;
        inner.accounts.insert(
            id,
            Account {
                id,
                name: new.name,
                email: new.email,
                password_hash: new.password_hash,
                role: Role::User,
                activated: false,
            },
        );
        Ok(id)
    }

    async fn account_by_email(&self, email: &str) -> Result<Account, StoreError> {
        self.inner
            .lock()
            .accounts
            .values()
            .find(|a| a.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn account(&self, id: i64) -> Result<Account, StoreError> {
        self.inner
            .lock()
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn role(&self, id: i64) -> Result<Role, StoreError> {
        self.inner
            .lock()
            .accounts
            .get(&id)
            .map(|a| a.role)
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl AppRegistry for MemoryStore {
    async fn app(&self, id: i64) -> Result<RegisteredApp, StoreError> {
        self.inner
            .lock()
            .apps
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl TokenLedger for MemoryStore {
    async fn record(
        &self,
        token: &str,
        owner_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let digest = token_digest(token);
        let mut inner = self.inner.lock();
        if !inner.accounts.contains_key(&owner_id) {
            return Err(StoreError::NotFound);
        }
        if inner.tokens.contains_key(&digest) {
            return Err(StoreError::Conflict);
        }
        inner.tokens.insert(
            digest,
            LedgerRow {
                owner_id,
                expires_at: expires_at.timestamp(),
            },
        );
        Ok(())
    }

    async fn is_live(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let digest = token_digest(token);
        Ok(self
            .inner
            .lock()
            .tokens
            .get(&digest)
            .is_some_and(|row| row.expires_at > now.timestamp()))
    }

    async fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        let digest = token_digest(token);
        Ok(self.inner.lock().tokens.remove(&digest).is_some())
    }

    async fn revoke_all(&self, owner_id: i64) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let before = inner.tokens.len();
        inner.tokens.retain(|_, row| row.owner_id != owner_id);
        Ok((before - inner.tokens.len()) as u64)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = now.timestamp();
        let mut inner = self.inner.lock();
        let before = inner.tokens.len();
        inner.tokens.retain(|_, row| row.expires_at > cutoff);
        Ok((before - inner.tokens.len()) as u64)
    }
}
