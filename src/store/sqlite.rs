//! SQLite-backed store over an r2d2 connection pool.
//!
//! Tables:
//! - `accounts`: id, name, email (unique), password_hash, role, activated, created_at
//! - `apps`: id, name (unique), secret
//! - `tokens`: hash (SHA-256 of the plaintext), account_id, expires_at
//!
//! Every call checks a connection out of the pool on the blocking thread
//! pool, so request tasks never wait on SQLite directly. Each write runs in
//! its own transaction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use crate::auth::traits::{
    token_digest, Account, AccountStore, AppRegistry, NewAccount, RegisteredApp, Role,
    TokenLedger,
};

use super::StoreError;

/// Default pool size.
const DEFAULT_POOL_SIZE: u32 = 8;

/// Default time a connection waits on a locked database.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    activated INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS apps (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    secret BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    hash BLOB PRIMARY KEY,
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    expires_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tokens_expires ON tokens(expires_at);
CREATE INDEX IF NOT EXISTS idx_tokens_account ON tokens(account_id);
";

/// Pool tuning for [`SqliteStore::open`].
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub pool_size: u32,
    pub busy_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("max_size", &self.pool.max_size())
            .finish()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path, options: SqliteOptions) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let busy_timeout = options.busy_timeout;
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            // WAL mode for concurrent reads + crash safety
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;",
            )
        });

        let pool = Pool::builder()
            .max_size(options.pool_size)
            .build(manager)
            .with_context(|| format!("opening connection pool for {}", path.display()))?;

        pool.get()
            .context("checking out connection for schema setup")?
            .execute_batch(SCHEMA)
            .context("applying schema")?;

        tracing::info!(path = %path.display(), pool_size = options.pool_size, "SQLite store ready");

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` on a pooled connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::unavailable(op, e))?;
            f(&mut conn).map_err(|e| classify(op, e))
        })
        .await
        .map_err(|e| StoreError::unavailable(op, e))?
    }

    /// Add or replace a registered application.
    pub async fn insert_app(&self, id: i64, name: &str, secret: &[u8]) -> Result<(), StoreError> {
        let name = name.to_string();
        let secret = secret.to_vec();
        self.with_conn("apps.insert", move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO apps (id, name, secret) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, secret = excluded.secret",
                params![id, name, secret],
            )?;
            tx.commit()
        })
        .await
    }

    /// Administrative role change.
    pub async fn set_role(&self, account_id: i64, role: Role) -> Result<(), StoreError> {
        let updated = self
            .with_conn("accounts.set_role", move |conn| {
                let tx = conn.transaction()?;
                let n = tx.execute(
                    "UPDATE accounts SET role = ?1 WHERE id = ?2",
                    params![role.as_str(), account_id],
                )?;
                tx.commit()?;
                Ok(n)
            })
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn account_count(&self) -> Result<u64, StoreError> {
        self.with_conn("accounts.count", |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    pub async fn token_count(&self) -> Result<u64, StoreError> {
        self.with_conn("ledger.count", |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM tokens", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}

/// Translate driver errors into the store taxonomy.
fn classify(op: &'static str, err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(e, _) = &err {
        if e.code == rusqlite::ErrorCode::ConstraintViolation {
            match e.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => return StoreError::Conflict,
                // tokens.account_id names no account
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return StoreError::NotFound,
                _ => {}
            }
        }
    }

    match err {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::unavailable(op, other),
    }
}

fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let role: String = row.get(4)?;
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: Role::from_str_lossy(&role),
        activated: row.get(5)?,
    })
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn create_account(&self, account: NewAccount) -> Result<i64, StoreError> {
        let now = Utc::now().timestamp();
        self.with_conn("accounts.create", move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO accounts (name, email, password_hash, role, activated, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![
                    account.name,
                    account.email,
                    account.password_hash,
                    Role::User.as_str(),
                    now
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn account_by_email(&self, email: &str) -> Result<Account, StoreError> {
        let email = email.to_string();
        self.with_conn("accounts.by_email", move |conn| {
            conn.query_row(
                "SELECT id, name, email, password_hash, role, activated
                 FROM accounts WHERE email = ?1",
                params![email],
                account_from_row,
            )
        })
        .await
    }

    async fn account(&self, id: i64) -> Result<Account, StoreError> {
        self.with_conn("accounts.by_id", move |conn| {
            conn.query_row(
                "SELECT id, name, email, password_hash, role, activated
                 FROM accounts WHERE id = ?1",
                params![id],
                account_from_row,
            )
        })
        .await
    }

    async fn role(&self, id: i64) -> Result<Role, StoreError> {
        self.with_conn("accounts.role", move |conn| {
            let role: String =
                conn.query_row("SELECT role FROM accounts WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })?;
            Ok(Role::from_str_lossy(&role))
        })
        .await
    }
}

#[async_trait]
impl AppRegistry for SqliteStore {
    async fn app(&self, id: i64) -> Result<RegisteredApp, StoreError> {
        self.with_conn("apps.by_id", move |conn| {
            conn.query_row(
                "SELECT id, name, secret FROM apps WHERE id = ?1",
                params![id],
                |row| {
                    Ok(RegisteredApp {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        secret: row.get(2)?,
                    })
                },
            )
        })
        .await
    }
}

#[async_trait]
impl TokenLedger for SqliteStore {
    async fn record(
        &self,
        token: &str,
        owner_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let digest = token_digest(token);
        let expires_at = expires_at.timestamp();
        self.with_conn("ledger.record", move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO tokens (hash, account_id, expires_at) VALUES (?1, ?2, ?3)",
                params![&digest[..], owner_id, expires_at],
            )?;
            tx.commit()
        })
        .await
    }

    async fn is_live(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let digest = token_digest(token);
        let now = now.timestamp();
        // A row swept between issue and this read is simply absent.
        let expires_at = self
            .with_conn("ledger.is_live", move |conn| {
                conn.query_row(
                    "SELECT expires_at FROM tokens WHERE hash = ?1",
                    params![&digest[..]],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
            })
            .await?;
        Ok(expires_at.is_some_and(|exp| exp > now))
    }

    async fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        let digest = token_digest(token);
        let deleted = self
            .with_conn("ledger.revoke", move |conn| {
                conn.execute("DELETE FROM tokens WHERE hash = ?1", params![&digest[..]])
            })
            .await?;
        Ok(deleted > 0)
    }

    async fn revoke_all(&self, owner_id: i64) -> Result<u64, StoreError> {
        let deleted = self
            .with_conn("ledger.revoke_all", move |conn| {
                conn.execute("DELETE FROM tokens WHERE account_id = ?1", params![owner_id])
            })
            .await?;
        Ok(deleted as u64)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let now = now.timestamp();
        let deleted = self
            .with_conn("ledger.sweep", move |conn| {
                conn.execute("DELETE FROM tokens WHERE expires_at <= ?1", params![now])
            })
            .await?;
        Ok(deleted as u64)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("sso.db"), SqliteOptions::default()).unwrap();
        (tmp, store)
    }

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            name: "default username".into(),
            email: email.into(),
            password_hash: "$pbkdf2-sha256$i=1000,l=32$c2FsdA$aGFzaA".into(),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_account() {
        let (_tmp, store) = test_store();
        let id = store.create_account(new_account("u1@example.com")).await.unwrap();

        let by_email = store.account_by_email("u1@example.com").await.unwrap();
        assert_eq!(by_email.id, id);
        assert_eq!(by_email.role, Role::User);
        assert!(!by_email.activated);

        let by_id = store.account(id).await.unwrap();
        assert_eq!(by_id.email, "u1@example.com");
        assert_eq!(store.role(id).await.unwrap(), Role::User);
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict_and_count_unchanged() {
        let (_tmp, store) = test_store();
        store.create_account(new_account("u1@example.com")).await.unwrap();
        let err = store
            .create_account(new_account("u1@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        assert_eq!(store.account_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let (_tmp, store) = test_store();
        assert!(matches!(
            store.account_by_email("ghost@example.com").await.unwrap_err(),
            StoreError::NotFound
        ));
        assert!(matches!(store.role(404).await.unwrap_err(), StoreError::NotFound));
        assert!(matches!(store.app(404).await.unwrap_err(), StoreError::NotFound));
    }

    #[tokio::test]
    async fn set_role_changes_role() {
        let (_tmp, store) = test_store();
        let id = store.create_account(new_account("u1@example.com")).await.unwrap();
        store.set_role(id, Role::Admin).await.unwrap();
        assert_eq!(store.role(id).await.unwrap(), Role::Admin);
        assert!(matches!(
            store.set_role(999, Role::Admin).await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn app_round_trip() {
        let (_tmp, store) = test_store();
        store.insert_app(1, "portal", b"s3cret").await.unwrap();
        let app = store.app(1).await.unwrap();
        assert_eq!(app.name, "portal");
        assert_eq!(app.secret, b"s3cret");
    }

    #[tokio::test]
    async fn ledger_liveness_is_strict() {
        let (_tmp, store) = test_store();
        let id = store.create_account(new_account("u1@example.com")).await.unwrap();
        store.record("tok", id, at(1_000)).await.unwrap();

        assert!(store.is_live("tok", at(999)).await.unwrap());
        assert!(!store.is_live("tok", at(1_000)).await.unwrap());
        assert!(!store.is_live("unknown", at(0)).await.unwrap());
    }

    #[tokio::test]
    async fn ledger_stores_digest_not_plaintext() {
        let (_tmp, store) = test_store();
        let id = store.create_account(new_account("u1@example.com")).await.unwrap();
        store.record("very-secret-token", id, at(1_000)).await.unwrap();

        let stored: Vec<u8> = store
            .pool
            .get()
            .unwrap()
            .query_row("SELECT hash FROM tokens", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, token_digest("very-secret-token").to_vec());
    }

    #[tokio::test]
    async fn duplicate_digest_is_conflict() {
        let (_tmp, store) = test_store();
        let id = store.create_account(new_account("u1@example.com")).await.unwrap();
        store.record("tok", id, at(1_000)).await.unwrap();
        let err = store.record("tok", id, at(2_000)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn record_for_unknown_owner_is_not_found() {
        let (_tmp, store) = test_store();
        let err = store.record("tok", 77, at(1_000)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let (_tmp, store) = test_store();
        let id = store.create_account(new_account("u1@example.com")).await.unwrap();
        store.record("old", id, at(100)).await.unwrap();
        store.record("edge", id, at(200)).await.unwrap();
        store.record("fresh", id, at(10_000)).await.unwrap();

        assert_eq!(store.sweep(at(200)).await.unwrap(), 2);
        assert_eq!(store.sweep(at(200)).await.unwrap(), 0);
        assert_eq!(store.token_count().await.unwrap(), 1);
        assert!(store.is_live("fresh", at(200)).await.unwrap());
    }

    #[tokio::test]
    async fn revoke_and_revoke_all() {
        let (_tmp, store) = test_store();
        let id = store.create_account(new_account("u1@example.com")).await.unwrap();
        let expiry = Utc::now() + ChronoDuration::hours(1);
        store.record("t1", id, expiry).await.unwrap();
        store.record("t2", id, expiry).await.unwrap();
        store.record("t3", id, expiry).await.unwrap();

        assert!(store.revoke("t1").await.unwrap());
        assert!(!store.revoke("t1").await.unwrap());
        assert_eq!(store.revoke_all(id).await.unwrap(), 2);
        assert_eq!(store.token_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_records_and_sweeps() {
        let (_tmp, store) = test_store();
        let id = store.create_account(new_account("u1@example.com")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let token = format!("tok-{i}");
                let expiry = if i % 2 == 0 { at(100) } else { at(10_000) };
                store.record(&token, id, expiry).await.unwrap();
                store.sweep(at(500)).await.unwrap();
                store.is_live(&token, at(500)).await.unwrap()
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), i % 2 == 1);
        }
        store.sweep(at(500)).await.unwrap();
        assert_eq!(store.token_count().await.unwrap(), 8);
    }
}
