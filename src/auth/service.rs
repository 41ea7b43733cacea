//! Authentication core: login, registration, role and liveness checks.
//!
//! Holds no state of its own. Every call re-reads the account store and the
//! token ledger, so a ledger deletion takes effect on the very next check.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::store::StoreError;

use super::clock::{Clock, SystemClock};
use super::context::RequestContext;
use super::error::AuthError;
use super::password::{CredentialError, CredentialVerifier};
use super::token::TokenCodec;
use super::traits::{token_digest, AccountStore, AppRegistry, NewAccount, Role, TokenLedger};

/// Default token lifetime: one hour.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Minimum password length accepted at registration. Only the empty
/// password is refused unless a deployment raises it.
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 1;

/// Longest email address accepted (RFC 5321 path limit).
const MAX_EMAIL_LEN: usize = 254;

/// Account details resolved from a live token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub activated: bool,
    pub app_id: i64,
    pub expires_at: DateTime<Utc>,
}

pub struct AuthService {
    accounts: Arc<dyn AccountStore>,
    apps: Arc<dyn AppRegistry>,
    ledger: Arc<dyn TokenLedger>,
    codec: TokenCodec,
    verifier: CredentialVerifier,
    clock: Arc<dyn Clock>,
    token_ttl: Duration,
    min_password_len: usize,
}

impl AuthService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        apps: Arc<dyn AppRegistry>,
        ledger: Arc<dyn TokenLedger>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            accounts,
            apps,
            ledger,
            codec: TokenCodec::new(),
            verifier: CredentialVerifier::default(),
            clock: Arc::new(SystemClock),
            token_ttl,
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
        }
    }

    /// Use one backend for accounts, apps and the ledger.
    pub fn from_store<S>(store: Arc<S>, token_ttl: Duration) -> Self
    where
        S: AccountStore + AppRegistry + TokenLedger + 'static,
    {
        Self::new(store.clone(), store.clone(), store, token_ttl)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_verifier(mut self, verifier: CredentialVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_min_password_len(mut self, len: usize) -> Self {
        self.min_password_len = len;
        self
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn ledger(&self) -> Arc<dyn TokenLedger> {
        Arc::clone(&self.ledger)
    }

    // ── Login ───────────────────────────────────────────────────────

    /// Verify credentials and issue a token scoped to `app_id`.
    ///
    /// The token is only returned once its ledger record is written. If the
    /// request is cancelled before that, the caller gets `Cancelled` and the
    /// plaintext is dropped.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
        app_id: i64,
    ) -> Result<String, AuthError> {
        const OP: &str = "auth.login";
        let email = normalize_email(email);
        tracing::info!(op = OP, email = %email, app_id, "attempting to login user");

        ctx.run(OP, self.login_inner(email, password.to_string(), app_id))
            .await
    }

    async fn login_inner(
        &self,
        email: String,
        password: String,
        app_id: i64,
    ) -> Result<String, AuthError> {
        const OP: &str = "auth.login";

        let account = match self.accounts.account_by_email(&email).await {
            Ok(account) => account,
            Err(StoreError::NotFound) => {
                let verifier = self.verifier;
                if let Err(e) = tokio::task::spawn_blocking(move || verifier.burn(&password)).await {
                    tracing::debug!(op = OP, error = %e, "dummy hash task failed");
                }
                tracing::warn!(op = OP, email = %email, "user not found");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(AuthError::store("accounts.by_email", e)),
        };

        let verifier = self.verifier;
        let stored_hash = account.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || verifier.verify(&stored_hash, &password))
            .await
            .map_err(|e| AuthError::internal(OP, e))?;
        match verified {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(op = OP, user_id = account.id, "invalid credentials");
                return Err(AuthError::InvalidCredentials);
            }
            Err(CredentialError::MalformedHash(reason)) => {
                tracing::error!(
                    op = OP,
                    user_id = account.id,
                    reason = %reason,
                    "stored password hash is unusable"
                );
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        }

        let app = match self.apps.app(app_id).await {
            Ok(app) => app,
            Err(StoreError::NotFound) => {
                tracing::warn!(op = OP, app_id, "app not found");
                return Err(AuthError::AppNotFound);
            }
            Err(e) => return Err(AuthError::store("apps.by_id", e)),
        };

        let issued = self
            .codec
            .issue(&account, &app, self.token_ttl, self.clock.now())?;

        // Same instant as the `exp` claim; never recomputed here.
        match self
            .ledger
            .record(&issued.token, account.id, issued.expires_at)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict) => {
                tracing::error!(op = OP, user_id = account.id, "token digest collision");
                return Err(AuthError::internal(
                    "ledger.record",
                    anyhow::anyhow!("token digest already recorded"),
                ));
            }
            Err(StoreError::NotFound) => {
                tracing::warn!(op = OP, user_id = account.id, "account vanished during login");
                return Err(AuthError::UserNotFound);
            }
            Err(e) => {
                tracing::warn!(op = OP, user_id = account.id, "token not saved");
                return Err(AuthError::store("ledger.record", e));
            }
        }

        tracing::info!(op = OP, user_id = account.id, app_id, "user logged in successfully");
        Ok(issued.token)
    }

    // ── Registration ────────────────────────────────────────────────

    /// Create a `user`-role, not-yet-activated account. Returns its id.
    pub async fn register(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
    ) -> Result<i64, AuthError> {
        const OP: &str = "auth.register";
        let email = normalize_email(email);
        tracing::info!(op = OP, email = %email, "registering user");

        validate_email(&email)?;
        if password.chars().count() < self.min_password_len {
            return Err(AuthError::InvalidInput(format!(
                "password must be at least {} characters",
                self.min_password_len
            )));
        }

        let password = password.to_string();
        ctx.run(OP, async move {
            let verifier = self.verifier;
            let password_hash = tokio::task::spawn_blocking(move || verifier.hash(&password))
                .await
                .map_err(|e| AuthError::internal(OP, e))??;

            let name = email.split('@').next().unwrap_or_default().to_string();
            let new = NewAccount {
                name,
                email: email.clone(),
                password_hash,
            };

            match self.accounts.create_account(new).await {
                Ok(id) => {
                    tracing::info!(op = OP, user_id = id, "user registered");
                    Ok(id)
                }
                Err(StoreError::Conflict) => {
                    tracing::info!(op = OP, email = %email, "user already exists");
                    Err(AuthError::UserExists)
                }
                Err(e) => {
                    tracing::error!(op = OP, "failed to save user");
                    Err(AuthError::store("accounts.create", e))
                }
            }
        })
        .await
    }

    // ── Checks ──────────────────────────────────────────────────────

    pub async fn is_admin(&self, ctx: &RequestContext, user_id: i64) -> Result<bool, AuthError> {
        const OP: &str = "auth.is_admin";
        tracing::debug!(op = OP, user_id, "checking if user is admin");

        ctx.run(OP, async {
            match self.accounts.role(user_id).await {
                Ok(role) => {
                    let is_admin = role == Role::Admin;
                    tracing::debug!(op = OP, user_id, is_admin, "checked if user is admin");
                    Ok(is_admin)
                }
                Err(StoreError::NotFound) => Err(AuthError::UserNotFound),
                Err(e) => Err(AuthError::store("accounts.role", e)),
            }
        })
        .await
    }

    /// Whether the ledger holds a live record for `token`.
    ///
    /// The ledger is authoritative: a token whose signature and `exp` still
    /// verify is not authenticated once its record is gone or expired.
    pub async fn is_authenticated(
        &self,
        ctx: &RequestContext,
        token: &str,
    ) -> Result<bool, AuthError> {
        const OP: &str = "auth.is_authenticated";
        if token.is_empty() {
            return Ok(false);
        }

        ctx.run(OP, async {
            let live = self
                .ledger
                .is_live(token, self.clock.now())
                .await
                .map_err(|e| AuthError::store("ledger.is_live", e))?;
            tracing::debug!(op = OP, is_authenticated = live, "checked token liveness");
            Ok::<_, AuthError>(live)
        })
        .await
    }

    /// Resolve the account behind a token. Requires a valid signature, an
    /// unexpired claim and a live ledger record.
    pub async fn user_info(&self, ctx: &RequestContext, token: &str) -> Result<UserInfo, AuthError> {
        const OP: &str = "auth.user_info";

        ctx.run(OP, async {
            let now = self.clock.now();
            let claims = self.codec.parse(token, self.apps.as_ref(), now).await?;

            let live = self
                .ledger
                .is_live(token, now)
                .await
                .map_err(|e| AuthError::store("ledger.is_live", e))?;
            if !live {
                tracing::debug!(op = OP, user_id = claims.sub, "token signature ok but not live");
                return Err(AuthError::TokenNotLive);
            }

            let account = match self.accounts.account(claims.sub).await {
                Ok(account) => account,
                Err(StoreError::NotFound) => return Err(AuthError::UserNotFound),
                Err(e) => return Err(AuthError::store("accounts.by_id", e)),
            };

            let expires_at = claims
                .expires_at()
                .ok_or_else(|| AuthError::internal(OP, anyhow::anyhow!("exp out of range")))?;

            Ok::<_, AuthError>(UserInfo {
                id: account.id,
                name: account.name,
                email: account.email,
                role: account.role,
                activated: account.activated,
                app_id: claims.app,
                expires_at,
            })
        })
        .await
    }

    // ── Revocation ──────────────────────────────────────────────────

    /// Delete the ledger record for `token`. Returns whether one existed.
    pub async fn logout(&self, ctx: &RequestContext, token: &str) -> Result<bool, AuthError> {
        const OP: &str = "auth.logout";

        ctx.run(OP, async {
            let revoked = self
                .ledger
                .revoke(token)
                .await
                .map_err(|e| AuthError::store("ledger.revoke", e))?;
            tracing::info!(op = OP, revoked, token = %fingerprint(token), "token revoked");
            Ok::<_, AuthError>(revoked)
        })
        .await
    }

    /// Revoke every token issued to `user_id`.
    pub async fn revoke_sessions(
        &self,
        ctx: &RequestContext,
        user_id: i64,
    ) -> Result<u64, AuthError> {
        const OP: &str = "auth.revoke_sessions";

        ctx.run(OP, async {
            let revoked = self
                .ledger
                .revoke_all(user_id)
                .await
                .map_err(|e| AuthError::store("ledger.revoke_all", e))?;
            tracing::info!(op = OP, user_id, revoked, "sessions revoked");
            Ok::<_, AuthError>(revoked)
        })
        .await
    }
}

/// Short hex prefix of the token digest, safe to log.
fn fingerprint(token: &str) -> String {
    hex::encode(&token_digest(token)[..6])
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<(), AuthError> {
    if email.is_empty() {
        return Err(AuthError::InvalidInput("email cannot be empty".into()));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(AuthError::InvalidInput(format!(
            "email too long (max {MAX_EMAIL_LEN} characters)"
        )));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AuthError::InvalidInput("email must look like name@domain".into())),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
