//! Self-contained signed tokens.
//!
//! Compact JWS layout, HS256 only:
//! `base64url(header) . base64url(claims) . base64url(HMAC-SHA256)`.
//! Each token is signed with the secret of the application it was issued
//! for, so one leaked secret cannot mint tokens for another application.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::store::StoreError;

use super::traits::{Account, AppRegistry, RegisteredApp, Role};

type HmacSha256 = Hmac<Sha256>;

const ALG: &str = "HS256";
const TYP: &str = "JWT";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    /// Signature mismatch, or the `app` claim names no registered app.
    #[error("token signature is invalid")]
    BadSignature,

    /// Signature is valid but `exp` is not after the current time.
    #[error("token has expired")]
    ExpiredClaim,

    #[error("failed to resolve signing app")]
    Store(#[source] StoreError),

    #[error("failed to encode token")]
    Encode(#[source] anyhow::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Claims carried inside a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account id.
    pub sub: i64,
    pub email: String,
    /// Registered application id.
    pub app: i64,
    pub role: Role,
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// Random per-token id; keeps same-second logins distinct.
    pub jti: String,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Output of [`TokenCodec::issue`].
///
/// `expires_at` is the exact instant encoded in the `exp` claim. The ledger
/// record must be written with this value, never a recomputed one.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Builds and verifies signed tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCodec;

impl TokenCodec {
    pub fn new() -> Self {
        Self
    }

    /// Sign a token for `account` scoped to `app`, expiring `ttl` after `now`.
    ///
    /// Expiry is truncated to whole seconds, the resolution of `exp`.
    pub fn issue(
        &self,
        account: &Account,
        app: &RegisteredApp,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let iat = now.timestamp();
        let expires_at = iat
            .checked_add(ttl.num_seconds())
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
            .ok_or_else(|| TokenError::Encode(anyhow::anyhow!("expiry out of range")))?;
        let exp = expires_at.timestamp();

        let claims = Claims {
            sub: account.id,
            email: account.email.clone(),
            app: app.id,
            role: account.role,
            iat,
            exp,
            jti: uuid::Uuid::new_v4().simple().to_string(),
        };
        let token = self.sign(&claims, &app.secret)?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Encode and sign arbitrary claims with `secret`.
    pub fn sign(&self, claims: &Claims, secret: &[u8]) -> Result<String, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::Encode(anyhow::anyhow!("empty signing secret")));
        }

        let header = Header {
            alg: ALG.into(),
            typ: TYP.into(),
        };
        let header = serde_json::to_vec(&header).map_err(|e| TokenError::Encode(e.into()))?;
        let payload = serde_json::to_vec(claims).map_err(|e| TokenError::Encode(e.into()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );

        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| TokenError::Encode(anyhow::anyhow!(e.to_string())))?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify `token` and return its claims.
    ///
    /// The signing secret is looked up through `registry` from the `app`
    /// claim. Claims are only trusted after the signature checks out.
    pub async fn parse(
        &self,
        token: &str,
        registry: &dyn AppRegistry,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenError> {
        let (signing_input, signature, claims) = split(token)?;

        let app = match registry.app(claims.app).await {
            Ok(app) => app,
            Err(StoreError::NotFound) => {
                tracing::debug!(app_id = claims.app, "token names unknown app");
                return Err(TokenError::BadSignature);
            }
            Err(e) => return Err(TokenError::Store(e)),
        };

        let Ok(mut mac) = HmacSha256::new_from_slice(&app.secret) else {
            return Err(TokenError::BadSignature);
        };
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        if claims.exp <= now.timestamp() {
            return Err(TokenError::ExpiredClaim);
        }

        Ok(claims)
    }
}

/// Split a compact token into signing input, raw signature and unverified claims.
fn split(token: &str) -> Result<(&str, Vec<u8>, Claims), TokenError> {
    let (signing_input, signature) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
    let (header, payload) = signing_input
        .split_once('.')
        .ok_or(TokenError::Malformed)?;
    if payload.contains('.') {
        return Err(TokenError::Malformed);
    }

    let header: Header = decode_json(header)?;
    if header.alg != ALG {
        return Err(TokenError::Malformed);
    }
    let claims: Claims = decode_json(payload)?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Malformed)?;

    Ok((signing_input, signature, claims))
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn account() -> Account {
        Account {
            id: 42,
            name: "u1".into(),
            email: "u1@example.com".into(),
            password_hash: String::new(),
            role: Role::User,
            activated: false,
        }
    }

    fn registry() -> (MemoryStore, RegisteredApp, RegisteredApp) {
        let store = MemoryStore::new();
        let portal = store.insert_app(1, "portal", b"portal-secret");
        let billing = store.insert_app(2, "billing", b"billing-secret");
        (store, portal, billing)
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn issue_then_parse() {
        let (store, portal, _) = registry();
        let codec = TokenCodec::new();
        let issued = codec
            .issue(&account(), &portal, Duration::hours(1), now())
            .unwrap();
        assert_eq!(issued.expires_at.timestamp(), now().timestamp() + 3600);

        let claims = codec.parse(&issued.token, &store, now()).await.unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.email, "u1@example.com");
        assert_eq!(claims.app, 1);
        assert_eq!(claims.role, Role::User);
        assert_eq!(claims.expires_at(), Some(issued.expires_at));
    }

    #[tokio::test]
    async fn tokens_are_unique_within_one_second() {
        let (_, portal, _) = registry();
        let codec = TokenCodec::new();
        let a = codec.issue(&account(), &portal, Duration::hours(1), now()).unwrap();
        let b = codec.issue(&account(), &portal, Duration::hours(1), now()).unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(a.expires_at, b.expires_at);
    }

    #[tokio::test]
    async fn expired_claim_detected_at_boundary() {
        let (store, portal, _) = registry();
        let codec = TokenCodec::new();
        let issued = codec
            .issue(&account(), &portal, Duration::seconds(60), now())
            .unwrap();

        let at_expiry = now() + Duration::seconds(60);
        let err = codec.parse(&issued.token, &store, at_expiry).await.unwrap_err();
        assert!(matches!(err, TokenError::ExpiredClaim));

        let just_before = now() + Duration::seconds(59);
        assert!(codec.parse(&issued.token, &store, just_before).await.is_ok());
    }

    #[tokio::test]
    async fn tampered_payload_fails_signature() {
        let (store, portal, _) = registry();
        let codec = TokenCodec::new();
        let issued = codec
            .issue(&account(), &portal, Duration::hours(1), now())
            .unwrap();

        let mut claims = codec.parse(&issued.token, &store, now()).await.unwrap();
        claims.role = Role::Admin;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());

        let parts: Vec<&str> = issued.token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        let err = codec.parse(&forged, &store, now()).await.unwrap_err();
        assert!(matches!(err, TokenError::BadSignature));
    }

    #[tokio::test]
    async fn secret_of_one_app_cannot_forge_for_another() {
        let (store, portal, billing) = registry();
        let codec = TokenCodec::new();
        let issued = codec
            .issue(&account(), &portal, Duration::hours(1), now())
            .unwrap();
        let mut claims = codec.parse(&issued.token, &store, now()).await.unwrap();

        // Claims say "billing" but the signature uses portal's secret.
        claims.app = billing.id;
        let forged = codec.sign(&claims, &portal.secret).unwrap();
        let err = codec.parse(&forged, &store, now()).await.unwrap_err();
        assert!(matches!(err, TokenError::BadSignature));
    }

    #[tokio::test]
    async fn unknown_app_is_bad_signature() {
        let (store, _, _) = registry();
        let codec = TokenCodec::new();
        let ghost = RegisteredApp {
            id: 99,
            name: "ghost".into(),
            secret: b"ghost-secret".to_vec(),
        };
        let issued = codec
            .issue(&account(), &ghost, Duration::hours(1), now())
            .unwrap();
        let err = codec.parse(&issued.token, &store, now()).await.unwrap_err();
        assert!(matches!(err, TokenError::BadSignature));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let (store, _, _) = registry();
        let codec = TokenCodec::new();
        for input in ["", "abc", "a.b", "a.b.c.d", "!!!.???.***"] {
            let err = codec.parse(input, &store, now()).await.unwrap_err();
            assert!(matches!(err, TokenError::Malformed), "input {input:?}");
        }
    }

    #[test]
    fn unrepresentable_expiry_refused() {
        let (_, portal, _) = registry();
        let huge = Duration::try_seconds(i64::MAX / 1_000).unwrap();
        let err = TokenCodec::new()
            .issue(&account(), &portal, huge, now())
            .unwrap_err();
        assert!(matches!(err, TokenError::Encode(_)));
    }

    #[test]
    fn empty_secret_refused() {
        let app = RegisteredApp {
            id: 3,
            name: "blank".into(),
            secret: Vec::new(),
        };
        let err = TokenCodec::new()
            .issue(&account(), &app, Duration::hours(1), now())
            .unwrap_err();
        assert!(matches!(err, TokenError::Encode(_)));
    }
}
