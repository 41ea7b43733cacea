//! Hybrid token authentication.
//!
//! Provides:
//! - Password hashing and verification (PBKDF2-HMAC-SHA256, per-account salt)
//! - Signed per-application tokens (HS256, secret owned by the target app)
//! - A server-side ledger of SHA-256 token digests, authoritative for liveness
//! - A background sweeper that purges expired ledger records
//!
//! ## Design Decisions
//! - Every token exists twice: as a signed envelope the client holds and as
//!   a digest row the server holds. Both carry the same expiry instant.
//! - `is_authenticated` trusts only the ledger, so deleting a row revokes a
//!   token whose signature would still verify.
//! - Storage, registry and ledger are traits; the core is tested against
//!   [`crate::store::MemoryStore`] and deployed on [`crate::store::SqliteStore`].

pub mod clock;
pub mod context;
pub mod error;
pub mod password;
pub mod service;
pub mod sweep;
pub mod token;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::RequestContext;
pub use error::{AuthError, ErrorKind};
pub use password::{CredentialError, CredentialVerifier};
pub use service::{AuthService, UserInfo};
pub use sweep::Sweeper;
pub use token::{Claims, IssuedToken, TokenCodec, TokenError};
pub use traits::{Account, AccountStore, AppRegistry, NewAccount, RegisteredApp, Role, TokenLedger};
