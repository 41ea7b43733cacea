//! Single-sign-on identity service.
//!
//! Client applications log users in with email and password and receive a
//! token scoped to one registered application. The token is a signed
//! envelope; its SHA-256 digest is recorded server-side so it can be checked
//! and revoked without trusting the signature alone.

pub mod auth;
pub mod config;
pub mod gateway;
pub mod store;

pub use auth::{AuthError, AuthService, ErrorKind, RequestContext};
pub use config::Config;
