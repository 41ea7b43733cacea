//! Password hashing and verification.
//!
//! Hashes are PBKDF2-HMAC-SHA256 PHC strings
//! (`$pbkdf2-sha256$i=<rounds>,l=32$<salt>$<hash>`) with a random 16-byte
//! salt per account. The round count is fixed per deployment; verification
//! reads it back from the stored string, so raising it later only affects
//! new hashes.

use pbkdf2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use rand::RngCore;
use thiserror::Error;

/// Default PBKDF2 round count (OWASP 2023 recommendation for HMAC-SHA256).
pub const DEFAULT_ROUNDS: u32 = 600_000;

/// Salt byte length.
const SALT_BYTES: usize = 16;

/// Derived key length in bytes.
const OUTPUT_BYTES: usize = 32;

/// Fixed salt used to burn the same CPU time when no account exists.
const DUMMY_SALT: &str = "c3NvZHVtbXlzYWx0MDAwMA";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Producing a new hash failed.
    #[error("password hashing failed: {0}")]
    Hash(String),

    /// The stored hash could not be parsed or uses an unsupported scheme.
    #[error("stored password hash is malformed: {0}")]
    MalformedHash(String),
}

/// Salted, iterated password hashing with a fixed work factor.
#[derive(Debug, Clone, Copy)]
pub struct CredentialVerifier {
    rounds: u32,
}

impl Default for CredentialVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_ROUNDS)
    }
}

impl CredentialVerifier {
    pub fn new(rounds: u32) -> Self {
        Self { rounds }
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    fn params(&self) -> Params {
        Params {
            rounds: self.rounds,
            output_length: OUTPUT_BYTES,
        }
    }

    /// Hash a plaintext password for storage.
    pub fn hash(&self, password: &str) -> Result<String, CredentialError> {
        let mut salt_bytes = [0u8; SALT_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut salt_bytes);
        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| CredentialError::Hash(e.to_string()))?;

        Pbkdf2
            .hash_password_customized(password.as_bytes(), None, None, self.params(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CredentialError::Hash(e.to_string()))
    }

    /// Check `candidate` against a stored hash.
    ///
    /// `Ok(false)` means the password is wrong. `Err` means the stored hash
    /// itself is unusable, which is an operator problem rather than a
    /// caller mistake.
    pub fn verify(&self, stored_hash: &str, candidate: &str) -> Result<bool, CredentialError> {
        let parsed = PasswordHash::new(stored_hash)
            .map_err(|e| CredentialError::MalformedHash(e.to_string()))?;

        // Output comparison inside verify_password is constant-time.
        match Pbkdf2.verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CredentialError::MalformedHash(e.to_string())),
        }
    }

    /// Spend the same work as [`verify`](Self::verify) without a stored hash,
    /// so an unknown email costs as much as a wrong password.
    pub fn burn(&self, candidate: &str) {
        if let Ok(salt) = SaltString::from_b64(DUMMY_SALT) {
            let _ = Pbkdf2.hash_password_customized(
                candidate.as_bytes(),
                None,
                None,
                self.params(),
                &salt,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> CredentialVerifier {
        CredentialVerifier::new(1_000)
    }

    #[test]
    fn hash_then_verify() {
        let v = verifier();
        let hash = v.hash("correct horse").unwrap();
        assert!(hash.starts_with("$pbkdf2-sha256$"));
        assert!(v.verify(&hash, "correct horse").unwrap());
    }

    #[test]
    fn wrong_password_is_false_not_error() {
        let v = verifier();
        let hash = v.hash("correct horse").unwrap();
        assert!(!v.verify(&hash, "battery staple").unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let v = verifier();
        let h1 = v.hash("same password").unwrap();
        let h2 = v.hash("same password").unwrap();
        assert_ne!(h1, h2);
        assert!(v.verify(&h1, "same password").unwrap());
        assert!(v.verify(&h2, "same password").unwrap());
    }

    #[test]
    fn work_factor_is_recorded_in_hash() {
        let hash = CredentialVerifier::new(1_234).hash("pw").unwrap();
        assert!(hash.contains("i=1234"));
        // A verifier configured differently still accepts it.
        assert!(CredentialVerifier::new(5_000).verify(&hash, "pw").unwrap());
    }

    #[test]
    fn malformed_stored_hash_is_an_error() {
        let v = verifier();
        let err = v.verify("not-a-phc-string", "anything").unwrap_err();
        assert!(matches!(err, CredentialError::MalformedHash(_)));
    }

    #[test]
    fn burn_does_not_panic() {
        verifier().burn("whatever");
    }
}
