//! Concrete backends for the account store, application registry and
//! token ledger.
//!
//! - [`SqliteStore`]: pooled SQLite, the production backend
//! - [`MemoryStore`]: process-local maps, for tests and throwaway instances
//!
//! Both implement every capability trait in [`crate::auth::traits`], so one
//! `Arc` of either can be handed to the core for all three roles.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use thiserror::Error;

/// Failure reported by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("record already exists")]
    Conflict,

    #[error("record not found")]
    NotFound,

    /// I/O, pool or driver failure. `op` names the storage call that failed.
    #[error("{op} failed")]
    Unavailable {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl StoreError {
    pub fn unavailable(op: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Unavailable {
            op,
            source: source.into(),
        }
    }
}
