//! Store traits for session persistence.

use thiserror::Error;

use crate::store::PersistedSession;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cached session is invalid: {0}")]
    CacheInvalid(String),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persists session credentials and cookies across process restarts.
///
/// A missing snapshot and a corrupt one look the same to callers: `load`
/// returns `None` for both.
pub trait CredentialStore: Send + Sync {
    /// Persist a snapshot, replacing any previous one.
    fn save(&self, snapshot: &PersistedSession) -> StoreResult<()>;

    /// Return the last snapshot if present and structurally valid.
    fn load(&self) -> Option<PersistedSession>;

    /// Delete the snapshot so the next login starts interactively.
    fn invalidate(&self) -> StoreResult<()>;
}
