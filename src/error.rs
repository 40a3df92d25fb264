//! Error taxonomy for the engine layers.
//!
//! Source and cache errors stay internal: per-source failures become build
//! diagnostics on the catalog, and cache errors self-heal by forcing a
//! rebuild. Only [`EngineError`] variants reach external callers.

use thiserror::Error;

/// Failure to materialize a source snapshot. Always source-scoped; one
/// failing source never aborts a rebuild.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("fetch timed out after {0}s")]
    Timeout(u64),
}

/// Problems with the persisted catalog blob. Never surfaced to callers;
/// any of these simply forces a rebuild.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache blob unreadable: {0}")]
    Corrupt(String),

    #[error("cache fingerprint {cached} does not match configured sources ({expected})")]
    FingerprintMismatch { cached: String, expected: String },

    #[error("cache blob format version {0} is not supported")]
    UnsupportedVersion(u32),

    #[error("cache blob is older than the configured max age")]
    Expired,
}

/// Errors returned to the external caller, with enough detail to recover.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("user '{0}' is not enrolled in a course; start a course first")]
    NotEnrolled(String),

    #[error("stored progress record is invalid: {0}")]
    InvalidRecord(String),

    #[error("progress storage error: {0}")]
    Storage(#[from] sqlx::Error),
}
