//! Error kinds surfaced by the database and sync client.
//!
//! Data-level failures are recoverable and bubble to the RPC boundary;
//! programming invariants (unknown RPC names, checksum bookkeeping) are
//! panics, not variants here.

use crate::hash::ChunkId;
use crate::store::StoreError;

/// Result type for database and sync operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("{0} field is required")]
    MissingField(&'static str),

    /// Internal: a referenced key or record was expected to exist.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("commit aborted: the local head moved during the transaction")]
    CommitRaced,

    #[error("transaction function failed: {0}")]
    Interpreter(String),

    #[error("no transaction bundle has been registered")]
    BundleMissing,

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("there is already a sync in progress")]
    SyncInProgress,

    #[error("sync authorization rejected: {0}")]
    Auth(String),

    #[error("sync transport error: {0}")]
    Transport(String),

    #[error("invalid sync response: {0}")]
    InvalidResponse(String),

    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("checksum mismatch! expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("no common ancestor between commits {0} and {1}")]
    NoCommonAncestor(ChunkId, ChunkId),

    #[error(transparent)]
    Store(#[from] StoreError),
}
