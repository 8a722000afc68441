//! Replicache core library
//!
//! An embedded, offline-first key/value store that keeps a per-device
//! replica of a logical shared dataset and reconciles it with a remote
//! authority through a patch-and-rebase protocol. Includes:
//! - Checksummed ordered map over canonical JSON values
//! - Commit model (Genesis, Tx, Reorder) over a content-addressed store
//! - Chunk store abstraction with in-memory and Fjall-backed stores
//! - Database handle with CRUD, scans, and transactional exec
//! - Rebase engine for replaying forked history
//! - HTTP pull client with streaming progress and checksum verification

pub mod checksum;
pub mod commit;
pub mod db;
pub mod error;
pub mod exec;
pub mod hash;
pub mod json;
pub mod kv;
pub mod patch;
pub mod rebase;
pub mod scan;
pub mod store;
pub mod sync;

pub use checksum::Checksum;
pub use commit::{Commit, CommitRecord, CommitType, CommitValue, Meta};
pub use db::{Database, LOCAL_DATASET, REMOTE_DATASET};
pub use error::{Error, Result};
pub use exec::{ExecResult, NoSandbox, Sandbox, TxView};
pub use hash::ChunkId;
pub use kv::{Map, MapEditor};
pub use patch::PatchOp;
pub use rebase::{common_ancestor, rebase};
pub use scan::{ScanBound, ScanId, ScanItem, ScanOptions};
pub use store::{ChunkStore, FjallStore, MemoryStore, StoreError};
pub use sync::Progress;
