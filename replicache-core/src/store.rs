//! Chunk store abstraction.
//!
//! The store provides content-addressed, deduplicated chunk persistence
//! plus named dataset heads with a fast-forward primitive: a head may only
//! advance to a chunk whose commit ancestry contains the current head.
//! Two implementations are provided: an in-memory store for tests and
//! short-lived databases, and a persistent store backed by the Fjall
//! LSM-tree.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::hash::ChunkId;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("chunk not found: {0}")]
    NotFound(ChunkId),

    #[error("cannot fast-forward dataset '{dataset}': new head does not descend from the current head")]
    FastForwardViolation { dataset: String },

    #[error("corrupt chunk: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(String),
}

/// Content-addressed chunk persistence with named dataset heads.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Get chunk data by id.
    async fn get(&self, id: &ChunkId) -> Result<Bytes>;

    /// Check if a chunk exists.
    async fn has(&self, id: &ChunkId) -> Result<bool>;

    /// Put chunk data (returns the chunk id; writing the same bytes twice
    /// is a no-op).
    async fn put(&self, data: Bytes) -> Result<ChunkId>;

    /// Read the current head of a named dataset.
    async fn head(&self, dataset: &str) -> Result<Option<ChunkId>>;

    /// Atomically advance a dataset head. Succeeds iff the dataset has no
    /// head yet, or `new_head` is the current head or a descendant of it.
    async fn fast_forward(&self, dataset: &str, new_head: ChunkId) -> Result<()>;

    /// Unconditionally install a dataset head. Reserved for sync head
    /// installation and for chunks that are not commits.
    async fn set_head(&self, dataset: &str, new_head: ChunkId) -> Result<()>;

    /// Read a small named metadata record (e.g. the client id).
    async fn read_meta(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a small named metadata record.
    async fn write_meta(&self, key: &str, value: Bytes) -> Result<()>;

    /// Whether `descendant`'s commit ancestry contains `ancestor`,
    /// walking every parent of every stored record.
    async fn descends_from(&self, descendant: &ChunkId, ancestor: &ChunkId) -> Result<bool> {
        if descendant == ancestor {
            return Ok(true);
        }
        let mut queue = vec![*descendant];
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop() {
            if !seen.insert(id) {
                continue;
            }
            if &id == ancestor {
                return Ok(true);
            }
            let data = self.get(&id).await?;
            queue.extend(parent_ids(&data)?);
        }
        Ok(false)
    }
}

/// Extract the `parents` array of a serialized commit record.
fn parent_ids(data: &[u8]) -> Result<Vec<ChunkId>> {
    let v: serde_json::Value = serde_json::from_slice(data)
        .map_err(|e| StoreError::Corrupt(format!("head chunk is not a commit record: {e}")))?;
    let mut out = Vec::new();
    if let Some(parents) = v.get("parents").and_then(|p| p.as_array()) {
        for p in parents {
            let s = p
                .as_str()
                .ok_or_else(|| StoreError::Corrupt("non-string parent reference".into()))?;
            out.push(
                s.parse()
                    .map_err(|e| StoreError::Corrupt(format!("bad parent reference: {e}")))?,
            );
        }
    }
    Ok(out)
}

/// In-memory chunk store.
///
/// Backs throwaway databases in tests; everything is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    chunks: std::sync::Mutex<HashMap<ChunkId, Bytes>>,
    // tokio mutex: held across the chunk reads of the ancestry walk.
    heads: tokio::sync::Mutex<HashMap<String, ChunkId>>,
    meta: std::sync::Mutex<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn get(&self, id: &ChunkId) -> Result<Bytes> {
        self.chunks
            .lock()
            .expect("chunk table lock poisoned")
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    async fn has(&self, id: &ChunkId) -> Result<bool> {
        Ok(self
            .chunks
            .lock()
            .expect("chunk table lock poisoned")
            .contains_key(id))
    }

    async fn put(&self, data: Bytes) -> Result<ChunkId> {
        let id = ChunkId::of(&data);
        self.chunks
            .lock()
            .expect("chunk table lock poisoned")
            .insert(id, data);
        Ok(id)
    }

    async fn head(&self, dataset: &str) -> Result<Option<ChunkId>> {
        Ok(self.heads.lock().await.get(dataset).copied())
    }

    async fn fast_forward(&self, dataset: &str, new_head: ChunkId) -> Result<()> {
        let mut heads = self.heads.lock().await;
        match heads.get(dataset).copied() {
            Some(current) if current == new_head => Ok(()),
            Some(current) => {
                if self.descends_from(&new_head, &current).await? {
                    heads.insert(dataset.to_string(), new_head);
                    Ok(())
                } else {
                    Err(StoreError::FastForwardViolation {
                        dataset: dataset.to_string(),
                    })
                }
            }
            None => {
                heads.insert(dataset.to_string(), new_head);
                Ok(())
            }
        }
    }

    async fn set_head(&self, dataset: &str, new_head: ChunkId) -> Result<()> {
        self.heads.lock().await.insert(dataset.to_string(), new_head);
        Ok(())
    }

    async fn read_meta(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self
            .meta
            .lock()
            .expect("meta table lock poisoned")
            .get(key)
            .cloned())
    }

    async fn write_meta(&self, key: &str, value: Bytes) -> Result<()> {
        self.meta
            .lock()
            .expect("meta table lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Persistent chunk store using the Fjall LSM-tree.
pub struct FjallStore {
    keyspace: fjall::Keyspace,
    chunks: fjall::PartitionHandle,
    heads: fjall::PartitionHandle,
    meta: fjall::PartitionHandle,
    // Serializes in-process head updates; the ancestry walk happens while
    // this is held so check-then-set is atomic.
    head_lock: tokio::sync::Mutex<()>,
}

impl FjallStore {
    /// Open or create a store at the given directory.
    pub fn open(path: &Path) -> Result<Self> {
        let keyspace = fjall::Config::new(path)
            .open()
            .map_err(|e| StoreError::Database(format!("failed to open store: {e}")))?;
        let chunks = Self::partition(&keyspace, "chunks")?;
        let heads = Self::partition(&keyspace, "heads")?;
        let meta = Self::partition(&keyspace, "meta")?;
        Ok(Self {
            keyspace,
            chunks,
            heads,
            meta,
            head_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn partition(keyspace: &fjall::Keyspace, name: &str) -> Result<fjall::PartitionHandle> {
        keyspace
            .open_partition(name, fjall::PartitionCreateOptions::default())
            .map_err(|e| StoreError::Database(format!("failed to open partition {name}: {e}")))
    }

    /// Flush everything to disk.
    pub fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(fjall::PersistMode::SyncAll)
            .map_err(|e| StoreError::Database(format!("failed to persist: {e}")))
    }

    fn install_head(&self, dataset: &str, new_head: &ChunkId) -> Result<()> {
        self.heads
            .insert(dataset, new_head.to_string())
            .map_err(|e| StoreError::Database(format!("head update failed: {e}")))?;
        self.persist()
    }

    fn read_head(&self, dataset: &str) -> Result<Option<ChunkId>> {
        self.heads
            .get(dataset)
            .map_err(|e| StoreError::Database(format!("head read failed: {e}")))?
            .map(|v| {
                std::str::from_utf8(&v)
                    .map_err(|e| StoreError::Corrupt(format!("bad head record: {e}")))?
                    .parse()
                    .map_err(|e| StoreError::Corrupt(format!("bad head record: {e}")))
            })
            .transpose()
    }
}

#[async_trait]
impl ChunkStore for FjallStore {
    async fn get(&self, id: &ChunkId) -> Result<Bytes> {
        self.chunks
            .get(id.to_string())
            .map_err(|e| StoreError::Database(format!("get failed: {e}")))?
            .map(|v| Bytes::from(v.to_vec()))
            .ok_or(StoreError::NotFound(*id))
    }

    async fn has(&self, id: &ChunkId) -> Result<bool> {
        Ok(self
            .chunks
            .get(id.to_string())
            .map_err(|e| StoreError::Database(format!("exists check failed: {e}")))?
            .is_some())
    }

    async fn put(&self, data: Bytes) -> Result<ChunkId> {
        let id = ChunkId::of(&data);
        self.chunks
            .insert(id.to_string(), data.as_ref())
            .map_err(|e| StoreError::Database(format!("put failed: {e}")))?;
        Ok(id)
    }

    async fn head(&self, dataset: &str) -> Result<Option<ChunkId>> {
        let _guard = self.head_lock.lock().await;
        self.read_head(dataset)
    }

    async fn fast_forward(&self, dataset: &str, new_head: ChunkId) -> Result<()> {
        let _guard = self.head_lock.lock().await;
        match self.read_head(dataset)? {
            Some(current) if current == new_head => Ok(()),
            Some(current) => {
                if self.descends_from(&new_head, &current).await? {
                    self.install_head(dataset, &new_head)
                } else {
                    Err(StoreError::FastForwardViolation {
                        dataset: dataset.to_string(),
                    })
                }
            }
            None => self.install_head(dataset, &new_head),
        }
    }

    async fn set_head(&self, dataset: &str, new_head: ChunkId) -> Result<()> {
        let _guard = self.head_lock.lock().await;
        self.install_head(dataset, &new_head)
    }

    async fn read_meta(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self
            .meta
            .get(key)
            .map_err(|e| StoreError::Database(format!("meta read failed: {e}")))?
            .map(|v| Bytes::from(v.to_vec())))
    }

    async fn write_meta(&self, key: &str, value: Bytes) -> Result<()> {
        self.meta
            .insert(key, value.as_ref())
            .map_err(|e| StoreError::Database(format!("meta write failed: {e}")))?;
        self.persist()
    }
}
