//! The core database abstraction.
//!
//! A `Database` owns the current head commit of the `local` dataset,
//! exposes reads and transactional writes over it, and enforces the
//! fast-forward invariant on every commit it produces. All public methods
//! hold the database mutex for their duration; the sync client releases it
//! around the network phase only.

use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::checksum::Checksum;
use crate::commit::Commit;
use crate::error::{Error, Result};
use crate::exec::{ExecResult, Sandbox, TxView};
use crate::hash::ChunkId;
use crate::json;
use crate::kv::Map;
use crate::scan::{self, ScanItem, ScanOptions};
use crate::store::{ChunkStore, FjallStore, StoreError};

/// Dataset holding the current local head commit.
pub const LOCAL_DATASET: &str = "local";
/// Dataset holding the last successfully pulled server genesis.
pub const REMOTE_DATASET: &str = "remote";
/// Dataset holding the current transaction-code bundle chunk. The bundle
/// is not a commit and never participates in any map checksum.
pub(crate) const BUNDLE_DATASET: &str = "bundle";

const CLIENT_ID_KEY: &str = "client-id";

const PUT_VALUE: &str = ".putValue";
const DEL_VALUE: &str = ".delValue";

/// Mutable handle over one replica.
pub struct Database {
    pub(crate) store: Arc<dyn ChunkStore>,
    sandbox: Arc<dyn Sandbox>,
    /// Single-flight sync flag; one per open database.
    pub(crate) syncing: AtomicBool,
    pub(crate) inner: Mutex<Inner>,
}

pub(crate) struct Inner {
    pub(crate) head: Commit,
    pub(crate) client_id: String,
}

impl Database {
    /// Open a database over an existing chunk store.
    pub async fn new(store: Arc<dyn ChunkStore>, sandbox: Arc<dyn Sandbox>) -> Result<Self> {
        let inner = Self::init(&store).await?;
        Ok(Self {
            store,
            sandbox,
            syncing: AtomicBool::new(false),
            inner: Mutex::new(inner),
        })
    }

    /// Open or create a persistent database at `path`.
    pub async fn load(path: &Path, sandbox: Arc<dyn Sandbox>) -> Result<Self> {
        let store: Arc<dyn ChunkStore> = Arc::new(FjallStore::open(path)?);
        Self::new(store, sandbox).await
    }

    /// Read or create the client id and the local head.
    async fn init(store: &Arc<dyn ChunkStore>) -> Result<Inner> {
        let client_id = match store.read_meta(CLIENT_ID_KEY).await? {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                store
                    .write_meta(CLIENT_ID_KEY, Bytes::from(id.clone()))
                    .await?;
                id
            }
        };
        tracing::info!(client_id = %client_id, "opened replica");

        let head = match store.head(LOCAL_DATASET).await? {
            Some(id) => Commit::load(store.as_ref(), &id).await?,
            None => {
                let map = Map::new();
                let data = store.put(map.to_chunk()).await?;
                let genesis = Commit::genesis("", data, *map.checksum(), 0);
                genesis.persist(store.as_ref()).await?;
                store.fast_forward(LOCAL_DATASET, *genesis.id()).await?;
                genesis
            }
        };

        Ok(Inner { head, client_id })
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Current head hash.
    pub async fn hash(&self) -> ChunkId {
        *self.inner.lock().await.head.id()
    }

    /// The persistent client id, read once at open.
    pub async fn client_id(&self) -> String {
        self.inner.lock().await.client_id.clone()
    }

    /// Current head commit.
    pub async fn head(&self) -> Commit {
        self.inner.lock().await.head.clone()
    }

    /// Last pulled server genesis, or a synthesized empty genesis if no
    /// pull has happened yet.
    pub async fn remote_head(&self) -> Result<Commit> {
        let _guard = self.inner.lock().await;
        match self.store.head(REMOTE_DATASET).await? {
            Some(id) => Commit::load(self.store.as_ref(), &id).await,
            None => {
                let map = Map::new();
                let data = self.store.put(map.to_chunk()).await?;
                Ok(Commit::genesis("", data, *map.checksum(), 0))
            }
        }
    }

    /// Read an arbitrary commit by hash.
    pub async fn read_commit(&self, id: &ChunkId) -> Result<Commit> {
        match self.store.get(id).await {
            Ok(data) => Commit::from_chunk(data),
            Err(StoreError::NotFound(_)) => Err(Error::KeyNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-read both dataset pointers. Used after external writes.
    pub async fn reload(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        *inner = Self::init(&self.store).await?;
        Ok(())
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        let map = inner.head.map(self.store.as_ref()).await?;
        Ok(map.has(key))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let inner = self.inner.lock().await;
        let map = inner.head.map(self.store.as_ref()).await?;
        Ok(map.get(key).cloned())
    }

    pub async fn scan(&self, opts: &ScanOptions) -> Result<Vec<ScanItem>> {
        let inner = self.inner.lock().await;
        let map = inner.head.map(self.store.as_ref()).await?;
        Ok(scan::scan(map.iter(), opts))
    }

    /// Canonicalize `raw` and store it under `key` via an internal
    /// putValue transaction.
    pub async fn put(&self, key: &str, raw: &[u8]) -> Result<()> {
        let value = json::canonicalize(raw).map_err(|e| match e {
            Error::MalformedJson(msg) => {
                Error::MalformedJson(format!("could not put '{key}': {msg}"))
            }
            other => other,
        })?;
        let mut inner = self.inner.lock().await;
        self.exec_internal(
            &mut inner,
            PUT_VALUE,
            vec![Value::String(key.to_string()), value],
        )
        .await?;
        Ok(())
    }

    /// Delete `key`; reports whether it was present.
    pub async fn del(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let res = self
            .exec_internal(&mut inner, DEL_VALUE, vec![Value::String(key.to_string())])
            .await?;
        Ok(matches!(res.result, Some(Value::Bool(true))))
    }

    /// The current transaction bundle; empty if none has been stored.
    pub async fn bundle(&self) -> Result<Bytes> {
        let _guard = self.inner.lock().await;
        read_bundle(self.store.as_ref()).await
    }

    /// Replace the transaction bundle. Validation is lazy: bad code only
    /// surfaces when an affected transaction executes.
    pub async fn put_bundle(&self, code: Bytes) -> Result<()> {
        let _guard = self.inner.lock().await;
        let id = self.store.put(code).await?;
        self.store.set_head(BUNDLE_DATASET, id).await?;
        Ok(())
    }

    /// Run a user-defined transaction from the bundle. Read-only
    /// executions produce no commit and leave the head unchanged.
    pub async fn exec(&self, name: &str, args: Vec<Value>) -> Result<ExecResult> {
        if name.starts_with('.') {
            return Err(Error::UnknownFunction(format!(
                "{name} (names beginning with '.' are reserved)"
            )));
        }
        let mut inner = self.inner.lock().await;
        self.exec_internal(&mut inner, name, args).await
    }

    /// Execute against the current head and, if the transaction wrote,
    /// append a Tx commit and fast-forward the local dataset.
    async fn exec_internal(
        &self,
        inner: &mut Inner,
        name: &str,
        args: Vec<Value>,
    ) -> Result<ExecResult> {
        let basis = inner.head.clone();
        let (data, checksum, output, is_write) = self.exec_impl(&basis, name, &args).await?;

        if !is_write {
            return Ok(ExecResult {
                result: output,
                committed: false,
            });
        }

        let commit = Commit::tx(
            *basis.id(),
            Utc::now(),
            name,
            args,
            data,
            checksum,
            basis.last_mutation_id() + 1,
        );
        commit.persist(self.store.as_ref()).await?;
        match self.store.fast_forward(LOCAL_DATASET, *commit.id()).await {
            Err(StoreError::FastForwardViolation { .. }) => return Err(Error::CommitRaced),
            other => other?,
        }
        inner.head = commit;
        Ok(ExecResult {
            result: output,
            committed: true,
        })
    }

    /// Apply `name(args)` to `basis`. Returns the resulting data ref and
    /// checksum (the basis's own when nothing was written), the optional
    /// output value, and whether any mutation happened. Also the replay
    /// entry point for rebase.
    pub(crate) async fn exec_impl(
        &self,
        basis: &Commit,
        name: &str,
        args: &[Value],
    ) -> Result<(ChunkId, Checksum, Option<Value>, bool)> {
        let map = basis.map(self.store.as_ref()).await?;

        if name.starts_with('.') {
            let mut editor = map.edit();
            let output = match name {
                PUT_VALUE => {
                    let key = string_arg(args, 0, "key")?;
                    let value = args.get(1).cloned().ok_or(Error::MissingField("value"))?;
                    editor.set(key, value);
                    None
                }
                DEL_VALUE => {
                    let key = string_arg(args, 0, "key")?;
                    let had = editor.remove(&key);
                    Some(Value::Bool(had))
                }
                _ => return Err(Error::UnknownFunction(name.to_string())),
            };
            let new_map = editor.build();
            let checksum = *new_map.checksum();
            let data = self.store.put(new_map.to_chunk()).await?;
            return Ok((data, checksum, output, true));
        }

        let bundle = read_bundle(self.store.as_ref()).await?;
        if bundle.is_empty() {
            return Err(Error::BundleMissing);
        }
        let mut view = TxView::new(map.edit());
        let output = self.sandbox.evaluate(&bundle, name, args, &mut view).await?;
        let (editor, wrote) = view.into_parts();
        if !wrote {
            return Ok((*basis.data(), *basis.checksum(), output, false));
        }
        let new_map = editor.build();
        let checksum = *new_map.checksum();
        let data = self.store.put(new_map.to_chunk()).await?;
        Ok((data, checksum, output, true))
    }
}

/// Read the current bundle chunk directly from the store.
pub(crate) async fn read_bundle(store: &dyn ChunkStore) -> Result<Bytes> {
    match store.head(BUNDLE_DATASET).await? {
        Some(id) => Ok(store.get(&id).await?),
        None => Ok(Bytes::new()),
    }
}

fn string_arg(args: &[Value], idx: usize, field: &'static str) -> Result<String> {
    match args.get(idx) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(Error::MalformedJson(format!(
            "{field} must be a string, got {other}"
        ))),
        None => Err(Error::MissingField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::NoSandbox;
    use crate::store::MemoryStore;

    async fn temp_db() -> Database {
        Database::new(Arc::new(MemoryStore::new()), Arc::new(NoSandbox))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_databases_share_genesis() {
        let a = temp_db().await;
        let b = temp_db().await;
        assert_eq!(a.hash().await, b.hash().await);
        assert_ne!(a.client_id().await, b.client_id().await);
    }

    #[tokio::test]
    async fn test_put_advances_head() {
        let db = temp_db().await;
        let genesis = db.hash().await;
        db.put("foo", br#""bar""#).await.unwrap();
        let head = db.head().await;
        assert_ne!(*head.id(), genesis);
        assert_eq!(head.basis_ref().unwrap(), &genesis);
        assert_eq!(head.last_mutation_id(), 1);
        assert_eq!(head.tx_meta().unwrap().0, ".putValue");
    }

    #[tokio::test]
    async fn test_put_rejects_malformed_json() {
        let db = temp_db().await;
        let before = db.hash().await;
        let err = db.put("foo", b"{oops").await.unwrap_err();
        assert!(matches!(err, Error::MalformedJson(_)));
        assert_eq!(db.hash().await, before);
    }

    #[tokio::test]
    async fn test_exec_rejects_reserved_names() {
        let db = temp_db().await;
        let err = db.exec(".putValue", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(_)));
    }

    #[tokio::test]
    async fn test_exec_without_bundle() {
        let db = temp_db().await;
        let err = db.exec("anything", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::BundleMissing));
    }

    #[tokio::test]
    async fn test_bundle_roundtrip() {
        let db = temp_db().await;
        assert!(db.bundle().await.unwrap().is_empty());
        db.put_bundle(Bytes::from_static(b"function a() {}"))
            .await
            .unwrap();
        assert_eq!(
            db.bundle().await.unwrap(),
            Bytes::from_static(b"function a() {}")
        );
    }

    #[tokio::test]
    async fn test_reload_preserves_state() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let db = Database::new(store.clone(), Arc::new(NoSandbox)).await.unwrap();
        db.put("k", b"1").await.unwrap();
        let head = db.hash().await;
        let cid = db.client_id().await;

        // A second handle over the same store sees the committed head.
        let db2 = Database::new(store, Arc::new(NoSandbox)).await.unwrap();
        assert_eq!(db2.hash().await, head);
        assert_eq!(db2.client_id().await, cid);

        db.reload().await.unwrap();
        assert_eq!(db.hash().await, head);
        assert_eq!(db.client_id().await, cid);
    }
}
