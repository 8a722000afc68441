//! RPC dispatch.
//!
//! Translates byte-level JSON requests from foreign-language hosts into
//! typed calls on the database and sync client, and marshals the results
//! back. Every data-level failure is returned as the error arm; an
//! unknown operation name is a programming error and panics.

use anyhow::Result;
use replicache_core::{json, Database, Error};
use std::sync::{Arc, Mutex};

use crate::handle_sync;
use crate::types::*;

#[derive(Debug, Default, Clone, Copy)]
struct SyncProgressState {
    bytes_received: u64,
    bytes_expected: u64,
}

/// The host-facing API surface over one database.
pub struct Dispatcher {
    db: Arc<Database>,
    progress: Arc<Mutex<SyncProgressState>>,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            progress: Arc::new(Mutex::new(SyncProgressState::default())),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Dispatch one named operation. The request and response are raw
    /// JSON bytes; see `types` for the schemas.
    ///
    /// # Panics
    ///
    /// Panics on an operation name not in the table.
    pub async fn dispatch(&self, name: &str, req: &[u8]) -> Result<Vec<u8>> {
        tracing::debug!(rpc = name, "dispatch");
        match name {
            "getRoot" => self.get_root(req).await,
            "has" => self.has(req).await,
            "get" => self.get(req).await,
            "scan" => self.scan(req).await,
            "put" => self.put(req).await,
            "del" => self.del(req).await,
            "getBundle" => self.get_bundle(req).await,
            "putBundle" => self.put_bundle(req).await,
            "exec" => self.exec(req).await,
            "requestSync" => self.request_sync(req).await,
            "syncProgress" => self.sync_progress(req).await,
            "handleSync" => self.handle_sync(req).await,
            other => panic!("unsupported rpc name: {other}"),
        }
    }

    async fn root(&self) -> String {
        self.db.hash().await.to_string()
    }

    async fn get_root(&self, req: &[u8]) -> Result<Vec<u8>> {
        let _req: GetRootRequest = serde_json::from_slice(req)?;
        let res = GetRootResponse {
            root: self.root().await,
        };
        Ok(serde_json::to_vec(&res)?)
    }

    async fn has(&self, req: &[u8]) -> Result<Vec<u8>> {
        let req: HasRequest = serde_json::from_slice(req)?;
        let res = HasResponse {
            has: self.db.has(&req.id).await?,
        };
        Ok(serde_json::to_vec(&res)?)
    }

    async fn get(&self, req: &[u8]) -> Result<Vec<u8>> {
        let req: GetRequest = serde_json::from_slice(req)?;
        let value = self.db.get(&req.id).await?;
        let res = GetResponse {
            has: value.is_some(),
            value,
        };
        Ok(serde_json::to_vec(&res)?)
    }

    async fn scan(&self, req: &[u8]) -> Result<Vec<u8>> {
        let req: ScanRequest = serde_json::from_slice(req)?;
        let items = self.db.scan(&req).await?;
        Ok(serde_json::to_vec(&items)?)
    }

    async fn put(&self, req: &[u8]) -> Result<Vec<u8>> {
        let req: PutRequest = serde_json::from_slice(req)?;
        let value = req.value.ok_or(Error::MissingField("value"))?;
        self.db
            .put(&req.id, json::to_canonical_string(&value).as_bytes())
            .await?;
        let res = PutResponse {
            root: self.root().await,
        };
        Ok(serde_json::to_vec(&res)?)
    }

    async fn del(&self, req: &[u8]) -> Result<Vec<u8>> {
        let req: DelRequest = serde_json::from_slice(req)?;
        let ok = self.db.del(&req.id).await?;
        let res = DelResponse {
            ok,
            root: self.root().await,
        };
        Ok(serde_json::to_vec(&res)?)
    }

    async fn get_bundle(&self, req: &[u8]) -> Result<Vec<u8>> {
        let _req: GetBundleRequest = serde_json::from_slice(req)?;
        let code = self.db.bundle().await?;
        let res = GetBundleResponse {
            code: String::from_utf8_lossy(&code).into_owned(),
        };
        Ok(serde_json::to_vec(&res)?)
    }

    async fn put_bundle(&self, req: &[u8]) -> Result<Vec<u8>> {
        let req: PutBundleRequest = serde_json::from_slice(req)?;
        self.db.put_bundle(req.code.into_bytes().into()).await?;
        let res = PutBundleResponse {
            root: self.root().await,
        };
        Ok(serde_json::to_vec(&res)?)
    }

    async fn exec(&self, req: &[u8]) -> Result<Vec<u8>> {
        let req: ExecRequest = serde_json::from_slice(req)?;
        let out = self.db.exec(&req.name, req.args).await?;
        let res = ExecResponse {
            result: out.result,
            root: self.root().await,
        };
        Ok(serde_json::to_vec(&res)?)
    }

    async fn request_sync(&self, req: &[u8]) -> Result<Vec<u8>> {
        let req: SyncRequest = serde_json::from_slice(req)?;
        let cell = Arc::clone(&self.progress);
        let callback: replicache_core::Progress = Box::new(move |received, expected| {
            let mut p = cell.lock().expect("sync progress lock poisoned");
            p.bytes_received = received;
            p.bytes_expected = expected;
        });

        let auth = req.auth.unwrap_or_default();
        let res = match self
            .db
            .request_sync(&req.remote, &auth, Some(callback))
            .await
        {
            Ok(()) => SyncResponse {
                root: Some(self.root().await),
                error: None,
            },
            // Credential problems are a structured response arm so hosts
            // can tell them apart without string matching.
            Err(Error::Auth(msg)) => SyncResponse {
                root: None,
                error: Some(SyncResponseError { bad_auth: msg }),
            },
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::to_vec(&res)?)
    }

    async fn sync_progress(&self, req: &[u8]) -> Result<Vec<u8>> {
        let _req: SyncProgressRequest = serde_json::from_slice(req)?;
        let p = *self.progress.lock().expect("sync progress lock poisoned");
        let res = SyncProgressResponse {
            bytes_received: p.bytes_received,
            bytes_expected: p.bytes_expected,
        };
        Ok(serde_json::to_vec(&res)?)
    }

    async fn handle_sync(&self, req: &[u8]) -> Result<Vec<u8>> {
        let req: HandleSyncRequest = serde_json::from_slice(req)?;
        let res = handle_sync::handle_sync(&self.db, &req.basis).await?;
        Ok(serde_json::to_vec(&res)?)
    }
}
