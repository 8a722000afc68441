//! Pull/sync client.
//!
//! Sync fetches a JSON-Patch diff from the remote for the last known
//! server state, applies it to a fresh genesis, verifies the checksum,
//! and then rebases pending local transactions on top of the new state.
//! The database mutex is released for the network phase and re-acquired
//! for head installation; a process-wide-per-database flag makes sync
//! single-flight.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::commit::Commit;
use crate::db::{Database, LOCAL_DATASET, REMOTE_DATASET};
use crate::error::{Error, Result};
use crate::patch::{self, PatchOp};
use crate::rebase;

/// Progress callback: `(bytes_received, bytes_expected)`.
pub type Progress = Box<dyn Fn(u64, u64) + Send + Sync>;

const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Body of `POST <remote>/handlePull`.
#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    #[serde(rename = "baseStateID")]
    base_state_id: &'a str,
    checksum: &'a str,
}

/// Successful pull response.
#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(rename = "stateID")]
    state_id: String,
    #[serde(default)]
    patch: Vec<PatchOp>,
    checksum: String,
}

impl Database {
    /// Pull from `remote` and rebase pending local commits on top of the
    /// result. A second concurrent call fails immediately with
    /// `SyncInProgress` without touching the network.
    pub async fn request_sync(
        &self,
        remote: &str,
        auth: &str,
        progress: Option<Progress>,
    ) -> Result<()> {
        let _guard = SyncGuard::acquire(&self.syncing)?;

        // Snapshot the pull basis under the mutex.
        let genesis = {
            let inner = self.inner.lock().await;
            inner.head.nearest_genesis(self.store.as_ref()).await?
        };
        let base_state_id = genesis.server_state_id().unwrap_or("").to_string();
        let base_checksum = genesis.checksum().to_hex();

        // Network phase, mutex released.
        let url = format!("{}/handlePull", remote.trim_end_matches('/'));
        tracing::debug!(%url, basis = %base_state_id, "requesting pull");
        let pull = fetch_pull(&url, auth, &base_state_id, &base_checksum, progress).await?;
        tracing::debug!(
            state_id = %pull.state_id,
            ops = pull.patch.len(),
            "pull response decoded"
        );

        // Apply against the old genesis's data (the patch's own clear-all
        // switches to the empty map) and verify before anything moves.
        let base_map = genesis.map(self.store.as_ref()).await?;
        let new_map = patch::apply(&base_map, &pull.patch)?;
        let actual = new_map.checksum().to_hex();
        if actual != pull.checksum {
            return Err(Error::ChecksumMismatch {
                expected: pull.checksum,
                actual,
            });
        }

        let checksum = *new_map.checksum();
        let data = self.store.put(new_map.to_chunk()).await?;
        let new_genesis = Commit::genesis(&pull.state_id, data, checksum, 0);
        new_genesis.persist(self.store.as_ref()).await?;

        // Head installation, serialized with other writes. The rebase
        // happens first so a replay failure leaves both datasets
        // untouched.
        let mut inner = self.inner.lock().await;
        let head = inner.head.clone();
        let rebased = rebase::rebase(
            self,
            &new_genesis,
            Utc::now(),
            &head,
            Some(*genesis.id()),
        )
        .await?;
        self.store
            .set_head(REMOTE_DATASET, *new_genesis.id())
            .await?;
        self.store.set_head(LOCAL_DATASET, *rebased.id()).await?;
        inner.head = rebased;
        Ok(())
    }
}

/// POST the pull request and stream-decode the response.
async fn fetch_pull(
    url: &str,
    auth: &str,
    base_state_id: &str,
    base_checksum: &str,
    progress: Option<Progress>,
) -> Result<PullResponse> {
    let body = serde_json::to_vec(&PullRequest {
        base_state_id,
        checksum: base_checksum,
    })
    .map_err(|e| Error::InvalidResponse(e.to_string()))?;

    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| Error::Transport(e.to_string()))?;
    let resp = client
        .post(url)
        .header("Authorization", auth)
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let detail = resp.text().await.unwrap_or_else(|e| e.to_string());
        let msg = format!("{status}: {detail}");
        return if status == reqwest::StatusCode::FORBIDDEN {
            Err(Error::Auth(msg))
        } else {
            Err(Error::Transport(msg))
        };
    }

    let expected = expected_length(&resp)?;
    let mut resp = resp;
    let mut received: Vec<u8> = Vec::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| Error::Transport(e.to_string()))?
    {
        received.extend_from_slice(&chunk);
        if let Some(cb) = &progress {
            let rec = received.len() as u64;
            if expected == 0 {
                cb(rec, rec);
            } else {
                cb(rec.min(expected), expected);
            }
        }
    }
    if let Some(cb) = &progress {
        let total = received.len() as u64;
        if expected == 0 {
            cb(total, total);
        } else {
            cb(expected, expected);
        }
    }

    serde_json::from_slice(&received)
        .map_err(|e| Error::InvalidResponse(format!("response from {url} is not valid JSON: {e}")))
}

/// The `Entity-length` header wins over `Content-Length`; unknown means 0.
fn expected_length(resp: &reqwest::Response) -> Result<u64> {
    if let Some(v) = resp.headers().get("entity-length") {
        let s = v
            .to_str()
            .map_err(|e| Error::InvalidResponse(format!("bad Entity-length header: {e}")))?;
        return s.parse().map_err(|_| {
            Error::InvalidResponse(format!("non-integral value for Entity-length header: {s}"))
        });
    }
    Ok(resp.content_length().unwrap_or(0))
}

struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncGuard<'a> {
    /// Claim the single-flight flag; the losing caller does not touch it.
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Ok(Self { flag })
        } else {
            Err(Error::SyncInProgress)
        }
    }
}

impl Drop for SyncGuard<'_> {
    // Runs on every exit path, panics included.
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_guard_single_flight() {
        let flag = AtomicBool::new(false);
        let guard = SyncGuard::acquire(&flag).unwrap();
        assert!(matches!(
            SyncGuard::acquire(&flag),
            Err(Error::SyncInProgress)
        ));
        drop(guard);
        assert!(SyncGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_string(&PullRequest {
            base_state_id: "s1",
            checksum: "abc",
        })
        .unwrap();
        assert_eq!(body, r#"{"baseStateID":"s1","checksum":"abc"}"#);
    }

    #[test]
    fn test_response_patch_defaults_empty() {
        let resp: PullResponse =
            serde_json::from_str(r#"{"stateID":"s2","checksum":"00"}"#).unwrap();
        assert_eq!(resp.state_id, "s2");
        assert!(resp.patch.is_empty());
    }
}
