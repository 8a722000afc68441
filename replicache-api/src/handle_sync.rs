//! Server-side sync handler.
//!
//! Present for embedded use where this process serves another client:
//! given the client's basis hash, compute the patch that takes the basis
//! state to the current head state. A missing or unknown basis gets a
//! full replacement patch led by the clear-all op.

use anyhow::{anyhow, Result};
use replicache_core::{patch, ChunkId, Database, Error, Map, PatchOp};

use crate::types::HandleSyncResponse;

pub async fn handle_sync(db: &Database, basis: &str) -> Result<HandleSyncResponse> {
    let head = db.head().await;
    let head_map = head.map(db.store().as_ref()).await?;

    let basis_map = if basis.is_empty() {
        None
    } else {
        let id: ChunkId = basis.parse().map_err(|_| anyhow!("Invalid basis hash"))?;
        match db.read_commit(&id).await {
            Ok(commit) => Some(commit.map(db.store().as_ref()).await?),
            // The client knows a state we no longer have; start over.
            Err(Error::KeyNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        }
    };

    Ok(HandleSyncResponse {
        commit_id: head.id().to_string(),
        patch: diff(basis_map.as_ref(), &head_map),
        noms_checksum: head.checksum().to_hex(),
    })
}

/// Compute the patch taking `basis` to `head`: removes for vanished keys,
/// adds for new or changed ones, in key order.
fn diff(basis: Option<&Map>, head: &Map) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    match basis {
        None => {
            ops.push(PatchOp::remove("/"));
            for (key, value) in head.iter() {
                ops.push(PatchOp::add(user_path(key), value.clone()));
            }
        }
        Some(basis) => {
            for (key, _) in basis.iter() {
                if !head.has(key) {
                    ops.push(PatchOp::remove(user_path(key)));
                }
            }
            for (key, value) in head.iter() {
                if basis.get(key) != Some(value) {
                    ops.push(PatchOp::add(user_path(key), value.clone()));
                }
            }
        }
    }
    ops
}

fn user_path(key: &str) -> String {
    format!("/u/{}", patch::escape_key(key))
}
