//! Rebase engine.
//!
//! Rebase transforms a forked commit history into a linear one by
//! replaying the transactions of one side of the fork on top of the
//! other. Unlike git, the original forked commits are preserved in the
//! store (each replay is recorded as a Reorder commit pointing back at
//! its subject), but the effect on the data is the same as a git rebase.

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;

use crate::commit::Commit;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::hash::ChunkId;
use crate::store::{ChunkStore, StoreError};

/// Replay `commit`'s branch on top of `onto` and return the new head.
///
/// `fork_point` is the commit at which the two branches diverge; when not
/// supplied it is computed as the common ancestor of `onto` and `commit`,
/// and not finding one is a fatal error. All new Reorder commits carry the
/// supplied `date`: a single rebase event has one timestamp. Nothing is
/// installed on any head; a failed replay aborts the whole rebase and any
/// Reorder chunks already written are unreferenced orphans.
pub async fn rebase(
    db: &Database,
    onto: &Commit,
    date: DateTime<Utc>,
    commit: &Commit,
    fork_point: Option<ChunkId>,
) -> Result<Commit> {
    let fork_point = match fork_point {
        Some(fp) => fp,
        None => common_ancestor(db.store().as_ref(), onto.id(), commit.id()).await?,
    };
    rebase_frame(db, onto, date, commit.clone(), fork_point).await
}

fn rebase_frame<'a>(
    db: &'a Database,
    onto: &'a Commit,
    date: DateTime<Utc>,
    commit: Commit,
    fork_point: ChunkId,
) -> Pin<Box<dyn Future<Output = Result<Commit>> + Send + 'a>> {
    Box::pin(async move {
        // At the fork point the entire remaining branch is at or below
        // it, so by definition `onto` is the result.
        if *commit.id() == fork_point {
            return Ok(onto.clone());
        }

        // Recurse on this commit's basis to obtain the rebased ancestor.
        let old_basis = commit.basis(db.store().as_ref()).await?;
        let new_basis = rebase_frame(db, onto, date, old_basis.clone(), fork_point).await?;

        // The basis did not move: this frame is a fast-forward.
        if new_basis.id() == old_basis.id() {
            return Ok(commit);
        }

        // Reorder chains eventually bottom out at an original Tx; find it
        // and re-run it against the new basis.
        let target = commit.initial(db.store().as_ref()).await?;
        let (name, args) = match target.tx_meta() {
            Some((name, args)) => (name.to_string(), args.to_vec()),
            None => {
                return Err(Error::Store(StoreError::Corrupt(
                    "rebase subject does not resolve to a tx commit".into(),
                )))
            }
        };
        let (data, checksum, _, _) = db.exec_impl(&new_basis, &name, &args).await?;

        let reorder = Commit::reorder(
            *new_basis.id(),
            *commit.id(),
            date,
            data,
            checksum,
            commit.last_mutation_id(),
        );
        reorder.persist(db.store().as_ref()).await?;
        Ok(reorder)
    })
}

/// Find the nearest ancestor of `b` that is also an ancestor of `a`.
pub async fn common_ancestor(
    store: &dyn ChunkStore,
    a: &ChunkId,
    b: &ChunkId,
) -> Result<ChunkId> {
    let mut ancestors_of_a = HashSet::new();
    let mut queue = vec![*a];
    while let Some(id) = queue.pop() {
        if !ancestors_of_a.insert(id) {
            continue;
        }
        let commit = Commit::load(store, &id).await?;
        queue.extend(commit.record().parents.iter().copied());
    }

    // Breadth-first from `b` so the first hit is the nearest one.
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([*b]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if ancestors_of_a.contains(&id) {
            return Ok(id);
        }
        let commit = Commit::load(store, &id).await?;
        queue.extend(commit.record().parents.iter().copied());
    }

    Err(Error::NoCommonAncestor(*a, *b))
}
