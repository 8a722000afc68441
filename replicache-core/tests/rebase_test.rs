//! Rebase engine tests.
//!
//! The fork shapes mirror the classic cases: destination fast-forward,
//! source fast-forward, simple reorder, chained reorder, and re-reorder
//! of an existing reorder commit. All commits use a fixed date so
//! expected results can be compared by identity.

mod common;

use chrono::{DateTime, Utc};
use common::temp_db;
use replicache_core::{
    rebase, Checksum, ChunkId, Commit, CommitType, Database, Error, Map, LOCAL_DATASET,
};
use serde_json::json;

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).unwrap()
}

/// The map `{"foo": arg}` persisted to the database's store.
async fn result_data(db: &Database, arg: &str) -> (ChunkId, Checksum) {
    let mut ed = Map::new().edit();
    ed.set("foo".into(), json!(arg));
    let m = ed.build();
    let data = db.store().put(m.to_chunk()).await.unwrap();
    (data, *m.checksum())
}

/// A putValue Tx commit setting `foo` to `arg` on `basis`.
async fn tx(db: &Database, basis: &Commit, arg: &str) -> Commit {
    let (data, checksum) = result_data(db, arg).await;
    let c = Commit::tx(
        *basis.id(),
        epoch(),
        ".putValue",
        vec![json!("foo"), json!(arg)],
        data,
        checksum,
        basis.last_mutation_id() + 1,
    );
    c.persist(db.store().as_ref()).await.unwrap();
    c
}

/// A Reorder commit replaying `subject` on `basis`, with `arg` as the
/// replayed result.
async fn ro(db: &Database, basis: &Commit, subject: &Commit, arg: &str) -> Commit {
    let (data, checksum) = result_data(db, arg).await;
    let c = Commit::reorder(
        *basis.id(),
        *subject.id(),
        epoch(),
        data,
        checksum,
        subject.last_mutation_id(),
    );
    c.persist(db.store().as_ref()).await.unwrap();
    c
}

#[tokio::test]
async fn test_dest_fast_forward() {
    // onto: g
    // head: g - a
    // rslt: g - a
    let db = temp_db().await;
    let g = db.head().await;
    let a = tx(&db, &g, "a").await;
    let actual = rebase(&db, &g, epoch(), &a, None).await.unwrap();
    assert_eq!(actual, a);
}

#[tokio::test]
async fn test_dest_fast_forward_with_local_branch() {
    // Same, except the local dataset head already points above onto.
    let db = temp_db().await;
    let g = db.head().await;
    let a = tx(&db, &g, "a").await;
    db.store()
        .set_head(LOCAL_DATASET, *a.id())
        .await
        .unwrap();
    db.reload().await.unwrap();
    let actual = rebase(&db, &g, epoch(), &a, None).await.unwrap();
    assert_eq!(actual, a);
}

#[tokio::test]
async fn test_source_fast_forward() {
    // onto: g - a
    // head: g
    // rslt: g - a
    let db = temp_db().await;
    let g = db.head().await;
    let a = tx(&db, &g, "a").await;
    let actual = rebase(&db, &a, epoch(), &g, None).await.unwrap();
    assert_eq!(actual, a);
}

#[tokio::test]
async fn test_simple_reorder() {
    // onto: g - a
    // head: g - b
    // rslt: g - a - ro(b)
    //         \ b /
    let db = temp_db().await;
    let g = db.head().await;
    let a = tx(&db, &g, "a").await;
    let b = tx(&db, &g, "b").await;
    let expected = ro(&db, &a, &b, "b").await;
    let actual = rebase(&db, &a, epoch(), &b, None).await.unwrap();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_chained_reorder() {
    // onto: g - a
    // head: g - b - c
    // rslt: g - a - ro(b) - ro(c)
    let db = temp_db().await;
    let g = db.head().await;
    let a = tx(&db, &g, "a").await;
    let b = tx(&db, &g, "b").await;
    let c = tx(&db, &b, "c").await;
    let rob = ro(&db, &a, &b, "b").await;
    let roc = ro(&db, &rob, &c, "c").await;
    let actual = rebase(&db, &a, epoch(), &c, None).await.unwrap();
    assert_eq!(actual, roc);
}

#[tokio::test]
async fn test_re_reorder() {
    // onto: g - a - b
    // head: g - a - ro(c)
    //         \ c /
    // rslt: g - a -  b  - ro(ro(c))
    let db = temp_db().await;
    let g = db.head().await;
    let a = tx(&db, &g, "a").await;
    let b = tx(&db, &a, "b").await;
    let c = tx(&db, &g, "c").await;
    let roc = ro(&db, &a, &c, "c").await;
    let expected = ro(&db, &b, &roc, "c").await;
    let actual = rebase(&db, &b, epoch(), &roc, None).await.unwrap();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_no_common_ancestor_is_fatal() {
    let db = temp_db().await;
    let head = db.head().await;

    let map = Map::new();
    let data = db.store().put(map.to_chunk()).await.unwrap();
    let stray = Commit::genesis("elsewhere", data, *map.checksum(), 0);
    stray.persist(db.store().as_ref()).await.unwrap();

    let err = rebase(&db, &stray, epoch(), &head, None).await.unwrap_err();
    assert!(matches!(err, Error::NoCommonAncestor(_, _)));
}

#[tokio::test]
async fn test_rebase_preserves_pending_transactions() {
    // A linear chain of putValue commits replayed onto a new server
    // genesis keeps its length, names, and args, and the final map equals
    // applying the chain to the new base.
    let db = temp_db().await;
    let g = db.head().await;
    db.put("a", br#""1""#).await.unwrap();
    db.put("b", br#""2""#).await.unwrap();
    let head = db.head().await;

    let mut ed = Map::new().edit();
    ed.set("server".into(), json!("s"));
    let server_map = ed.build();
    let data = db.store().put(server_map.to_chunk()).await.unwrap();
    let new_genesis = Commit::genesis("state-2", data, *server_map.checksum(), 0);
    new_genesis.persist(db.store().as_ref()).await.unwrap();

    let rebased = rebase(&db, &new_genesis, epoch(), &head, Some(*g.id()))
        .await
        .unwrap();

    // Shape: new_genesis <- ro(a) <- ro(b), counters copied through.
    assert_eq!(rebased.commit_type(), CommitType::Reorder);
    assert_eq!(rebased.last_mutation_id(), 2);
    let second = rebased.initial(db.store().as_ref()).await.unwrap();
    assert_eq!(second, head);
    let parent = rebased.basis(db.store().as_ref()).await.unwrap();
    assert_eq!(parent.commit_type(), CommitType::Reorder);
    assert_eq!(parent.last_mutation_id(), 1);
    let first = parent.initial(db.store().as_ref()).await.unwrap();
    assert_eq!(first.tx_meta().unwrap().0, ".putValue");
    assert_eq!(
        parent.basis(db.store().as_ref()).await.unwrap(),
        new_genesis
    );

    // Replayed state: server data plus both pending writes.
    let map = rebased.map(db.store().as_ref()).await.unwrap();
    assert_eq!(map.get("server"), Some(&json!("s")));
    assert_eq!(map.get("a"), Some(&json!("1")));
    assert_eq!(map.get("b"), Some(&json!("2")));
    assert_eq!(map.checksum(), rebased.checksum());
}
