//! Commit model.
//!
//! Every application-visible state is an immutable, content-addressed
//! commit referencing a checksummed map. Three variants form the history
//! DAG: Genesis marks the boundary of a pull, Tx records a named
//! transaction and its arguments, and Reorder records that an existing
//! commit's effect was replayed on a new basis. The canonical JSON
//! serialization is a compatibility boundary; a commit's identity is the
//! hash of those bytes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checksum::Checksum;
use crate::error::Error;
use crate::hash::ChunkId;
use crate::json;
use crate::kv::Map;
use crate::store::{ChunkStore, StoreError};

/// Commit variant discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitType {
    Genesis,
    Tx,
    Reorder,
}

/// Type-tagged meta payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Meta {
    Genesis {
        /// Opaque server state identifier; empty for the initial local
        /// genesis.
        #[serde(rename = "serverStateID")]
        server_state_id: String,
    },
    Tx {
        date: DateTime<Utc>,
        /// Transaction function name. Names beginning with "." are the
        /// internal putValue/delValue transactions.
        name: String,
        args: Vec<Value>,
    },
    Reorder {
        date: DateTime<Utc>,
        /// The original commit whose effect this commit replays.
        subject: ChunkId,
    },
}

/// The value half of a commit: a reference to the post-commit map plus
/// cheap-to-compare copies of its checksum and mutation counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitValue {
    pub data: ChunkId,
    pub checksum: Checksum,
    #[serde(rename = "lastMutationID")]
    pub last_mutation_id: u64,
}

/// The serialized commit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRecord {
    pub meta: Meta,
    pub parents: Vec<ChunkId>,
    pub value: CommitValue,
}

/// An immutable history node together with its canonical bytes and id.
#[derive(Debug, Clone)]
pub struct Commit {
    record: CommitRecord,
    original: Bytes,
    id: ChunkId,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Commit {
    fn from_record(record: CommitRecord) -> Self {
        let value =
            serde_json::to_value(&record).expect("commit record is always serializable");
        let original = Bytes::from(json::to_canonical_string(&value));
        let id = ChunkId::of(&original);
        Self {
            record,
            original,
            id,
        }
    }

    /// A Genesis commit: no parents, mutation counter reset.
    pub fn genesis(
        server_state_id: &str,
        data: ChunkId,
        checksum: Checksum,
        last_mutation_id: u64,
    ) -> Self {
        Self::from_record(CommitRecord {
            meta: Meta::Genesis {
                server_state_id: server_state_id.to_string(),
            },
            parents: vec![],
            value: CommitValue {
                data,
                checksum,
                last_mutation_id,
            },
        })
    }

    /// A Tx commit recording one transaction applied to `basis`.
    pub fn tx(
        basis: ChunkId,
        date: DateTime<Utc>,
        name: &str,
        args: Vec<Value>,
        data: ChunkId,
        checksum: Checksum,
        last_mutation_id: u64,
    ) -> Self {
        Self::from_record(CommitRecord {
            meta: Meta::Tx {
                date,
                name: name.to_string(),
                args,
            },
            parents: vec![basis],
            value: CommitValue {
                data,
                checksum,
                last_mutation_id,
            },
        })
    }

    /// A Reorder commit recording `subject` replayed on `basis`.
    pub fn reorder(
        basis: ChunkId,
        subject: ChunkId,
        date: DateTime<Utc>,
        data: ChunkId,
        checksum: Checksum,
        last_mutation_id: u64,
    ) -> Self {
        Self::from_record(CommitRecord {
            meta: Meta::Reorder { date, subject },
            parents: vec![basis, subject],
            value: CommitValue {
                data,
                checksum,
                last_mutation_id,
            },
        })
    }

    /// Parse a stored chunk. The id is the hash of the stored bytes.
    pub fn from_chunk(data: Bytes) -> Result<Self, Error> {
        let record: CommitRecord = serde_json::from_slice(&data).map_err(|e| {
            Error::Store(StoreError::Corrupt(format!(
                "chunk is not a commit record: {e}"
            )))
        })?;
        let id = ChunkId::of(&data);
        Ok(Self {
            record,
            original: data,
            id,
        })
    }

    /// Load and parse the commit at `id`.
    pub async fn load(store: &dyn ChunkStore, id: &ChunkId) -> Result<Self, Error> {
        let data = store.get(id).await?;
        Self::from_chunk(data)
    }

    /// Write the canonical bytes; returns the id.
    pub async fn persist(&self, store: &dyn ChunkStore) -> Result<ChunkId, Error> {
        Ok(store.put(self.original.clone()).await?)
    }

    pub fn id(&self) -> &ChunkId {
        &self.id
    }

    /// The canonical serialized form whose hash is the commit's identity.
    pub fn original(&self) -> &Bytes {
        &self.original
    }

    pub fn record(&self) -> &CommitRecord {
        &self.record
    }

    pub fn commit_type(&self) -> CommitType {
        match self.record.meta {
            Meta::Genesis { .. } => CommitType::Genesis,
            Meta::Tx { .. } => CommitType::Tx,
            Meta::Reorder { .. } => CommitType::Reorder,
        }
    }

    pub fn data(&self) -> &ChunkId {
        &self.record.value.data
    }

    pub fn checksum(&self) -> &Checksum {
        &self.record.value.checksum
    }

    pub fn last_mutation_id(&self) -> u64 {
        self.record.value.last_mutation_id
    }

    /// The server state id, for Genesis commits.
    pub fn server_state_id(&self) -> Option<&str> {
        match &self.record.meta {
            Meta::Genesis { server_state_id } => Some(server_state_id),
            _ => None,
        }
    }

    /// The transaction name and args, for Tx commits.
    pub fn tx_meta(&self) -> Option<(&str, &[Value])> {
        match &self.record.meta {
            Meta::Tx { name, args, .. } => Some((name, args)),
            _ => None,
        }
    }

    /// The replayed commit, for Reorder commits.
    pub fn subject(&self) -> Option<&ChunkId> {
        match &self.record.meta {
            Meta::Reorder { subject, .. } => Some(subject),
            _ => None,
        }
    }

    /// The commit this one was applied against: the first parent. Genesis
    /// commits have no basis.
    pub fn basis_ref(&self) -> Result<&ChunkId, Error> {
        match self.commit_type() {
            CommitType::Genesis => Err(Error::Store(StoreError::Corrupt(
                "genesis commit has no basis".into(),
            ))),
            _ => Ok(&self.record.parents[0]),
        }
    }

    pub async fn basis(&self, store: &dyn ChunkStore) -> Result<Commit, Error> {
        Self::load(store, self.basis_ref()?).await
    }

    /// Walk through Reorder chains to the underlying original commit.
    /// Returns self for Tx and Genesis commits.
    pub async fn initial(&self, store: &dyn ChunkStore) -> Result<Commit, Error> {
        let mut current = self.clone();
        while let Some(subject) = current.subject().copied() {
            current = Self::load(store, &subject).await?;
        }
        Ok(current)
    }

    /// Walk basis links back to the nearest Genesis commit.
    pub async fn nearest_genesis(&self, store: &dyn ChunkStore) -> Result<Commit, Error> {
        let mut current = self.clone();
        while current.commit_type() != CommitType::Genesis {
            current = current.basis(store).await?;
        }
        Ok(current)
    }

    /// Load the referenced map.
    pub async fn map(&self, store: &dyn ChunkStore) -> Result<Map, Error> {
        let data = store.get(self.data()).await?;
        Map::from_chunk(&data, self.record.value.checksum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(0, 0).unwrap()
    }

    #[test]
    fn test_serialization_roundtrip() {
        let g = Commit::genesis("state-1", ChunkId::of(b"{}"), Checksum::EMPTY, 0);
        let parsed = Commit::from_chunk(g.original().clone()).unwrap();
        assert_eq!(parsed, g);
        assert_eq!(parsed.record(), g.record());
        assert_eq!(parsed.server_state_id(), Some("state-1"));
    }

    #[test]
    fn test_identical_commits_share_identity() {
        let data = ChunkId::of(b"{}");
        let a = Commit::tx(
            ChunkId::zero(),
            epoch(),
            ".putValue",
            vec![serde_json::json!("k"), serde_json::json!("v")],
            data,
            Checksum::EMPTY,
            1,
        );
        let b = Commit::tx(
            ChunkId::zero(),
            epoch(),
            ".putValue",
            vec![serde_json::json!("k"), serde_json::json!("v")],
            data,
            Checksum::EMPTY,
            1,
        );
        assert_eq!(a, b);
        assert_eq!(a.original(), b.original());
    }

    #[test]
    fn test_parent_arity() {
        let data = ChunkId::of(b"{}");
        let g = Commit::genesis("", data, Checksum::EMPTY, 0);
        assert!(g.record().parents.is_empty());
        assert!(g.basis_ref().is_err());

        let t = Commit::tx(*g.id(), epoch(), "fn", vec![], data, Checksum::EMPTY, 1);
        assert_eq!(t.record().parents, vec![*g.id()]);
        assert_eq!(t.basis_ref().unwrap(), g.id());

        let r = Commit::reorder(*g.id(), *t.id(), epoch(), data, Checksum::EMPTY, 1);
        assert_eq!(r.record().parents, vec![*g.id(), *t.id()]);
        assert_eq!(r.subject(), Some(t.id()));
    }

    #[tokio::test]
    async fn test_initial_unwraps_reorder_chain() {
        let store = Arc::new(MemoryStore::new());
        let data = ChunkId::of(b"{}");
        let g = Commit::genesis("", data, Checksum::EMPTY, 0);
        g.persist(store.as_ref()).await.unwrap();
        let t = Commit::tx(
            *g.id(),
            epoch(),
            "fn",
            vec![],
            data,
            Checksum::EMPTY,
            1,
        );
        t.persist(store.as_ref()).await.unwrap();
        let r1 = Commit::reorder(*g.id(), *t.id(), epoch(), data, Checksum::EMPTY, 1);
        r1.persist(store.as_ref()).await.unwrap();
        let r2 = Commit::reorder(*g.id(), *r1.id(), epoch(), data, Checksum::EMPTY, 1);
        r2.persist(store.as_ref()).await.unwrap();

        assert_eq!(r2.initial(store.as_ref()).await.unwrap(), t);
        assert_eq!(t.initial(store.as_ref()).await.unwrap(), t);
        assert_eq!(g.initial(store.as_ref()).await.unwrap(), g);
    }

    #[tokio::test]
    async fn test_nearest_genesis() {
        let store = Arc::new(MemoryStore::new());
        let data = ChunkId::of(b"{}");
        let g = Commit::genesis("sid", data, Checksum::EMPTY, 0);
        g.persist(store.as_ref()).await.unwrap();
        let a = Commit::tx(*g.id(), epoch(), "a", vec![], data, Checksum::EMPTY, 1);
        a.persist(store.as_ref()).await.unwrap();
        let b = Commit::tx(*a.id(), epoch(), "b", vec![], data, Checksum::EMPTY, 2);
        b.persist(store.as_ref()).await.unwrap();

        assert_eq!(b.nearest_genesis(store.as_ref()).await.unwrap(), g);
        assert_eq!(g.nearest_genesis(store.as_ref()).await.unwrap(), g);
    }
}
