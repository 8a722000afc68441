//! Checksummed ordered map.
//!
//! The unit of application-visible state: an ordered string→JSON mapping
//! with an additive checksum that is maintained incrementally across
//! edits. Maps are logically immutable; `edit` returns a builder whose
//! `build` produces a new map. A map's chunk form is one canonical JSON
//! object.

use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::checksum::Checksum;
use crate::error::Error;
use crate::json;

/// Ordered string→JSON map with an incremental checksum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Map {
    entries: BTreeMap<String, Value>,
    checksum: Checksum,
}

impl Map {
    /// The empty map, with the canonical empty checksum.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a full entry set, computing the checksum from scratch.
    pub fn from_entries(entries: BTreeMap<String, Value>) -> Self {
        let checksum = Checksum::compute(entries.iter());
        Self { entries, checksum }
    }

    /// Rehydrate from a stored chunk. The checksum is taken from the
    /// wrapping commit rather than recomputed.
    pub fn from_chunk(data: &[u8], checksum: Checksum) -> Result<Self, Error> {
        let value = json::canonicalize(data)?;
        let fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(Error::MalformedJson(format!(
                    "map chunk must be a JSON object, got {other}"
                )))
            }
        };
        let entries = fields.into_iter().collect();
        Ok(Self { entries, checksum })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate entries in lexicographic key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Begin a batch of edits.
    pub fn edit(&self) -> MapEditor {
        MapEditor {
            entries: self.entries.clone(),
            checksum: self.checksum,
        }
    }

    /// Serialize to the canonical chunk form.
    pub fn to_chunk(&self) -> Bytes {
        let mut out = String::from("{");
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            json::write_escaped(k, &mut out);
            out.push(':');
            json::write_canonical(v, &mut out);
        }
        out.push('}');
        Bytes::from(out)
    }
}

/// Mutable builder over a map. Edits are batched; the checksum tracks
/// every set and remove so `build` is O(1).
#[derive(Debug)]
pub struct MapEditor {
    entries: BTreeMap<String, Value>,
    checksum: Checksum,
}

impl MapEditor {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Set a key, replacing any prior value.
    pub fn set(&mut self, key: String, value: Value) {
        if let Some(old) = self.entries.get(&key) {
            self.checksum.remove(&key, old);
        }
        self.checksum.add(&key, &value);
        self.entries.insert(key, value);
    }

    /// Remove a key; reports whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(old) => {
                self.checksum.remove(key, &old);
                true
            }
            None => false,
        }
    }

    /// Finish the batch.
    pub fn build(self) -> Map {
        Map {
            entries: self.entries,
            checksum: self.checksum,
        }
    }
}
