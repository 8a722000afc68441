//! Ordered key scans.
//!
//! Scan options mirror the wire schema: an optional prefix filter, an
//! optional start bound (by key value, exclusive or not, and/or by ordinal
//! index among prefix matches), and an optional limit. Missing fields mean
//! no bound.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options accepted by `scan`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScanOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<ScanBound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScanBound {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ScanId>,
    /// Ordinal position among keys matching the prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScanId {
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclusive: bool,
}

/// One scanned entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanItem {
    pub id: String,
    pub value: Value,
}

/// Scan an ordered entry sequence: start at the first key ≥ the id bound
/// (strictly greater if exclusive), filter by prefix, skip to the start
/// index, then truncate to the limit.
pub fn scan<'a>(
    entries: impl Iterator<Item = (&'a String, &'a Value)>,
    opts: &ScanOptions,
) -> Vec<ScanItem> {
    let limit = opts.limit.unwrap_or(u64::MAX);
    let start_id = opts.start.as_ref().and_then(|s| s.id.as_ref());
    let mut skip = opts.start.as_ref().and_then(|s| s.index).unwrap_or(0);

    let mut out = Vec::new();
    for (key, value) in entries {
        if let Some(bound) = start_id {
            let past = if bound.exclusive {
                key.as_str() > bound.value.as_str()
            } else {
                key.as_str() >= bound.value.as_str()
            };
            if !past {
                continue;
            }
        }
        if let Some(prefix) = &opts.prefix {
            if !key.starts_with(prefix.as_str()) {
                continue;
            }
        }
        if skip > 0 {
            skip -= 1;
            continue;
        }
        if out.len() as u64 >= limit {
            break;
        }
        out.push(ScanItem {
            id: key.clone(),
            value: value.clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn entries() -> BTreeMap<String, Value> {
        ["a", "ab", "abc", "b", "ba"]
            .into_iter()
            .map(|k| (k.to_string(), json!(k)))
            .collect()
    }

    fn keys(items: &[ScanItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_unbounded_is_ordered() {
        let e = entries();
        let items = scan(e.iter(), &ScanOptions::default());
        assert_eq!(keys(&items), ["a", "ab", "abc", "b", "ba"]);
    }

    #[test]
    fn test_prefix() {
        let e = entries();
        let items = scan(
            e.iter(),
            &ScanOptions {
                prefix: Some("ab".into()),
                ..Default::default()
            },
        );
        assert_eq!(keys(&items), ["ab", "abc"]);
    }

    #[test]
    fn test_start_id_inclusive_and_exclusive() {
        let e = entries();
        let bound = |exclusive| ScanOptions {
            start: Some(ScanBound {
                id: Some(ScanId {
                    value: "ab".into(),
                    exclusive,
                }),
                index: None,
            }),
            ..Default::default()
        };
        assert_eq!(keys(&scan(e.iter(), &bound(false))), ["ab", "abc", "b", "ba"]);
        assert_eq!(keys(&scan(e.iter(), &bound(true))), ["abc", "b", "ba"]);
    }

    #[test]
    fn test_start_index_among_prefix_matches() {
        let e = entries();
        let items = scan(
            e.iter(),
            &ScanOptions {
                prefix: Some("a".into()),
                start: Some(ScanBound {
                    id: None,
                    index: Some(1),
                }),
                limit: None,
            },
        );
        assert_eq!(keys(&items), ["ab", "abc"]);
    }

    #[test]
    fn test_limit() {
        let e = entries();
        let items = scan(
            e.iter(),
            &ScanOptions {
                limit: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(keys(&items), ["a", "ab"]);
        assert!(scan(e.iter(), &ScanOptions { limit: Some(0), ..Default::default() }).is_empty());
    }

    #[test]
    fn test_options_wire_shape() {
        let opts: ScanOptions = serde_json::from_str(
            r#"{"prefix":"p","start":{"id":{"value":"k","exclusive":true},"index":2},"limit":10}"#,
        )
        .unwrap();
        assert_eq!(opts.prefix.as_deref(), Some("p"));
        let start = opts.start.unwrap();
        assert_eq!(start.index, Some(2));
        let id = start.id.unwrap();
        assert_eq!(id.value, "k");
        assert!(id.exclusive);

        let empty: ScanOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, ScanOptions::default());
    }
}
