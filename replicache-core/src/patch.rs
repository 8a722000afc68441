//! JSON-Patch subset used by the pull protocol.
//!
//! The client accepts `add` and `remove` operations at `/u/<key>` paths,
//! plus a leading `{op:"remove", path:"/"}` meaning "clear everything".
//! Anything else is rejected eagerly so a partial application is never
//! committed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::kv::Map;

pub const OP_ADD: &str = "add";
pub const OP_REMOVE: &str = "remove";

/// One patch operation as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: OP_ADD.into(),
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: OP_REMOVE.into(),
            path: path.into(),
            value: None,
        }
    }

    fn is_clear_all(&self) -> bool {
        self.op == OP_REMOVE && self.path == "/"
    }
}

/// Apply a patch to `base`. A leading clear-all op switches the starting
/// point to the empty map; every other op must address a `/u/<key>` path.
pub fn apply(base: &Map, ops: &[PatchOp]) -> Result<Map, Error> {
    let (mut editor, rest) = match ops.first() {
        Some(op) if op.is_clear_all() => (Map::new().edit(), &ops[1..]),
        _ => (base.edit(), ops),
    };

    for op in rest {
        let key = user_key(op)?;
        match op.op.as_str() {
            OP_ADD => {
                let value = op.value.clone().ok_or_else(|| {
                    Error::InvalidPatch(format!("missing value for add at {}", op.path))
                })?;
                editor.set(key, value);
            }
            OP_REMOVE => {
                // Removing an absent key is tolerated.
                editor.remove(&key);
            }
            other => {
                return Err(Error::InvalidPatch(format!(
                    "unsupported JSON Patch operation: {other} with path: {}",
                    op.path
                )))
            }
        }
    }

    Ok(editor.build())
}

/// Escape a user key for use in a patch path.
pub fn escape_key(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Extract the user key from a `/u/<key>` path, rejecting everything else
/// (including a clear-all anywhere but the first position).
fn user_key(op: &PatchOp) -> Result<String, Error> {
    let rest = op.path.strip_prefix("/u/").ok_or_else(|| {
        Error::InvalidPatch(format!(
            "unsupported JSON Patch operation: {} with path: {}",
            op.op, op.path
        ))
    })?;
    if rest.contains('/') {
        return Err(Error::InvalidPatch(format!(
            "unsupported JSON Patch operation: {} with path: {}",
            op.op, op.path
        )));
    }
    // Undo JSON-pointer escapes.
    Ok(rest.replace("~1", "/").replace("~0", "~"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Map {
        let mut ed = Map::new().edit();
        ed.set("foo".into(), json!("bar"));
        ed.build()
    }

    #[test]
    fn test_add_and_remove() {
        let out = apply(
            &base(),
            &[
                PatchOp::add("/u/baz", json!(42)),
                PatchOp::remove("/u/foo"),
            ],
        )
        .unwrap();
        assert_eq!(out.get("baz"), Some(&json!(42)));
        assert!(!out.has("foo"));
    }

    #[test]
    fn test_clear_all_then_add() {
        let out = apply(
            &base(),
            &[
                PatchOp::remove("/"),
                PatchOp::add("/u/foo", json!("baz")),
            ],
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.get("foo"), Some(&json!("baz")));
    }

    #[test]
    fn test_late_clear_all_rejected() {
        let err = apply(
            &base(),
            &[PatchOp::add("/u/foo", json!("baz")), PatchOp::remove("/")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidPatch(_)));
    }

    #[test]
    fn test_unsupported_op_and_path() {
        for ops in [
            vec![PatchOp {
                op: "replace".into(),
                path: "/u/foo".into(),
                value: Some(json!(1)),
            }],
            vec![PatchOp::add("/s/code", json!("x"))],
            vec![PatchOp::add("/u/a/b", json!(1))],
            vec![PatchOp {
                op: OP_ADD.into(),
                path: "/u/foo".into(),
                value: None,
            }],
        ] {
            assert!(
                matches!(apply(&base(), &ops), Err(Error::InvalidPatch(_))),
                "ops should be rejected: {ops:?}"
            );
        }
    }

    #[test]
    fn test_pointer_escapes() {
        let out = apply(
            &Map::new(),
            &[PatchOp::add(format!("/u/{}", escape_key("a/b~c")), json!(1))],
        )
        .unwrap();
        assert!(out.has("a/b~c"));
    }

    #[test]
    fn test_remove_absent_key_tolerated() {
        let out = apply(&base(), &[PatchOp::remove("/u/never")]).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_empty_patch_keeps_base() {
        let b = base();
        let out = apply(&b, &[]).unwrap();
        assert_eq!(out, b);
        assert_eq!(out.checksum(), b.checksum());
    }
}
