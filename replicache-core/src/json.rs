//! Canonical JSON encoding.
//!
//! Every value stored in a map, and every serialized commit record, is
//! canonical JSON: object keys sorted lexicographically, numbers in
//! serde_json's single normal decimal form, no insignificant whitespace.
//! Canonicalization is total over valid JSON text and idempotent.

use serde_json::Value;

use crate::error::Error;

/// Parse raw JSON text into a value, failing with `MalformedJson` on
/// anything that is not a single valid JSON document.
pub fn canonicalize(raw: &[u8]) -> Result<Value, Error> {
    serde_json::from_slice(raw).map_err(|e| Error::MalformedJson(e.to_string()))
}

/// Render a value in canonical form.
pub fn to_canonical_string(v: &Value) -> String {
    let mut out = String::new();
    write_canonical(v, &mut out);
    out
}

/// Write a value in canonical form. Object keys are emitted in sorted
/// order regardless of how the `Value` was built, so the output does not
/// depend on serde_json feature flags.
pub fn write_canonical(v: &Value, out: &mut String) {
    match v {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(k, out);
                out.push(':');
                write_canonical(&fields[k], out);
            }
            out.push('}');
        }
    }
}

/// Write a JSON string literal, escaping per RFC 8259.
pub fn write_escaped(s: &str, out: &mut String) {
    use std::fmt::Write;
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
