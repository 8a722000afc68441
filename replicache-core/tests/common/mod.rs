//! Shared test helpers.

use async_trait::async_trait;
use replicache_core::{Database, Error, MemoryStore, Sandbox, TxView};
use serde_json::Value;
use std::sync::Arc;

/// Deterministic interpreter stand-in. The bundle is a JSON object
/// mapping function names to one of a few built-in bodies; anything the
/// bundle does not define is an unknown function, and a bundle that fails
/// to parse surfaces lazily as an interpreter error.
pub struct JsonSandbox;

#[async_trait]
impl Sandbox for JsonSandbox {
    async fn evaluate(
        &self,
        bundle: &[u8],
        name: &str,
        args: &[Value],
        view: &mut TxView,
    ) -> Result<Option<Value>, Error> {
        let functions: Value = serde_json::from_slice(bundle)
            .map_err(|e| Error::Interpreter(format!("bundle failed to parse: {e}")))?;
        let body = functions
            .get(name)
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))?;

        let key = |i: usize| -> Result<String, Error> {
            args.get(i)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(Error::MissingField("key"))
        };

        match body.as_str() {
            Some("set") => {
                let value = args.get(1).cloned().ok_or(Error::MissingField("value"))?;
                view.put(key(0)?, value);
                Ok(None)
            }
            Some("del") => Ok(Some(Value::Bool(view.del(&key(0)?)))),
            Some("read") => Ok(view.get(&key(0)?)),
            Some("count") => Ok(Some(Value::from(
                view.scan(&Default::default()).len() as u64
            ))),
            Some("fail") => Err(Error::Interpreter("deliberate failure".into())),
            Some("fail-after-write") => {
                view.put("junk".into(), Value::Null);
                Err(Error::Interpreter("failed after writing".into()))
            }
            _ => Err(Error::Interpreter(format!(
                "unsupported function body for {name}"
            ))),
        }
    }
}

/// A throwaway in-memory database with the test sandbox.
pub async fn temp_db() -> Database {
    Database::new(Arc::new(MemoryStore::new()), Arc::new(JsonSandbox))
        .await
        .expect("open temp database")
}
