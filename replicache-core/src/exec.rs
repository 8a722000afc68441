//! Transaction execution surface.
//!
//! User-defined transactions run inside an embedded interpreter that this
//! crate does not provide. The seam is the `Sandbox` capability: the
//! database hands it the current bundle, the function name and args, and a
//! read/write view over the pending map state, and gets back the optional
//! return value. The view records whether any mutating call happened; a
//! read-only transaction produces no commit.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::kv::MapEditor;
use crate::scan::{self, ScanItem, ScanOptions};

/// Outcome of `Database::exec`.
///
/// The wire format only carries the result and the (possibly unchanged)
/// root, so the distinction between "read-only" and "wrote but returned
/// nothing" lives here.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub result: Option<Value>,
    /// Whether a Tx commit was appended.
    pub committed: bool,
}

/// Read/write view over the state a transaction is being applied to.
pub struct TxView {
    editor: MapEditor,
    wrote: bool,
}

impl TxView {
    pub(crate) fn new(editor: MapEditor) -> Self {
        Self {
            editor,
            wrote: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.editor.get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.editor.has(key)
    }

    pub fn scan(&self, opts: &ScanOptions) -> Vec<ScanItem> {
        scan::scan(self.editor.iter(), opts)
    }

    pub fn put(&mut self, key: String, value: Value) {
        self.wrote = true;
        self.editor.set(key, value);
    }

    pub fn del(&mut self, key: &str) -> bool {
        self.wrote = true;
        self.editor.remove(key)
    }

    pub(crate) fn into_parts(self) -> (MapEditor, bool) {
        (self.editor, self.wrote)
    }
}

/// Capability interface over the embedded interpreter.
///
/// `evaluate` runs the named function from `bundle` against `view`.
/// Implementations surface `UnknownFunction` for names the bundle does not
/// define and `Interpreter` for evaluation failures, including bundle code
/// that fails to parse (bundle validation is lazy).
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn evaluate(
        &self,
        bundle: &[u8],
        name: &str,
        args: &[Value],
        view: &mut TxView,
    ) -> Result<Option<Value>>;
}

/// Sandbox for hosts that never call user-defined transactions. Every
/// evaluation fails; the internal putValue/delValue transactions do not
/// route through it.
pub struct NoSandbox;

#[async_trait]
impl Sandbox for NoSandbox {
    async fn evaluate(
        &self,
        _bundle: &[u8],
        _name: &str,
        _args: &[Value],
        _view: &mut TxView,
    ) -> Result<Option<Value>> {
        Err(Error::Interpreter("no interpreter configured".into()))
    }
}
