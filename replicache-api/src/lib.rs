//! Replicache API library
//!
//! The high-level API exposed to language hosts. Since there are many
//! hosts in many languages, this surface is host-independent: operations
//! are named, requests and responses are raw JSON bytes, and further
//! adaptation (FFI bridges, HTTP listeners) lives outside this crate.

pub mod dispatch;
pub mod handle_sync;
pub mod types;

pub use dispatch::Dispatcher;
