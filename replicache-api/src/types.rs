//! Wire request/response types.
//!
//! Each RPC operation takes one JSON object and returns one JSON object
//! (scan returns an array). Field names are the wire contract.

use replicache_core::{PatchOp, ScanOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GetRootRequest {}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetRootResponse {
    pub root: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HasRequest {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HasResponse {
    pub has: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetRequest {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    pub has: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// The scan request body is the options object itself.
pub type ScanRequest = ScanOptions;

#[derive(Debug, Serialize, Deserialize)]
pub struct PutRequest {
    pub id: String,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutResponse {
    pub root: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DelRequest {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DelResponse {
    pub ok: bool,
    pub root: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GetBundleRequest {}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetBundleResponse {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutBundleRequest {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutBundleResponse {
    pub root: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecRequest {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub root: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncRequest {
    pub remote: String,
    #[serde(default)]
    pub auth: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponseError {
    #[serde(rename = "badAuth")]
    pub bad_auth: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SyncResponseError>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SyncProgressRequest {}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncProgressResponse {
    #[serde(rename = "bytesReceived")]
    pub bytes_received: u64,
    #[serde(rename = "bytesExpected")]
    pub bytes_expected: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandleSyncRequest {
    #[serde(default)]
    pub basis: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandleSyncResponse {
    #[serde(rename = "commitID")]
    pub commit_id: String,
    pub patch: Vec<PatchOp>,
    #[serde(rename = "nomsChecksum")]
    pub noms_checksum: String,
}
