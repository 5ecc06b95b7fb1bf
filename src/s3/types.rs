//! S3 types and response structures

use serde::{Deserialize, Serialize};

/// S3 Object metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Object {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp (optional)
    pub last_modified: Option<String>,
    /// ETag (optional)
    pub etag: Option<String>,
}

impl S3Object {
    pub fn new(key: String, size: u64) -> Self {
        Self {
            key,
            size,
            last_modified: None,
            etag: None,
        }
    }
}

/// One page of a ListObjectsV2 listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListObjectsResponse {
    pub contents: Vec<S3Object>,
    /// Whether more pages remain
    pub is_truncated: bool,
    /// Continuation token for the next page
    pub next_continuation_token: Option<String>,
    pub key_count: Option<i32>,
}

impl ListObjectsResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.contents.iter().map(|obj| obj.key.clone()).collect()
    }
}

/// Response from DeleteObjects batch operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteObjectsResponse {
    /// Successfully deleted objects
    pub deleted: Vec<DeletedObject>,
    /// Per-key failures
    pub errors: Vec<DeleteError>,
}

impl DeleteObjectsResponse {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Deleted object information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedObject {
    pub key: String,
    pub version_id: Option<String>,
}

impl DeletedObject {
    pub fn new(key: String) -> Self {
        Self {
            key,
            version_id: None,
        }
    }
}

/// Delete error information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteError {
    pub key: String,
    pub code: String,
    pub message: String,
}
