//! S3 object storage boundary
//!
//! This module provides:
//! - The [`ObjectStore`] trait the mirror engine drives (list, bulk delete, put)
//! - An S3 REST implementation signed with AWS SigV4
//! - Type-safe S3 response structures

pub mod client;
pub mod types;

pub use client::{Result, S3Client, S3Error};
pub use types::{DeleteError, DeleteObjectsResponse, DeletedObject, ListObjectsResponse, S3Object};

use async_trait::async_trait;
use bytes::Bytes;

/// Upper bound on keys per listing page and per bulk delete
pub const MAX_KEYS_PER_REQUEST: usize = 1000;

/// Already-authenticated object storage operations for one bucket
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Target bucket name
    fn bucket(&self) -> &str;

    /// List one page of keys, starting after `continuation_token`
    async fn list_page(&self, continuation_token: Option<&str>) -> Result<ListObjectsResponse>;

    /// Delete up to [`MAX_KEYS_PER_REQUEST`] keys in one call
    async fn delete_objects(&self, keys: &[String]) -> Result<DeleteObjectsResponse>;

    /// Store `body` under `key` with the given Content-Type
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;
}
