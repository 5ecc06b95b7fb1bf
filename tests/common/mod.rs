//! Test doubles shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use hyper::StatusCode;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use repomirror::codecommit::{CloneInfo, RepositoryResolver};
use repomirror::credentials::{AwsCredentials, CredentialCallback};
use repomirror::error::{MirrorError, Result};
use repomirror::git::Cloner;
use repomirror::s3::{
    DeleteError, DeleteObjectsResponse, DeletedObject, ListObjectsResponse, ObjectStore, S3Error,
    S3Object,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

/// In-memory bucket with configurable page size and failure injection
pub struct MemoryStore {
    bucket: String,
    page_size: usize,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    fail_list: AtomicBool,
    fail_delete: AtomicBool,
    rejected_deletes: Mutex<HashSet<String>>,
    failing_puts: Mutex<HashSet<String>>,
    put_delay: Mutex<Option<Duration>>,
    remove_on_put: Mutex<Option<(String, PathBuf)>>,
    pub list_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MemoryStore {
    pub fn new(bucket: &str) -> Self {
        Self::with_page_size(bucket, 1000)
    }

    pub fn with_page_size(bucket: &str, page_size: usize) -> Self {
        Self {
            bucket: bucket.to_string(),
            page_size,
            objects: Mutex::new(BTreeMap::new()),
            fail_list: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            rejected_deletes: Mutex::new(HashSet::new()),
            failing_puts: Mutex::new(HashSet::new()),
            put_delay: Mutex::new(None),
            remove_on_put: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn seed(&self, keys: impl IntoIterator<Item = String>) {
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.insert(
                key,
                StoredObject {
                    body: Bytes::from_static(b"old"),
                    content_type: "text/plain".to_string(),
                },
            );
        }
    }

    pub fn fail_list(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    /// The bulk delete succeeds but reports `key` as not deleted
    pub fn reject_delete_of(&self, key: &str) {
        self.rejected_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_put_of(&self, key: &str) {
        self.failing_puts.lock().unwrap().insert(key.to_string());
    }

    pub fn set_put_delay(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = Some(delay);
    }

    /// Delete `path` from disk when `key` is uploaded
    pub fn delete_file_on_put(&self, key: &str, path: &Path) {
        *self.remove_on_put.lock().unwrap() = Some((key.to_string(), path.to_path_buf()));
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

fn injected(message: &str) -> S3Error {
    S3Error::S3Response {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.to_string(),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(
        &self,
        continuation_token: Option<&str>,
    ) -> repomirror::s3::Result<ListObjectsResponse> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(injected("injected list failure"));
        }

        let objects = self.objects.lock().unwrap();
        let remaining: Vec<&String> = objects
            .keys()
            .filter(|key| continuation_token.map_or(true, |token| key.as_str() > token))
            .collect();

        let page: Vec<S3Object> = remaining
            .iter()
            .take(self.page_size)
            .map(|key| S3Object::new((*key).clone(), 3))
            .collect();
        let is_truncated = remaining.len() > self.page_size;

        Ok(ListObjectsResponse {
            next_continuation_token: if is_truncated {
                page.last().map(|obj| obj.key.clone())
            } else {
                None
            },
            key_count: Some(page.len() as i32),
            contents: page,
            is_truncated,
        })
    }

    async fn delete_objects(&self, keys: &[String]) -> repomirror::s3::Result<DeleteObjectsResponse> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(injected("injected delete failure"));
        }

        let rejected = self.rejected_deletes.lock().unwrap().clone();
        let mut objects = self.objects.lock().unwrap();
        let mut response = DeleteObjectsResponse::new();
        for key in keys {
            if rejected.contains(key) {
                response.errors.push(DeleteError {
                    key: key.clone(),
                    code: "AccessDenied".to_string(),
                    message: "Access Denied".to_string(),
                });
            } else {
                objects.remove(key);
                response.deleted.push(DeletedObject::new(key.clone()));
            }
        }
        Ok(response)
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> repomirror::s3::Result<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some((trigger, path)) = self.remove_on_put.lock().unwrap().as_ref() {
            if trigger == key {
                std::fs::remove_file(path).unwrap();
            }
        }

        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self.failing_puts.lock().unwrap().contains(key) {
            Err(injected("injected put failure"))
        } else {
            self.objects.lock().unwrap().insert(
                key.to_string(),
                StoredObject {
                    body,
                    content_type: content_type.to_string(),
                },
            );
            Ok(())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Resolves every repository to a fixed URL template
pub struct StubResolver {
    pub credentials: AwsCredentials,
    pub resolved: Mutex<Vec<String>>,
    pub fail: bool,
}

impl StubResolver {
    pub fn new() -> Self {
        Self {
            credentials: AwsCredentials::new("AKIDEXAMPLE", "secret", Some("session-token".to_string())),
            resolved: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl RepositoryResolver for StubResolver {
    async fn resolve(&self, repository: &str) -> Result<CloneInfo> {
        self.resolved.lock().unwrap().push(repository.to_string());
        if self.fail {
            return Err(MirrorError::RepositoryLookup {
                repository: repository.to_string(),
                message: "RepositoryDoesNotExistException".to_string(),
            });
        }
        Ok(CloneInfo {
            url: format!(
                "https://git-codecommit.us-east-1.amazonaws.com/v1/repos/{}",
                repository
            ),
            credentials: self.credentials.clone(),
        })
    }
}

/// Asks the callback for a credential the way the transport would, then
/// writes a fixed tree into the destination
pub struct StubCloner {
    callback: Arc<dyn CredentialCallback>,
    files: Vec<(String, Vec<u8>)>,
    pub challenges: Mutex<Vec<(String, String, String)>>,
    pub fail: bool,
}

impl StubCloner {
    pub fn new(callback: Arc<dyn CredentialCallback>, files: Vec<(&str, &[u8])>) -> Self {
        Self {
            callback,
            files: files
                .into_iter()
                .map(|(path, body)| (path.to_string(), body.to_vec()))
                .collect(),
            challenges: Mutex::new(Vec::new()),
            fail: false,
        }
    }
}

#[async_trait]
impl Cloner for StubCloner {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let credential = self.callback.credential_for(url)?;
        self.challenges.lock().unwrap().push((
            url.to_string(),
            credential.username.clone(),
            credential.password.clone(),
        ));

        if self.fail {
            return Err(MirrorError::CloneFailure {
                url: url.to_string(),
                message: "authentication failed".to_string(),
            });
        }

        assert!(!dest.exists(), "workspace must be purged before cloning");
        for (path, body) in &self.files {
            let target: PathBuf = dest.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(target, body).unwrap();
        }
        Ok(())
    }
}

pub const PNG: &[u8] = b"\x89PNG\x0D\x0A\x1A\x0A\x00\x00\x00\x0DIHDR";

/// Write `files` (relative path, contents) under `root`
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (path, body) in files {
        let target = root.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(target, body).unwrap();
    }
}
