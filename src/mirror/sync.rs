//! Tree-to-bucket sync
//!
//! Discovery walks the tree on a blocking thread and feeds a bounded channel;
//! the uploader drains it with at most `concurrency` uploads in flight. The
//! whole tree is never held in memory.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::sniff::{detect_content_type, SNIFF_LEN};
use crate::error::{MirrorError, Result};
use crate::s3::ObjectStore;

/// What to do once a file fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep going and report every failure at the end
    #[default]
    BestEffort,
    /// Stop taking new files after the first failure; in-flight uploads finish
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "best_effort" => Ok(FailurePolicy::BestEffort),
            "fail_fast" => Ok(FailurePolicy::FailFast),
            other => Err(format!("unknown failure policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Uploads in flight
    pub concurrency: usize,
    /// Discovered files buffered ahead of the uploader
    pub queue_depth: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            queue_depth: 16,
            failure_policy: FailurePolicy::BestEffort,
        }
    }
}

/// A regular file found under the sync root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the root, `/`-separated, no leading slash
    pub key: String,
    pub path: PathBuf,
}

/// A file read and typed, ready for upload
#[derive(Debug, Clone)]
pub struct UploadObject {
    pub key: String,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl UploadObject {
    /// Read the whole file through one handle and sniff its leading bytes
    pub async fn load(record: &FileRecord) -> std::io::Result<Self> {
        let body = Bytes::from(tokio::fs::read(&record.path).await?);
        let content_type = detect_content_type(&body[..body.len().min(SNIFF_LEN)]);
        Ok(Self {
            key: record.key.clone(),
            content_type,
            body,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: usize,
    pub bytes: u64,
}

enum Outcome {
    Uploaded(u64),
    Failed(String),
    /// Dropped after a fail-fast stop, never attempted
    Skipped,
}

/// Object key for `path` under `root`.
///
/// Only normal components survive, so the key never starts with `/` and never
/// contains `.` or `..` segments. `None` for paths outside `root` and for
/// names that are not valid UTF-8.
pub fn object_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_str()?);
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Uploads every regular file under a root to an object store
pub struct SyncEngine {
    store: Arc<dyn ObjectStore>,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ObjectStore>, options: SyncOptions) -> Self {
        Self { store, options }
    }

    /// Mirror the tree under `root` into the bucket.
    ///
    /// Fails with `SyncPartialFailure` if any file could not be discovered,
    /// read, or uploaded; the first recorded error is carried along.
    #[instrument(skip(self), fields(root = %root.display(), bucket = %self.store.bucket()))]
    pub async fn sync(&self, root: &Path) -> Result<SyncReport> {
        match tokio::fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(MirrorError::Workspace {
                    path: root.display().to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "sync root is not a directory",
                    ),
                })
            }
            Err(source) => {
                return Err(MirrorError::Workspace {
                    path: root.display().to_string(),
                    source,
                })
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(self.options.queue_depth.max(1));
        let producer = {
            let root = root.to_path_buf();
            let stop = stop.clone();
            tokio::task::spawn_blocking(move || discover(&root, tx, &stop))
        };

        let records = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let mut uploads = Box::pin(
            records
                .map(|item: std::result::Result<FileRecord, String>| {
                    let store = self.store.clone();
                    let stop = stop.clone();
                    async move {
                        if stop.load(Ordering::SeqCst) {
                            return Outcome::Skipped;
                        }
                        match item {
                            Ok(record) => upload(store.as_ref(), &record).await,
                            Err(message) => Outcome::Failed(message),
                        }
                    }
                })
                .buffer_unordered(self.options.concurrency.max(1)),
        );

        let mut report = SyncReport::default();
        let mut failed = 0usize;
        let mut skipped = 0usize;
        let mut first_error: Option<String> = None;

        while let Some(outcome) = uploads.next().await {
            match outcome {
                Outcome::Uploaded(bytes) => {
                    report.uploaded += 1;
                    report.bytes += bytes;
                }
                Outcome::Failed(message) => {
                    warn!(error = %message, "file not mirrored");
                    failed += 1;
                    if first_error.is_none() {
                        first_error = Some(message);
                    }
                    if self.options.failure_policy == FailurePolicy::FailFast {
                        stop.store(true, Ordering::SeqCst);
                    }
                }
                Outcome::Skipped => skipped += 1,
            }
        }
        drop(uploads);

        if let Err(e) = producer.await {
            failed += 1;
            first_error.get_or_insert_with(|| format!("discovery task failed: {}", e));
        }

        let attempted = report.uploaded + failed;
        match first_error {
            Some(first) => {
                warn!(failed, attempted, skipped, "sync incomplete");
                Err(MirrorError::SyncPartialFailure {
                    failed,
                    attempted,
                    first,
                })
            }
            None => {
                info!(uploaded = report.uploaded, bytes = report.bytes, "sync complete");
                Ok(report)
            }
        }
    }
}

/// Walk `root` depth-first, sending one record per regular file.
///
/// Symlinks are not followed and never become keys. Walk errors are forwarded
/// so the consumer counts them as failures.
fn discover(
    root: &Path,
    tx: mpsc::Sender<std::result::Result<FileRecord, String>>,
    stop: &AtomicBool,
) {
    let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();

    for entry in walker {
        if stop.load(Ordering::SeqCst) {
            debug!("discovery stopped early");
            return;
        }

        let item = match entry {
            Ok(entry) if entry.file_type().is_file() => match object_key(root, entry.path()) {
                Some(key) => Ok(FileRecord {
                    key,
                    path: entry.into_path(),
                }),
                None => Err(format!(
                    "{}: file name is not valid UTF-8",
                    entry.path().display()
                )),
            },
            Ok(_) => continue,
            Err(e) => Err(format!("walk error: {}", e)),
        };

        // Receiver gone means the uploader is finished with us
        if tx.blocking_send(item).is_err() {
            return;
        }
    }
}

async fn upload(store: &dyn ObjectStore, record: &FileRecord) -> Outcome {
    let object = match UploadObject::load(record).await {
        Ok(object) => object,
        Err(e) => return Outcome::Failed(format!("{}: read failed: {}", record.key, e)),
    };
    let size = object.body.len() as u64;

    match store
        .put_object(&object.key, object.body, object.content_type)
        .await
    {
        Ok(()) => {
            debug!(key = %object.key, content_type = object.content_type, size, "uploaded");
            Outcome::Uploaded(size)
        }
        Err(e) => Outcome::Failed(format!("{}: upload failed: {}", object.key, e)),
    }
}
