//! Invocation-level error taxonomy
//!
//! Every component wraps its transport errors (S3, libgit2, I/O) into one of
//! these variants at its boundary. All of them are fatal for the invocation.

use thiserror::Error;

/// Errors surfaced to the event dispatcher
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Unparsable URL, missing region/bucket, invalid settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The event does not carry a usable repository identifier
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// The ambient credential source cannot supply credentials
    #[error("credentials unavailable: {0}")]
    CredentialUnavailable(String),

    /// Repository metadata lookup failed
    #[error("repository lookup failed for {repository}: {message}")]
    RepositoryLookup { repository: String, message: String },

    /// The local clone workspace could not be prepared
    #[error("workspace error at {path}: {source}")]
    Workspace {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The git transport failed or rejected the derived credential
    #[error("clone of {url} failed: {message}")]
    CloneFailure { url: String, message: String },

    /// Listing or deleting bucket contents failed
    #[error("failed to clear bucket {bucket}: {message}")]
    BucketClearFailure { bucket: String, message: String },

    /// At least one file could not be mirrored
    #[error("sync failed for {failed} of {attempted} file(s), first error: {first}")]
    SyncPartialFailure {
        failed: usize,
        attempted: usize,
        first: String,
    },
}

pub type Result<T> = std::result::Result<T, MirrorError>;

impl MirrorError {
    /// Short state-machine label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            MirrorError::Configuration(_) => "configuration",
            MirrorError::InvalidEvent(_) => "invalid_event",
            MirrorError::CredentialUnavailable(_) => "credential_unavailable",
            MirrorError::RepositoryLookup { .. } => "repository_lookup",
            MirrorError::Workspace { .. } => "workspace",
            MirrorError::CloneFailure { .. } => "clone_failure",
            MirrorError::BucketClearFailure { .. } => "bucket_clear_failure",
            MirrorError::SyncPartialFailure { .. } => "sync_partial_failure",
        }
    }
}
