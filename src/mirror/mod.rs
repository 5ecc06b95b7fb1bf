//! Per-event orchestration: resolve, clone, clear the bucket, sync
//!
//! One invocation walks `Idle -> ResolvingRepo -> Cloning -> ClearingBucket
//! -> Syncing -> Done`; any failure moves it to `Failed` and is returned to
//! the caller. Nothing is persisted between invocations.

pub mod reset;
pub mod sniff;
pub mod sync;

pub use reset::clear_bucket;
pub use sniff::detect_content_type;
pub use sync::{FailurePolicy, FileRecord, SyncEngine, SyncOptions, SyncReport, UploadObject};

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use crate::codecommit::{CodeCommitResolver, RepositoryResolver};
use crate::config::Config;
use crate::credentials::{CredentialProvider, CredentialSource};
use crate::error::{MirrorError, Result};
use crate::event::CodeCommitEvent;
use crate::git::{purge_workspace, Cloner, GitCloner};
use crate::http::build_client;
use crate::s3::{ObjectStore, S3Client};
use crate::sign::GitSigner;

/// Orchestrator state for the current invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Idle,
    ResolvingRepo,
    Cloning,
    ClearingBucket,
    Syncing,
    Done,
    Failed,
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InvocationState::Idle => "idle",
            InvocationState::ResolvingRepo => "resolving_repo",
            InvocationState::Cloning => "cloning",
            InvocationState::ClearingBucket => "clearing_bucket",
            InvocationState::Syncing => "syncing",
            InvocationState::Done => "done",
            InvocationState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Outcome of one successful invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorReport {
    pub repository: String,
    pub deleted: usize,
    pub uploaded: usize,
    pub bytes: u64,
}

/// Mirrors a repository's publish directory into a bucket
pub struct Mirror {
    config: Config,
    resolver: Arc<dyn RepositoryResolver>,
    cloner: Arc<dyn Cloner>,
    store: Arc<dyn ObjectStore>,
    state: Mutex<InvocationState>,
}

impl Mirror {
    pub fn new(
        config: Config,
        resolver: Arc<dyn RepositoryResolver>,
        cloner: Arc<dyn Cloner>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            resolver,
            cloner,
            store,
            state: Mutex::new(InvocationState::Idle),
        }
    }

    /// Wire the CodeCommit resolver, libgit2 cloner and S3 store from config.
    ///
    /// The S3 client signs with one credential snapshot taken here; the git
    /// transport pulls fresh credentials on every challenge.
    pub fn from_config(config: Config, source: Arc<dyn CredentialSource>) -> Result<Self> {
        config.validate()?;

        let provider = CredentialProvider::new(source, GitSigner::new(config.region.clone()));
        let client = build_client()
            .map_err(|e| MirrorError::Configuration(format!("HTTP client: {}", e)))?;

        let resolver = CodeCommitResolver::new(
            client.clone(),
            provider.clone(),
            config.endpoints.codecommit.clone(),
        )
        .with_max_retries(config.max_retries);

        let cloner = GitCloner::new(Arc::new(provider.clone())).with_branch(config.branch.clone());

        let credentials = provider.snapshot()?;
        let store = S3Client::with_client(
            client,
            &credentials,
            &config.region,
            config.endpoints.s3.clone(),
            config.bucket.clone(),
        )
        .with_timeout(Duration::from_secs(config.request_timeout))
        .with_max_retries(config.max_retries);

        Ok(Self::new(
            config,
            Arc::new(resolver),
            Arc::new(cloner),
            Arc::new(store),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// State reached by the most recent invocation
    pub fn state(&self) -> InvocationState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, next: InvocationState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug!(from = %*state, to = %next, "state transition");
        *state = next;
    }

    /// Mirror the repository named by `event`
    #[instrument(skip(self, event), fields(bucket = %self.config.bucket))]
    pub async fn handle_event(&self, event: &CodeCommitEvent) -> Result<MirrorReport> {
        self.transition(InvocationState::Idle);

        match self.run(event).await {
            Ok(report) => {
                self.transition(InvocationState::Done);
                info!(
                    repository = %report.repository,
                    deleted = report.deleted,
                    uploaded = report.uploaded,
                    bytes = report.bytes,
                    "mirror complete"
                );
                Ok(report)
            }
            Err(e) => {
                let failed_in = self.state();
                self.transition(InvocationState::Failed);
                error!(state = %failed_in, kind = e.kind(), error = %e, "mirror failed");
                Err(e)
            }
        }
    }

    async fn run(&self, event: &CodeCommitEvent) -> Result<MirrorReport> {
        self.transition(InvocationState::ResolvingRepo);
        let repository = event.repository_name()?;
        let clone_info = self.resolver.resolve(&repository).await?;
        info!(
            repository = %repository,
            url = %clone_info.url,
            access_key_id = %clone_info.access_key_id(),
            "repository resolved"
        );

        self.transition(InvocationState::Cloning);
        let clone_dir = &self.config.clone_dir;
        purge_workspace(clone_dir)?;
        self.cloner.clone_repo(&clone_info.url, clone_dir).await?;

        self.transition(InvocationState::ClearingBucket);
        let deleted = clear_bucket(self.store.as_ref()).await?;

        self.transition(InvocationState::Syncing);
        let engine = SyncEngine::new(self.store.clone(), self.config.sync.options());
        let sync = engine.sync(&self.config.sync_root()).await?;

        Ok(MirrorReport {
            repository,
            deleted,
            uploaded: sync.uploaded,
            bytes: sync.bytes,
        })
    }
}
