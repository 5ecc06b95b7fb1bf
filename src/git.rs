//! Repository cloning through libgit2
//!
//! The transport asks for credentials through a callback on every
//! authentication challenge. Each challenge gets a freshly derived
//! credential; the embedded timestamp is only valid for a short window.

use async_trait::async_trait;
use git2::build::RepoBuilder;
use git2::{Cred, CredentialType, FetchOptions, RemoteCallbacks};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::credentials::CredentialCallback;
use crate::error::{MirrorError, Result};

/// libgit2 re-invokes the callback after a rejected credential; stop after this many
const MAX_AUTH_CHALLENGES: usize = 3;

/// Clones a remote repository into a local directory
#[async_trait]
pub trait Cloner: Send + Sync {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;
}

/// libgit2-backed cloner
pub struct GitCloner {
    credentials: Arc<dyn CredentialCallback>,
    branch: Option<String>,
}

impl GitCloner {
    pub fn new(credentials: Arc<dyn CredentialCallback>) -> Self {
        Self {
            credentials,
            branch: None,
        }
    }

    /// Check out `branch` instead of the remote's default branch
    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch.filter(|b| !b.is_empty());
        self
    }

    fn clone_blocking(
        credentials: Arc<dyn CredentialCallback>,
        branch: Option<String>,
        url: String,
        dest: PathBuf,
    ) -> Result<()> {
        // libgit2 only sees a message; the typed error is surfaced after the clone
        let callback_error: RefCell<Option<MirrorError>> = RefCell::new(None);
        let slot = &callback_error;

        let mut challenges = 0usize;
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |challenge_url, _username, allowed| {
            challenges += 1;
            if challenges > MAX_AUTH_CHALLENGES {
                return Err(git2::Error::from_str(
                    "remote rejected derived credentials",
                ));
            }
            if !allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                return Err(git2::Error::from_str(
                    "remote does not accept username/password authentication",
                ));
            }

            debug!(attempt = challenges, "answering authentication challenge");
            match credentials.credential_for(challenge_url) {
                Ok(derived) => Cred::userpass_plaintext(&derived.username, &derived.password),
                Err(e) => {
                    let message = e.to_string();
                    slot.borrow_mut().get_or_insert(e);
                    Err(git2::Error::from_str(&message))
                }
            }
        });

        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(callbacks);

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch);
        if let Some(branch) = &branch {
            builder.branch(branch);
        }

        if let Err(e) = builder.clone(&url, &dest) {
            if let Some(err) = callback_error.take() {
                return Err(err);
            }
            return Err(MirrorError::CloneFailure {
                url,
                message: e.message().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Cloner for GitCloner {
    #[instrument(skip(self), fields(dest = %dest.display(), branch = ?self.branch))]
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let credentials = self.credentials.clone();
        let branch = self.branch.clone();
        let url_owned = url.to_string();
        let dest_owned = dest.to_path_buf();

        let result = tokio::task::spawn_blocking(move || {
            Self::clone_blocking(credentials, branch, url_owned, dest_owned)
        })
        .await
        .map_err(|e| MirrorError::CloneFailure {
            url: url.to_string(),
            message: format!("clone task panicked: {}", e),
        })?;

        match &result {
            Ok(()) => info!("clone complete"),
            Err(e) => warn!(error = %e, "clone failed"),
        }
        result
    }
}

/// Remove any previous clone and make sure the parent directory exists.
///
/// The clone destination must be absent before libgit2 runs; leftovers from a
/// previous invocation would leak into key derivation and content sniffing.
pub fn purge_workspace(dir: &Path) -> Result<()> {
    let workspace_error = |source: std::io::Error| MirrorError::Workspace {
        path: dir.display().to_string(),
        source,
    };

    match std::fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(dir).map_err(workspace_error)?,
        Ok(_) => std::fs::remove_file(dir).map_err(workspace_error)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(workspace_error(e)),
    }

    if let Some(parent) = dir.parent() {
        std::fs::create_dir_all(parent).map_err(workspace_error)?;
    }

    debug!(dir = %dir.display(), "workspace purged");
    Ok(())
}
