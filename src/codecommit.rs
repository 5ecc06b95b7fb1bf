//! Repository resolution through the CodeCommit control plane
//!
//! `GetRepository` is a JSON 1.1 API call (`X-Amz-Target` dispatch) signed
//! with SigV4 for service `codecommit`.

use async_trait::async_trait;
use bytes::Bytes;
use hyper::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::credentials::{AwsCredentials, CredentialProvider};
use crate::error::{MirrorError, Result};
use crate::http::{HttpsClient, PayloadSigning, SignedTransport};
use crate::sign::RequestSigner;

const GET_REPOSITORY_TARGET: &str = "CodeCommit_20150413.GetRepository";

/// Everything needed to clone one repository. Resolved per invocation.
#[derive(Clone)]
pub struct CloneInfo {
    pub url: String,
    pub credentials: AwsCredentials,
}

impl CloneInfo {
    pub fn access_key_id(&self) -> &str {
        &self.credentials.access_key_id
    }
}

impl std::fmt::Debug for CloneInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneInfo")
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Maps a repository name to a clonable URL and a credential snapshot
#[async_trait]
pub trait RepositoryResolver: Send + Sync {
    async fn resolve(&self, repository: &str) -> Result<CloneInfo>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetRepositoryRequest<'a> {
    repository_name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRepositoryResponse {
    repository_metadata: RepositoryMetadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryMetadata {
    clone_url_http: Option<String>,
}

/// JSON error body returned by AWS JSON protocol services
#[derive(Deserialize)]
struct ApiError {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(default, alias = "Message")]
    message: String,
}

/// Regional CodeCommit control-plane endpoint
pub fn default_endpoint(region: &str) -> String {
    format!("https://codecommit.{}.amazonaws.com", region)
}

/// Resolves repositories with `GetRepository`
pub struct CodeCommitResolver {
    client: HttpsClient,
    credentials: CredentialProvider,
    endpoint: String,
    max_retries: u32,
}

impl CodeCommitResolver {
    pub fn new(client: HttpsClient, credentials: CredentialProvider, endpoint: Option<String>) -> Self {
        let endpoint = endpoint.unwrap_or_else(|| default_endpoint(credentials.region()));
        Self {
            client,
            credentials,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn lookup_error(repository: &str, message: impl Into<String>) -> MirrorError {
        MirrorError::RepositoryLookup {
            repository: repository.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl RepositoryResolver for CodeCommitResolver {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn resolve(&self, repository: &str) -> Result<CloneInfo> {
        // One snapshot signs the lookup and travels with the clone info
        let credentials = self.credentials.snapshot()?;
        let signer = RequestSigner::new(&credentials, self.credentials.region(), "codecommit");
        let transport =
            SignedTransport::new(self.client.clone(), signer).with_max_retries(self.max_retries);

        let body = serde_json::to_vec(&GetRepositoryRequest {
            repository_name: repository,
        })
        .map_err(|e| Self::lookup_error(repository, e.to_string()))?;

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-amz-json-1.1".to_string(),
        );
        headers.insert("x-amz-target".to_string(), GET_REPOSITORY_TARGET.to_string());

        let url = format!("{}/", self.endpoint);
        let (status, response) = transport
            .send(Method::POST, &url, headers, Bytes::from(body), PayloadSigning::Hashed)
            .await
            .map_err(|e| Self::lookup_error(repository, e.to_string()))?;

        if !status.is_success() {
            let message = match serde_json::from_slice::<ApiError>(&response) {
                Ok(err) => format!("{} ({}): {}", status, err.kind, err.message),
                Err(_) => format!("{}: {}", status, String::from_utf8_lossy(&response)),
            };
            return Err(Self::lookup_error(repository, message));
        }

        let url = parse_clone_url(&response).map_err(|m| Self::lookup_error(repository, m))?;
        debug!(%url, "resolved clone URL");

        Ok(CloneInfo { url, credentials })
    }
}

/// Resolves every repository to a fixed URL template; `{name}` is substituted
pub struct StaticResolver {
    template: String,
    credentials: CredentialProvider,
}

impl StaticResolver {
    pub fn new(template: impl Into<String>, credentials: CredentialProvider) -> Self {
        Self {
            template: template.into(),
            credentials,
        }
    }

    /// `https://git-codecommit.<region>.amazonaws.com/v1/repos/{name}`
    pub fn codecommit_http(credentials: CredentialProvider) -> Self {
        let template = format!(
            "https://git-codecommit.{}.amazonaws.com/v1/repos/{{name}}",
            credentials.region()
        );
        Self::new(template, credentials)
    }
}

#[async_trait]
impl RepositoryResolver for StaticResolver {
    async fn resolve(&self, repository: &str) -> Result<CloneInfo> {
        Ok(CloneInfo {
            url: self.template.replace("{name}", repository),
            credentials: self.credentials.snapshot()?,
        })
    }
}

fn parse_clone_url(body: &[u8]) -> std::result::Result<String, String> {
    let parsed: GetRepositoryResponse =
        serde_json::from_slice(body).map_err(|e| format!("malformed GetRepository response: {}", e))?;
    parsed
        .repository_metadata
        .clone_url_http
        .filter(|url| !url.is_empty())
        .ok_or_else(|| "repository has no HTTP clone URL".to_string())
}
