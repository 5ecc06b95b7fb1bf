//! Ambient AWS credentials and git transport credential derivation
//!
//! A [`CredentialProvider`] pulls a fresh credential snapshot from its
//! [`CredentialSource`] on every call and signs the clone URL with the
//! current [`Clock`] time. Nothing is cached: the password embeds a
//! timestamp and the remote only accepts it within a short window.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::error::{MirrorError, Result};
use crate::sign::GitSigner;

/// Credential source errors
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("environment variable {0} is not set")]
    MissingVariable(&'static str),

    #[error("environment variable {0} is empty")]
    EmptyVariable(&'static str),
}

impl From<CredentialError> for MirrorError {
    fn from(err: CredentialError) -> Self {
        MirrorError::CredentialUnavailable(err.to_string())
    }
}

/// Access id, secret key and optional session token
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Supplies the caller's identity
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> std::result::Result<AwsCredentials, CredentialError>;
}

/// Reads the standard AWS variables injected by the hosting runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialSource;

impl EnvCredentialSource {
    fn required(name: &'static str) -> std::result::Result<String, CredentialError> {
        match std::env::var(name) {
            Ok(value) if value.is_empty() => Err(CredentialError::EmptyVariable(name)),
            Ok(value) => Ok(value),
            Err(_) => Err(CredentialError::MissingVariable(name)),
        }
    }
}

impl CredentialSource for EnvCredentialSource {
    fn credentials(&self) -> std::result::Result<AwsCredentials, CredentialError> {
        let access_key_id = Self::required("AWS_ACCESS_KEY_ID")?;
        let secret_access_key = Self::required("AWS_SECRET_ACCESS_KEY")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());

        Ok(AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Fixed credential snapshot
#[derive(Debug, Clone)]
pub struct StaticCredentialSource(AwsCredentials);

impl StaticCredentialSource {
    pub fn new(credentials: AwsCredentials) -> Self {
        Self(credentials)
    }
}

impl CredentialSource for StaticCredentialSource {
    fn credentials(&self) -> std::result::Result<AwsCredentials, CredentialError> {
        Ok(self.0.clone())
    }
}

/// Time source for signing
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// One-time username/password pair for a single authentication challenge
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedCredential {
    pub username: String,
    pub password: String,
}

impl DerivedCredential {
    /// `<access id>%<session token>`, or the bare access id for long-lived keys
    pub fn username_for(credentials: &AwsCredentials) -> String {
        match &credentials.session_token {
            Some(token) => format!("{}%{}", credentials.access_key_id, token),
            None => credentials.access_key_id.clone(),
        }
    }
}

impl std::fmt::Debug for DerivedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedCredential")
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Produces a credential for a URL; invoked by the transport per challenge
pub trait CredentialCallback: Send + Sync {
    fn credential_for(&self, url: &str) -> Result<DerivedCredential>;
}

/// Derives git transport credentials from ambient AWS credentials
#[derive(Clone)]
pub struct CredentialProvider {
    source: Arc<dyn CredentialSource>,
    signer: GitSigner,
    clock: Arc<dyn Clock>,
}

impl CredentialProvider {
    pub fn new(source: Arc<dyn CredentialSource>, signer: GitSigner) -> Self {
        Self::with_clock(source, signer, Arc::new(SystemClock))
    }

    pub fn with_clock(
        source: Arc<dyn CredentialSource>,
        signer: GitSigner,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            signer,
            clock,
        }
    }

    /// Current credential snapshot from the source
    pub fn snapshot(&self) -> Result<AwsCredentials> {
        Ok(self.source.credentials()?)
    }

    pub fn region(&self) -> &str {
        self.signer.region()
    }
}

impl CredentialCallback for CredentialProvider {
    fn credential_for(&self, url: &str) -> Result<DerivedCredential> {
        let credentials = self.snapshot()?;
        let password = self
            .signer
            .sign(url, &credentials.secret_access_key, self.clock.now())?;

        debug!(
            access_key_id = %credentials.access_key_id,
            region = self.signer.region(),
            "derived git transport credential"
        );

        Ok(DerivedCredential {
            username: DerivedCredential::username_for(&credentials),
            password,
        })
    }
}
