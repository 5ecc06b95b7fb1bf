//! CodeCommit smart-HTTP password derivation
//!
//! The git transport carries no query string and no body at credential time,
//! so the canonical request has a fixed shape: method `GIT`, the URL path,
//! an empty query, a single `host` header and an empty payload hash.

use chrono::{DateTime, Utc};
use url::Url;

use super::{credential_scope, derive_signing_key, hmac_sha256, sha256_hex, ALGORITHM};
use crate::error::{MirrorError, Result};

/// Pseudo HTTP method used by the git transport
pub const GIT_METHOD: &str = "GIT";

/// Service name embedded in the credential scope
pub const GIT_SERVICE: &str = "codecommit";

/// Everything that goes into one signature. Built per attempt, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    pub host: String,
    pub path: String,
    /// `YYYYMMDDTHHMMSS`
    pub timestamp: String,
    /// `YYYYMMDD`
    pub date: String,
    pub region: String,
}

impl SigningContext {
    /// Build a context from a clone URL and the signing instant
    pub fn new(request_url: &str, region: &str, now: DateTime<Utc>) -> Result<Self> {
        let url = Url::parse(request_url).map_err(|e| {
            MirrorError::Configuration(format!("unparsable clone URL {:?}: {}", request_url, e))
        })?;
        let host = url.host_str().ok_or_else(|| {
            MirrorError::Configuration(format!("clone URL {:?} has no host", request_url))
        })?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            host,
            path: url.path().to_string(),
            timestamp: now.format("%Y%m%dT%H%M%S").to_string(),
            date: now.format("%Y%m%d").to_string(),
            region: region.to_string(),
        })
    }

    pub fn canonical_request(&self) -> String {
        // method, path, query (empty), headers, signed headers, payload hash (empty)
        format!("{}\n{}\n\nhost:{}\n\nhost\n", GIT_METHOD, self.path, self.host)
    }

    pub fn string_to_sign(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            self.timestamp,
            credential_scope(&self.date, &self.region, GIT_SERVICE),
            sha256_hex(self.canonical_request().as_bytes())
        )
    }
}

/// Derives git HTTP passwords for one fixed region.
#[derive(Debug, Clone)]
pub struct GitSigner {
    region: String,
}

impl GitSigner {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Hex signature for a prepared context
    pub fn signature(&self, ctx: &SigningContext, secret_key: &str) -> String {
        let aws4_key = format!("AWS4{}", secret_key).into_bytes();
        let signing_key = derive_signing_key(&aws4_key, &ctx.date, &ctx.region, GIT_SERVICE);
        hex::encode(hmac_sha256(&signing_key, ctx.string_to_sign().as_bytes()))
    }

    /// Compute the transport password `<timestamp>Z<signature>`
    pub fn sign(&self, request_url: &str, secret_key: &str, now: DateTime<Utc>) -> Result<String> {
        let ctx = SigningContext::new(request_url, &self.region, now)?;
        let signature = self.signature(&ctx, secret_key);
        Ok(format!("{}Z{}", ctx.timestamp, signature))
    }
}
