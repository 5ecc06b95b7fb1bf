//! Shared HTTP transport for the AWS API clients
//!
//! - HTTP/1.1 only
//! - Tuned connection pool and TCP_NODELAY
//! - native-tls (OpenSSL) for TLS
//! - Re-signing on every attempt, retry with jitter on 429/503

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::sign::RequestSigner;

/// Transport-level errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("request build error: {0}")]
    Build(#[from] hyper::http::Error),

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("body error: {0}")]
    Body(String),
}

pub type HttpsClient = HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Build a hyper client with the connection settings used by every AWS client
pub fn build_client() -> Result<HttpsClient, HttpError> {
    let mut http = HttpConnector::new();
    http.set_nodelay(true);
    http.enforce_http(false);
    http.set_connect_timeout(Some(Duration::from_secs(10)));
    http.set_keepalive(Some(Duration::from_secs(90)));

    let tls = native_tls::TlsConnector::new()?;
    let https = HttpsConnector::from((http, tls.into()));

    Ok(HyperClient::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(32)
        .retry_canceled_requests(true)
        .set_host(true)
        .build(https))
}

/// Simple pseudo-random jitter (0.0 - 1.0) from the clock's nanoseconds
fn rand_jitter() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

fn backoff(attempt: u32, jitter: bool) -> Duration {
    let base_ms = 100u64 * (1 << attempt);
    let extra = if jitter {
        (base_ms as f64 * 0.2 * rand_jitter()) as u64
    } else {
        0
    };
    Duration::from_millis(base_ms + extra)
}

/// How a request body is covered by the signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSigning {
    /// SHA256 of the body goes into the signature
    Hashed,
    /// `UNSIGNED-PAYLOAD`
    Unsigned,
}

/// Signed request sender shared by the S3 and CodeCommit clients
#[derive(Clone)]
pub struct SignedTransport {
    client: HttpsClient,
    signer: RequestSigner,
    timeout: Duration,
    max_retries: u32,
}

impl SignedTransport {
    pub fn new(client: HttpsClient, signer: RequestSigner) -> Self {
        Self {
            client,
            signer,
            timeout: Duration::from_secs(300),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn sign(
        &self,
        method: &Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: &Bytes,
        payload: PayloadSigning,
    ) -> BTreeMap<String, String> {
        match payload {
            PayloadSigning::Unsigned if !body.is_empty() => {
                self.signer
                    .sign_unsigned_payload(method.as_str(), url, headers)
            }
            _ => self.signer.sign(method.as_str(), url, headers, body),
        }
    }

    /// Send a request with automatic retry on 429/503 and connection errors.
    ///
    /// Returns (status, body_bytes) of the final attempt.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
        payload: PayloadSigning,
    ) -> Result<(StatusCode, Bytes), HttpError> {
        let mut attempt = 0;
        loop {
            // Re-sign on each attempt (timestamp changes)
            let signed_headers = self.sign(&method, url, headers.clone(), &body, payload);

            let mut req = Request::builder().method(method.clone()).uri(url);
            for (key, value) in signed_headers.iter() {
                req = req.header(key, value);
            }
            let request = req.body(Full::new(body.clone()))?;

            let result = tokio::time::timeout(self.timeout, self.client.request(request)).await;
            let response = match result {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    if attempt < self.max_retries {
                        tracing::debug!(attempt, error = %e, %url, "request failed, retrying");
                        tokio::time::sleep(backoff(attempt, false)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(HttpError::Request(e.to_string()));
                }
                Err(_) => return Err(HttpError::Timeout(self.timeout)),
            };

            let status = response.status();
            let retryable = status == StatusCode::TOO_MANY_REQUESTS
                || status == StatusCode::SERVICE_UNAVAILABLE;

            if retryable && attempt < self.max_retries {
                // Drain body to return connection to pool, then retry
                let _ = response.collect().await;
                tracing::debug!(attempt, %status, %url, "throttled, retrying");
                tokio::time::sleep(backoff(attempt, true)).await;
                attempt += 1;
                continue;
            }

            let body_bytes = response
                .collect()
                .await
                .map_err(|e| HttpError::Body(e.to_string()))?
                .to_bytes();
            return Ok((status, body_bytes));
        }
    }
}
