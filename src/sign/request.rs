//! SigV4 signer for HTTP API requests
//!
//! Used by the S3 client and the CodeCommit control-plane client. Optimized with:
//! - Pre-computed AWS4+secret_key bytes
//! - Daily signing key cache (avoids 4 HMAC operations per request)
//! - Constant empty payload hash
//! - Zero-allocation URI encoding (hex lookup table)

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{credential_scope, derive_signing_key, hmac_sha256, sha256_hex, ALGORITHM};
use crate::credentials::AwsCredentials;

/// Hex lookup table for zero-allocation percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Pre-computed SHA256 hash of empty payload
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Payload hash marker for bodies that are not hashed
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// AWS Signature Version 4 request signer for one service and region
pub struct RequestSigner {
    access_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
    /// Pre-computed "AWS4" + secret_key as bytes
    aws4_key: Vec<u8>,
    /// Cached signing key per day: (date_stamp, derived_key)
    cached_signing_key: Mutex<Option<(String, [u8; 32])>>,
}

impl Clone for RequestSigner {
    fn clone(&self) -> Self {
        Self {
            access_key: self.access_key.clone(),
            session_token: self.session_token.clone(),
            region: self.region.clone(),
            service: self.service.clone(),
            aws4_key: self.aws4_key.clone(),
            // Each clone gets its own cache (populated on first use)
            cached_signing_key: Mutex::new(None),
        }
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("access_key", &self.access_key)
            .field("region", &self.region)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(credentials: &AwsCredentials, region: &str, service: &str) -> Self {
        Self {
            access_key: credentials.access_key_id.clone(),
            session_token: credentials.session_token.clone(),
            region: region.to_string(),
            service: service.to_string(),
            aws4_key: format!("AWS4{}", credentials.secret_access_key).into_bytes(),
            cached_signing_key: Mutex::new(None),
        }
    }

    /// Sign a request whose body is hashed into the signature
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        headers: BTreeMap<String, String>,
        payload: &[u8],
    ) -> BTreeMap<String, String> {
        if payload.is_empty() {
            self.sign_at(method, url, headers, EMPTY_SHA256, Utc::now())
        } else {
            let hash = sha256_hex(payload);
            self.sign_at(method, url, headers, &hash, Utc::now())
        }
    }

    /// Sign with UNSIGNED-PAYLOAD (for PUT bodies, avoids SHA256 of the body)
    pub fn sign_unsigned_payload(
        &self,
        method: &str,
        url: &str,
        headers: BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        self.sign_at(method, url, headers, UNSIGNED_PAYLOAD, Utc::now())
    }

    /// Sign with a provided payload hash at a given instant.
    ///
    /// Returns the input headers plus `host`, `x-amz-date`,
    /// `x-amz-content-sha256`, the optional `x-amz-security-token` and
    /// `authorization`.
    pub fn sign_at(
        &self,
        method: &str,
        url: &str,
        mut headers: BTreeMap<String, String>,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let (host, path, query) = Self::parse_url_fast(url);

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        // Required headers, lowercase for canonical form
        headers.insert("host".to_string(), host.to_string());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());
        if let Some(token) = &self.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let canonical_query = Self::create_canonical_query_string(query);
        let canonical_headers = Self::create_canonical_headers(&headers);
        let signed_headers = Self::create_signed_headers(&headers);

        // Path is used as-is: callers build already URI-encoded paths
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        tracing::trace!(%method, %host, %path, "sigv4 canonical request built");

        let scope = credential_scope(&date_stamp, &self.region, &self.service);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let signature = self.calculate_signature(&date_stamp, &string_to_sign);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.access_key, scope, signed_headers, signature
        );
        headers.insert("authorization".to_string(), authorization);

        headers
    }

    /// Fast URL component extraction without heap allocation.
    ///
    /// Returns (host_with_port, path, query) as slices into the original URL.
    /// Strips default ports (:443 for https, :80 for http) from the host.
    fn parse_url_fast(url: &str) -> (&str, &str, &str) {
        let after_scheme = if let Some(rest) = url.strip_prefix("https://") {
            rest
        } else if let Some(rest) = url.strip_prefix("http://") {
            rest
        } else {
            url
        };

        let (authority, path_and_query) = match after_scheme.find('/') {
            Some(pos) => (&after_scheme[..pos], &after_scheme[pos..]),
            None => (after_scheme, "/"),
        };

        let (path, query) = match path_and_query.find('?') {
            Some(pos) => (&path_and_query[..pos], &path_and_query[pos + 1..]),
            None => (path_and_query, ""),
        };

        let host = if url.starts_with("https") {
            authority.strip_suffix(":443").unwrap_or(authority)
        } else {
            authority.strip_suffix(":80").unwrap_or(authority)
        };

        (host, path, query)
    }

    /// Create canonical query string (sorted by parameter name)
    ///
    /// Fast path: already canonical, sorted, and every param has `=`.
    fn create_canonical_query_string(query: &str) -> String {
        if query.is_empty() {
            return String::new();
        }

        let all_canonical = query.bytes().all(|b| {
            matches!(b,
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9'
                | b'-' | b'_' | b'.' | b'~'
                | b'=' | b'&' | b'%'
            )
        });

        if all_canonical {
            let mut sorted = true;
            let mut all_have_equals = true;
            let mut last_key: &str = "";
            for pair in query.split('&') {
                let key = match pair.find('=') {
                    Some(pos) => &pair[..pos],
                    None => {
                        all_have_equals = false;
                        pair
                    }
                };
                if key < last_key {
                    sorted = false;
                    break;
                }
                last_key = key;
            }
            if sorted && all_have_equals {
                return query.to_string();
            }
        }

        // Slow path: decode, re-encode, sort
        let mut params: Vec<(String, String)> = Vec::new();
        for pair in query.split('&') {
            if let Some(pos) = pair.find('=') {
                let key = &pair[..pos];
                let value = &pair[pos + 1..];
                let decoded_key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
                let decoded_value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
                params.push((
                    Self::uri_encode(&decoded_key, true),
                    Self::uri_encode(&decoded_value, true),
                ));
            } else {
                let decoded = urlencoding::decode(pair).unwrap_or_else(|_| pair.into());
                params.push((Self::uri_encode(&decoded, true), String::new()));
            }
        }

        params.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn create_canonical_headers(headers: &BTreeMap<String, String>) -> String {
        let mut result = String::with_capacity(headers.len() * 64);
        for (k, v) in headers {
            result.push_str(k);
            result.push(':');
            result.push_str(v.trim());
            result.push('\n');
        }
        result
    }

    fn create_signed_headers(headers: &BTreeMap<String, String>) -> String {
        headers.keys().map(String::as_str).collect::<Vec<_>>().join(";")
    }

    /// Calculate the signature with daily signing key cache
    fn calculate_signature(&self, date_stamp: &str, string_to_sign: &str) -> String {
        let signing_key = {
            let mut cache = self
                .cached_signing_key
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match cache.as_ref() {
                Some((cached_date, cached_key)) if cached_date == date_stamp => *cached_key,
                _ => {
                    let key = derive_signing_key(
                        &self.aws4_key,
                        date_stamp,
                        &self.region,
                        &self.service,
                    );
                    *cache = Some((date_stamp.to_string(), key));
                    key
                }
            }
        };

        hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()))
    }

    /// URI encode a string (RFC 3986) using hex lookup table
    pub(crate) fn uri_encode(s: &str, encode_slash: bool) -> String {
        let mut result = String::with_capacity(s.len() + 16);
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    result.push(byte as char);
                }
                b'/' if !encode_slash => {
                    result.push('/');
                }
                _ => {
                    result.push('%');
                    result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
        result
    }
}
