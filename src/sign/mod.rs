//! AWS Signature Version 4 primitives
//!
//! Two signers share the same key derivation:
//! - [`RequestSigner`] signs HTTP API requests (S3, CodeCommit control plane)
//! - [`GitSigner`] derives the one-time smart-HTTP password for git transport

pub mod git;
pub mod request;

pub use git::{GitSigner, SigningContext};
pub use request::RequestSigner;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub(crate) const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// HMAC-SHA256 returning fixed-size array (no heap allocation)
pub(crate) fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    let result = mac.finalize().into_bytes();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hex-encoded SHA256 digest
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Derive the SigV4 signing key (4 chained HMAC operations)
///
/// `aws4_key` is `"AWS4" + secret_key` as bytes.
pub(crate) fn derive_signing_key(
    aws4_key: &[u8],
    date_stamp: &str,
    region: &str,
    service: &str,
) -> [u8; 32] {
    let k_date = hmac_sha256(aws4_key, date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Credential scope: `<date>/<region>/<service>/aws4_request`
pub(crate) fn credential_scope(date_stamp: &str, region: &str, service: &str) -> String {
    format!("{}/{}/{}/aws4_request", date_stamp, region, service)
}
