//! S3 client implementation for the mirror operations
//!
//! - Path-style URLs (`<endpoint>/<bucket>/<key>`)
//! - UNSIGNED-PAYLOAD for PUT (skips SHA256 of body)
//! - Byte-slice tag matching in the XML parsers
//! - Automatic retry with jitter for 429/503 responses (see [`SignedTransport`])

use async_trait::async_trait;
use bytes::Bytes;
use hyper::{Method, StatusCode};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::time::Duration;
use thiserror::Error;

use super::types::{DeleteError, DeleteObjectsResponse, DeletedObject, ListObjectsResponse, S3Object};
use super::{ObjectStore, MAX_KEYS_PER_REQUEST};
use crate::credentials::AwsCredentials;
use crate::http::{HttpError, HttpsClient, PayloadSigning, SignedTransport};
use crate::sign::RequestSigner;

/// Hex lookup table for URI encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3Error {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("S3 error: {status} - {message}")]
    S3Response { status: StatusCode, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<quick_xml::Error> for S3Error {
    fn from(err: quick_xml::Error) -> Self {
        S3Error::XmlParse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, S3Error>;

/// S3 client bound to one bucket
///
/// Clone is cheap - the underlying HTTP client uses Arc internally.
#[derive(Clone)]
pub struct S3Client {
    transport: SignedTransport,
    endpoint: String,
    bucket: String,
}

impl S3Client {
    /// Create a client sharing an existing connection pool
    pub fn with_client(
        client: HttpsClient,
        credentials: &AwsCredentials,
        region: &str,
        endpoint: Option<String>,
        bucket: String,
    ) -> Self {
        let signer = RequestSigner::new(credentials, region, "s3");
        let endpoint = endpoint.unwrap_or_else(|| default_endpoint(region));
        Self {
            transport: SignedTransport::new(client, signer),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = self.transport.with_timeout(timeout);
        self
    }

    /// Set throttling retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.transport = self.transport.with_max_retries(max_retries);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Encode an S3 key, preserving forward slashes
    fn encode_s3_key(key: &str) -> Cow<'_, str> {
        let needs_encoding = key.bytes().any(|b| {
            !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/')
        });

        if !needs_encoding {
            return Cow::Borrowed(key);
        }

        let mut result = String::with_capacity(key.len() + 32);
        for byte in key.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                    result.push(byte as char);
                }
                _ => {
                    result.push('%');
                    result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
        Cow::Owned(result)
    }

    /// Full object URL for a key
    pub fn build_url(&self, key: &str) -> String {
        let encoded_key = Self::encode_s3_key(key);
        let mut url =
            String::with_capacity(self.endpoint.len() + self.bucket.len() + encoded_key.len() + 2);
        url.push_str(&self.endpoint);
        url.push('/');
        url.push_str(&self.bucket);
        url.push('/');
        url.push_str(&encoded_key);
        url
    }

    fn build_bucket_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.bucket)
    }

    /// Encode a query parameter value (RFC 3986) into the target buffer
    fn url_encode_into(buf: &mut String, s: &str) {
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    buf.push(byte as char);
                }
                _ => {
                    buf.push('%');
                    buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    buf.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
    }

    /// ListObjectsV2 URL.
    ///
    /// Parameters are ordered alphabetically so the signer's canonical query
    /// string fast path can skip re-sorting.
    pub fn build_list_url(&self, max_keys: usize, continuation_token: Option<&str>) -> String {
        let mut url = self.build_bucket_url();
        url.push_str("/?");
        if let Some(token) = continuation_token {
            url.push_str("continuation-token=");
            Self::url_encode_into(&mut url, token);
            url.push('&');
        }
        url.push_str("list-type=2&max-keys=");
        let _ = write!(url, "{}", max_keys);
        url
    }

    fn check_status(status: StatusCode, body: &Bytes) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(S3Error::S3Response {
                status,
                message: String::from_utf8_lossy(body).to_string(),
            })
        }
    }

    /// List objects in bucket (S3 ListObjectsV2)
    pub async fn list_objects_v2(
        &self,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListObjectsResponse> {
        let url = self.build_list_url(max_keys, continuation_token);
        let (status, body) = self
            .transport
            .send(Method::GET, &url, BTreeMap::new(), Bytes::new(), PayloadSigning::Hashed)
            .await?;
        Self::check_status(status, &body)?;
        parse_list_response(&body)
    }

    /// Put object with a Content-Type, UNSIGNED-PAYLOAD
    pub async fn put_object_with_type(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let url = self.build_url(key);

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        headers.insert("content-length".to_string(), data.len().to_string());

        let (status, body) = self
            .transport
            .send(Method::PUT, &url, headers, data, PayloadSigning::Unsigned)
            .await?;
        Self::check_status(status, &body)
    }

    /// Delete multiple objects (batch delete, up to 1000 keys)
    pub async fn delete_keys(&self, keys: &[String]) -> Result<DeleteObjectsResponse> {
        if keys.is_empty() {
            return Ok(DeleteObjectsResponse::new());
        }

        if keys.len() > MAX_KEYS_PER_REQUEST {
            return Err(S3Error::InvalidRequest(format!(
                "cannot delete more than {} objects at once",
                MAX_KEYS_PER_REQUEST
            )));
        }

        let xml_bytes = build_delete_body(keys).into_bytes();

        let md5_hash = md5::compute(&xml_bytes);
        let md5_base64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &md5_hash[..]);

        // "?delete=" so the canonical query string is "delete="
        let url = format!("{}/?delete=", self.build_bucket_url());

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());
        headers.insert("content-length".to_string(), xml_bytes.len().to_string());
        headers.insert("content-md5".to_string(), md5_base64);

        let (status, body) = self
            .transport
            .send(Method::POST, &url, headers, Bytes::from(xml_bytes), PayloadSigning::Hashed)
            .await?;
        Self::check_status(status, &body)?;
        parse_delete_response(&body)
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(&self, continuation_token: Option<&str>) -> Result<ListObjectsResponse> {
        self.list_objects_v2(MAX_KEYS_PER_REQUEST, continuation_token)
            .await
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<DeleteObjectsResponse> {
        self.delete_keys(keys).await
    }

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        self.put_object_with_type(key, body, content_type).await
    }
}

/// Regional S3 endpoint
pub fn default_endpoint(region: &str) -> String {
    format!("https://s3.{}.amazonaws.com", region)
}

/// `<Delete>` request body with quiet mode off so per-key results are reported
fn build_delete_body(keys: &[String]) -> String {
    let mut xml = String::with_capacity(keys.len() * 60 + 80);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Delete>");
    for key in keys {
        xml.push_str("<Object><Key>");
        xml_escape_into(&mut xml, key);
        xml.push_str("</Key></Object>");
    }
    xml.push_str("</Delete>");
    xml
}

/// Escape XML special characters into an existing buffer
fn xml_escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}

/// Parse ListObjectsV2 XML response
fn parse_list_response(xml_data: &[u8]) -> Result<ListObjectsResponse> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut response = ListObjectsResponse::new();
    let mut current_object: Option<S3Object> = None;
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"Contents" {
                    current_object = Some(S3Object::new(String::new(), 0));
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" => {
                        if let Some(ref mut obj) = current_object {
                            obj.key = std::mem::take(&mut current_text);
                        }
                    }
                    b"Size" => {
                        if let Some(ref mut obj) = current_object {
                            obj.size = current_text.parse().unwrap_or(0);
                        }
                    }
                    b"LastModified" => {
                        if let Some(ref mut obj) = current_object {
                            obj.last_modified = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"ETag" => {
                        if let Some(ref mut obj) = current_object {
                            obj.etag = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Contents" => {
                        if let Some(obj) = current_object.take() {
                            response.contents.push(obj);
                        }
                    }
                    b"IsTruncated" => {
                        response.is_truncated = current_text == "true";
                    }
                    b"NextContinuationToken" => {
                        response.next_continuation_token = Some(std::mem::take(&mut current_text));
                    }
                    b"KeyCount" => {
                        response.key_count = current_text.parse().ok();
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(response)
}

/// Parse DeleteObjects XML response
fn parse_delete_response(xml_data: &[u8]) -> Result<DeleteObjectsResponse> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut response = DeleteObjectsResponse::new();
    let mut current_deleted: Option<DeletedObject> = None;
    let mut current_error: Option<DeleteError> = None;
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Deleted" => current_deleted = Some(DeletedObject::new(String::new())),
                b"Error" => current_error = Some(DeleteError::default()),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" => {
                        if let Some(ref mut deleted) = current_deleted {
                            deleted.key = std::mem::take(&mut current_text);
                        } else if let Some(ref mut error) = current_error {
                            error.key = std::mem::take(&mut current_text);
                        }
                    }
                    b"VersionId" => {
                        if let Some(ref mut deleted) = current_deleted {
                            deleted.version_id = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Code" => {
                        if let Some(ref mut error) = current_error {
                            error.code = std::mem::take(&mut current_text);
                        }
                    }
                    b"Message" => {
                        if let Some(ref mut error) = current_error {
                            error.message = std::mem::take(&mut current_text);
                        }
                    }
                    b"Deleted" => {
                        if let Some(deleted) = current_deleted.take() {
                            response.deleted.push(deleted);
                        }
                    }
                    b"Error" => {
                        if let Some(error) = current_error.take() {
                            response.errors.push(error);
                        }
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(response)
}
