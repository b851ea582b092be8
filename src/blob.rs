//! Blob store backends.
//!
//! [`BlobStore`] is the byte-level persistence seam under the shard store.
//! Keys are `/`-separated paths. Three implementations:
//!
//! - **[`FsBlobStore`]** — local directory; writes go through a temp file
//!   and rename so a key is never observable half-written.
//! - **[`S3BlobStore`]** — S3-compatible object store via the REST API with
//!   AWS Signature V4 signing. Uses only pure-Rust crypto (`hmac`, `sha2`),
//!   no C library dependencies. Supports custom endpoints (MinIO,
//!   LocalStack) and `ListObjectsV2` pagination.
//! - **[`MemoryBlobStore`]** — in-memory map for tests.
//!
//! Credentials for S3 come from the standard environment variables
//! `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and optionally
//! `AWS_SESSION_TOKEN`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::RwLock;
use walkdir::WalkDir;

use crate::config::StoreConfig;

/// Byte-level key/value persistence with prefix listing.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `data` under `key`, replacing any existing value. The write is
    /// atomic: readers see either the old value or the new one.
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Read the value under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// List all keys starting with `prefix`, sorted ascending.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Build the configured blob store backend.
pub fn create_blob_store(config: &StoreConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend.as_str() {
        "fs" => {
            let root = config
                .root
                .clone()
                .context("store.root required for fs backend")?;
            Ok(Arc::new(FsBlobStore::new(root)))
        }
        "s3" => Ok(Arc::new(S3BlobStore::new(config)?)),
        other => bail!("Unknown store backend: '{}'", other),
    }
}

// ============ Filesystem backend ============

/// Stores blobs as files under a root directory, one file per key.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }
}

/// Unique sibling temp path for a destination file. Concurrent writers of
/// the same key must never share a temp file, or a rename could publish a
/// half-written blend of both.
fn tmp_path_for(path: &Path) -> PathBuf {
    static SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let parent = path
            .parent()
            .with_context(|| format!("key '{}' has no parent directory", key))?;
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;

        // Write-then-rename so a crash never leaves a partial file at `key`.
        let tmp = tmp_path_for(&path);
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to rename into {}", path.display()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        // walkdir is synchronous; run it off the async executor.
        let keys = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&root) {
                let entry = entry.context("failed to walk store directory")?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let key = relative_key(&root, entry.path())?;
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .context("blob listing task panicked")??;

        Ok(keys)
    }
}

fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("path {} escapes store root", path.display()))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

// ============ In-memory backend ============

/// Map-backed store for unit and integration tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        blobs
            .get(key)
            .cloned()
            .with_context(|| format!("no blob under key '{}'", key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("blob store lock poisoned")
}

// ============ S3 backend ============

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// S3-compatible blob store using signed REST requests.
pub struct S3BlobStore {
    bucket: String,
    region: String,
    /// Key prefix inside the bucket, empty or ending without a slash.
    prefix: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3BlobStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .context("store.bucket required for s3 backend")?;
        let region = config
            .region
            .clone()
            .context("store.region required for s3 backend")?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build S3 HTTP client")?;
        Ok(Self {
            bucket,
            region,
            prefix: config.prefix.trim_matches('/').to_string(),
            endpoint_url: config.endpoint_url.clone(),
            creds: AwsCredentials::from_env()?,
            client,
        })
    }

    fn host(&self) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        } else {
            format!("{}.s3.{}.amazonaws.com", self.bucket, self.region)
        }
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix)
                .map(|k| k.trim_start_matches('/'))
                .unwrap_or(key)
        }
    }

    /// Send one SigV4-signed request against the bucket.
    ///
    /// `uri_path` must start with `/` and be URI-encoded; `query` is the
    /// canonical (sorted, encoded) query string.
    async fn signed_request(
        &self,
        method: &str,
        uri_path: &str,
        query: &str,
        body: &[u8],
    ) -> Result<reqwest::Response> {
        let host = self.host();
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, uri_path, query, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region);
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let scheme = if self
            .endpoint_url
            .as_deref()
            .map(|e| e.starts_with("http://"))
            .unwrap_or(false)
        {
            "http"
        } else {
            "https"
        };
        let url = if query.is_empty() {
            format!("{}://{}{}", scheme, host, uri_path)
        } else {
            format!("{}://{}{}?{}", scheme, host, uri_path, query)
        };

        let mut req = match method {
            "GET" => self.client.get(&url),
            "PUT" => self.client.put(&url).body(body.to_vec()),
            other => bail!("unsupported S3 method: {}", other),
        };

        req = req
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        req.send()
            .await
            .with_context(|| format!("S3 request {} {} failed", method, uri_path))
    }

    fn encoded_path(&self, key: &str) -> String {
        let full = self.full_key(key);
        let encoded = full
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        format!("/{}", encoded)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let resp = self
            .signed_request("PUT", &self.encoded_path(key), "", data)
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .signed_request("GET", &self.encoded_path(key), "", b"")
            .await?;
        if !resp.status().is_success() {
            bail!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            );
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        let list_prefix = self.full_key(prefix);

        loop {
            let mut params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !list_prefix.is_empty() {
                params.push(("prefix".to_string(), list_prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                params.push(("continuation-token".to_string(), token.clone()));
            }

            // Canonical query string must be sorted by key.
            params.sort_by(|a, b| a.0.cmp(&b.0));
            let query: String = params
                .iter()
                .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
                .collect::<Vec<_>>()
                .join("&");

            let resp = self.signed_request("GET", "/", &query, b"").await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml = resp.text().await?;
            let page = parse_list_objects_response(&xml)?;
            keys.extend(
                page.keys
                    .iter()
                    .map(|k| self.strip_prefix(k).to_string())
                    .filter(|k| !k.is_empty()),
            );

            if page.is_truncated {
                continuation_token = page.next_token;
            } else {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// One page of a `ListObjectsV2` response.
struct ListPage {
    keys: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

/// Parse the XML body of a `ListObjectsV2` response.
fn parse_list_objects_response(xml: &str) -> Result<ListPage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListPage {
        keys: Vec::new(),
        is_truncated: false,
        next_token: None,
    };

    let mut in_contents = false;
    let mut current: Option<&'static str> = None;

    loop {
        match reader
            .read_event()
            .context("malformed S3 list response XML")?
        {
            Event::Start(ref e) => match e.name().as_ref() {
                b"Contents" => in_contents = true,
                b"Key" if in_contents => current = Some("key"),
                b"IsTruncated" => current = Some("truncated"),
                b"NextContinuationToken" => current = Some("token"),
                _ => current = None,
            },
            Event::Text(ref t) => {
                let text = t.unescape().context("bad entity in S3 list response")?;
                match current {
                    Some("key") => {
                        if !text.ends_with('/') {
                            page.keys.push(text.into_owned());
                        }
                    }
                    Some("truncated") => page.is_truncated = text.as_ref() == "true",
                    Some("token") => page.next_token = Some(text.into_owned()),
                    _ => {}
                }
            }
            Event::End(ref e) => {
                if e.name().as_ref() == b"Contents" {
                    in_contents = false;
                }
                current = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(page)
}

// ============ AWS SigV4 helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length; this branch is unreachable.
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the SigV4 signing key chain for a date and region.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, "s3")
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986: everything except unreserved characters.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
