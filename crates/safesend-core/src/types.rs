use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{SafesendError, SafesendResult};

/// Upper bound on locator length (S3 keys are limited to 1024 bytes)
pub const MAX_LOCATOR_LEN: usize = 1024;

/// Seconds since the Unix epoch
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Storage key of one ciphertext object, assigned by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectLocator(String);

impl ObjectLocator {
    /// Mint a fresh locator: `<prefix>/<unix_millis>-<uuid>.enc`.
    ///
    /// The random UUID keeps locators unique when several uploads are issued
    /// within the same millisecond.
    pub fn mint(prefix: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let suffix = uuid::Uuid::new_v4().simple();
        Self(format!(
            "{}/{millis}-{suffix}.enc",
            prefix.trim_matches('/')
        ))
    }

    /// Validate a caller-supplied locator that must live under `prefix`.
    pub fn parse(raw: &str, prefix: &str) -> SafesendResult<Self> {
        let locator = Self::parse_unscoped(raw)?;
        let scope = format!("{}/", prefix.trim_matches('/'));
        if !locator.0.starts_with(&scope) || locator.0.len() == scope.len() {
            return Err(SafesendError::validation(format!(
                "key must be an object under {scope}"
            )));
        }
        Ok(locator)
    }

    /// Validate the shape of a locator without checking its prefix.
    pub fn parse_unscoped(raw: &str) -> SafesendResult<Self> {
        if raw.is_empty() {
            return Err(SafesendError::validation("key is empty"));
        }
        if raw.len() > MAX_LOCATOR_LEN {
            return Err(SafesendError::validation(format!(
                "key exceeds {MAX_LOCATOR_LEN} bytes"
            )));
        }
        if raw.starts_with('/') {
            return Err(SafesendError::validation("key must be relative"));
        }
        if raw.chars().any(char::is_control) {
            return Err(SafesendError::validation("key contains control characters"));
        }
        if raw.split('/').any(|seg| seg == ".." || seg == ".") {
            return Err(SafesendError::validation("key contains dot segments"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single storage operation a grant authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GrantOp {
    Put,
    Get,
}

impl GrantOp {
    pub fn method(&self) -> &'static str {
        match self {
            GrantOp::Put => "PUT",
            GrantOp::Get => "GET",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GrantOp::Put => "upload",
            GrantOp::Get => "download",
        }
    }
}

/// A time-bounded capability for exactly one operation on exactly one object.
///
/// Never contains secret material; the signed URL only proves the broker's
/// permission to touch the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub op: GrantOp,
    pub locator: ObjectLocator,
    /// Presigned request URL
    pub url: String,
    /// Headers the caller must send with the request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Unix seconds after which the storage backend rejects the URL
    pub expires_at: u64,
    /// Largest body a PUT grant admits.
    ///
    /// Checked by well-behaved clients only: the presigned URL does not sign
    /// a content length, so the bucket accepts any size on a valid signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
}

impl AccessGrant {
    /// True only for the grant's own operation.
    pub fn authorizes(&self, op: GrantOp) -> bool {
        self.op == op
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Check that this grant may carry a PUT of `len` bytes.
    pub fn check_put(&self, len: u64) -> SafesendResult<()> {
        if !self.authorizes(GrantOp::Put) {
            return Err(SafesendError::validation(
                "grant does not authorize an upload",
            ));
        }
        match self.max_bytes {
            Some(max) if len > max => Err(SafesendError::validation(format!(
                "payload of {len} bytes exceeds the grant limit of {max} bytes"
            ))),
            _ => Ok(()),
        }
    }

    /// Check that this grant may carry a GET.
    pub fn check_get(&self) -> SafesendResult<()> {
        if !self.authorizes(GrantOp::Get) {
            return Err(SafesendError::validation(
                "grant does not authorize a download",
            ));
        }
        Ok(())
    }
}

/// Body of `200 /generate-upload-url`
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadGrantResponse {
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
    pub key: ObjectLocator,
    pub server_secret: String,
    pub expires_at: u64,
    /// Largest plaintext the deployment accepts
    pub max_bytes: u64,
    /// Largest envelope the PUT may carry: `max_bytes` plus worst-case
    /// envelope overhead. Advisory, like [`AccessGrant::max_bytes`].
    pub max_object_bytes: u64,
    #[serde(default)]
    pub upload_headers: BTreeMap<String, String>,
}

impl UploadGrantResponse {
    pub fn new(grant: AccessGrant, server_secret: String, max_plaintext_bytes: u64) -> Self {
        Self {
            upload_url: grant.url,
            key: grant.locator,
            server_secret,
            expires_at: grant.expires_at,
            max_bytes: max_plaintext_bytes,
            max_object_bytes: grant.max_bytes.unwrap_or_default(),
            upload_headers: grant.headers,
        }
    }

    /// The PUT capability carried by this response.
    pub fn grant(&self) -> AccessGrant {
        AccessGrant {
            op: GrantOp::Put,
            locator: self.key.clone(),
            url: self.upload_url.clone(),
            headers: self.upload_headers.clone(),
            expires_at: self.expires_at,
            max_bytes: Some(self.max_object_bytes),
        }
    }
}

impl std::fmt::Debug for UploadGrantResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadGrantResponse")
            .field("key", &self.key)
            .field("server_secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("max_bytes", &self.max_bytes)
            .field("max_object_bytes", &self.max_object_bytes)
            .finish_non_exhaustive()
    }
}

/// Body of `200 /generate-download-url`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadGrantResponse {
    #[serde(rename = "downloadURL")]
    pub download_url: String,
    pub expires_at: u64,
}

impl DownloadGrantResponse {
    pub fn new(grant: AccessGrant) -> Self {
        Self {
            download_url: grant.url,
            expires_at: grant.expires_at,
        }
    }

    /// The GET capability carried by this response.
    pub fn grant(&self, locator: ObjectLocator) -> AccessGrant {
        AccessGrant {
            op: GrantOp::Get,
            locator,
            url: self.download_url.clone(),
            headers: BTreeMap::new(),
            expires_at: self.expires_at,
            max_bytes: None,
        }
    }
}

/// Structured error body returned by the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(op: GrantOp) -> AccessGrant {
        AccessGrant {
            op,
            locator: ObjectLocator::parse_unscoped("uploads/1.enc").unwrap(),
            url: "https://s3.example.com/bucket/uploads/1.enc?X-Amz-Signature=abc".into(),
            headers: BTreeMap::new(),
            expires_at: 1_000,
            max_bytes: (op == GrantOp::Put).then_some(10),
        }
    }

    #[test]
    fn test_mint_shape() {
        let loc = ObjectLocator::mint("uploads");
        let s = loc.as_str();
        assert!(s.starts_with("uploads/"));
        assert!(s.ends_with(".enc"));
        let stem = &s["uploads/".len()..s.len() - ".enc".len()];
        let (millis, suffix) = stem.split_once('-').unwrap();
        assert!(millis.parse::<u128>().is_ok());
        assert_eq!(suffix.len(), 32);
        assert!(ObjectLocator::parse(s, "uploads").is_ok());
    }

    #[test]
    fn test_mint_unique_under_concurrency() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..250)
                        .map(|_| ObjectLocator::mint("uploads"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all = std::collections::HashSet::new();
        for h in handles {
            for loc in h.join().unwrap() {
                assert!(all.insert(loc), "locators must never collide");
            }
        }
        assert_eq!(all.len(), 2000);
    }

    #[test]
    fn test_parse_scoped() {
        assert!(ObjectLocator::parse("uploads/123.enc", "uploads").is_ok());
        assert!(ObjectLocator::parse("uploads/123.enc", "/uploads/").is_ok());
        assert!(ObjectLocator::parse("private/123.enc", "uploads").is_err());
        assert!(ObjectLocator::parse("uploads/", "uploads").is_err());
        assert!(ObjectLocator::parse("uploadsX/1.enc", "uploads").is_err());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "/uploads/1.enc", "uploads/../secret", "uploads/./1", "uploads/a\nb"] {
            let err = ObjectLocator::parse_unscoped(bad).unwrap_err();
            assert!(matches!(err, SafesendError::Validation(_)), "{bad:?}");
        }
        let long = format!("uploads/{}", "a".repeat(MAX_LOCATOR_LEN));
        assert!(ObjectLocator::parse_unscoped(&long).is_err());
    }

    #[test]
    fn test_grant_scoping() {
        let up = grant(GrantOp::Put);
        let down = grant(GrantOp::Get);

        assert!(up.authorizes(GrantOp::Put));
        assert!(!up.authorizes(GrantOp::Get));
        assert!(up.check_get().is_err());

        assert!(down.authorizes(GrantOp::Get));
        assert!(!down.authorizes(GrantOp::Put));
        assert!(down.check_put(1).is_err());
        assert!(down.check_get().is_ok());
    }

    #[test]
    fn test_check_put_size_boundary() {
        let up = grant(GrantOp::Put);
        assert!(up.check_put(10).is_ok(), "exactly at the limit is allowed");
        let err = up.check_put(11).unwrap_err();
        assert!(matches!(err, SafesendError::Validation(_)));
    }

    #[test]
    fn test_expiry() {
        let g = grant(GrantOp::Get);
        assert!(!g.is_expired(999));
        assert!(g.is_expired(1_000));
        assert!(g.is_expired(5_000));
    }

    #[test]
    fn test_upload_response_wire_names() {
        let resp = UploadGrantResponse::new(grant(GrantOp::Put), "ab".repeat(32), 8);
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("uploadURL").is_some());
        assert_eq!(json["key"], "uploads/1.enc");
        assert_eq!(json["serverSecret"], "ab".repeat(32));
        assert_eq!(json["maxBytes"], 8);
        assert_eq!(json["maxObjectBytes"], 10);

        let back: UploadGrantResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back.grant(), grant(GrantOp::Put));
    }

    #[test]
    fn test_upload_response_debug_redacts_secret() {
        let resp = UploadGrantResponse::new(grant(GrantOp::Put), "deadbeef".into(), 8);
        let dbg = format!("{resp:?}");
        assert!(!dbg.contains("deadbeef"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn test_download_response_wire_names() {
        let resp = DownloadGrantResponse::new(grant(GrantOp::Get));
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("downloadURL").is_some());
        assert_eq!(json["expiresAt"], 1_000);
    }
}
