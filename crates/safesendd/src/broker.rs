//! ObjectBroker: origin-checked issuance of scoped, time-bounded grants
//!
//! The broker keeps no per-request state. An upload grant mints a fresh
//! locator and server secret and is never recorded; the secret exists only
//! in the response body. Expiry is enforced by the storage signature, so an
//! abandoned grant needs no cleanup.

use std::sync::Arc;
use std::time::Duration;

use safesend_core::types::{DownloadGrantResponse, UploadGrantResponse};
use safesend_core::{
    GrantOp, ObjectLocator, SafesendError, SafesendResult, GRANT_TTL_SECS,
};
use safesend_crypto::max_sealed_len;
use safesend_storage::Presigner;
use tracing::{info, warn};

use crate::metrics::BrokerMetrics;
use crate::origin::{OriginDecision, OriginGuard};

const MAX_FILENAME_CHARS: usize = 255;

pub struct ObjectBroker {
    presigner: Arc<dyn Presigner>,
    guard: OriginGuard,
    object_prefix: String,
    max_payload_bytes: u64,
    max_object_bytes: u64,
    metrics: BrokerMetrics,
}

impl ObjectBroker {
    /// `segment_size` is the envelope segment size uploaders are configured
    /// with; it sizes the per-segment overhead the PUT grant has to admit.
    pub fn new(
        presigner: Arc<dyn Presigner>,
        guard: OriginGuard,
        object_prefix: &str,
        max_payload_bytes: u64,
        segment_size: u32,
        metrics: BrokerMetrics,
    ) -> Self {
        Self {
            presigner,
            guard,
            object_prefix: object_prefix.trim_matches('/').to_string(),
            max_payload_bytes,
            max_object_bytes: max_sealed_len(max_payload_bytes, segment_size),
            metrics,
        }
    }

    pub fn guard(&self) -> &OriginGuard {
        &self.guard
    }

    /// Issue a PUT grant for a freshly minted locator plus a new server secret.
    pub async fn request_upload_grant(
        &self,
        filename: Option<&str>,
        origin: Option<&str>,
    ) -> SafesendResult<UploadGrantResponse> {
        self.authorize(origin)?;

        let locator = ObjectLocator::mint(&self.object_prefix);
        let mut grant = self
            .presign(GrantOp::Put, &locator)
            .await?;
        grant.max_bytes = Some(self.max_object_bytes);
        if let Some(disposition) = filename.and_then(content_disposition) {
            grant
                .headers
                .insert("content-disposition".to_string(), disposition);
        }

        let server_secret = safesend_crypto::generate_secret();
        self.metrics.grant_issued(GrantOp::Put);
        info!(
            locator = %locator,
            origin = origin.unwrap_or_default(),
            max_bytes = self.max_payload_bytes,
            max_object_bytes = self.max_object_bytes,
            ttl_secs = GRANT_TTL_SECS,
            "upload grant issued"
        );
        Ok(UploadGrantResponse::new(
            grant,
            server_secret.expose_hex(),
            self.max_payload_bytes,
        ))
    }

    /// Issue a GET grant for an existing locator. No secret is re-disclosed.
    pub async fn request_download_grant(
        &self,
        locator: Option<&str>,
        origin: Option<&str>,
    ) -> SafesendResult<DownloadGrantResponse> {
        self.authorize(origin)?;

        let raw = locator
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SafesendError::validation("missing key"))?;
        let locator = ObjectLocator::parse(raw, &self.object_prefix)?;

        let grant = self.presign(GrantOp::Get, &locator).await?;
        self.metrics.grant_issued(GrantOp::Get);
        info!(
            locator = %locator,
            origin = origin.unwrap_or_default(),
            ttl_secs = GRANT_TTL_SECS,
            "download grant issued"
        );
        Ok(DownloadGrantResponse::new(grant))
    }

    /// Origin check shared by every endpoint; counts and logs rejections.
    pub fn authorize(&self, origin: Option<&str>) -> SafesendResult<()> {
        match self.guard.check(origin) {
            OriginDecision::Allowed => Ok(()),
            OriginDecision::Denied => {
                self.metrics.origin_rejected();
                warn!(origin = origin.unwrap_or("<none>"), "origin rejected");
                Err(SafesendError::OriginRejected)
            }
        }
    }

    async fn presign(
        &self,
        op: GrantOp,
        locator: &ObjectLocator,
    ) -> SafesendResult<safesend_core::AccessGrant> {
        let grant = self
            .presigner
            .presign(op, locator, Duration::from_secs(GRANT_TTL_SECS))
            .await;
        if grant.is_err() {
            self.metrics.grant_failed();
        }
        grant
    }
}

/// `attachment` disposition for an uploader-supplied filename.
///
/// Directory components are dropped. The quoted form keeps printable ASCII
/// only; the RFC 5987 form carries the full name. `None` if nothing is left.
fn content_disposition(filename: &str) -> Option<String> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let base: String = base
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FILENAME_CHARS)
        .collect();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    let ascii: String = base
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    Some(format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(&base)
    ))
}
