//! OpenDAL Operator factory for the ciphertext bucket

use anyhow::{Context, Result};
use opendal::Operator;
use safesend_core::{SafesendError, SafesendResult};

/// S3 access key pair. Only the broker holds these.
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl S3Credentials {
    /// Resolve credentials through `lookup`, preferring the AWS_* names.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pick = |primary: &str, fallback: &str| {
            lookup(primary)
                .or_else(|| lookup(fallback))
                .filter(|v| !v.is_empty())
        };
        let access_key_id = pick("AWS_ACCESS_KEY_ID", "SAFESEND_ACCESS_KEY_ID").context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.\n\
             Example:\n\
             \texport AWS_ACCESS_KEY_ID=your-key\n\
             \texport AWS_SECRET_ACCESS_KEY=your-secret",
        )?;
        let secret_access_key = pick("AWS_SECRET_ACCESS_KEY", "SAFESEND_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        Ok(Self {
            access_key_id,
            secret_access_key,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::resolve(|name| std::env::var(name).ok())
    }
}

/// Build an OpenDAL Operator for S3 or any S3-compatible endpoint.
///
/// Path-style addressing (the opendal 0.55 default) keeps MinIO and
/// SeaweedFS working; do not enable virtual-host style for those.
pub fn build_operator(
    endpoint: &str,
    region: &str,
    bucket: &str,
    credentials: &S3Credentials,
) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(endpoint)
        .region(region)
        .bucket(bucket)
        .access_key_id(&credentials.access_key_id)
        .secret_access_key(&credentials.secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(3)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Build an operator from the `[storage]` config section.
///
/// If `enforce_tls` is true and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_from_core_config(
    storage: &safesend_core::config::StorageConfig,
    credentials: &S3Credentials,
) -> Result<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP; signed URLs and credentials travel unencrypted. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }

    build_operator(
        &storage.endpoint,
        &storage.region,
        &storage.bucket,
        credentials,
    )
}

/// Load credentials from the environment and build the operator.
pub fn build_operator_from_env(
    storage: &safesend_core::config::StorageConfig,
) -> Result<Operator> {
    let credentials = S3Credentials::from_env()?;
    build_from_core_config(storage, &credentials).context("building storage operator")
}

/// Probe the bucket with one list call.
///
/// Presigning is computed locally, so this is the only request that tells
/// the broker whether its credentials and bucket actually work.
pub async fn probe_bucket(op: &Operator) -> SafesendResult<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| SafesendError::storage(None, format!("bucket probe failed: {}", e.kind())))
}
