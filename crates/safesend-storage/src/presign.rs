//! Presigned access grants
//!
//! The broker never moves ciphertext itself. It hands out short-lived
//! signed URLs that let the caller perform exactly one operation on
//! exactly one object directly against the bucket.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use opendal::Operator;
use safesend_core::types::now_unix;
use safesend_core::{AccessGrant, GrantOp, ObjectLocator, SafesendError, SafesendResult};

/// Issues signed single-operation URLs for stored objects.
#[async_trait]
pub trait Presigner: Send + Sync {
    /// Sign `op` on `locator`, valid for `ttl`.
    ///
    /// The returned grant carries no size limit; callers add their own. S3
    /// cannot sign a content-length range on a presigned PUT, so any limit
    /// set on the grant is only honoured by cooperating clients.
    async fn presign(
        &self,
        op: GrantOp,
        locator: &ObjectLocator,
        ttl: Duration,
    ) -> SafesendResult<AccessGrant>;
}

#[async_trait]
impl Presigner for Operator {
    async fn presign(
        &self,
        op: GrantOp,
        locator: &ObjectLocator,
        ttl: Duration,
    ) -> SafesendResult<AccessGrant> {
        let signed = match op {
            GrantOp::Put => self.presign_write(locator.as_str(), ttl).await,
            GrantOp::Get => self.presign_read(locator.as_str(), ttl).await,
        }
        .map_err(map_presign_error)?;

        let mut headers = BTreeMap::new();
        for (name, value) in signed.header() {
            // Non-visible-ASCII header values cannot be replayed by a client
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        tracing::debug!(
            op = op.label(),
            locator = %locator,
            ttl_secs = ttl.as_secs(),
            "presigned storage request"
        );

        Ok(AccessGrant {
            op,
            locator: locator.clone(),
            url: signed.uri().to_string(),
            headers,
            expires_at: now_unix() + ttl.as_secs(),
            max_bytes: None,
        })
    }
}

fn map_presign_error(e: opendal::Error) -> SafesendError {
    match e.kind() {
        opendal::ErrorKind::Unsupported | opendal::ErrorKind::ConfigInvalid => {
            SafesendError::configuration(format!("storage backend cannot presign: {e}"))
        }
        _ => SafesendError::storage(None, format!("presign failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{build_operator, S3Credentials};

    fn s3() -> Operator {
        build_operator(
            "http://localhost:8333",
            "us-east-1",
            "safesend",
            &S3Credentials {
                access_key_id: "test-key".into(),
                secret_access_key: "test-secret".into(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_presign_put_signs_locally() {
        let locator = ObjectLocator::parse_unscoped("uploads/1.enc").unwrap();
        let before = now_unix();
        let grant = s3()
            .presign(GrantOp::Put, &locator, Duration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(grant.op, GrantOp::Put);
        assert_eq!(grant.locator, locator);
        assert!(grant.url.contains("uploads/1.enc"));
        assert!(grant.url.contains("X-Amz-Signature"));
        assert!(!grant.url.contains("test-secret"));
        assert!(grant.expires_at >= before + 300);
        assert!(grant.max_bytes.is_none());
        assert!(!grant.url.to_ascii_lowercase().contains("content-length"));
    }

    #[tokio::test]
    async fn test_presign_get_is_distinct_from_put() {
        let locator = ObjectLocator::parse_unscoped("uploads/2.enc").unwrap();
        let op = s3();
        let put = op
            .presign(GrantOp::Put, &locator, Duration::from_secs(300))
            .await
            .unwrap();
        let get = op
            .presign(GrantOp::Get, &locator, Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(get.op, GrantOp::Get);
        assert_ne!(put.url, get.url, "method is part of the signature");
    }

    #[tokio::test]
    async fn test_unsupported_backend_is_configuration_error() {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let locator = ObjectLocator::parse_unscoped("uploads/3.enc").unwrap();
        let err = op
            .presign(GrantOp::Get, &locator, Duration::from_secs(300))
            .await
            .unwrap_err();
        assert!(matches!(err, SafesendError::Configuration(_)));
    }
}
