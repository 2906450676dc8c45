//! Bucket policy documents
//!
//! Retention is enforced by the bucket itself, not by the broker: every
//! object under the upload prefix expires after `retention_days`. Browsers
//! talk to the bucket directly with signed URLs, so the bucket also needs a
//! CORS rule for the allowed origins. Both documents use the JSON shape
//! `aws s3api put-bucket-lifecycle-configuration` / `put-bucket-cors` accept.

use safesend_core::config::SafesendConfig;
use serde_json::{json, Value};

/// Preflight cache lifetime for the bucket CORS rule, in seconds
pub const BUCKET_CORS_MAX_AGE_SECS: u64 = 300;

/// Lifecycle configuration expiring every uploaded object.
pub fn lifecycle_document(config: &SafesendConfig) -> Value {
    let prefix = format!("{}/", config.storage.object_prefix.trim_matches('/'));
    json!({
        "Rules": [{
            "ID": "safesend-expire-uploads",
            "Filter": { "Prefix": prefix },
            "Status": "Enabled",
            "Expiration": { "Days": config.storage.retention_days },
            "AbortIncompleteMultipartUpload": { "DaysAfterInitiation": 1 },
        }]
    })
}

/// CORS configuration admitting signed PUT/GET from the allowed origins.
pub fn cors_document(config: &SafesendConfig) -> Value {
    json!({
        "CORSRules": [{
            "AllowedOrigins": config.broker.allowed_origins,
            "AllowedMethods": ["PUT", "GET"],
            "AllowedHeaders": ["*"],
            "ExposeHeaders": ["ETag"],
            "MaxAgeSeconds": BUCKET_CORS_MAX_AGE_SECS,
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SafesendConfig {
        let mut config = SafesendConfig::default();
        config.broker.allowed_origins = vec![
            "https://send.example.com".into(),
            "http://localhost:5173".into(),
        ];
        config
    }

    #[test]
    fn test_lifecycle_uses_retention_and_prefix() {
        let mut cfg = config();
        cfg.storage.retention_days = 7;
        cfg.storage.object_prefix = "/incoming/".into();
        let doc = lifecycle_document(&cfg);
        let rule = &doc["Rules"][0];
        assert_eq!(rule["Expiration"]["Days"], 7);
        assert_eq!(rule["Filter"]["Prefix"], "incoming/");
        assert_eq!(rule["Status"], "Enabled");
    }

    #[test]
    fn test_lifecycle_default_fourteen_days() {
        let doc = lifecycle_document(&config());
        assert_eq!(doc["Rules"][0]["Expiration"]["Days"], 14);
        assert_eq!(doc["Rules"][0]["Filter"]["Prefix"], "uploads/");
    }

    #[test]
    fn test_cors_lists_exact_origins() {
        let doc = cors_document(&config());
        let rule = &doc["CORSRules"][0];
        assert_eq!(
            rule["AllowedOrigins"],
            json!(["https://send.example.com", "http://localhost:5173"])
        );
        assert_eq!(rule["AllowedMethods"], json!(["PUT", "GET"]));
        assert_eq!(rule["MaxAgeSeconds"], 300);
    }
}
