use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{SafesendError, SafesendResult};

/// Top-level configuration (loaded from safesend.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafesendConfig {
    pub broker: BrokerConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// HTTP listen address for the grant endpoints (default: 127.0.0.1:8080)
    pub listen: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9101)
    pub metrics_addr: Option<String>,
    /// Origins permitted to request grants. Exact, case-sensitive match.
    pub allowed_origins: Vec<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding the encrypted objects
    pub bucket: String,
    /// Key prefix for minted locators (default: uploads)
    pub object_prefix: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Days before stored ciphertext expires from the bucket (default: 14)
    pub retention_days: u32,
    /// Largest ciphertext an upload grant admits, in bytes (default: 100 MiB)
    pub max_payload_bytes: u64,
}

/// Envelope encryption parameters used by the uploading client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// zstd compression level (default: 3)
    pub compression_level: i32,
    /// Bytes of compressed data per AEAD segment, 0 = single segment
    pub segment_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the grant broker
    pub broker_url: String,
    /// Origin presented to the broker, also the base of generated links
    pub origin: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".into(),
            metrics_addr: Some("127.0.0.1:9101".into()),
            allowed_origins: Vec::new(),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "safesend".into(),
            object_prefix: "uploads".into(),
            enforce_tls: false,
            retention_days: 14,
            max_payload_bytes: 100 * 1024 * 1024,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
            compression_level: 3,
            segment_size: 1024 * 1024,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_url: "http://127.0.0.1:8080".into(),
            origin: "http://localhost:5173".into(),
        }
    }
}

impl SafesendConfig {
    /// Read and parse a TOML config file. A missing file yields defaults.
    pub fn load(path: &Path) -> SafesendResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            SafesendError::configuration(format!("reading config {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            SafesendError::configuration(format!("parsing config {}: {e}", path.display()))
        })
    }

    /// Check everything the broker needs before it serves a single request.
    pub fn validate_broker(&self) -> SafesendResult<()> {
        if self.broker.allowed_origins.is_empty() {
            return Err(SafesendError::configuration(
                "broker.allowed_origins is empty; at least one origin is required",
            ));
        }
        if let Some(bad) = self
            .broker
            .allowed_origins
            .iter()
            .find(|o| o.trim().is_empty() || o.contains('*'))
        {
            return Err(SafesendError::configuration(format!(
                "broker.allowed_origins contains an invalid entry {bad:?}; wildcards are not allowed"
            )));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(SafesendError::configuration("storage.bucket is not set"));
        }
        if self.storage.endpoint.trim().is_empty() {
            return Err(SafesendError::configuration("storage.endpoint is not set"));
        }
        let prefix = self.storage.object_prefix.trim_matches('/');
        if prefix.is_empty() || prefix.contains("..") {
            return Err(SafesendError::configuration(
                "storage.object_prefix must be a non-empty relative prefix",
            ));
        }
        if self.storage.max_payload_bytes == 0 {
            return Err(SafesendError::configuration(
                "storage.max_payload_bytes must be greater than zero",
            ));
        }
        if self.storage.retention_days == 0 {
            return Err(SafesendError::configuration(
                "storage.retention_days must be greater than zero",
            ));
        }
        Ok(())
    }
}
