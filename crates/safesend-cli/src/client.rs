//! HTTP side of the client: the broker API and grant-based object transfer

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ORIGIN;
use reqwest::{Response, StatusCode};
use safesend_core::types::{DownloadGrantResponse, ErrorBody, UploadGrantResponse};
use safesend_core::{AccessGrant, ObjectLocator, SafesendError, SafesendResult};
use url::Url;

use crate::flow::{GrantSource, ObjectTransport};

const BROKER_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BrokerClient {
    http: reqwest::Client,
    base: String,
    origin: String,
}

impl BrokerClient {
    /// `origin` is sent as the `Origin` header on every grant request.
    pub fn new(broker_url: &str, origin: &str) -> SafesendResult<Self> {
        let parsed = Url::parse(broker_url)
            .map_err(|e| SafesendError::configuration(format!("client.broker_url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SafesendError::configuration(
                "client.broker_url must be an http(s) URL",
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(BROKER_TIMEOUT)
            .build()
            .map_err(|e| SafesendError::configuration(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: broker_url.trim_end_matches('/').to_string(),
            origin: origin.to_string(),
        })
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> SafesendResult<T> {
        let response = self
            .http
            .get(format!("{}{path}", self.base))
            .query(query)
            .header(ORIGIN, &self.origin)
            .send()
            .await
            .map_err(|e| SafesendError::storage(None, format!("broker unreachable: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| SafesendError::storage(Some(status.as_u16()), format!("malformed broker response: {e}")));
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_else(|_| status.to_string());
        Err(match status {
            StatusCode::BAD_REQUEST => SafesendError::validation(message),
            StatusCode::FORBIDDEN => SafesendError::OriginRejected,
            _ => SafesendError::storage(Some(status.as_u16()), format!("broker: {message}")),
        })
    }
}

#[async_trait]
impl GrantSource for BrokerClient {
    async fn upload_grant(&self, filename: Option<&str>) -> SafesendResult<UploadGrantResponse> {
        let query: Vec<(&str, &str)> = filename.map(|f| ("filename", f)).into_iter().collect();
        self.request("/generate-upload-url", &query).await
    }

    async fn download_grant(
        &self,
        locator: &ObjectLocator,
    ) -> SafesendResult<DownloadGrantResponse> {
        self.request("/generate-download-url", &[("key", locator.as_str())])
            .await
    }
}

/// PUT/GET straight against the bucket with a presigned URL.
pub struct GrantTransport {
    http: reqwest::Client,
}

impl GrantTransport {
    pub fn new() -> SafesendResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| SafesendError::configuration(format!("building HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ObjectTransport for GrantTransport {
    async fn put(&self, grant: &AccessGrant, body: Vec<u8>) -> SafesendResult<()> {
        grant.check_put(body.len() as u64)?;
        let mut request = self.http.put(&grant.url).body(body);
        for (name, value) in &grant.headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SafesendError::storage(None, format!("upload failed: {e}")))?;
        check_storage_status(response, "upload").await.map(|_| ())
    }

    async fn get(&self, grant: &AccessGrant) -> SafesendResult<Vec<u8>> {
        grant.check_get()?;
        let response = self
            .http
            .get(&grant.url)
            .send()
            .await
            .map_err(|e| SafesendError::storage(None, format!("download failed: {e}")))?;
        let response = check_storage_status(response, "download").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SafesendError::storage(None, format!("download interrupted: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Non-2xx from the bucket carries its status. Expired signatures come back
/// as 403; those grants are never retried.
async fn check_storage_status(response: Response, action: &str) -> SafesendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let hint = match status {
        StatusCode::FORBIDDEN => "the grant was refused or has expired; start the flow again",
        StatusCode::NOT_FOUND => "the object does not exist or has expired from storage",
        _ => "storage backend error",
    };
    Err(SafesendError::storage(
        Some(status.as_u16()),
        format!("{action} rejected: {hint}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_url_validated() {
        assert!(BrokerClient::new("http://127.0.0.1:8080", "http://localhost:5173").is_ok());
        assert!(matches!(
            BrokerClient::new("not a url", "http://localhost:5173"),
            Err(SafesendError::Configuration(_))
        ));
        assert!(matches!(
            BrokerClient::new("ftp://broker", "http://localhost:5173"),
            Err(SafesendError::Configuration(_))
        ));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = BrokerClient::new("https://api.example.com/", "https://send.example.com")
            .unwrap();
        assert_eq!(client.base, "https://api.example.com");
    }
}
