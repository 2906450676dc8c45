//! Upload and download flows
//!
//! Secrets live only in locals of these functions: the server secret from
//! the grant response, the freshly generated client secret, and the key
//! derived from both. Nothing is cached between operations.

use async_trait::async_trait;
use safesend_core::types::{now_unix, DownloadGrantResponse, UploadGrantResponse};
use safesend_core::{
    compose_link, parse_link, AccessGrant, ObjectLocator, SafesendError, SafesendResult,
};
use safesend_crypto::{
    decrypt_bounded, derive_key, derive_key_from_hex, encrypt, generate_secret, EnvelopeParams,
    Secret,
};
use secrecy::ExposeSecret;
use tracing::{debug, info};

/// Where grants come from (the broker, in production).
#[async_trait]
pub trait GrantSource: Send + Sync {
    async fn upload_grant(&self, filename: Option<&str>) -> SafesendResult<UploadGrantResponse>;

    /// Only the locator is sent; the link secrets never leave the client.
    async fn download_grant(&self, locator: &ObjectLocator)
        -> SafesendResult<DownloadGrantResponse>;
}

/// Moves ciphertext with a grant.
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    async fn put(&self, grant: &AccessGrant, body: Vec<u8>) -> SafesendResult<()>;
    async fn get(&self, grant: &AccessGrant) -> SafesendResult<Vec<u8>>;
}

pub struct UploadOutcome {
    pub locator: ObjectLocator,
    pub ciphertext_bytes: u64,
    /// The shareable link. Holds both secrets; print it, never log it.
    link: String,
}

impl UploadOutcome {
    pub fn link(&self) -> &str {
        &self.link
    }
}

impl std::fmt::Debug for UploadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOutcome")
            .field("locator", &self.locator)
            .field("ciphertext_bytes", &self.ciphertext_bytes)
            .field("link", &"[REDACTED]")
            .finish()
    }
}

/// Encrypt `plaintext` and store it, returning the shareable link.
pub async fn upload(
    grants: &dyn GrantSource,
    transport: &dyn ObjectTransport,
    plaintext: &[u8],
    filename: Option<&str>,
    params: &EnvelopeParams,
    link_origin: &str,
) -> SafesendResult<UploadOutcome> {
    let response = grants.upload_grant(filename).await?;
    let grant = response.grant();
    // The cap applies to the plaintext and is checked before any crypto
    // work. The grant's own limit already includes envelope overhead.
    if plaintext.len() as u64 > response.max_bytes {
        return Err(SafesendError::validation(format!(
            "file of {} bytes exceeds the {}-byte upload limit",
            plaintext.len(),
            response.max_bytes
        )));
    }

    let server = Secret::from_hex(&response.server_secret)?;
    let client = generate_secret();
    let key = derive_key(&server, &client)?;
    let ciphertext = encrypt(plaintext, key.to_password().expose_secret().as_bytes(), params)?;
    drop(key);

    let len = ciphertext.len() as u64;
    grant.check_put(len)?;
    ensure_fresh(&grant)?;
    transport.put(&grant, ciphertext).await?;

    let link = compose_link(
        grant.locator.as_str(),
        &response.server_secret,
        &client.expose_hex(),
        link_origin,
    )?;
    info!(locator = %grant.locator, ciphertext_bytes = len, "upload complete");

    Ok(UploadOutcome {
        locator: grant.locator,
        ciphertext_bytes: len,
        link,
    })
}

/// Fetch and decrypt the object a link points at.
///
/// `max_bytes` caps the decrypted size.
pub async fn download(
    grants: &dyn GrantSource,
    transport: &dyn ObjectTransport,
    link: &str,
    max_bytes: u64,
) -> SafesendResult<(ObjectLocator, Vec<u8>)> {
    let parts = parse_link(link)?;
    let locator = ObjectLocator::parse_unscoped(&parts.locator)?;
    // Malformed secrets fail here, before any network traffic
    let key = derive_key_from_hex(&parts.server_secret, &parts.client_secret)?;

    let response = grants.download_grant(&locator).await?;
    let grant = response.grant(locator.clone());
    grant.check_get()?;
    ensure_fresh(&grant)?;
    let ciphertext = transport.get(&grant).await?;
    debug!(locator = %locator, ciphertext_bytes = ciphertext.len(), "ciphertext fetched");

    let plaintext = decrypt_bounded(
        &ciphertext,
        key.to_password().expose_secret().as_bytes(),
        Some(max_bytes),
    )?;
    info!(locator = %locator, plaintext_bytes = plaintext.len(), "download complete");
    Ok((locator, plaintext))
}

/// Expired grants are dead; the caller has to start over for a new one.
fn ensure_fresh(grant: &AccessGrant) -> SafesendResult<()> {
    if grant.is_expired(now_unix()) {
        return Err(SafesendError::storage(
            None,
            format!(
                "{} grant expired before use; start the {} again",
                grant.op.label(),
                grant.op.label()
            ),
        ));
    }
    Ok(())
}
