//! Secret shares and the key derived from them
//!
//! Neither share alone says anything about the derived key: the server share
//! travels in the link query, the client share only in the link fragment.

use hkdf::Hkdf;
use rand::RngCore;
use safesend_core::{SafesendError, SafesendResult};
use secrecy::SecretString;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// HKDF salt; pins derivations to this protocol version
const DERIVE_SALT: &[u8] = b"safesend/v1/link-key";
/// HKDF info; names what the output key is used for
const DERIVE_INFO: &[u8] = b"safesend envelope password";

/// A 256-bit random secret share. Zeroized on drop.
#[derive(Clone)]
pub struct Secret {
    bytes: [u8; KEY_SIZE],
}

impl Secret {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Parse the 64-character hex encoding of a share.
    pub fn from_hex(encoded: &str) -> SafesendResult<Self> {
        if encoded.is_empty() {
            return Err(SafesendError::validation("secret is missing"));
        }
        if encoded.len() != KEY_SIZE * 2 {
            return Err(SafesendError::validation(format!(
                "secret must be {} hex characters, got {}",
                KEY_SIZE * 2,
                encoded.len()
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        hex::decode_to_slice(encoded, &mut bytes)
            .map_err(|_| SafesendError::validation("secret is not valid hex"))?;
        Ok(Self { bytes })
    }

    /// Lowercase hex encoding. Only call this at a disclosure point.
    pub fn expose_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The key both parties derive independently from the two shares.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Envelope password: the lowercase hex encoding of the key.
    pub fn to_password(&self) -> SecretString {
        SecretString::from(hex::encode(self.bytes))
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit secret share from the OS-seeded CSPRNG.
pub fn generate_secret() -> Secret {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    Secret::from_bytes(bytes)
}

/// Derive the envelope key from the server and client shares.
///
/// HKDF-SHA256 over `server || client`. The order is part of the definition:
/// `derive_key(a, b)` and `derive_key(b, a)` are different keys.
pub fn derive_key(server: &Secret, client: &Secret) -> SafesendResult<DerivedKey> {
    let mut ikm = [0u8; KEY_SIZE * 2];
    ikm[..KEY_SIZE].copy_from_slice(server.as_bytes());
    ikm[KEY_SIZE..].copy_from_slice(client.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(DERIVE_SALT), &ikm);
    ikm.zeroize();

    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(DERIVE_INFO, &mut okm)
        .map_err(|e| anyhow::anyhow!("HKDF expand failed: {e}"))?;
    Ok(DerivedKey { bytes: okm })
}

/// Parse both hex shares and derive the key.
pub fn derive_key_from_hex(server_hex: &str, client_hex: &str) -> SafesendResult<DerivedKey> {
    let server = Secret::from_hex(server_hex)?;
    let client = Secret::from_hex(client_hex)?;
    derive_key(&server, &client)
}
