//! safesend-crypto: split-secret key derivation and the encryption envelope
//!
//! Key flow:
//! ```text
//! ServerSecret (256-bit, minted by the broker) ─┐
//!                                               ├─ HKDF-SHA256 ─→ DerivedKey ─→ envelope password
//! ClientSecret (256-bit, minted by the uploader)┘
//!
//! password ─ Argon2id(salt, params from header) ─→ XChaCha20-Poly1305 key
//! ```
//!
//! Pipeline: plaintext → zstd compress → segment → encrypt each segment → upload

pub mod envelope;
pub mod secrets;

pub use envelope::{
    decrypt, decrypt_bounded, encrypt, max_sealed_len, Compression, EnvelopeParams, KdfParams,
};
pub use secrets::{derive_key, derive_key_from_hex, generate_secret, DerivedKey, Secret};

/// Size of every secret and derived key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the Argon2id salt stored in the envelope header
pub const SALT_SIZE: usize = 16;
