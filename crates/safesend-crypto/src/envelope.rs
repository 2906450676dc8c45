//! Password-keyed authenticated encryption envelope
//!
//! Envelope format (binary):
//! ```text
//! [64-byte header][segment 0][segment 1]...[segment n-1]
//!
//! header:
//!   0..4    magic "SSND"
//!   4       format version (1)
//!   5       compression (0 = none, 1 = zstd)
//!   6       kdf (1 = Argon2id v1.3)
//!   7       reserved (0)
//!   8..12   Argon2 memory cost KiB   (u32 BE)
//!   12..16  Argon2 time cost         (u32 BE)
//!   16..20  Argon2 parallelism       (u32 BE)
//!   20..24  segment size             (u32 BE, 0 = single segment)
//!   24..40  salt
//!   40..64  base nonce
//!
//! segment i: XChaCha20-Poly1305(compressed[i*size..(i+1)*size]) incl. 16-byte tag
//!   nonce = base nonce with the last 8 bytes XOR i (u64 BE)
//!   AAD   = header || i (u64 BE) || final flag (1 byte)
//! ```
//!
//! The header is authenticated with every segment, so editing any parameter,
//! reordering segments, or truncating the tail fails decryption. Decryption
//! only needs the password; everything else is read back from the header.
//!
//! Processing is single-shot in memory: the working set is bounded by the
//! caller's maximum payload size (plaintext + compressed copy + ciphertext).
//! The segment layout already lets a streaming reader or writer process one
//! segment at a time without a format change.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use safesend_core::config::CryptoConfig;
use safesend_core::{SafesendError, SafesendResult};
use std::io::Read;
use zeroize::Zeroizing;

use crate::{KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};

pub const MAGIC: &[u8; 4] = b"SSND";
pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 64;

const KDF_ARGON2ID: u8 = 1;
const COMPRESSION_NONE: u8 = 0;
const COMPRESSION_ZSTD: u8 = 1;

/// Bounds applied to header KDF parameters before any work is done
pub const MAX_MEM_COST_KIB: u32 = 1 << 20;
pub const MAX_TIME_COST: u32 = 10;
pub const MAX_PARALLELISM: u32 = 16;

/// Argon2id parameters for the password → key step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    fn in_bounds(&self) -> bool {
        (1..=MAX_MEM_COST_KIB).contains(&self.mem_cost_kib)
            && (1..=MAX_TIME_COST).contains(&self.time_cost)
            && (1..=MAX_PARALLELISM).contains(&self.parallelism)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    /// zstd at the given level
    Zstd(i32),
}

/// Everything the encrypting side chooses; all of it lands in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeParams {
    pub kdf: KdfParams,
    pub compression: Compression,
    /// Compressed bytes per segment, 0 = one segment
    pub segment_size: u32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            compression: Compression::Zstd(3),
            segment_size: 1024 * 1024,
        }
    }
}

impl EnvelopeParams {
    pub fn from_config(cfg: &CryptoConfig) -> Self {
        Self {
            kdf: KdfParams {
                mem_cost_kib: cfg.argon2_mem_cost_kib,
                time_cost: cfg.argon2_time_cost,
                parallelism: cfg.argon2_parallelism,
            },
            compression: Compression::Zstd(cfg.compression_level),
            segment_size: cfg.segment_size,
        }
    }
}

struct Header {
    compression: u8,
    kdf: KdfParams,
    segment_size: u32,
    salt: [u8; SALT_SIZE],
    nonce: [u8; NONCE_SIZE],
}

impl Header {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(MAGIC);
        out[4] = FORMAT_VERSION;
        out[5] = self.compression;
        out[6] = KDF_ARGON2ID;
        out[8..12].copy_from_slice(&self.kdf.mem_cost_kib.to_be_bytes());
        out[12..16].copy_from_slice(&self.kdf.time_cost.to_be_bytes());
        out[16..20].copy_from_slice(&self.kdf.parallelism.to_be_bytes());
        out[20..24].copy_from_slice(&self.segment_size.to_be_bytes());
        out[24..40].copy_from_slice(&self.salt);
        out[40..64].copy_from_slice(&self.nonce);
        out
    }

    /// Parse and sanity-check a header. `None` for anything unexpected.
    fn parse(bytes: &[u8; HEADER_SIZE]) -> Option<Self> {
        if &bytes[0..4] != MAGIC || bytes[4] != FORMAT_VERSION || bytes[6] != KDF_ARGON2ID {
            return None;
        }
        if !matches!(bytes[5], COMPRESSION_NONE | COMPRESSION_ZSTD) || bytes[7] != 0 {
            return None;
        }
        let be = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let kdf = KdfParams {
            mem_cost_kib: be(8),
            time_cost: be(12),
            parallelism: be(16),
        };
        if !kdf.in_bounds() {
            return None;
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[24..40]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[40..64]);
        Some(Self {
            compression: bytes[5],
            kdf,
            segment_size: be(20),
            salt,
            nonce,
        })
    }
}

/// Largest envelope [`encrypt`] can produce for a plaintext of up to
/// `plaintext_max` bytes split into `segment_size`-byte segments.
///
/// Covers incompressible input: zstd's worst-case expansion plus the header
/// and one tag per segment.
pub fn max_sealed_len(plaintext_max: u64, segment_size: u32) -> u64 {
    let body = usize::try_from(plaintext_max)
        .map(|n| zstd::zstd_safe::compress_bound(n) as u64)
        .unwrap_or(u64::MAX)
        .max(plaintext_max);
    let segments = match segment_size {
        0 => 1,
        size => body.div_ceil(u64::from(size)).max(1),
    };
    (HEADER_SIZE as u64)
        .saturating_add(body)
        .saturating_add(segments.saturating_mul(TAG_SIZE as u64))
}

/// Compress and encrypt `plaintext` under `password`.
pub fn encrypt(
    plaintext: &[u8],
    password: &[u8],
    params: &EnvelopeParams,
) -> SafesendResult<Vec<u8>> {
    if !params.kdf.in_bounds() {
        return Err(SafesendError::validation(format!(
            "Argon2id parameters out of range: {:?}",
            params.kdf
        )));
    }

    let (compression, body) = match params.compression {
        Compression::None => (COMPRESSION_NONE, plaintext.to_vec()),
        Compression::Zstd(level) => (
            COMPRESSION_ZSTD,
            zstd::encode_all(plaintext, level)
                .map_err(|e| anyhow::anyhow!("zstd compress: {e}"))?,
        ),
    };

    let mut header = Header {
        compression,
        kdf: params.kdf.clone(),
        segment_size: params.segment_size,
        salt: [0u8; SALT_SIZE],
        nonce: [0u8; NONCE_SIZE],
    };
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut header.salt);
    rng.fill_bytes(&mut header.nonce);
    let header_bytes = header.to_bytes();

    let key = derive_envelope_key(password, &header.salt, &header.kdf)
        .map_err(|e| SafesendError::validation(format!("Argon2id parameters rejected: {e}")))?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

    let segments: Vec<&[u8]> = if params.segment_size == 0 || body.is_empty() {
        vec![&body[..]]
    } else {
        body.chunks(params.segment_size as usize).collect()
    };
    let last = segments.len() - 1;

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len() + segments.len() * TAG_SIZE);
    out.extend_from_slice(&header_bytes);
    for (index, segment) in segments.into_iter().enumerate() {
        let index = index as u64;
        let nonce = segment_nonce(&header.nonce, index);
        let aad = segment_aad(&header_bytes, index, index == last as u64);
        let sealed = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: segment,
                    aad: &aad,
                },
            )
            .map_err(|e| anyhow::anyhow!("segment encryption failed: {e}"))?;
        out.extend_from_slice(&sealed);
    }

    tracing::debug!(
        plaintext_bytes = plaintext.len(),
        envelope_bytes = out.len(),
        segments = last + 1,
        "envelope sealed"
    );
    Ok(out)
}

/// Authenticate and decrypt an envelope.
pub fn decrypt(ciphertext: &[u8], password: &[u8]) -> SafesendResult<Vec<u8>> {
    decrypt_bounded(ciphertext, password, None)
}

/// Like [`decrypt`], but refuse to produce more than `limit` plaintext bytes.
///
/// Plaintext is only returned once every segment has authenticated.
pub fn decrypt_bounded(
    ciphertext: &[u8],
    password: &[u8],
    limit: Option<u64>,
) -> SafesendResult<Vec<u8>> {
    if ciphertext.len() < HEADER_SIZE + TAG_SIZE {
        return Err(SafesendError::Decryption);
    }
    let (header_slice, body) = ciphertext.split_at(HEADER_SIZE);
    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(header_slice);
    let header = Header::parse(&header_bytes).ok_or(SafesendError::Decryption)?;

    let key = derive_envelope_key(password, &header.salt, &header.kdf)
        .map_err(|_| SafesendError::Decryption)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

    let sealed_len = match header.segment_size {
        0 => body.len(),
        size => size as usize + TAG_SIZE,
    };

    let mut compressed = Zeroizing::new(Vec::with_capacity(body.len()));
    let mut offset = 0usize;
    let mut index = 0u64;
    while offset < body.len() {
        let end = offset + sealed_len.min(body.len() - offset);
        let sealed = &body[offset..end];
        if sealed.len() < TAG_SIZE {
            return Err(SafesendError::Decryption);
        }
        let is_final = end == body.len();
        let nonce = segment_nonce(&header.nonce, index);
        let aad = segment_aad(&header_bytes, index, is_final);
        let plain = cipher
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| SafesendError::Decryption)?;
        compressed.extend_from_slice(&plain);
        offset = end;
        index += 1;
    }

    let plaintext = match header.compression {
        COMPRESSION_ZSTD => decompress_bounded(&compressed, limit)?,
        _ => {
            check_limit(compressed.len() as u64, limit)?;
            compressed.to_vec()
        }
    };

    tracing::debug!(
        envelope_bytes = ciphertext.len(),
        plaintext_bytes = plaintext.len(),
        segments = index,
        "envelope opened"
    );
    Ok(plaintext)
}

/// Argon2id(password, salt) → 256-bit key, wiped on drop.
fn derive_envelope_key(
    password: &[u8],
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> anyhow::Result<Zeroizing<[u8; KEY_SIZE]>> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| anyhow::anyhow!("invalid Argon2id params: {e}"))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password, salt, &mut key[..])
        .map_err(|e| anyhow::anyhow!("Argon2id KDF failed: {e}"))?;
    Ok(key)
}

fn segment_nonce(base: &[u8; NONCE_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    for (b, i) in nonce[NONCE_SIZE - 8..].iter_mut().zip(index.to_be_bytes()) {
        *b ^= i;
    }
    nonce
}

/// AAD: header || segment index (8 bytes BE) || final flag
fn segment_aad(header: &[u8; HEADER_SIZE], index: u64, is_final: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(HEADER_SIZE + 9);
    aad.extend_from_slice(header);
    aad.extend_from_slice(&index.to_be_bytes());
    aad.push(is_final as u8);
    aad
}

fn decompress_bounded(compressed: &[u8], limit: Option<u64>) -> SafesendResult<Vec<u8>> {
    let decoder = zstd::stream::read::Decoder::new(compressed)
        .map_err(|_| SafesendError::Decryption)?;
    let mut out = Vec::new();
    match limit {
        Some(max) => {
            decoder
                .take(max.saturating_add(1))
                .read_to_end(&mut out)
                .map_err(|_| SafesendError::Decryption)?;
            check_limit(out.len() as u64, limit)?;
        }
        None => {
            let mut decoder = decoder;
            decoder
                .read_to_end(&mut out)
                .map_err(|_| SafesendError::Decryption)?;
        }
    }
    Ok(out)
}

fn check_limit(len: u64, limit: Option<u64>) -> SafesendResult<()> {
    match limit {
        Some(max) if len > max => Err(SafesendError::validation(format!(
            "decrypted payload exceeds the {max}-byte limit"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Cheap Argon2id settings so the tests stay fast
    fn fast_params() -> EnvelopeParams {
        EnvelopeParams {
            kdf: KdfParams {
                mem_cost_kib: 64,
                time_cost: 1,
                parallelism: 1,
            },
            compression: Compression::Zstd(1),
            segment_size: 0,
        }
    }

    fn segmented(segment_size: u32) -> EnvelopeParams {
        EnvelopeParams {
            segment_size,
            ..fast_params()
        }
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let plaintext = b"hello, encrypted world!";
        let sealed = encrypt(plaintext, b"S1C1", &fast_params()).unwrap();
        let opened = decrypt(&sealed, b"S1C1").unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_roundtrip_empty() {
        for params in [fast_params(), segmented(16)] {
            let sealed = encrypt(b"", b"pw", &params).unwrap();
            assert_eq!(decrypt(&sealed, b"pw").unwrap(), b"");
        }
        let raw = EnvelopeParams {
            compression: Compression::None,
            ..segmented(16)
        };
        let sealed = encrypt(b"", b"pw", &raw).unwrap();
        assert_eq!(sealed.len(), HEADER_SIZE + TAG_SIZE);
        assert_eq!(decrypt(&sealed, b"pw").unwrap(), b"");
    }

    #[test]
    fn test_roundtrip_multi_segment() {
        let data: Vec<u8> = (0..50_000u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        let sealed = encrypt(&data, b"pw", &segmented(1000)).unwrap();
        assert_eq!(decrypt(&sealed, b"pw").unwrap(), data);
    }

    #[test]
    fn test_uncompressed_size() {
        let params = EnvelopeParams {
            compression: Compression::None,
            ..segmented(100)
        };
        let sealed = encrypt(&[7u8; 250], b"pw", &params).unwrap();
        // header + 3 segments (100, 100, 50) each with a tag
        assert_eq!(sealed.len(), HEADER_SIZE + 250 + 3 * TAG_SIZE);
        assert_eq!(decrypt(&sealed, b"pw").unwrap(), vec![7u8; 250]);
    }

    #[test]
    fn test_exact_segment_multiple() {
        let params = EnvelopeParams {
            compression: Compression::None,
            ..segmented(10)
        };
        let sealed = encrypt(&[1u8; 30], b"pw", &params).unwrap();
        assert_eq!(sealed.len(), HEADER_SIZE + 30 + 3 * TAG_SIZE);
        assert_eq!(decrypt(&sealed, b"pw").unwrap(), vec![1u8; 30]);
    }

    #[test]
    fn test_header_self_describes() {
        let sealed = encrypt(b"data", b"pw", &segmented(4096)).unwrap();
        assert_eq!(&sealed[0..4], MAGIC);
        assert_eq!(sealed[4], FORMAT_VERSION);
        assert_eq!(sealed[5], COMPRESSION_ZSTD);
        assert_eq!(&sealed[8..12], &64u32.to_be_bytes());
        assert_eq!(&sealed[20..24], &4096u32.to_be_bytes());
    }

    #[test]
    fn test_nonce_and_salt_fresh_per_call() {
        let a = encrypt(b"same", b"pw", &fast_params()).unwrap();
        let b = encrypt(b"same", b"pw", &fast_params()).unwrap();
        assert_ne!(a, b, "salt and nonce must be random");
    }

    #[test]
    fn test_wrong_password() {
        let sealed = encrypt(b"secret data", b"S1C1", &fast_params()).unwrap();
        let err = decrypt(&sealed, b"S2C2").unwrap_err();
        assert!(matches!(err, SafesendError::Decryption));
    }

    #[test]
    fn test_every_single_byte_flip_detected() {
        let plaintext = b"0123456789";
        let sealed = encrypt(plaintext, b"S1C1", &segmented(8)).unwrap();
        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0xFF;
            let err = decrypt(&tampered, b"S1C1").unwrap_err();
            assert!(
                matches!(err, SafesendError::Decryption),
                "flip at byte {i} must fail with a decryption error"
            );
        }
    }

    #[test]
    fn test_truncation_detected() {
        let params = EnvelopeParams {
            compression: Compression::None,
            ..segmented(10)
        };
        let sealed = encrypt(&[3u8; 25], b"pw", &params).unwrap();

        // drop the final segment entirely
        let cut = HEADER_SIZE + 2 * (10 + TAG_SIZE);
        assert!(matches!(
            decrypt(&sealed[..cut], b"pw"),
            Err(SafesendError::Decryption)
        ));
        // drop a single trailing byte
        assert!(matches!(
            decrypt(&sealed[..sealed.len() - 1], b"pw"),
            Err(SafesendError::Decryption)
        ));
        // header only
        assert!(matches!(
            decrypt(&sealed[..HEADER_SIZE], b"pw"),
            Err(SafesendError::Decryption)
        ));
    }

    #[test]
    fn test_segment_reorder_detected() {
        let params = EnvelopeParams {
            compression: Compression::None,
            ..segmented(10)
        };
        let sealed = encrypt(&[9u8; 30], b"pw", &params).unwrap();
        let seg = 10 + TAG_SIZE;
        let mut swapped = sealed[..HEADER_SIZE].to_vec();
        swapped.extend_from_slice(&sealed[HEADER_SIZE + seg..HEADER_SIZE + 2 * seg]);
        swapped.extend_from_slice(&sealed[HEADER_SIZE..HEADER_SIZE + seg]);
        swapped.extend_from_slice(&sealed[HEADER_SIZE + 2 * seg..]);
        assert!(matches!(
            decrypt(&swapped, b"pw"),
            Err(SafesendError::Decryption)
        ));
    }

    #[test]
    fn test_garbage_input() {
        assert!(matches!(decrypt(b"", b"pw"), Err(SafesendError::Decryption)));
        assert!(matches!(
            decrypt(&[0u8; 200], b"pw"),
            Err(SafesendError::Decryption)
        ));
    }

    #[test]
    fn test_oversized_kdf_params_rejected_before_work() {
        let mut sealed = encrypt(b"data", b"pw", &fast_params()).unwrap();
        sealed[8..12].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            decrypt(&sealed, b"pw"),
            Err(SafesendError::Decryption)
        ));
    }

    #[test]
    fn test_encrypt_rejects_out_of_range_params() {
        let mut params = fast_params();
        params.kdf.time_cost = MAX_TIME_COST + 1;
        assert!(matches!(
            encrypt(b"x", b"pw", &params),
            Err(SafesendError::Validation(_))
        ));
    }

    #[test]
    fn test_decrypt_bounded_limit() {
        let data = vec![0u8; 10_000];
        let sealed = encrypt(&data, b"pw", &fast_params()).unwrap();
        assert_eq!(decrypt_bounded(&sealed, b"pw", Some(10_000)).unwrap(), data);
        assert!(matches!(
            decrypt_bounded(&sealed, b"pw", Some(9_999)),
            Err(SafesendError::Validation(_))
        ));
    }

    #[test]
    fn test_max_sealed_len_covers_incompressible_input() {
        let mut rng = rand::thread_rng();
        for segment_size in [0u32, 8, 1000, 1024 * 1024] {
            for len in [0usize, 1, 1024, 70_000] {
                let mut data = vec![0u8; len];
                rng.fill_bytes(&mut data);
                for compression in [Compression::None, Compression::Zstd(3)] {
                    let params = EnvelopeParams {
                        compression,
                        ..segmented(segment_size)
                    };
                    let sealed = encrypt(&data, b"pw", &params).unwrap();
                    let bound = max_sealed_len(len as u64, segment_size);
                    assert!(
                        sealed.len() as u64 <= bound,
                        "{len} bytes at segment size {segment_size}: {} > {bound}",
                        sealed.len()
                    );
                }
            }
        }
    }

    #[test]
    fn test_max_sealed_len_shape() {
        assert!(max_sealed_len(1024, 0) > 1024 + (HEADER_SIZE + TAG_SIZE) as u64);
        assert!(max_sealed_len(1024, 16) > max_sealed_len(1024, 0));
        assert_eq!(max_sealed_len(u64::MAX, 0), u64::MAX);
    }

    #[test]
    fn test_params_from_config() {
        let cfg = CryptoConfig::default();
        let params = EnvelopeParams::from_config(&cfg);
        assert_eq!(params.kdf, KdfParams::default());
        assert_eq!(params.compression, Compression::Zstd(3));
        assert_eq!(params.segment_size, 1024 * 1024);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn envelope_roundtrip(
            data in proptest::collection::vec(any::<u8>(), 0..=4096),
            segment in prop_oneof![Just(0u32), 1u32..=512],
            password in proptest::collection::vec(any::<u8>(), 0..=64),
        ) {
            let sealed = encrypt(&data, &password, &segmented(segment)).unwrap();
            let opened = decrypt(&sealed, &password).unwrap();
            prop_assert_eq!(opened, data);
        }
    }
}
