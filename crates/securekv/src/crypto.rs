//! AES-256-GCM sealing and PBKDF2 key derivation using `ring`.
//!
//! Used by the file-backed [`SqliteVault`](crate::vault::SqliteVault) so that
//! payloads never reach disk in the clear. The platform keychain does its own
//! encryption and never calls into this module.
//!
//! - Every seal draws a fresh random 96-bit nonce.
//! - PBKDF2-HMAC-SHA256 runs 600,000 iterations (OWASP 2023).

use std::num::NonZeroU32;

use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the PBKDF2 salt in bytes.
pub const SALT_LEN: usize = 32;

const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(600_000) {
    Some(n) => n,
    None => unreachable!(),
};

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

/// Application salt mixed into the device-derived key. Changing it makes
/// every existing file vault unreadable.
const DEVICE_SALT: &[u8; SALT_LEN] = b"securekv-device-key-v1\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";

/// Crypto failures. Deliberately vague: callers learn that an operation
/// failed, not why.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key must be {KEY_LEN} bytes, got {0}")]
    KeyLength(usize),

    #[error("failed to seal payload")]
    Seal,

    #[error("failed to open payload: wrong key or corrupted data")]
    Open,

    #[error("system random number generator failed")]
    Random,
}

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// Yields exactly one nonce, then errors. Each sealing key is used once.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Seal `plaintext` under `key`. Returns `(nonce, ciphertext || tag)`.
pub fn encrypt(
    plaintext: &[u8],
    key: &[u8],
) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>), CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::KeyLength(key.len()));
    }

    let mut nonce = [0u8; NONCE_LEN_BYTES];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| CryptoError::Random)?;

    let unbound = UnboundKey::new(AEAD_ALG, key).map_err(|_| CryptoError::Seal)?;
    let mut sealing_key = SealingKey::new(unbound, SingleNonce(Some(nonce)));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Seal)?;

    tracing::trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = in_out.len(),
        "sealed payload"
    );

    Ok((nonce, in_out))
}

/// Open `ciphertext` (tag included) sealed with `nonce` under `key`.
pub fn decrypt(
    nonce: &[u8; NONCE_LEN_BYTES],
    ciphertext: &[u8],
    key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::KeyLength(key.len()));
    }

    let unbound = UnboundKey::new(AEAD_ALG, key).map_err(|_| CryptoError::Open)?;
    let mut opening_key = aead::OpeningKey::new(unbound, SingleNonce(Some(*nonce)));

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Open)?
        .to_vec();

    tracing::trace!(
        ciphertext_len = ciphertext.len(),
        plaintext_len = plaintext.len(),
        "opened payload"
    );

    Ok(plaintext)
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive a 256-bit key from `password` and a known `salt`.
pub fn derive_key_with_salt(password: &[u8], salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(PBKDF2_ALG, PBKDF2_ITERATIONS, salt, password, &mut key);
    key
}

/// Derive a key unique to this machine and user.
///
/// Anyone with access to the same account can rebuild it; it only keeps the
/// file vault from being readable when copied elsewhere.
pub fn device_key() -> [u8; KEY_LEN] {
    let hostname = hostname();
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".into());

    let mut material = Vec::with_capacity(hostname.len() + username.len() + DEVICE_SALT.len());
    material.extend_from_slice(hostname.as_bytes());
    material.extend_from_slice(username.as_bytes());
    material.extend_from_slice(DEVICE_SALT);

    tracing::debug!("derived device key");
    derive_key_with_salt(&material, DEVICE_SALT)
}

fn hostname() -> String {
    #[cfg(unix)]
    {
        std::fs::read_to_string("/etc/hostname")
            .map(|s| s.trim().to_string())
            .or_else(|_| std::env::var("HOSTNAME"))
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "unknown-host".into())
    }

    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "unknown-host".into())
    }
}

/// `len` cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| CryptoError::Random)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = random_bytes(KEY_LEN).unwrap();
        let (nonce, sealed) = encrypt(b"payload", &key).unwrap();
        assert_ne!(sealed.as_slice(), b"payload");
        assert_eq!(decrypt(&nonce, &sealed, &key).unwrap(), b"payload");
    }

    #[test]
    fn wrong_key_fails() {
        let key1 = random_bytes(KEY_LEN).unwrap();
        let key2 = random_bytes(KEY_LEN).unwrap();
        let (nonce, sealed) = encrypt(b"secret", &key1).unwrap();
        assert!(matches!(
            decrypt(&nonce, &sealed, &key2),
            Err(CryptoError::Open)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = random_bytes(KEY_LEN).unwrap();
        let (nonce, mut sealed) = encrypt(b"secret", &key).unwrap();
        sealed[0] ^= 0x01;
        assert!(decrypt(&nonce, &sealed, &key).is_err());
    }

    #[test]
    fn short_key_rejected() {
        assert!(matches!(
            encrypt(b"x", &[0u8; 16]),
            Err(CryptoError::KeyLength(16))
        ));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = random_bytes(KEY_LEN).unwrap();
        let (nonce, sealed) = encrypt(b"", &key).unwrap();
        assert!(decrypt(&nonce, &sealed, &key).unwrap().is_empty());
    }

    #[test]
    fn derivation_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        assert_eq!(
            derive_key_with_salt(b"pw", &salt),
            derive_key_with_salt(b"pw", &salt)
        );
        assert_ne!(
            derive_key_with_salt(b"pw", &salt),
            derive_key_with_salt(b"other", &salt)
        );
    }

    #[test]
    fn device_key_is_stable() {
        assert_eq!(device_key(), device_key());
    }
}
