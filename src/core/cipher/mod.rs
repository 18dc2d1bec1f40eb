//! Authenticated encryption for secure bundles.
//!
//! AES-256-GCM with a fresh random 96-bit nonce per call. A bundle is the
//! text `<nonce-b64>:<tag-b64>:<ciphertext-b64>`. The key lives only in
//! memory for the lifetime of one run and reaches the child process through
//! its environment.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::core::constants;
use crate::core::snapshot::EnvSnapshot;
use crate::error::{ConfigError, Result, StoreError};

/// Key length in bytes (AES-256).
pub const KEY_LENGTH: usize = 32;

/// Nonce length in bytes.
pub const NONCE_LENGTH: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_LENGTH: usize = 16;

/// Process-lifetime symmetric key.
pub struct EphemeralKey(Zeroizing<[u8; KEY_LENGTH]>);

impl EphemeralKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LENGTH]);
        rand::thread_rng().fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    /// Parse a hex-encoded key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEphemeralKey` unless the input is exactly
    /// 64 hex characters.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            hex::decode(hex_key.trim())
                .map_err(|e| ConfigError::InvalidEphemeralKey(e.to_string()))?,
        );
        if decoded.len() != KEY_LENGTH {
            return Err(ConfigError::InvalidEphemeralKey(format!(
                "expected {} bytes, got {}",
                KEY_LENGTH,
                decoded.len()
            ))
            .into());
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LENGTH]);
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    /// Reuse the key a parent process exported, or generate a new one.
    ///
    /// Returns the key and whether it was freshly generated. An unusable
    /// inherited key is replaced rather than trusted.
    pub fn from_snapshot_or_generate(snapshot: &EnvSnapshot) -> (Self, bool) {
        match snapshot.non_empty(constants::EPHEMERAL_KEY_VAR) {
            Some(hex_key) => match Self::from_hex(hex_key) {
                Ok(key) => (key, false),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring inherited ephemeral key");
                    (Self::generate(), true)
                }
            },
            None => (Self::generate(), true),
        }
    }

    /// Hex encoding for handing the key to the child process.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.0[..]))
    }

    /// Short non-reversible identifier safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0[..]);
        hex::encode(&digest[..4])
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0[..]))
    }
}

impl std::fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EphemeralKey({})", self.fingerprint())
    }
}

/// Encrypt plaintext into bundle text.
///
/// # Errors
///
/// Returns `StoreError::Encrypt` if the cipher rejects the input.
pub fn encrypt(plaintext: &str, key: &EphemeralKey) -> Result<String> {
    let mut nonce = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce);

    let sealed = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| StoreError::Encrypt(e.to_string()))?;

    // aes-gcm appends the tag to the ciphertext
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LENGTH);

    Ok(format!(
        "{}:{}:{}",
        BASE64.encode(nonce),
        BASE64.encode(tag),
        BASE64.encode(ciphertext)
    ))
}

/// Decrypt bundle text.
///
/// # Errors
///
/// Returns `StoreError::Malformed` if the text does not have three parts,
/// and `StoreError::Integrity` for any wrong key, tampering or truncation.
pub fn decrypt(bundle: &str, key: &EphemeralKey) -> Result<Zeroizing<String>> {
    let mut parts = bundle.trim().splitn(3, ':');
    let (nonce_b64, tag_b64, data_b64) = match (parts.next(), parts.next(), parts.next()) {
        (Some(n), Some(t), Some(d)) if !n.is_empty() && !t.is_empty() => (n, t, d),
        _ => {
            return Err(StoreError::Malformed(
                "expected <nonce>:<tag>:<ciphertext>".to_string(),
            )
            .into())
        }
    };

    let nonce = BASE64
        .decode(nonce_b64)
        .map_err(|_| StoreError::Integrity)?;
    let tag = BASE64.decode(tag_b64).map_err(|_| StoreError::Integrity)?;
    let data = BASE64.decode(data_b64).map_err(|_| StoreError::Integrity)?;

    if nonce.len() != NONCE_LENGTH || tag.len() != TAG_LENGTH {
        return Err(StoreError::Integrity.into());
    }

    let mut sealed = data;
    sealed.extend_from_slice(&tag);

    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
        .map_err(|_| StoreError::Integrity)?;

    let text = String::from_utf8(plaintext).map_err(|_| StoreError::Integrity)?;
    Ok(Zeroizing::new(text))
}
