//! AES-256-GCM sealing for session-tier payloads.
//!
//! Sealed layout: `enc:v1:` followed by standard base64 of `nonce || ciphertext+tag`.
//! Anything without the marker is treated as plaintext by readers.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use stash_core::StorageError;

use crate::key_manager::KeyMaterial;

/// Prefix identifying a sealed payload.
pub const ENCRYPTION_MARKER: &str = "enc:v1:";

const NONCE_LEN: usize = 12;

pub fn is_sealed(payload: &str) -> bool {
    payload.starts_with(ENCRYPTION_MARKER)
}

/// Encrypt with a fresh random nonce.
pub fn seal(key: &KeyMaterial, plaintext: &[u8]) -> Result<String, StorageError> {
    let cipher = build_cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| StorageError::Transaction {
            reason: format!("encrypt failed: {e}"),
        })?;

    let mut bundle = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    bundle.extend_from_slice(nonce.as_slice());
    bundle.extend_from_slice(&ciphertext);
    Ok(format!("{ENCRYPTION_MARKER}{}", STANDARD.encode(bundle)))
}

pub fn open(key: &KeyMaterial, payload: &str) -> Result<Vec<u8>, StorageError> {
    let encoded = payload
        .strip_prefix(ENCRYPTION_MARKER)
        .ok_or_else(|| decryption_err("missing encryption marker"))?;
    let bundle = STANDARD
        .decode(encoded)
        .map_err(|e| decryption_err(format!("bundle decode failed: {e}")))?;
    if bundle.len() <= NONCE_LEN {
        return Err(decryption_err("bundle shorter than nonce"));
    }

    let (nonce, ciphertext) = bundle.split_at(NONCE_LEN);
    build_cipher(key)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| decryption_err(format!("decrypt failed: {e}")))
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, StorageError> {
    Aes256Gcm::new_from_slice(&material.bytes[..]).map_err(|e| StorageError::Decryption {
        reason: format!("cipher init failed: {e}"),
    })
}

fn decryption_err(reason: impl Into<String>) -> StorageError {
    StorageError::Decryption {
        reason: reason.into(),
    }
}
