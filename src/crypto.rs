//! Encryption of collected secret values.
//!
//! Uses AES-256-GCM. Encrypted values are rendered as a self-describing
//! envelope `encrypted:<nonce>:<tag>:<ciphertext>` with hex-encoded fields,
//! so a reader can tell encrypted values from plaintext without any external
//! state. Values without the `encrypted:` prefix are treated as plaintext.
//!
//! Key material is normalized to 32 bytes by truncating or zero-padding the
//! supplied string. This is a deliberate simplification to accept arbitrary
//! pipeline-supplied key strings, not a recommended KDF.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

/// Key length in bytes (256 bits for AES-256)
const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits for AES-GCM)
const NONCE_LENGTH: usize = 12;

/// Authentication tag length in bytes
const TAG_LENGTH: usize = 16;

/// Literal prefix marking an encrypted envelope
const ENCRYPTED_PREFIX: &str = "encrypted:";

/// Hex length of the namespace-derived key
const NAMESPACE_DIGEST_LENGTH: usize = 32;

/// Key name whose value is derived from the namespace in designated environments
const KEYSTORE_PASSWORD_KEY: &str = "keystore_password";

/// Key name carrying the session encryption key itself (stored verbatim)
const ENCRYPTION_KEY_KEY: &str = "encryption_key";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to create cipher: {0}")]
    Cipher(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),
}

/// Check if a value carries the encrypted envelope prefix.
pub fn is_encrypted(value: &str) -> bool {
    value.trim().starts_with(ENCRYPTED_PREFIX)
}

/// Normalize arbitrary key material to exactly [`KEY_LENGTH`] bytes.
///
/// Longer input is truncated, shorter input is zero-padded.
fn normalize_key(key_material: &str) -> [u8; KEY_LENGTH] {
    let mut key = [0u8; KEY_LENGTH];
    let bytes = key_material.as_bytes();
    let n = bytes.len().min(KEY_LENGTH);
    key[..n].copy_from_slice(&bytes[..n]);
    key
}

/// Encrypt a plaintext value using AES-256-GCM.
///
/// Returns `encrypted:<hex nonce>:<hex tag>:<hex ciphertext>`. Every call
/// draws a fresh random nonce, so identical plaintext never yields identical
/// envelopes.
pub fn encrypt_value(key_material: &str, plaintext: &str) -> Result<String, CryptoError> {
    use rand::RngCore;

    let key = normalize_key(key_material);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| CryptoError::Cipher(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    // aes-gcm appends the tag to the ciphertext
    let sealed = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LENGTH);

    Ok(format!(
        "{}{}:{}:{}",
        ENCRYPTED_PREFIX,
        hex::encode(nonce_bytes),
        hex::encode(tag),
        hex::encode(ciphertext)
    ))
}

/// Decrypt an envelope produced by [`encrypt_value`].
///
/// Values without the `encrypted:` prefix pass through unchanged, so mixed
/// plaintext/encrypted content is readable in one pass. A malformed envelope
/// or a failed authentication tag also returns the input unchanged: callers
/// must treat an unchanged return as "could not verify". The failure is
/// logged at warn level.
pub fn decrypt_value(key_material: &str, value: &str) -> String {
    let trimmed = value.trim();
    let Some(payload) = trimmed.strip_prefix(ENCRYPTED_PREFIX) else {
        return value.to_string();
    };

    match try_decrypt(key_material, payload) {
        Some(plaintext) => plaintext,
        None => {
            tracing::warn!("Could not decrypt envelope; returning value unchanged");
            value.to_string()
        }
    }
}

fn try_decrypt(key_material: &str, payload: &str) -> Option<String> {
    let mut fields = payload.splitn(3, ':');
    let nonce_hex = fields.next()?;
    let tag_hex = fields.next()?;
    let ciphertext_hex = fields.next()?;

    let nonce_bytes = hex::decode(nonce_hex).ok()?;
    let tag = hex::decode(tag_hex).ok()?;
    let ciphertext = hex::decode(ciphertext_hex).ok()?;
    if nonce_bytes.len() != NONCE_LENGTH || tag.len() != TAG_LENGTH {
        return None;
    }

    let key = normalize_key(key_material);
    let cipher = Aes256Gcm::new_from_slice(&key).ok()?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);

    let plaintext = cipher.decrypt(nonce, sealed.as_ref()).ok()?;
    String::from_utf8(plaintext).ok()
}

/// Derive deterministic key material from a namespace identifier.
///
/// SHA-256 hex digest truncated to [`NAMESPACE_DIGEST_LENGTH`] characters.
/// Used when no explicit key material exists yet for a namespace.
pub fn derive_key_from_namespace(namespace: &str) -> String {
    let digest = Sha256::digest(namespace.as_bytes());
    let mut hex_digest = hex::encode(digest);
    hex_digest.truncate(NAMESPACE_DIGEST_LENGTH);
    hex_digest
}

/// Policy context for [`process_value`], snapshotted from the session.
#[derive(Debug, Clone)]
pub struct ValuePolicy<'a> {
    /// Session-scoped encryption key
    pub encryption_key: &'a str,
    /// Keys whose values must be encrypted before storage
    pub keys_requiring_encryption: &'a HashSet<String>,
    /// Build environment tag from the session context
    pub environment: &'a str,
    /// Namespace identifier from the session context
    pub namespace: &'a str,
    /// Environments where the keystore password is a namespace digest
    pub keystore_digest_environments: &'a [String],
}

/// One row of the value-processing decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueRule {
    /// Keystore password under designated environments: namespace digest
    KeystoreDigest,
    /// The encryption key entry itself: session key, stored verbatim
    SessionKeyVerbatim,
    /// Keys flagged for encryption: AES-GCM envelope
    Encrypt,
    /// Everything else: plaintext passthrough
    Passthrough,
}

/// Evaluation order of the decision table. Significant: the keystore and
/// encryption-key rows must be consulted before the general encryption flag.
const VALUE_RULES: [ValueRule; 4] = [
    ValueRule::KeystoreDigest,
    ValueRule::SessionKeyVerbatim,
    ValueRule::Encrypt,
    ValueRule::Passthrough,
];

impl ValueRule {
    fn matches(&self, key: &str, policy: &ValuePolicy<'_>) -> bool {
        let key_lower = key.to_lowercase();
        match self {
            ValueRule::KeystoreDigest => {
                key_lower == KEYSTORE_PASSWORD_KEY
                    && policy
                        .keystore_digest_environments
                        .iter()
                        .any(|e| e.eq_ignore_ascii_case(policy.environment))
            }
            ValueRule::SessionKeyVerbatim => key_lower == ENCRYPTION_KEY_KEY,
            ValueRule::Encrypt => policy.keys_requiring_encryption.contains(key),
            ValueRule::Passthrough => true,
        }
    }

    fn apply(&self, plaintext: &str, policy: &ValuePolicy<'_>) -> Result<String, CryptoError> {
        match self {
            ValueRule::KeystoreDigest => Ok(derive_key_from_namespace(policy.namespace)),
            ValueRule::SessionKeyVerbatim => Ok(policy.encryption_key.to_string()),
            ValueRule::Encrypt => encrypt_value(policy.encryption_key, plaintext),
            ValueRule::Passthrough => Ok(plaintext.to_string()),
        }
    }
}

/// Process a submitted value through the ordered decision table.
pub fn process_value(
    key: &str,
    plaintext: &str,
    policy: &ValuePolicy<'_>,
) -> Result<String, CryptoError> {
    for rule in &VALUE_RULES {
        if rule.matches(key, policy) {
            return rule.apply(plaintext, policy);
        }
    }
    // Passthrough matches everything
    unreachable!("value decision table has no total fallback");
}
