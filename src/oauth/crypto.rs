//! Machine-bound encryption for the token file
//!
//! The key is derived with Argon2id from the operating user, the platform, the
//! hostname, a fixed application salt and an optional operator passphrase.
//! Moving the file to another machine or account makes it undecryptable; there
//! is no recovery path.
//!
//! Records are sealed with AES-256-GCM under a fresh 96-bit nonce. The sealed
//! [`Envelope`] is serialized as JSON and then base64-encoded.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use argon2::password_hash::rand_core::{OsRng, RngCore};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Envelope format version
pub const ENVELOPE_VERSION: u32 = 1;
/// Only supported AEAD
pub const ALGORITHM: &str = "AES-256-GCM";
/// Default environment variable holding the optional passphrase
pub const DEFAULT_PASSPHRASE_ENV: &str = "FRESHBOOKS_TOKEN_PASSPHRASE";

const APP_SALT: &[u8] = b"freshbooks-mcp/token-store/v1";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Inputs to key derivation
#[derive(Clone)]
pub struct MachineIdentity {
    /// Operating user name
    pub user: String,
    /// Platform identifier
    pub platform: String,
    /// Host name
    pub hostname: String,
    /// Optional operator passphrase
    pub passphrase: Option<Zeroizing<String>>,
}

impl MachineIdentity {
    /// Identity of the current process, reading the passphrase from `passphrase_env`
    pub fn current(passphrase_env: &str) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());
        let passphrase = std::env::var(passphrase_env)
            .ok()
            .filter(|p| !p.is_empty())
            .map(Zeroizing::new);

        Self {
            user,
            platform: std::env::consts::OS.to_string(),
            hostname,
            passphrase,
        }
    }

    fn key_material(&self) -> Zeroizing<Vec<u8>> {
        let mut material = Zeroizing::new(Vec::new());
        for part in [
            self.user.as_bytes(),
            self.platform.as_bytes(),
            self.hostname.as_bytes(),
            APP_SALT,
        ] {
            material.extend_from_slice(part);
            material.push(0);
        }
        if let Some(passphrase) = &self.passphrase {
            material.extend_from_slice(passphrase.as_bytes());
        }
        material
    }
}

impl fmt::Debug for MachineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineIdentity")
            .field("user", &self.user)
            .field("platform", &self.platform)
            .field("hostname", &self.hostname)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Sealed token record as stored on disk (before base64)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Format version
    pub version: u32,
    /// AEAD name
    pub algorithm: String,
    /// Fingerprint of the key that sealed this envelope
    pub key_id: String,
    /// Base64 nonce
    pub nonce: String,
    /// Base64 ciphertext including the GCM tag
    pub ciphertext: String,
}

/// AES-256-GCM cipher bound to one derived key
pub struct TokenCipher {
    cipher: Aes256Gcm,
    key_id: String,
}

impl TokenCipher {
    /// Derive the key for `identity` and build the cipher
    pub fn derive(identity: &MachineIdentity) -> Result<Self> {
        let material = identity.key_material();
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::default()
            .hash_password_into(&material, APP_SALT, key.as_mut_slice())
            .map_err(|e| Error::Internal(format!("Key derivation failed: {e}")))?;
        Self::from_key(&key)
    }

    /// Build from a raw 256-bit key
    pub fn from_key(key: &[u8; KEY_LEN]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::Internal(format!("Failed to create cipher: {e}")))?;
        Ok(Self {
            cipher,
            key_id: fingerprint(key),
        })
    }

    /// Short fingerprint of the key
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Encrypt and encode `plaintext` into the on-disk text form
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(&Nonce::from(nonce_bytes), plaintext)
            .map_err(|e| Error::Internal(format!("Encryption failed: {e}")))?;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            algorithm: ALGORITHM.to_string(),
            key_id: self.key_id.clone(),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(ciphertext),
        };
        Ok(BASE64.encode(serde_json::to_vec(&envelope)?))
    }

    /// Decode and decrypt the on-disk text form.
    ///
    /// Every failure is [`Error::DecryptionFailed`]; a key mismatch is
    /// reported separately from tampering in the message.
    pub fn open(&self, encoded: &str) -> Result<Zeroizing<Vec<u8>>> {
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|e| Error::DecryptionFailed(format!("invalid base64: {e}")))?;
        let envelope: Envelope = serde_json::from_slice(&raw)
            .map_err(|e| Error::DecryptionFailed(format!("invalid envelope: {e}")))?;

        if envelope.version != ENVELOPE_VERSION {
            return Err(Error::DecryptionFailed(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        if envelope.algorithm != ALGORITHM {
            return Err(Error::DecryptionFailed(format!(
                "unsupported algorithm {}",
                envelope.algorithm
            )));
        }
        if envelope.key_id != self.key_id {
            return Err(Error::DecryptionFailed(
                "key mismatch (file sealed on another machine, user or passphrase)".to_string(),
            ));
        }

        let nonce: [u8; NONCE_LEN] = BASE64
            .decode(&envelope.nonce)
            .ok()
            .and_then(|n| n.try_into().ok())
            .ok_or_else(|| Error::DecryptionFailed("invalid nonce".to_string()))?;
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| Error::DecryptionFailed(format!("invalid ciphertext encoding: {e}")))?;

        self.cipher
            .decrypt(&Nonce::from(nonce), ciphertext.as_ref())
            .map(Zeroizing::new)
            .map_err(|_| Error::DecryptionFailed("authentication tag mismatch".to_string()))
    }
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCipher")
            .field("algorithm", &ALGORITHM)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

fn fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    BASE64.encode(&digest[..8])
}
