//! Passphrase-sealed encryption envelope.
//!
//! The envelope is a versioned JSON wrapper around an AEAD ciphertext:
//! `{ v: 1, alg: "AEAD-256", salt: base64, iv: base64, cipher: base64 }`,
//! itself UTF-8 encoded so the transport bytes stay valid JSON text.
//!
//! Key derivation is PBKDF2-HMAC-SHA256 with a per-seal random salt;
//! encryption is AES-256-GCM with a random 96-bit nonce. `open` falls back
//! to parsing the bytes as a plain JSON document when the wrapper is absent,
//! so pre-encryption remote blobs remain readable during migration.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{SyncError, SyncResult};

/// Envelope format version
pub const ENVELOPE_VERSION: u32 = 1;

/// Algorithm tag written into the envelope
pub const ENVELOPE_ALG: &str = "AEAD-256";

/// PBKDF2-HMAC-SHA256 iteration count
pub const PBKDF2_ITERATIONS: u32 = 120_000;

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for AES-256-GCM (12 bytes)
pub const IV_LEN: usize = 12;

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u32,
    #[serde(default)]
    alg: String,
    salt: String,
    iv: String,
    cipher: String,
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Seal a JSON-serializable document under a passphrase.
///
/// Every call draws a fresh salt and nonce, so sealing the same document
/// twice yields different bytes.
pub fn seal<T: Serialize>(document: &T, passphrase: &str) -> SyncResult<Vec<u8>> {
    let plain = serde_json::to_vec(document)?;

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let key = derive_key(passphrase, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plain.as_ref())
        .map_err(|_| SyncError::decryption("AEAD encryption failed"))?;

    let envelope = Envelope {
        v: ENVELOPE_VERSION,
        alg: ENVELOPE_ALG.to_string(),
        salt: BASE64.encode(salt),
        iv: BASE64.encode(iv),
        cipher: BASE64.encode(ciphertext),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Open an envelope (or a plain JSON document) into its JSON value.
///
/// Returns `SyncError::Decryption` on a wrong passphrase, corrupt
/// ciphertext, or authentication-tag mismatch. Bytes that parse as JSON but
/// lack the `v: 1` wrapper are returned as-is without attempting decryption.
pub fn open(bytes: &[u8], passphrase: &str) -> SyncResult<serde_json::Value> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| SyncError::decryption("envelope is not valid UTF-8"))?;
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| SyncError::decryption(format!("envelope is not valid JSON: {}", e)))?;

    // Plain-document fallback: anything without the full wrapper shape is
    // treated as an unencrypted payload.
    let envelope = match serde_json::from_value::<Envelope>(value.clone()) {
        Ok(env) if env.v == ENVELOPE_VERSION => env,
        _ => return Ok(value),
    };

    if !envelope.alg.is_empty() && envelope.alg != ENVELOPE_ALG {
        return Err(SyncError::decryption(format!(
            "unsupported algorithm: {}",
            envelope.alg
        )));
    }

    let salt = BASE64
        .decode(&envelope.salt)
        .map_err(|_| SyncError::decryption("salt is not valid base64"))?;
    let iv = BASE64
        .decode(&envelope.iv)
        .map_err(|_| SyncError::decryption("iv is not valid base64"))?;
    let ciphertext = BASE64
        .decode(&envelope.cipher)
        .map_err(|_| SyncError::decryption("ciphertext is not valid base64"))?;

    if iv.len() != IV_LEN {
        return Err(SyncError::decryption(format!(
            "iv must be {} bytes, got {}",
            IV_LEN,
            iv.len()
        )));
    }

    let key = derive_key(passphrase, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let plain = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
        .map_err(|_| SyncError::decryption("wrong passphrase or corrupt ciphertext"))?;

    serde_json::from_slice(&plain)
        .map_err(|_| SyncError::decryption("decrypted document is not valid JSON"))
}
