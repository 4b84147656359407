//! Password-encrypted private key files.
//!
//! Format (JSON, hex-encoded binary fields):
//!
//! ```json
//! { "version": 1, "address": "0x…", "salt": "…", "nonce": "…", "ciphertext": "…" }
//! ```
//!
//! The 32-byte AES-256-GCM key is derived from the password with Argon2id
//! (default parameters) over a random 16-byte salt. The plaintext is the raw
//! 32-byte secp256k1 scalar.

use crate::ecdsa::{EcdsaError, KeyPair};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use multifaucet_common::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub const KEY_FILE_VERSION: u8 = 1;
const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;

#[derive(Error, Debug)]
pub enum KeyFileError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed key file: {0}")]
    Malformed(String),

    #[error("Unsupported key file version {0}")]
    UnsupportedVersion(u8),

    #[error("Key derivation failed: {0}")]
    Kdf(String),

    #[error("Decryption failed (wrong password or tampered file)")]
    Decryption,

    #[error("Key file is for {expected} but decrypts to {actual}")]
    AddressMismatch { expected: Address, actual: Address },

    #[error(transparent)]
    Key(#[from] EcdsaError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    pub version: u8,
    pub address: Address,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

impl KeyFile {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, KeyFileError> {
        let data = std::fs::read_to_string(&path).map_err(|source| KeyFileError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|e| KeyFileError::Malformed(e.to_string()))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), KeyFileError> {
        let data = serde_json::to_string_pretty(self).map_err(|e| KeyFileError::Malformed(e.to_string()))?;
        std::fs::write(&path, data).map_err(|source| KeyFileError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })
    }
}

fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32], KeyFileError> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| KeyFileError::Kdf(e.to_string()))?;
    Ok(key)
}

pub fn encrypt_key(pair: &KeyPair, password: &str) -> Result<KeyFile, KeyFileError> {
    let salt: [u8; SALT_LENGTH] = rand::random();
    let nonce_bytes: [u8; NONCE_LENGTH] = rand::random();

    let key = derive_key(password, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| KeyFileError::Kdf(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), pair.private_key_bytes().as_slice())
        .map_err(|_| KeyFileError::Kdf("AES-GCM encryption failed".to_string()))?;

    Ok(KeyFile {
        version: KEY_FILE_VERSION,
        address: pair.address(),
        salt: hex::encode(salt),
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    })
}

pub fn decrypt_key(file: &KeyFile, password: &str) -> Result<KeyPair, KeyFileError> {
    if file.version != KEY_FILE_VERSION {
        return Err(KeyFileError::UnsupportedVersion(file.version));
    }

    let decode = |field: &str, value: &str| {
        hex::decode(value).map_err(|e| KeyFileError::Malformed(format!("{}: {}", field, e)))
    };
    let salt = decode("salt", &file.salt)?;
    let nonce_bytes = decode("nonce", &file.nonce)?;
    let ciphertext = decode("ciphertext", &file.ciphertext)?;
    if nonce_bytes.len() != NONCE_LENGTH {
        return Err(KeyFileError::Malformed(format!("nonce must be {} bytes", NONCE_LENGTH)));
    }

    let key = derive_key(password, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| KeyFileError::Kdf(e.to_string()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| KeyFileError::Decryption)?;

    let pair = KeyPair::from_private_key_bytes(&plaintext)?;
    if pair.address() != file.address {
        return Err(KeyFileError::AddressMismatch {
            expected: file.address,
            actual: pair.address(),
        });
    }
    Ok(pair)
}

/// Password file contents without trailing CR/LF.
pub fn read_password_file<P: AsRef<Path>>(path: P) -> Result<String, KeyFileError> {
    let password = std::fs::read_to_string(&path).map_err(|source| KeyFileError::Io {
        path: path.as_ref().display().to_string(),
        source,
    })?;
    Ok(password.trim_end_matches(['\r', '\n']).to_string())
}

/// Reads a key file and the password file next to it.
pub fn load_key_file<P: AsRef<Path>, Q: AsRef<Path>>(path: P, password_path: Q) -> Result<KeyPair, KeyFileError> {
    let file = KeyFile::read(&path)?;
    let password = read_password_file(password_path)?;
    let pair = decrypt_key(&file, &password)?;
    debug!("Decrypted key file {} for {}", path.as_ref().display(), pair.address());
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encrypt_decrypt() {
        let pair = KeyPair::random();
        let file = encrypt_key(&pair, "correct horse").unwrap();
        assert_eq!(file.address, pair.address());

        let restored = decrypt_key(&file, "correct horse").unwrap();
        assert_eq!(restored.private_key_bytes(), pair.private_key_bytes());
    }

    #[test]
    fn test_wrong_password() {
        let pair = KeyPair::random();
        let file = encrypt_key(&pair, "correct horse").unwrap();
        assert!(matches!(decrypt_key(&file, "battery staple"), Err(KeyFileError::Decryption)));
    }

    #[test]
    fn test_tampered_address() {
        let pair = KeyPair::random();
        let mut file = encrypt_key(&pair, "pw").unwrap();
        file.address = KeyPair::random().address();
        assert!(matches!(decrypt_key(&file, "pw"), Err(KeyFileError::AddressMismatch { .. })));
    }

    #[test]
    fn test_unsupported_version() {
        let pair = KeyPair::random();
        let mut file = encrypt_key(&pair, "pw").unwrap();
        file.version = 7;
        assert!(matches!(decrypt_key(&file, "pw"), Err(KeyFileError::UnsupportedVersion(7))));
    }

    #[test]
    fn test_load_key_file_trims_password() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("faucet.key.json");
        let password_path = dir.path().join("password.txt");

        let pair = KeyPair::random();
        encrypt_key(&pair, "s3cret").unwrap().write(&key_path).unwrap();
        std::fs::write(&password_path, "s3cret\r\n").unwrap();

        let loaded = load_key_file(&key_path, &password_path).unwrap();
        assert_eq!(loaded.address(), pair.address());
    }

    #[test]
    fn test_missing_password_file() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("faucet.key.json");
        encrypt_key(&KeyPair::random(), "pw").unwrap().write(&key_path).unwrap();

        let result = load_key_file(&key_path, dir.path().join("missing.txt"));
        assert!(matches!(result, Err(KeyFileError::Io { .. })));
    }
}
