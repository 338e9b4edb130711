//! Symmetric encryption for stored upstream passwords.
//!
//! Passwords are sealed with ChaCha20-Poly1305 under a key derived with
//! Argon2 from a process-wide secret. The stored form is
//! `base64(nonce || ciphertext)`.
//!
//! The secret comes from config when set. Otherwise one is generated on
//! first use and kept in the OS keychain, or in a `0600` key file under the
//! data directory on hosts without a persistent keychain.

use std::io::Write;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use keyring::Entry;
use rand::RngCore;
use thiserror::Error;
use tracing::{info, warn};

/// Keychain service holding the generated secret when none is configured.
const KEYRING_SERVICE: &str = "courierlink";
const KEYRING_USER: &str = "password-encryption-key";

/// Key file used when the keychain cannot hold the secret across runs.
const KEY_FILE: &str = "encryption.key";

/// Fixed salt for deriving the cipher key from the configured secret.
const KEY_DERIVATION_SALT: &[u8] = b"courierlink.credential-store.v1";

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    #[error("Key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct PasswordCipher {
    cipher: ChaCha20Poly1305,
}

impl PasswordCipher {
    /// Derive the cipher key from a secret string.
    pub fn from_secret(secret: &str) -> Result<Self, CipherError> {
        if secret.is_empty() {
            return Err(CipherError::KeyDerivation("secret is empty".into()));
        }
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(secret.as_bytes(), KEY_DERIVATION_SALT, &mut key)
            .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        })
    }

    /// Use the configured secret, or the generated one kept in the OS
    /// keychain or under `data_dir`.
    pub fn from_config_or_keychain(
        secret: Option<&str>,
        data_dir: &Path,
    ) -> Result<Self, CipherError> {
        match secret {
            Some(secret) => Self::from_secret(secret),
            None => {
                let keychain = Entry::new(KEYRING_SERVICE, KEYRING_USER)
                    .inspect_err(|e| warn!(error = %e, "OS keychain unavailable"))
                    .ok();
                Self::from_secret(&stored_secret(keychain, &data_dir.join(KEY_FILE))?)
            }
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CipherError::Decryption(format!("invalid base64: {}", e)))?;

        if combined.len() <= NONCE_LEN {
            return Err(CipherError::Decryption("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decryption("authentication tag mismatch".into()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CipherError::Decryption(format!("invalid UTF-8: {}", e)))
    }
}

/// Load the generated secret, creating it on first use.
///
/// An existing key file wins, so a host never switches secrets once it has
/// fallen back to one. A new secret only goes to the keychain if a fresh
/// entry reads it back; keyring's in-memory mock store does not.
fn stored_secret(keychain: Option<Entry>, key_path: &Path) -> Result<String, CipherError> {
    if let Some(secret) = read_key_file(key_path)? {
        return Ok(secret);
    }

    if let Some(entry) = &keychain {
        match entry.get_password() {
            Ok(secret) => return Ok(secret),
            Err(keyring::Error::NoEntry) => {}
            Err(e) => warn!(error = %e, "Could not read the OS keychain"),
        }
    }

    let mut bytes = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = base64::engine::general_purpose::STANDARD.encode(bytes);

    if let Some(entry) = &keychain {
        if keychain_persists(entry, &secret) {
            info!("Generated password encryption key and stored it in the OS keychain");
            return Ok(secret);
        }
    }

    write_key_file(key_path, &secret)?;
    warn!(
        path = %key_path.display(),
        "No persistent OS keychain, password encryption key stored in a file"
    );
    Ok(secret)
}

fn keychain_persists(entry: &Entry, secret: &str) -> bool {
    if let Err(e) = entry.set_password(secret) {
        warn!(error = %e, "Could not store the key in the OS keychain");
        return false;
    }
    let persisted = Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .and_then(|fresh| fresh.get_password())
        .is_ok_and(|read_back| read_back == secret);
    if !persisted {
        let _ = entry.delete_credential();
    }
    persisted
}

fn read_key_file(path: &Path) -> Result<Option<String>, CipherError> {
    match std::fs::read_to_string(path) {
        Ok(contents) if !contents.trim().is_empty() => Ok(Some(contents.trim().to_string())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CipherError::KeyFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_key_file(path: &Path, secret: &str) -> Result<(), CipherError> {
    let key_file_error = |source: std::io::Error| CipherError::KeyFile {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(key_file_error)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(key_file_error)?;
    file.write_all(secret.as_bytes()).map_err(key_file_error)?;
    file.sync_all().map_err(key_file_error)
}
