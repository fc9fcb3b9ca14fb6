//! Encrypted credential vault.
//!
//! Credentials are sealed with ChaCha20-Poly1305 under a key derived from
//! 32 random bytes kept in a sibling file with owner-only permissions. The
//! stored blob is `base64(nonce ‖ ciphertext)`; tampering fails decryption
//! loudly instead of yielding garbage.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{AgentError, Credentials, Result, StorageRoot};

/// ChaCha20-Poly1305 nonce length (96 bits).
pub const NONCE_SIZE: usize = 12;

const KEY_FILE: &str = ".encryption_key";
const CREDENTIALS_FILE: &str = "credentials.json.enc";

/// Digest the raw key material so any stored length yields a 256-bit key.
fn derive_key(material: &[u8]) -> Key {
    let digest = Sha256::digest(material);
    *Key::from_slice(&digest)
}

/// Seal `data` under `key_material`, returning `nonce ‖ ciphertext`.
pub fn encrypt(data: &[u8], key_material: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(&derive_key(key_material));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|_| AgentError::VaultCorrupt("encryption failed".into()))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Open a `nonce ‖ ciphertext` blob produced by [`encrypt`].
pub fn decrypt(blob: &[u8], key_material: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_SIZE {
        return Err(AgentError::VaultCorrupt("ciphertext too short".into()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(&derive_key(key_material));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AgentError::VaultCorrupt("authentication failed".into()))
}

pub fn encrypt_to_base64(data: &[u8], key_material: &[u8]) -> Result<String> {
    Ok(BASE64.encode(encrypt(data, key_material)?))
}

pub fn decrypt_from_base64(encoded: &str, key_material: &[u8]) -> Result<Vec<u8>> {
    let blob = BASE64
        .decode(encoded.trim())
        .map_err(|e| AgentError::VaultCorrupt(format!("invalid base64: {e}")))?;
    decrypt(&blob, key_material)
}

/// Generate 32 bytes of key material from the OS random source.
pub fn generate_key() -> Vec<u8> {
    ChaCha20Poly1305::generate_key(&mut OsRng).to_vec()
}

/// Owns `credentials.json.enc` and its key file under the storage root.
pub struct CredentialStore {
    root: PathBuf,
    key_file: PathBuf,
    credentials_file: PathBuf,
}

impl CredentialStore {
    pub fn new(root: &StorageRoot) -> Self {
        Self {
            root: root.path().to_path_buf(),
            key_file: root.join(KEY_FILE),
            credentials_file: root.join(CREDENTIALS_FILE),
        }
    }

    /// Load the key material, generating and persisting it on first use.
    fn get_or_create_key(&self) -> Result<Vec<u8>> {
        match std::fs::read(&self.key_file) {
            Ok(material) => return Ok(material),
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(AgentError::KeyIo(e));
            }
            Err(_) => {}
        }

        let material = generate_key();
        std::fs::create_dir_all(&self.root).map_err(AgentError::KeyIo)?;
        crate::set_permissions(&self.root, 0o755).map_err(AgentError::KeyIo)?;
        std::fs::write(&self.key_file, &material).map_err(AgentError::KeyIo)?;
        crate::set_permissions(&self.key_file, 0o600).map_err(AgentError::KeyIo)?;
        debug!(path = %self.key_file.display(), "generated new encryption key");
        Ok(material)
    }

    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        crate::set_permissions(&self.root, 0o755)?;

        let key = self.get_or_create_key()?;
        let plaintext = serde_json::to_vec(credentials)?;
        let encoded = encrypt_to_base64(&plaintext, &key)?;
        crate::write_atomic(&self.credentials_file, encoded.as_bytes(), 0o600)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Credentials> {
        if !self.exists() {
            return Err(AgentError::VaultMissing(format!(
                "{} not found",
                self.credentials_file.display()
            )));
        }

        let key = self.get_or_create_key()?;
        let encoded = std::fs::read_to_string(&self.credentials_file)?;
        let plaintext = decrypt_from_base64(&encoded, &key)?;
        let credentials: Credentials = serde_json::from_slice(&plaintext)
            .map_err(|e| AgentError::VaultCorrupt(format!("invalid record: {e}")))?;
        Ok(credentials)
    }

    pub fn exists(&self) -> bool {
        self.credentials_file.exists()
    }

    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.credentials_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use tempfile::tempdir;

    fn store(dir: &tempfile::TempDir) -> CredentialStore {
        CredentialStore::new(&StorageRoot::new(dir.path()))
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = generate_key();
        let ciphertext = encrypt(b"hello screen", &key).expect("encrypt");
        let plaintext = decrypt(&ciphertext, &key).expect("decrypt");
        assert_eq!(plaintext, b"hello screen");
    }

    #[test]
    fn key_material_of_any_length_works() {
        let ciphertext = encrypt(b"payload", b"short key").expect("encrypt");
        let plaintext = decrypt(&ciphertext, b"short key").expect("decrypt");
        assert_eq!(plaintext, b"payload");
    }

    #[test]
    fn tampered_ciphertext_fails_loudly() {
        let key = generate_key();
        let mut ciphertext = encrypt(b"payload", &key).expect("encrypt");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;
        assert!(matches!(
            decrypt(&ciphertext, &key),
            Err(AgentError::VaultCorrupt(_))
        ));
    }

    #[test]
    fn truncated_blob_is_corrupt() {
        let key = generate_key();
        assert!(matches!(
            decrypt(&[0u8; 4], &key),
            Err(AgentError::VaultCorrupt(_))
        ));
    }

    #[test]
    fn save_then_load_returns_equal_record() {
        let dir = tempdir().expect("tempdir");
        let store = store(&dir);

        store
            .save(&Credentials::new("scr-1", "pk-secret-123"))
            .expect("save");
        let loaded = store.load().expect("load");

        assert_eq!(loaded.screen_id, "scr-1");
        assert_eq!(loaded.passkey.expose_secret(), "pk-secret-123");
    }

    #[test]
    fn successive_saves_produce_different_blobs() {
        let dir = tempdir().expect("tempdir");
        let store = store(&dir);
        let creds = Credentials::new("scr-1", "pk-secret-123");

        store.save(&creds).expect("first save");
        let first = std::fs::read(dir.path().join(CREDENTIALS_FILE)).expect("read");
        store.save(&creds).expect("second save");
        let second = std::fs::read(dir.path().join(CREDENTIALS_FILE)).expect("read");

        assert_ne!(first, second, "nonce must differ between saves");
    }

    #[test]
    fn load_without_file_is_vault_missing() {
        let dir = tempdir().expect("tempdir");
        assert!(matches!(
            store(&dir).load(),
            Err(AgentError::VaultMissing(_))
        ));
    }

    #[test]
    fn invalid_base64_is_vault_corrupt() {
        let dir = tempdir().expect("tempdir");
        let store = store(&dir);
        store
            .save(&Credentials::new("scr-1", "pk-secret-123"))
            .expect("save");
        std::fs::write(dir.path().join(CREDENTIALS_FILE), "%%% not base64 %%%")
            .expect("overwrite");

        assert!(matches!(store.load(), Err(AgentError::VaultCorrupt(_))));
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        store(&dir)
            .save(&Credentials::new("scr-1", "pk-secret-123"))
            .expect("save");

        let mode = std::fs::metadata(dir.path().join(KEY_FILE))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
