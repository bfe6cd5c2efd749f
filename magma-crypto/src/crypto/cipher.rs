//! Authenticated field cipher built on AES-256-GCM.
//! Each protected column is stored as a single base64 envelope holding
//! nonce + ciphertext + auth tag, so only the shared key is needed to read it back.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;
use zeroize::Zeroizing;

/// Required key length for AES-256.
pub const KEY_LEN: usize = 32;
/// Nonce length for AES-GCM (96 bits).
pub const NONCE_LEN: usize = 12;
/// Authentication tag appended by AES-GCM.
pub const TAG_LEN: usize = 16;
/// Environment variable the backend has always used for the field key.
pub const DEFAULT_KEY_ENV: &str = "ENCRYPTION_KEY";

const CIPHER_TARGET: &str = "magma_crypto::cipher";

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption key variable {0} is not set")]
    MissingKey(String),
    #[error("invalid key length: expected {KEY_LEN} bytes, got {actual}")]
    InvalidKeyLength { actual: usize },
    #[error("secure random source unavailable: {0}")]
    RandomSource(String),
    #[error("encryption failed")]
    Encryption,
    #[error("envelope is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("envelope failed authentication")]
    Authentication,
    #[error("decrypted field is not valid utf-8")]
    InvalidPlaintext,
}

impl CipherError {
    /// True when the failure comes from key resolution rather than the data.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            CipherError::MissingKey(_) | CipherError::InvalidKeyLength { .. }
        )
    }

    /// Status code a handler should answer with. Key and randomness problems
    /// are server misconfiguration. Every failure about the stored value maps
    /// to one status so callers cannot tell which check rejected it.
    pub fn http_status(&self) -> u16 {
        match self {
            CipherError::MissingKey(_)
            | CipherError::InvalidKeyLength { .. }
            | CipherError::RandomSource(_)
            | CipherError::Encryption => 500,
            CipherError::Decode(_)
            | CipherError::Authentication
            | CipherError::InvalidPlaintext => 400,
        }
    }
}

#[derive(Clone)]
enum KeySource {
    Fixed(Zeroizing<[u8; KEY_LEN]>),
    Env(String),
}

/// Encrypts and decrypts individual string fields.
///
/// A cipher built with [`FieldCipher::from_env`] resolves its key on every
/// call, so rotating the variable takes effect without a restart.
#[derive(Clone)]
pub struct FieldCipher {
    source: KeySource,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            KeySource::Fixed(_) => "fixed".to_string(),
            KeySource::Env(var) => format!("env:{var}"),
        };
        f.debug_struct("FieldCipher").field("source", &source).finish()
    }
}

impl FieldCipher {
    /// Builds a cipher around raw key bytes. The key must be exactly 32 bytes.
    pub fn new(key_bytes: &[u8]) -> Result<Self, CipherError> {
        check_key_len(key_bytes)?;
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(key_bytes);
        Ok(Self {
            source: KeySource::Fixed(key),
        })
    }

    /// Builds a cipher that reads `var` each time it encrypts or decrypts.
    /// The variable's raw bytes are the key.
    pub fn from_env(var: impl Into<String>) -> Self {
        Self {
            source: KeySource::Env(var.into()),
        }
    }

    /// Reads `var` once and captures the key.
    pub fn from_env_once(var: &str) -> Result<Self, CipherError> {
        let key = read_env_key(var)?;
        Self::new(&key)
    }

    /// Encrypts `plaintext` into a base64 envelope (`nonce || ciphertext || tag`).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let cipher = self.build_cipher()?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CipherError::RandomSource(format!("{e}")))?;

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + sealed.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&sealed);

        tracing::trace!(target: CIPHER_TARGET, len = envelope.len(), "sealed field");
        Ok(STANDARD.encode(envelope))
    }

    /// Opens an envelope produced by [`FieldCipher::encrypt`].
    ///
    /// The key is validated before the envelope is looked at. Wrong keys,
    /// tampered bytes and truncated envelopes all surface as
    /// [`CipherError::Authentication`].
    pub fn decrypt(&self, envelope: &str) -> Result<String, CipherError> {
        let cipher = self.build_cipher()?;
        let data = STANDARD.decode(envelope.as_bytes())?;

        if data.len() < NONCE_LEN {
            tracing::warn!(target: CIPHER_TARGET, len = data.len(), "envelope shorter than nonce");
            return Err(CipherError::Authentication);
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| {
                tracing::warn!(target: CIPHER_TARGET, "envelope failed authentication");
                CipherError::Authentication
            })?;

        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidPlaintext)
    }

    fn build_cipher(&self) -> Result<Aes256Gcm, CipherError> {
        match &self.source {
            KeySource::Fixed(key) => Aes256Gcm::new_from_slice(key.as_slice())
                .map_err(|_| CipherError::InvalidKeyLength { actual: key.len() }),
            KeySource::Env(var) => {
                let key = read_env_key(var)?;
                check_key_len(&key)?;
                Aes256Gcm::new_from_slice(&key)
                    .map_err(|_| CipherError::InvalidKeyLength { actual: key.len() })
            }
        }
    }
}

fn read_env_key(var: &str) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    match std::env::var(var) {
        Ok(value) => Ok(Zeroizing::new(value.into_bytes())),
        Err(_) => {
            tracing::error!(target: CIPHER_TARGET, var, "encryption key variable not set");
            Err(CipherError::MissingKey(var.to_string()))
        }
    }
}

fn check_key_len(key: &[u8]) -> Result<(), CipherError> {
    if key.len() != KEY_LEN {
        tracing::error!(
            target: CIPHER_TARGET,
            expected = KEY_LEN,
            actual = key.len(),
            "invalid key length"
        );
        return Err(CipherError::InvalidKeyLength { actual: key.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{CipherError, FieldCipher, KEY_LEN, NONCE_LEN, TAG_LEN};
    use base64::{engine::general_purpose::STANDARD, Engine};

    const KEY: &[u8] = b"thisis32bitlongpassphraseimusing";

    fn cipher() -> FieldCipher {
        FieldCipher::new(KEY).expect("key should be valid")
    }

    #[test]
    fn encrypts_and_decrypts_round_trip() {
        let cipher = cipher();
        for plaintext in ["Hello, Blue Magma!", "", "arn:aws:iam::123456789012:role/audit", "Zürich 東京 🔐"] {
            let envelope = cipher.encrypt(plaintext).expect("encryption should succeed");
            assert_eq!(cipher.decrypt(&envelope).expect("decryption should succeed"), plaintext);
        }
    }

    #[test]
    fn envelope_layout_is_nonce_ciphertext_tag() {
        let envelope = cipher().encrypt("abc").unwrap();
        let raw = STANDARD.decode(envelope).unwrap();
        assert_eq!(raw.len(), NONCE_LEN + 3 + TAG_LEN);
    }

    #[test]
    fn same_plaintext_produces_distinct_envelopes() {
        let cipher = cipher();
        let first = cipher.encrypt("secret-token").unwrap();
        let second = cipher.encrypt("secret-token").unwrap();
        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), "secret-token");
        assert_eq!(cipher.decrypt(&second).unwrap(), "secret-token");
    }

    #[test]
    fn rejects_bad_keys() {
        let err = FieldCipher::new(b"shortkey").unwrap_err();
        assert!(err.is_key_error());
        assert!(format!("{err}").contains("invalid key length"));
        assert!(FieldCipher::new(&[0u8; KEY_LEN + 1]).is_err());
    }

    #[test]
    fn short_env_key_fails_both_directions() {
        let var = "MAGMA_TEST_CIPHER_SHORT_KEY";
        std::env::set_var(var, "thisis32bitlongpassphraseimusing");
        let cipher = FieldCipher::from_env(var);
        let envelope = cipher.encrypt("Hello, Blue Magma!").unwrap();

        std::env::set_var(var, "shortkey");
        let err = cipher.encrypt("Hello, Blue Magma!").unwrap_err();
        assert!(matches!(err, CipherError::InvalidKeyLength { actual: 8 }));
        let err = cipher.decrypt(&envelope).unwrap_err();
        assert!(matches!(err, CipherError::InvalidKeyLength { actual: 8 }));
    }

    #[test]
    fn key_gate_runs_before_payload_is_read() {
        let var = "MAGMA_TEST_CIPHER_GATE_KEY";
        std::env::set_var(var, "0123456789abcdef");
        let err = FieldCipher::from_env(var).decrypt("%%% not base64 %%%").unwrap_err();
        assert!(err.is_key_error());
    }

    #[test]
    fn missing_env_key_is_reported() {
        let err = FieldCipher::from_env("MAGMA_TEST_CIPHER_UNSET_KEY")
            .encrypt("x")
            .unwrap_err();
        assert!(matches!(err, CipherError::MissingKey(ref var) if var == "MAGMA_TEST_CIPHER_UNSET_KEY"));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn env_key_rotation_applies_to_next_call() {
        let var = "MAGMA_TEST_CIPHER_ROTATION_KEY";
        std::env::set_var(var, "11111111111111111111111111111111");
        let cipher = FieldCipher::from_env(var);
        let envelope = cipher.encrypt("rotating").unwrap();

        std::env::set_var(var, "22222222222222222222222222222222");
        assert!(matches!(cipher.decrypt(&envelope), Err(CipherError::Authentication)));

        std::env::set_var(var, "11111111111111111111111111111111");
        assert_eq!(cipher.decrypt(&envelope).unwrap(), "rotating");
    }

    #[test]
    fn from_env_once_captures_key() {
        let var = "MAGMA_TEST_CIPHER_ONCE_KEY";
        std::env::set_var(var, "33333333333333333333333333333333");
        let cipher = FieldCipher::from_env_once(var).unwrap();
        let envelope = cipher.encrypt("pinned").unwrap();
        std::env::remove_var(var);
        assert_eq!(cipher.decrypt(&envelope).unwrap(), "pinned");
    }

    #[test]
    fn detects_tampering_in_every_byte() {
        let cipher = cipher();
        let envelope = cipher.encrypt("Hello, Blue Magma!").unwrap();
        let raw = STANDARD.decode(&envelope).unwrap();
        for index in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[index] ^= 0x01;
            let err = cipher.decrypt(&STANDARD.encode(&tampered)).unwrap_err();
            assert!(matches!(err, CipherError::Authentication), "byte {index} went undetected");
        }
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let envelope = cipher().encrypt("payload").unwrap();
        let other = FieldCipher::new(&[7u8; KEY_LEN]).unwrap();
        assert!(matches!(other.decrypt(&envelope), Err(CipherError::Authentication)));
    }

    #[test]
    fn handles_invalid_envelopes() {
        let cipher = cipher();
        let err = cipher.decrypt("not base64!").unwrap_err();
        assert!(matches!(err, CipherError::Decode(_)));
        assert_eq!(err.http_status(), 400);

        let short = STANDARD.encode([0u8; NONCE_LEN - 1]);
        let err = cipher.decrypt(&short).unwrap_err();
        assert!(matches!(err, CipherError::Authentication));
        assert_eq!(err.http_status(), 400);
        assert_eq!(CipherError::InvalidPlaintext.http_status(), 400);

        let nonce_only = STANDARD.encode([0u8; NONCE_LEN]);
        assert!(matches!(cipher.decrypt(&nonce_only), Err(CipherError::Authentication)));
    }

    #[test]
    fn debug_output_hides_key() {
        let rendered = format!("{:?}", cipher());
        assert!(!rendered.contains("thisis32"));
        assert!(rendered.contains("fixed"));
    }

    #[test]
    fn cipher_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FieldCipher>();
        assert_send_sync::<CipherError>();

        let cipher = std::sync::Arc::new(cipher());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cipher = std::sync::Arc::clone(&cipher);
                std::thread::spawn(move || {
                    let value = format!("worker-{i}");
                    let envelope = cipher.encrypt(&value).unwrap();
                    assert_eq!(cipher.decrypt(&envelope).unwrap(), value);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
