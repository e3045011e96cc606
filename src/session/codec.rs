//! Authenticated encryption for session cookie values.
//!
//! Cookie values are sealed with AES-256-GCM: a random 96-bit nonce is
//! prepended to the ciphertext and the whole blob is base64url encoded.
//! A value that fails authentication decodes to [`Error::Crypto`], which the
//! identity extractor treats as "no session present" rather than as an
//! invalid identity.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;

use crate::{Error, Result};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Symmetric cipher for session cookie values
pub struct CookieCodec {
    cipher: Aes256Gcm,
}

impl CookieCodec {
    /// Create a codec from the configured 32-byte key
    pub fn new(key: &str) -> Result<Self> {
        let bytes: [u8; 32] = key
            .as_bytes()
            .try_into()
            .map_err(|_| Error::Config("encryption_key must be exactly 32 bytes".to_string()))?;

        Ok(Self {
            cipher: Aes256Gcm::new((&bytes).into()),
        })
    }

    /// Seal a plaintext value into an opaque cookie-safe string
    pub fn encode(&self, plaintext: &str) -> Result<String> {
        let nonce: [u8; NONCE_LEN] = rand::rng().random();

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| Error::Crypto)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Open a sealed cookie value; any tampering yields [`Error::Crypto`]
    pub fn decode(&self, value: &str) -> Result<String> {
        let raw = URL_SAFE_NO_PAD.decode(value).map_err(|_| Error::Crypto)?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Crypto);
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto)?;

        String::from_utf8(plaintext).map_err(|_| Error::Crypto)
    }
}
