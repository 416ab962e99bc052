//! AES-256-GCM sealing of access tokens at rest.
//!
//! Sealed layout: `nonce (12) || ciphertext || tag (16)`.

use crate::models::Credential;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use openssl::error::ErrorStack;
use openssl::rand::rand_bytes;
use openssl::symm::{decrypt_aead, encrypt_aead, Cipher};
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const AAD: &[u8] = b"facebook_access_token";

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("Crypto error: {0}")]
    Crypto(#[from] ErrorStack),
    #[error("Sealed token is too short")]
    Truncated,
    #[error("Decrypted token is not valid UTF-8")]
    NotUtf8,
}

#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; KEY_LEN],
}

impl TokenCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Key given as standard base64 of exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            CipherError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(Self::new(key))
    }

    pub fn seal(&self, credential: &Credential) -> Result<Vec<u8>, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand_bytes(&mut nonce)?;
        let mut tag = [0u8; TAG_LEN];
        let ciphertext = encrypt_aead(
            Cipher::aes_256_gcm(),
            &self.key,
            Some(&nonce),
            AAD,
            credential.expose().as_bytes(),
            &mut tag,
        )?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        sealed.extend_from_slice(&tag);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Credential, CipherError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce, rest) = sealed.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
        let plaintext = decrypt_aead(
            Cipher::aes_256_gcm(),
            &self.key,
            Some(nonce),
            AAD,
            ciphertext,
            tag,
        )?;
        String::from_utf8(plaintext)
            .map(Credential::new)
            .map_err(|_| CipherError::NotUtf8)
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(***)")
    }
}
