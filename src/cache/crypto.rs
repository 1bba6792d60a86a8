//! Cache encryption module.
//!
//! Cache files hold mailbox metadata for real accounts, so they are
//! stored encrypted with AES-256-GCM. The key is derived from the
//! account credentials with SHA-256, and the random nonce is prepended
//! to the ciphertext.

use std::result;

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, Aes256Gcm, Key, Nonce,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// AES-GCM nonce size, in bytes.
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot encrypt cache payload")]
    EncryptError(#[source] aes_gcm::aead::Error),
    #[error("cannot decrypt cache payload")]
    DecryptError(#[source] aes_gcm::aead::Error),
    #[error("cannot decrypt cache payload: ciphertext too short")]
    CiphertextTooShortError,
}

pub type Result<T> = result::Result<T, Error>;

fn cipher(pass: &str) -> Aes256Gcm {
    let key = Sha256::digest(pass.as_bytes());
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()))
}

/// Encrypts data under a key derived from the given password. The
/// output is `nonce || ciphertext`.
pub fn encrypt(data: &[u8], pass: &str) -> Result<Vec<u8>> {
    let cipher = cipher(pass);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher.encrypt(&nonce, data).map_err(Error::EncryptError)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a `nonce || ciphertext` payload produced by [`encrypt`].
pub fn decrypt(data: &[u8], pass: &str) -> Result<Vec<u8>> {
    if data.len() < NONCE_SIZE {
        return Err(Error::CiphertextTooShortError);
    }

    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = cipher(pass);

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(Error::DecryptError)
}
