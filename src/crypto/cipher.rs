//! AES-256-GCM block encryption with caller-supplied nonces.

use crate::config::cipher_params::{KEY_LENGTH, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::RngCore;

/// AES-256-GCM cipher wrapper.
///
/// Unlike whole-object encryption, every block is sealed independently, so
/// the nonce is chosen by the framing scheme and not stored here.
pub struct BlockCipher {
    cipher: Aes256Gcm,
}

impl BlockCipher {
    /// Create a new cipher from a 256-bit key.
    pub fn new(key: &[u8; KEY_LENGTH]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Self { cipher }
    }

    /// Encrypt one block.
    ///
    /// Returns: ciphertext || tag (16 bytes)
    pub fn encrypt(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| Error::Cipher(e.to_string()))
    }

    /// Decrypt one block produced by `encrypt` with the same nonce.
    pub fn decrypt(&self, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::Decryption);
        }

        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decryption)
    }
}

/// Generate a fresh random nonce.
pub fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = BlockCipher::new(&[7u8; 32]);
        let nonce = random_nonce();
        let plaintext = b"Hello, World! This is a secret block.";

        let sealed = cipher.encrypt(&nonce, plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + TAG_SIZE);

        let opened = cipher.decrypt(&nonce, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_empty_block_has_tag_only() {
        let cipher = BlockCipher::new(&[1u8; 32]);
        let nonce = [0u8; NONCE_SIZE];

        let sealed = cipher.encrypt(&nonce, b"").unwrap();
        assert_eq!(sealed.len(), TAG_SIZE);
        assert!(cipher.decrypt(&nonce, &sealed).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let cipher = BlockCipher::new(&[3u8; 32]);
        let sealed = cipher.encrypt(&[1u8; NONCE_SIZE], b"data").unwrap();

        assert!(cipher.decrypt(&[2u8; NONCE_SIZE], &sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = BlockCipher::new(&[3u8; 32]);
        let nonce = random_nonce();
        let mut sealed = cipher.encrypt(&nonce, b"Secret data").unwrap();
        sealed[0] ^= 0xFF;

        assert!(matches!(cipher.decrypt(&nonce, &sealed), Err(Error::Decryption)));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let cipher = BlockCipher::new(&[3u8; 32]);
        assert!(cipher.decrypt(&[0u8; NONCE_SIZE], &[0u8; 4]).is_err());
    }
}
