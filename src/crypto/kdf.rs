//! Argon2id stretching of passphrase key material.

use crate::config::argon2_params;
use crate::error::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

/// Salted Argon2id derivation of 256-bit cipher keys.
#[derive(Debug, Clone)]
pub struct KeyDerivation {
    salt: Vec<u8>,
}

fn kdf_error(e: impl ToString) -> Error {
    Error::KeyDerivation(e.to_string())
}

impl KeyDerivation {
    /// Fresh 32-byte random salt, for writing into a new configuration.
    pub fn new() -> Self {
        let mut salt = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        Self { salt }
    }

    pub fn from_salt(salt: &[u8]) -> Result<Self> {
        if salt.len() < argon2_params::MIN_SALT_LENGTH {
            return Err(kdf_error(format!(
                "salt of {} bytes, need {}",
                salt.len(),
                argon2_params::MIN_SALT_LENGTH
            )));
        }
        Ok(Self { salt: salt.into() })
    }

    /// Salt as stored in configuration files.
    pub fn from_hex_salt(salt: &str) -> Result<Self> {
        Self::from_salt(&hex::decode(salt).map_err(kdf_error)?)
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn salt_hex(&self) -> String {
        hex::encode(&self.salt)
    }

    /// Stretch `passphrase` into a cipher key (64 MiB, 3 passes, 4 lanes).
    pub fn derive_key(&self, passphrase: &str) -> Result<[u8; 32]> {
        let params = Params::new(
            argon2_params::MEMORY_COST,
            argon2_params::TIME_COST,
            argon2_params::PARALLELISM,
            Some(argon2_params::OUTPUT_LENGTH),
        )
        .map_err(kdf_error)?;

        let mut key = [0u8; 32];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(passphrase.as_bytes(), &self.salt, &mut key)
            .map_err(kdf_error)?;
        Ok(key)
    }
}

impl Default for KeyDerivation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_salt_same_key() {
        let kdf = KeyDerivation::from_salt(&[1u8; 16]).unwrap();
        assert_eq!(kdf.derive_key("pass").unwrap(), kdf.derive_key("pass").unwrap());
        assert_ne!(kdf.derive_key("pass").unwrap(), kdf.derive_key("Pass").unwrap());
    }

    #[test]
    fn test_salt_changes_key() {
        let a = KeyDerivation::from_salt(&[1u8; 16]).unwrap();
        let b = KeyDerivation::from_salt(&[2u8; 16]).unwrap();
        assert_ne!(a.derive_key("pass").unwrap(), b.derive_key("pass").unwrap());
    }

    #[test]
    fn test_bad_salts_rejected() {
        assert!(KeyDerivation::from_salt(&[1u8; 4]).is_err());
        assert!(KeyDerivation::from_hex_salt("zz").is_err());
    }

    #[test]
    fn test_hex_salt_roundtrip() {
        let kdf = KeyDerivation::new();
        assert_eq!(kdf.salt().len(), 32);
        let restored = KeyDerivation::from_hex_salt(&kdf.salt_hex()).unwrap();
        assert_eq!(kdf.salt(), restored.salt());
    }
}
