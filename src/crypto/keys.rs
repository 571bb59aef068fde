//! Resolution of configured key material into cipher keys.

use crate::config::cipher_params::{KEY_LENGTH, NONCE_SIZE};
use crate::config::KeyMaterial;
use crate::crypto::kdf::KeyDerivation;
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Domain separator for IVs derived from the key.
const DETERMINISTIC_IV_CONTEXT: &[u8] = b"LAYERFS_DETERMINISTIC_IV_V1";

/// Turn configured key material into a 256-bit key.
///
/// `prompt` supplies a passphrase for [`KeyMaterial::Prompt`]; it receives
/// the prompt text.
pub fn resolve_key<F>(material: &KeyMaterial, prompt: F) -> Result<[u8; KEY_LENGTH]>
where
    F: FnOnce(&str) -> Result<String>,
{
    match material {
        KeyMaterial::Hex(encoded) => {
            let raw = hex::decode(encoded.trim())
                .map_err(|e| Error::Config(format!("invalid hex key: {}", e)))?;
            raw.as_slice().try_into().map_err(|_| {
                Error::Config(format!(
                    "key must be {} bytes, got {}",
                    KEY_LENGTH,
                    raw.len()
                ))
            })
        }
        KeyMaterial::Passphrase { passphrase, salt } => {
            KeyDerivation::from_hex_salt(salt)?.derive_key(passphrase)
        }
        KeyMaterial::Prompt { salt } => {
            let kdf = KeyDerivation::from_hex_salt(salt)?;
            let passphrase = prompt("Passphrase: ")?;
            kdf.derive_key(&passphrase)
        }
    }
}

/// The process-wide IV of the deterministic framer.
///
/// Taken from the configured hex string, or derived from the key.
pub fn deterministic_iv(key: &[u8; KEY_LENGTH], configured: Option<&str>) -> Result<[u8; NONCE_SIZE]> {
    if let Some(encoded) = configured {
        let raw = hex::decode(encoded.trim())
            .map_err(|e| Error::Config(format!("invalid hex iv: {}", e)))?;
        return raw.as_slice().try_into().map_err(|_| {
            Error::Config(format!("iv must be {} bytes, got {}", NONCE_SIZE, raw.len()))
        });
    }

    let mut hasher = Sha256::new();
    hasher.update(DETERMINISTIC_IV_CONTEXT);
    hasher.update(key);
    let hash = hasher.finalize();
    let mut iv = [0u8; NONCE_SIZE];
    iv.copy_from_slice(&hash[..NONCE_SIZE]);
    Ok(iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_prompt(_: &str) -> Result<String> {
        Err(Error::Config("no terminal".to_string()))
    }

    #[test]
    fn test_hex_key() {
        let key = resolve_key(&KeyMaterial::Hex("ab".repeat(32)), no_prompt).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn test_hex_key_wrong_length() {
        assert!(resolve_key(&KeyMaterial::Hex("ab".repeat(16)), no_prompt).is_err());
        assert!(resolve_key(&KeyMaterial::Hex("xyz".to_string()), no_prompt).is_err());
    }

    #[test]
    fn test_prompt_uses_callback() {
        let material = KeyMaterial::Prompt {
            salt: "01".repeat(16),
        };
        assert!(resolve_key(&material, no_prompt).is_err());

        let from_prompt = resolve_key(&material, |_| Ok("secret".to_string())).unwrap();
        let direct = resolve_key(
            &KeyMaterial::Passphrase {
                passphrase: "secret".to_string(),
                salt: "01".repeat(16),
            },
            no_prompt,
        )
        .unwrap();
        assert_eq!(from_prompt, direct);
    }

    #[test]
    fn test_derived_iv_stable_per_key() {
        let a = deterministic_iv(&[1u8; 32], None).unwrap();
        let b = deterministic_iv(&[1u8; 32], None).unwrap();
        let c = deterministic_iv(&[2u8; 32], None).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_configured_iv() {
        let iv = deterministic_iv(&[1u8; 32], Some(&"0f".repeat(12))).unwrap();
        assert_eq!(iv, [0x0f; 12]);
        assert!(deterministic_iv(&[1u8; 32], Some("0f0f")).is_err());
    }
}
