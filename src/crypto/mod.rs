//! Cryptographic operations for the cipher stage.
//!
//! This module provides:
//! - AES-256-GCM block encryption
//! - Argon2id password-based key derivation
//! - Block framing schemes with their size arithmetic

mod cipher;
mod framer;
mod kdf;
mod keys;

pub use cipher::{random_nonce, BlockCipher};
pub use framer::CipherFramer;
pub use kdf::KeyDerivation;
pub use keys::{deterministic_iv, resolve_key};
