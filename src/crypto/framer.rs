//! Per-block cipher framing.
//!
//! A framer maps one logical block of at most `block_size` bytes to one
//! physical frame, and answers the size arithmetic the cipher stage needs to
//! translate offsets and file sizes between the two views.
//!
//! | scheme        | frame layout              | overhead |
//! |---------------|---------------------------|----------|
//! | null          | plaintext                 | 0        |
//! | null-padded   | plaintext, zero padding   | 16       |
//! | deterministic | ciphertext, tag           | 16       |
//! | random IV     | ciphertext, tag, nonce    | 28       |

use crate::config::cipher_params::{NONCE_SIZE, NULL_PAD_SIZE, TAG_SIZE};
use crate::config::{CipherConfig, CipherMode};
use crate::crypto::cipher::{random_nonce, BlockCipher};
use crate::crypto::keys::{deterministic_iv, resolve_key};
use crate::error::{Error, Result};
use log::trace;

enum Scheme {
    Null,
    NullPadded,
    Deterministic {
        cipher: BlockCipher,
        iv: [u8; NONCE_SIZE],
    },
    RandomIv {
        cipher: BlockCipher,
    },
}

/// Block framer of the cipher stage.
pub struct CipherFramer {
    block_size: u64,
    scheme: Scheme,
}

impl CipherFramer {
    /// Identity framing.
    pub fn null(block_size: u64) -> Self {
        Self {
            block_size,
            scheme: Scheme::Null,
        }
    }

    /// Plaintext frames padded with zeros, for exercising the size arithmetic.
    pub fn null_padded(block_size: u64) -> Self {
        Self {
            block_size,
            scheme: Scheme::NullPadded,
        }
    }

    /// AES-GCM with one fixed IV for every block.
    pub fn deterministic(block_size: u64, key: &[u8; 32], iv: [u8; NONCE_SIZE]) -> Self {
        Self {
            block_size,
            scheme: Scheme::Deterministic {
                cipher: BlockCipher::new(key),
                iv,
            },
        }
    }

    /// AES-GCM with a fresh random nonce stored in each frame.
    pub fn random_iv(block_size: u64, key: &[u8; 32]) -> Self {
        Self {
            block_size,
            scheme: Scheme::RandomIv {
                cipher: BlockCipher::new(key),
            },
        }
    }

    /// Build the framer a cipher configuration asks for.
    pub fn from_config<F>(block_size: u64, config: &CipherConfig, prompt: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        let key = match config.mode {
            CipherMode::Null => return Ok(Self::null(block_size)),
            CipherMode::NullPadded => return Ok(Self::null_padded(block_size)),
            CipherMode::Deterministic | CipherMode::RandomIv => {
                let material = config.key.as_ref().ok_or_else(|| {
                    Error::Config("encrypting cipher modes need a key".to_string())
                })?;
                resolve_key(material, prompt)?
            }
        };

        if config.mode == CipherMode::Deterministic {
            let iv = deterministic_iv(&key, config.iv.as_deref())?;
            Ok(Self::deterministic(block_size, &key, iv))
        } else {
            Ok(Self::random_iv(block_size, &key))
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn mode(&self) -> CipherMode {
        match self.scheme {
            Scheme::Null => CipherMode::Null,
            Scheme::NullPadded => CipherMode::NullPadded,
            Scheme::Deterministic { .. } => CipherMode::Deterministic,
            Scheme::RandomIv { .. } => CipherMode::RandomIv,
        }
    }

    /// Bytes a frame carries beyond its logical payload.
    pub fn overhead(&self) -> usize {
        match self.scheme {
            Scheme::Null => 0,
            Scheme::NullPadded => NULL_PAD_SIZE,
            Scheme::Deterministic { .. } => TAG_SIZE,
            Scheme::RandomIv { .. } => TAG_SIZE + NONCE_SIZE,
        }
    }

    fn physical_stride(&self) -> u64 {
        self.block_size + self.overhead() as u64
    }

    /// Size of the frame holding `logical_size` bytes.
    pub fn physical_block_size(&self, logical_size: usize) -> usize {
        logical_size + self.overhead()
    }

    /// Physical offset of the frame holding the block at `logical_offset`.
    pub fn physical_block_offset(&self, logical_offset: u64) -> u64 {
        match self.scheme {
            Scheme::Null => logical_offset,
            _ => (logical_offset / self.block_size) * self.physical_stride(),
        }
    }

    /// Physical size to truncate to so that `logical_size` bytes remain.
    pub fn physical_truncate_size(&self, logical_size: u64) -> u64 {
        match self.scheme {
            Scheme::Null => logical_size,
            _ => {
                let full = logical_size / self.block_size;
                let rest = logical_size % self.block_size;
                let tail = if rest > 0 {
                    rest + self.overhead() as u64
                } else {
                    0
                };
                full * self.physical_stride() + tail
            }
        }
    }

    /// Logical file size for a physical size reported by the layer below.
    ///
    /// Encrypted schemes cannot tell the length of a trailing partial frame
    /// from its size alone; `read_frame(offset, len)` fetches it for decoding.
    pub fn logical_file_size<R>(&self, physical_size: u64, read_frame: R) -> Result<u64>
    where
        R: FnOnce(u64, usize) -> Result<Vec<u8>>,
    {
        match self.scheme {
            Scheme::Null => Ok(physical_size),
            Scheme::NullPadded => {
                let stride = self.physical_stride();
                let frames = physical_size.div_ceil(stride);
                Ok(physical_size.saturating_sub(frames * NULL_PAD_SIZE as u64))
            }
            Scheme::Deterministic { .. } | Scheme::RandomIv { .. } => {
                let stride = self.physical_stride();
                let full = physical_size / stride;
                let last = (physical_size % stride) as usize;
                let mut size = full * self.block_size;
                if last > 0 {
                    let offset = full * stride;
                    let frame = read_frame(offset, last)?;
                    if frame.len() < last {
                        return Err(Error::ShortTransfer {
                            expected: last,
                            actual: frame.len(),
                        });
                    }
                    size += self.decode(&frame, offset)?.len() as u64;
                }
                Ok(size)
            }
        }
    }

    /// Frame one logical block. `position` is the block's logical offset.
    pub fn encode(&self, block: &[u8], position: u64) -> Result<Vec<u8>> {
        match &self.scheme {
            Scheme::Null => Ok(block.to_vec()),
            Scheme::NullPadded => {
                let mut frame = Vec::with_capacity(block.len() + NULL_PAD_SIZE);
                frame.extend_from_slice(block);
                frame.resize(block.len() + NULL_PAD_SIZE, 0);
                Ok(frame)
            }
            Scheme::Deterministic { cipher, iv } => cipher.encrypt(iv, block),
            Scheme::RandomIv { cipher } => {
                let nonce = random_nonce();
                trace!("sealing {} bytes at {} with fresh nonce", block.len(), position);
                let mut frame = cipher.encrypt(&nonce, block)?;
                frame.extend_from_slice(&nonce);
                Ok(frame)
            }
        }
    }

    /// Recover the logical block from one frame. `position` is informational.
    pub fn decode(&self, frame: &[u8], position: u64) -> Result<Vec<u8>> {
        match &self.scheme {
            Scheme::Null => Ok(frame.to_vec()),
            Scheme::NullPadded => {
                if frame.len() < NULL_PAD_SIZE {
                    return Err(Error::Cipher(format!(
                        "padded frame at {} shorter than its padding",
                        position
                    )));
                }
                Ok(frame[..frame.len() - NULL_PAD_SIZE].to_vec())
            }
            Scheme::Deterministic { cipher, iv } => cipher.decrypt(iv, frame),
            Scheme::RandomIv { cipher } => {
                if frame.len() < TAG_SIZE + NONCE_SIZE {
                    return Err(Error::Decryption);
                }
                let (sealed, nonce) = frame.split_at(frame.len() - NONCE_SIZE);
                let mut iv = [0u8; NONCE_SIZE];
                iv.copy_from_slice(nonce);
                cipher.decrypt(&iv, sealed)
            }
        }
    }
}
