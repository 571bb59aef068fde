//! Configuration constants and types for pipeline assembly.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default block size (4KB, common for most file systems).
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;

/// Default number of workers in the device dispatch pool.
pub const DEFAULT_WORKER_THREADS: usize = 10;

/// Default erasure data shards.
pub const DEFAULT_DATA_SHARDS: usize = 2;

/// Default erasure parity shards.
pub const DEFAULT_PARITY_SHARDS: usize = 1;

/// Chunk size used when growing a file with zeroes.
pub const TRUNCATE_FILL_CHUNK: usize = 64 * 1024;

/// Block cipher framing parameters.
pub mod cipher_params {
    /// AES-256 key length in bytes.
    pub const KEY_LENGTH: usize = 32;

    /// AES-GCM authentication tag, the fixed per-block pad.
    pub const TAG_SIZE: usize = 16;

    /// AES-GCM nonce (IV) length.
    pub const NONCE_SIZE: usize = 12;

    /// Pad reserved by the null-padded framer.
    pub const NULL_PAD_SIZE: usize = 16;
}

/// Argon2id parameters for passphrase key derivation.
pub mod argon2_params {
    /// Memory cost in KiB (64 MB).
    pub const MEMORY_COST: u32 = 65536;

    /// Time cost (iterations).
    pub const TIME_COST: u32 = 3;

    /// Parallelism factor.
    pub const PARALLELISM: u32 = 4;

    /// Output length in bytes (256 bits).
    pub const OUTPUT_LENGTH: usize = 32;

    /// Minimum salt length in bytes.
    pub const MIN_SALT_LENGTH: usize = 8;
}

/// One stage of the layer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Block alignment with read-modify-write.
    Align,
    /// Per-block cipher framing.
    Cipher,
    /// Multi-device fan-out (always the bottom layer).
    Devices,
}

/// Cipher framing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherMode {
    Null,
    NullPadded,
    Deterministic,
    RandomIv,
}

/// Device coder variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoderMode {
    Replicate,
    Xor,
    Erasure,
}

/// Where the cipher key comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMaterial {
    /// Raw 256-bit key, hex encoded.
    Hex(String),
    /// Passphrase stretched with Argon2id.
    Passphrase { passphrase: String, salt: String },
    /// Passphrase read interactively, stretched with Argon2id.
    Prompt { salt: String },
}

/// Cipher stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherConfig {
    pub mode: CipherMode,

    #[serde(default)]
    pub key: Option<KeyMaterial>,

    /// Hex-encoded 12-byte IV for the deterministic mode.
    /// Derived from the key when absent.
    #[serde(default)]
    pub iv: Option<String>,
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            mode: CipherMode::Null,
            key: None,
            iv: None,
        }
    }
}

/// Erasure coding shard counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureParams {
    /// Data shards.
    pub k: usize,
    /// Parity shards.
    pub m: usize,
}

impl Default for ErasureParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_DATA_SHARDS,
            m: DEFAULT_PARITY_SHARDS,
        }
    }
}

/// Multi-device stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub mode: CoderMode,

    /// Root directory of each backing device.
    pub paths: Vec<PathBuf>,

    /// Expected device count; must match `paths` when given.
    #[serde(default)]
    pub ndevs: Option<usize>,

    #[serde(default)]
    pub erasure: ErasureParams,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mode: CoderMode::Replicate,
            paths: Vec::new(),
            ndevs: None,
            erasure: ErasureParams::default(),
        }
    }
}

fn default_layers() -> Vec<LayerKind> {
    vec![LayerKind::Align, LayerKind::Cipher, LayerKind::Devices]
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

/// Configuration consumed once at pipeline assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Logical block size in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: u64,

    /// Stage order, top first.
    #[serde(default = "default_layers")]
    pub layers: Vec<LayerKind>,

    #[serde(default)]
    pub cipher: CipherConfig,

    #[serde(default)]
    pub devices: DeviceConfig,

    /// Size of the shared device worker pool.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Directory receiving per-layer latency dumps on shutdown.
    #[serde(default)]
    pub latency_dump_dir: Option<PathBuf>,

    /// Log filter used by the binary when RUST_LOG is unset.
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            layers: default_layers(),
            cipher: CipherConfig::default(),
            devices: DeviceConfig::default(),
            worker_threads: DEFAULT_WORKER_THREADS,
            latency_dump_dir: None,
            log_level: None,
        }
    }
}

impl PipelineConfig {
    /// Create a configuration over the given device roots with default modes.
    pub fn new<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        let mut config = Self::default();
        config.devices.paths = paths.into_iter().map(Into::into).collect();
        config
    }

    /// Set the block size.
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the cipher mode and key.
    pub fn with_cipher(mut self, mode: CipherMode, key: Option<KeyMaterial>) -> Self {
        self.cipher.mode = mode;
        self.cipher.key = key;
        self
    }

    /// Set the device coder mode.
    pub fn with_coder(mut self, mode: CoderMode) -> Self {
        self.devices.mode = mode;
        self
    }

    /// Set the erasure shard counts.
    pub fn with_erasure(mut self, k: usize, m: usize) -> Self {
        self.devices.erasure = ErasureParams { k, m };
        self
    }

    /// Set the stage order.
    pub fn with_layers(mut self, layers: Vec<LayerKind>) -> Self {
        self.layers = layers;
        self
    }

    /// Number of backing devices.
    pub fn ndevs(&self) -> usize {
        self.devices.paths.len()
    }

    /// Whether the given stage is part of the stack.
    pub fn has_layer(&self, kind: LayerKind) -> bool {
        self.layers.contains(&kind)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(Error::Config("Block size must be a power of 2".to_string()));
        }
        if self.block_size > u32::MAX as u64 {
            return Err(Error::Config("Block size must fit in 32 bits".to_string()));
        }
        if self.worker_threads == 0 {
            return Err(Error::Config(
                "Worker pool needs at least one thread".to_string(),
            ));
        }

        self.validate_layers()?;
        self.validate_devices()?;

        if self.has_layer(LayerKind::Cipher) {
            match self.cipher.mode {
                CipherMode::Deterministic | CipherMode::RandomIv if self.cipher.key.is_none() => {
                    return Err(Error::Config(format!(
                        "Cipher mode {:?} requires key material",
                        self.cipher.mode
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn validate_layers(&self) -> Result<()> {
        if self.layers.last() != Some(&LayerKind::Devices) {
            return Err(Error::Config(
                "The devices layer must be the last layer".to_string(),
            ));
        }
        for kind in [LayerKind::Align, LayerKind::Cipher, LayerKind::Devices] {
            if self.layers.iter().filter(|&&l| l == kind).count() > 1 {
                return Err(Error::Config(format!("Layer {:?} listed twice", kind)));
            }
        }

        let position = |kind| self.layers.iter().position(|&l| l == kind);
        if self.cipher.mode != CipherMode::Null {
            if let Some(cipher_at) = position(LayerKind::Cipher) {
                match position(LayerKind::Align) {
                    Some(align_at) if align_at < cipher_at => {}
                    _ => {
                        return Err(Error::Config(
                            "A framing cipher needs the align layer above it".to_string(),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_devices(&self) -> Result<()> {
        let ndevs = self.ndevs();
        if ndevs == 0 {
            return Err(Error::Config("At least one device path is required".to_string()));
        }
        if let Some(expected) = self.devices.ndevs {
            if expected != ndevs {
                return Err(Error::Config(format!(
                    "ndevs is {} but {} device paths were given",
                    expected, ndevs
                )));
            }
        }

        match self.devices.mode {
            CoderMode::Replicate => {}
            CoderMode::Xor => {
                if ndevs < 2 {
                    return Err(Error::Config("XOR coding needs at least 2 devices".to_string()));
                }
            }
            CoderMode::Erasure => {
                let ErasureParams { k, m } = self.devices.erasure;
                if k == 0 || m == 0 {
                    return Err(Error::Config(
                        "Erasure coding needs k >= 1 and m >= 1".to_string(),
                    ));
                }
                if k + m != ndevs {
                    return Err(Error::Config(format!(
                        "Erasure coding with k={} m={} needs {} devices, got {}",
                        k,
                        m,
                        k + m,
                        ndevs
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_devices() -> PipelineConfig {
        PipelineConfig::new(["/tmp/d0", "/tmp/d1"])
    }

    #[test]
    fn test_default_layers_valid() {
        assert!(two_devices().validate().is_ok());
    }

    #[test]
    fn test_block_size_power_of_two() {
        assert!(two_devices().with_block_size(1000).validate().is_err());
        assert!(two_devices().with_block_size(16).validate().is_ok());
    }

    #[test]
    fn test_devices_layer_must_be_last() {
        let config = two_devices().with_layers(vec![LayerKind::Devices, LayerKind::Align]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cipher_requires_align_above() {
        let key = KeyMaterial::Hex("00".repeat(32));
        let config = two_devices()
            .with_cipher(CipherMode::Deterministic, Some(key))
            .with_layers(vec![LayerKind::Cipher, LayerKind::Devices]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deterministic_requires_key() {
        let config = two_devices().with_cipher(CipherMode::Deterministic, None);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_erasure_device_count() {
        let config = two_devices().with_coder(CoderMode::Erasure);
        assert!(config.validate().is_err());

        let config = PipelineConfig::new(["/a", "/b", "/c"]).with_coder(CoderMode::Erasure);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_xor_needs_two_devices() {
        let config = PipelineConfig::new(["/a"]).with_coder(CoderMode::Xor);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "cipher": { "mode": "random_iv", "key": { "hex": "00" } },
                "devices": { "mode": "erasure", "paths": ["/a", "/b", "/c"] }
            }"#,
        )
        .unwrap();

        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.layers, default_layers());
        assert_eq!(config.devices.erasure, ErasureParams { k: 2, m: 1 });
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
        assert!(matches!(config.cipher.key, Some(KeyMaterial::Hex(_))));
    }
}
