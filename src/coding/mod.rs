//! Device coders: how one block becomes one fragment per device.
//!
//! | coder     | fragment                       | decode needs  |
//! |-----------|--------------------------------|---------------|
//! | replicate | the whole block                | device 0      |
//! | xor       | random pads plus an XOR share  | every device  |
//! | erasure   | Reed-Solomon shard             | any `k`       |

mod erasure;
mod offset_index;
mod replicate;
mod xor;

pub use erasure::ErasureCoder;
pub use offset_index::{FileId, FileIdentities, IndexEntry, OffsetIndex};
pub use replicate::ReplicateCoder;
pub use xor::XorCoder;

use crate::config::{CoderMode, DeviceConfig};
use crate::error::Result;
use crate::storage::LayerPath;

/// Where a block's fragments sit in every device file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Offset of each fragment in its device file.
    pub offset: u64,
    /// Bytes to transfer per device.
    pub length: usize,
    /// Logical bytes the fragments decode to, when known up front.
    pub block_length: Option<usize>,
}

/// Fragments of one block, one per device, and where to put them.
#[derive(Debug)]
pub struct FragmentSet {
    pub fragments: Vec<Vec<u8>>,
    pub placement: Placement,
}

/// The coder selected for the device stage.
pub enum DeviceCoder {
    Replicate(ReplicateCoder),
    Xor(XorCoder),
    Erasure(ErasureCoder),
}

impl DeviceCoder {
    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        Ok(match config.mode {
            CoderMode::Replicate => DeviceCoder::Replicate(ReplicateCoder),
            CoderMode::Xor => DeviceCoder::Xor(XorCoder),
            CoderMode::Erasure => {
                DeviceCoder::Erasure(ErasureCoder::new(config.erasure.k, config.erasure.m)?)
            }
        })
    }

    pub fn mode(&self) -> CoderMode {
        match self {
            DeviceCoder::Replicate(_) => CoderMode::Replicate,
            DeviceCoder::Xor(_) => CoderMode::Xor,
            DeviceCoder::Erasure(_) => CoderMode::Erasure,
        }
    }

    /// Split a block written at `offset` into `ndevs` fragments.
    pub fn encode(&self, path: &LayerPath, block: &[u8], offset: u64, ndevs: usize) -> Result<FragmentSet> {
        match self {
            DeviceCoder::Replicate(coder) => Ok(FragmentSet {
                fragments: coder.encode(block, ndevs),
                placement: Placement {
                    offset,
                    length: block.len(),
                    block_length: Some(block.len()),
                },
            }),
            DeviceCoder::Xor(coder) => Ok(FragmentSet {
                fragments: coder.encode(block, ndevs)?,
                placement: Placement {
                    offset,
                    length: block.len(),
                    block_length: Some(block.len()),
                },
            }),
            DeviceCoder::Erasure(coder) => {
                let (fragments, entry) = coder.encode(path, block, offset)?;
                Ok(FragmentSet {
                    fragments,
                    placement: Placement {
                        offset: entry.physical_offset,
                        length: entry.fragment_length as usize,
                        block_length: Some(entry.block_length as usize),
                    },
                })
            }
        }
    }

    /// Where to read `size` logical bytes at `offset`.
    ///
    /// `Ok(None)` means there is nothing stored there.
    pub fn locate(&self, path: &LayerPath, offset: u64, size: usize) -> Result<Option<Placement>> {
        match self {
            DeviceCoder::Replicate(_) | DeviceCoder::Xor(_) => Ok(Some(Placement {
                offset,
                length: size,
                block_length: None,
            })),
            DeviceCoder::Erasure(coder) => Ok(coder.locate(path, offset)?.map(|entry| Placement {
                offset: entry.physical_offset,
                length: entry.fragment_length as usize,
                block_length: Some(entry.block_length as usize),
            })),
        }
    }

    /// Rebuild the block from the fragments read at `placement`.
    pub fn decode(&self, fragments: Vec<Vec<u8>>, placement: &Placement) -> Result<Vec<u8>> {
        match self {
            DeviceCoder::Replicate(coder) => coder.decode(fragments),
            DeviceCoder::Xor(coder) => coder.decode(fragments),
            DeviceCoder::Erasure(coder) => {
                let block_length = placement.block_length.unwrap_or(placement.length);
                coder.decode(fragments.into_iter().map(Some).collect(), block_length)
            }
        }
    }

    /// Path of the file backing `path` on `device`.
    pub fn device_path(&self, path: &LayerPath, device: usize) -> LayerPath {
        match self {
            DeviceCoder::Erasure(coder) => path.with_suffix(&coder.fragment_suffix(device)),
            _ => path.clone(),
        }
    }

    /// Logical name for an entry listed on device 0, or `None` to hide it.
    pub fn listed_name(&self, name: &str, is_dir: bool) -> Option<String> {
        match self {
            DeviceCoder::Erasure(coder) if !is_dir => coder.logical_name(name).map(str::to_string),
            _ => Some(name.to_string()),
        }
    }

    /// Logical size the coder tracks itself, instead of the device file size.
    pub fn tracked_size(&self, path: &LayerPath) -> Option<u64> {
        match self {
            DeviceCoder::Erasure(coder) => Some(coder.tracked_size(path)),
            _ => None,
        }
    }

    /// Physical size device files should be truncated to for logical `size`.
    pub fn truncate(&self, path: &LayerPath, size: u64) -> Option<u64> {
        match self {
            DeviceCoder::Erasure(coder) => coder.truncate(path, size),
            _ => Some(size),
        }
    }

    /// Create truncates, so an existing file starts over empty.
    pub fn on_create(&self, path: &LayerPath) {
        if let DeviceCoder::Erasure(coder) = self {
            coder.reset(path);
        }
    }

    pub fn on_unlink(&self, path: &LayerPath) {
        if let DeviceCoder::Erasure(coder) = self {
            coder.forget(path);
        }
    }

    pub fn on_rename(&self, from: &LayerPath, to: &LayerPath) {
        if let DeviceCoder::Erasure(coder) = self {
            coder.rename(from, to);
        }
    }

    pub fn on_rename_dir(&self, from: &LayerPath, to: &LayerPath) {
        if let DeviceCoder::Erasure(coder) = self {
            coder.rename_dir(from, to);
        }
    }

    pub fn on_link(&self, existing: &LayerPath, link: &LayerPath) {
        if let DeviceCoder::Erasure(coder) = self {
            coder.link(existing, link);
        }
    }
}
