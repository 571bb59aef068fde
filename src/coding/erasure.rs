//! Reed-Solomon erasure coding over `k` data and `m` parity fragments.

use crate::coding::offset_index::{FileIdentities, IndexEntry, OffsetIndex};
use crate::error::{Error, Result};
use crate::storage::LayerPath;
use log::debug;
use reed_solomon_erasure::galois_8::ReedSolomon;

/// Erasure coder with per-file placement bookkeeping.
pub struct ErasureCoder {
    data_shards: usize,
    parity_shards: usize,
    reed_solomon: ReedSolomon,
    identities: FileIdentities,
    index: OffsetIndex,
}

impl ErasureCoder {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 || parity_shards == 0 {
            return Err(Error::Config(
                "erasure coding needs at least one data and one parity shard".to_string(),
            ));
        }
        let reed_solomon = ReedSolomon::new(data_shards, parity_shards)?;
        Ok(Self {
            data_shards,
            parity_shards,
            reed_solomon,
            identities: FileIdentities::new(),
            index: OffsetIndex::new(),
        })
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Fragment length for a block of `len` bytes.
    pub fn fragment_length(&self, len: usize) -> usize {
        len.div_ceil(self.data_shards)
    }

    /// Split `block` into fragments and record where they go.
    pub fn encode(&self, path: &LayerPath, block: &[u8], logical_offset: u64) -> Result<(Vec<Vec<u8>>, IndexEntry)> {
        let shard_len = self.fragment_length(block.len());
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());
        for i in 0..self.data_shards {
            let start = (i * shard_len).min(block.len());
            let end = ((i + 1) * shard_len).min(block.len());
            let mut shard = block[start..end].to_vec();
            shard.resize(shard_len, 0);
            shards.push(shard);
        }
        shards.resize(self.total_shards(), vec![0u8; shard_len]);
        self.reed_solomon.encode(&mut shards)?;

        let key = path.to_string();
        let id = self.identities.identify(&key);
        let entry = self.index.place(
            &key,
            id,
            logical_offset,
            block.len() as u64,
            shard_len as u64,
        )?;
        debug!(
            "{}: block at {} ({} bytes) placed at fragment offset {}",
            key,
            logical_offset,
            block.len(),
            entry.physical_offset
        );
        Ok((shards, entry))
    }

    /// Placement of the block written at `logical_offset`.
    ///
    /// `Ok(None)` means the offset is at or past the tracked end of file.
    pub fn locate(&self, path: &LayerPath, logical_offset: u64) -> Result<Option<IndexEntry>> {
        let key = path.to_string();
        let id = match self.identities.lookup(&key) {
            Some(id) => id,
            None => return Ok(None),
        };
        if let Some(entry) = self.index.lookup(id, logical_offset) {
            return Ok(Some(entry));
        }
        if logical_offset >= self.index.size(id) {
            return Ok(None);
        }
        Err(Error::MissingOffset {
            path: key,
            offset: logical_offset,
        })
    }

    /// Rebuild a block from its fragments. Missing fragments are `None`.
    pub fn decode(&self, mut shards: Vec<Option<Vec<u8>>>, block_length: usize) -> Result<Vec<u8>> {
        if shards.len() != self.total_shards() {
            return Err(Error::Erasure(format!(
                "expected {} fragments, got {}",
                self.total_shards(),
                shards.len()
            )));
        }
        self.reed_solomon.reconstruct_data(&mut shards)?;

        let mut block = Vec::with_capacity(block_length);
        for shard in shards.iter().take(self.data_shards) {
            let shard = shard
                .as_ref()
                .ok_or_else(|| Error::Erasure("data fragment not rebuilt".to_string()))?;
            block.extend_from_slice(shard);
        }
        block.truncate(block_length);
        Ok(block)
    }

    /// Name suffix of the fragment file stored on `device`.
    pub fn fragment_suffix(&self, device: usize) -> String {
        if device < self.data_shards {
            format!("-{:05}.data", device)
        } else {
            format!("-{:05}.parity", device - self.data_shards)
        }
    }

    /// Logical name of a fragment file listed on the first device.
    pub fn logical_name<'a>(&self, fragment: &'a str) -> Option<&'a str> {
        fragment.strip_suffix(&self.fragment_suffix(0))
    }

    pub fn tracked_size(&self, path: &LayerPath) -> u64 {
        self.identities
            .lookup(&path.to_string())
            .map_or(0, |id| self.index.size(id))
    }

    /// Drop placements at or past `size`; see [`OffsetIndex::truncate`].
    pub fn truncate(&self, path: &LayerPath, size: u64) -> Option<u64> {
        let id = self.identities.identify(&path.to_string());
        self.index.truncate(id, size)
    }

    /// Empty the file at `path`, shared with any hard links to it.
    pub fn reset(&self, path: &LayerPath) {
        if let Some(id) = self.identities.lookup(&path.to_string()) {
            self.index.truncate(id, 0);
        }
    }

    pub fn forget(&self, path: &LayerPath) {
        if let Some(id) = self.identities.forget(&path.to_string()) {
            self.index.remove_file(id);
        }
    }

    pub fn rename(&self, from: &LayerPath, to: &LayerPath) {
        if let Some(displaced) = self.identities.rename(&from.to_string(), &to.to_string()) {
            self.index.remove_file(displaced);
        }
    }

    /// Carry the bookkeeping of every file below directory `from` to `to`.
    pub fn rename_dir(&self, from: &LayerPath, to: &LayerPath) {
        self.identities.rename_tree(&from.to_string(), &to.to_string());
    }

    /// Let `link` share the placements of `existing`.
    pub fn link(&self, existing: &LayerPath, link: &LayerPath) {
        if self
            .identities
            .alias(&existing.to_string(), &link.to_string())
            .is_none()
        {
            debug!("{}: linked before any write, nothing to share", existing);
        }
    }
}
