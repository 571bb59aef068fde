//! Block alignment stage.
//!
//! Turns arbitrary byte ranges into block-sized requests against the layer
//! below, so every transfer it issues starts on a block boundary. Partial
//! blocks are completed with a read-modify-write.

use crate::config::TRUNCATE_FILL_CHUNK;
use crate::error::{Error, Result};
use crate::layer::{with_handle, Layer};
use crate::storage::{Access, FileHandle, LayerPath};
use log::{debug, error, warn};

pub struct BlockAligner {
    block_size: u64,
    next: Box<dyn Layer>,
}

impl BlockAligner {
    pub fn new(block_size: u64, next: Box<dyn Layer>) -> Self {
        Self { block_size, next }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    fn split(&self, offset: u64) -> (u64, usize) {
        let extra = offset % self.block_size;
        (offset - extra, extra as usize)
    }

    /// Write one block directly, returning the bytes the layer below took.
    fn write_block(&self, path: &LayerPath, data: &[u8], block_offset: u64, handle: &FileHandle) -> Result<usize> {
        self.next.write(path, data, block_offset, handle)
    }

    /// Splice `data` into the stored block at `block_offset` and write it back.
    ///
    /// Returns how many bytes of `data` made it to the layer below.
    fn rewrite_block(
        &self,
        path: &LayerPath,
        data: &[u8],
        block_offset: u64,
        extra: usize,
        stored: u64,
        handle: &FileHandle,
    ) -> Result<usize> {
        let mut scratch = vec![0u8; self.block_size as usize];
        let to_read = stored.min(self.block_size) as usize;
        let present = self.next.read(path, &mut scratch[..to_read], block_offset, handle)?;
        let to_write = present.max(extra + data.len());

        scratch[present..to_write].fill(0);
        scratch[extra..extra + data.len()].copy_from_slice(data);
        debug!(
            "{}: read-modify-write block {} ({} stored, {} new at +{})",
            path,
            block_offset,
            present,
            data.len(),
            extra
        );

        let written = self.next.write(path, &scratch[..to_write], block_offset, handle)?;
        if written < to_write {
            warn!(
                "{}: block {} written short ({} of {} bytes)",
                path, block_offset, written, to_write
            );
            return Ok(written.saturating_sub(extra).min(data.len()));
        }
        Ok(data.len())
    }
}

impl Layer for BlockAligner {
    fn name(&self) -> &'static str {
        "align"
    }

    fn next(&self) -> Option<&dyn Layer> {
        Some(self.next.as_ref())
    }

    fn create(&self, path: &LayerPath, mode: u32) -> Result<FileHandle> {
        self.next.create(path, mode)
    }

    /// Opens read-write whatever was asked: partial writes read back.
    fn open(&self, path: &LayerPath, _access: Access) -> Result<FileHandle> {
        self.next.open(path, Access::ReadWrite)
    }

    fn read(&self, path: &LayerPath, buf: &mut [u8], offset: u64, handle: &FileHandle) -> Result<usize> {
        let block_size = self.block_size as usize;
        let mut scratch = vec![0u8; block_size];
        let (mut block_offset, mut extra) = self.split(offset);
        let mut done = 0;

        while done < buf.len() {
            let len = (block_size - extra).min(buf.len() - done);
            let mut to_read = block_size;
            if len + extra != block_size {
                let size = self.next.file_size(path, Some(handle))?;
                let stored = size.saturating_sub(block_offset).min(self.block_size) as usize;
                to_read = (len + extra).max(stored);
            }

            let n = self.next.read(path, &mut scratch[..to_read], block_offset, handle)?;
            if n <= extra {
                break;
            }
            let available = (n - extra).min(len);
            buf[done..done + available].copy_from_slice(&scratch[extra..extra + available]);
            done += available;
            if available < len {
                break;
            }

            block_offset += self.block_size;
            extra = 0;
        }

        Ok(done)
    }

    fn write(&self, path: &LayerPath, buf: &[u8], offset: u64, handle: &FileHandle) -> Result<usize> {
        let block_size = self.block_size as usize;
        let (mut block_offset, mut extra) = self.split(offset);
        let mut done = 0;

        while done < buf.len() {
            let len = (block_size - extra).min(buf.len() - done);
            let data = &buf[done..done + len];

            let written = if extra == 0 && len == block_size {
                self.write_block(path, data, block_offset, handle)?
            } else {
                let size = self.next.file_size(path, Some(handle))?;
                if block_offset >= size {
                    if block_offset > size || extra > 0 {
                        error!(
                            "{}: write at block {} (+{}) past end of file {}",
                            path, block_offset, extra, size
                        );
                        return Err(Error::Alignment {
                            path: path.to_string(),
                            block_offset,
                            extra_offset: extra as u64,
                            file_size: size,
                        });
                    }
                    self.write_block(path, data, block_offset, handle)?
                } else {
                    let stored = size - block_offset;
                    if extra == 0 && stored <= len as u64 {
                        self.write_block(path, data, block_offset, handle)?
                    } else {
                        self.rewrite_block(path, data, block_offset, extra, stored, handle)?
                    }
                }
            };

            done += written.min(len);
            if written < len {
                warn!("{}: short write at block {}, {} bytes done", path, block_offset, done);
                break;
            }

            block_offset += self.block_size;
            extra = 0;
        }

        Ok(done)
    }

    fn truncate(&self, path: &LayerPath, size: u64, handle: Option<&FileHandle>) -> Result<()> {
        let next = self.next.as_ref();
        with_handle(next, path, handle, Access::ReadWrite, |handle| {
            let current = next.file_size(path, Some(handle))?;
            let (block_offset, extra) = self.split(size);
            let mut kept = Vec::new();

            if size > current {
                let zeros = vec![0u8; TRUNCATE_FILL_CHUNK];
                let mut offset = current;
                while offset < size {
                    let chunk = ((size - offset) as usize).min(TRUNCATE_FILL_CHUNK);
                    let written = self.write(path, &zeros[..chunk], offset, handle)?;
                    if written < chunk {
                        return Err(Error::ShortTransfer {
                            expected: chunk,
                            actual: written,
                        });
                    }
                    offset += chunk as u64;
                }
            } else if size < current && extra > 0 {
                kept = vec![0u8; extra];
                let n = self.read(path, &mut kept, block_offset, handle)?;
                if n < extra {
                    return Err(Error::ShortTransfer {
                        expected: extra,
                        actual: n,
                    });
                }
            }

            next.truncate(path, size, Some(handle))?;

            if !kept.is_empty() {
                let written = self.write_block(path, &kept, block_offset, handle)?;
                if written < kept.len() {
                    return Err(Error::ShortTransfer {
                        expected: kept.len(),
                        actual: written,
                    });
                }
            }
            debug!("{}: truncated from {} to {}", path, current, size);
            Ok(())
        })
    }
}
