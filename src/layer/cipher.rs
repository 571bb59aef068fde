//! Cipher stage: frames each logical block for the layer below.

use crate::crypto::CipherFramer;
use crate::error::{Error, Result};
use crate::layer::{with_handle, Layer, LatencyRecorder};
use crate::storage::{Access, FileAttr, FileHandle, LayerPath};
use log::{debug, warn};
use std::sync::Arc;

/// Applies a [`CipherFramer`] to every block passing through.
///
/// Reads and writes must arrive block aligned (one block per call), which
/// the aligner above guarantees. Sizes and truncation targets are translated
/// between the logical and physical views.
pub struct CipherLayer {
    framer: CipherFramer,
    next: Box<dyn Layer>,
    latency: Arc<LatencyRecorder>,
}

impl CipherLayer {
    pub fn new(framer: CipherFramer, next: Box<dyn Layer>, latency: Arc<LatencyRecorder>) -> Self {
        Self {
            framer,
            next,
            latency,
        }
    }

    pub fn framer(&self) -> &CipherFramer {
        &self.framer
    }
}

impl Layer for CipherLayer {
    fn name(&self) -> &'static str {
        "cipher"
    }

    fn next(&self) -> Option<&dyn Layer> {
        Some(self.next.as_ref())
    }

    fn read(&self, path: &LayerPath, buf: &mut [u8], offset: u64, handle: &FileHandle) -> Result<usize> {
        let _timer = self.latency.start("read");
        let physical_offset = self.framer.physical_block_offset(offset);
        let mut frame = vec![0u8; self.framer.physical_block_size(buf.len())];

        let n = self.next.read(path, &mut frame, physical_offset, handle)?;
        if n == 0 {
            return Ok(0);
        }
        frame.truncate(n);

        let block = self.framer.decode(&frame, offset)?;
        let copied = block.len().min(buf.len());
        buf[..copied].copy_from_slice(&block[..copied]);
        debug!(
            "{}: frame of {} bytes at {} decoded to {} bytes",
            path, n, physical_offset, block.len()
        );
        Ok(copied)
    }

    fn write(&self, path: &LayerPath, buf: &[u8], offset: u64, handle: &FileHandle) -> Result<usize> {
        let _timer = self.latency.start("write");
        let physical_offset = self.framer.physical_block_offset(offset);
        let frame = self.framer.encode(buf, offset)?;

        let n = self.next.write(path, &frame, physical_offset, handle)?;
        if n < frame.len() {
            warn!(
                "{}: frame at {} written short ({} of {} bytes)",
                path,
                physical_offset,
                n,
                frame.len()
            );
            return Err(Error::ShortTransfer {
                expected: frame.len(),
                actual: n,
            });
        }
        Ok(buf.len())
    }

    fn logical_file_size(&self, path: &LayerPath, reported_size: u64, handle: Option<&FileHandle>) -> Result<u64> {
        let next = self.next.as_ref();
        self.framer.logical_file_size(reported_size, |offset, len| {
            with_handle(next, path, handle, Access::ReadOnly, |h| {
                let mut frame = vec![0u8; len];
                let n = next.read(path, &mut frame, offset, h)?;
                frame.truncate(n);
                Ok(frame)
            })
        })
    }

    fn truncate(&self, path: &LayerPath, size: u64, handle: Option<&FileHandle>) -> Result<()> {
        let physical = self.framer.physical_truncate_size(size);
        debug!("{}: truncate to {} (physical {})", path, size, physical);
        self.next.truncate(path, physical, handle)
    }

    fn file_size(&self, path: &LayerPath, handle: Option<&FileHandle>) -> Result<u64> {
        let physical = self.next.file_size(path, handle)?;
        self.logical_file_size(path, physical, handle)
    }

    fn getattr(&self, path: &LayerPath, handle: Option<&FileHandle>) -> Result<FileAttr> {
        let mut attr = self.next.getattr(path, handle)?;
        if attr.is_file() {
            attr.size = self.logical_file_size(path, attr.size, handle)?;
        }
        Ok(attr)
    }
}
