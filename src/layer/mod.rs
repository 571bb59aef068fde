//! The stage contract shared by every layer of the pipeline.
//!
//! A layer sees logical requests from the layer above and issues its own
//! requests to the layer below. Operations a layer does not transform fall
//! through to the next layer unchanged; the bottom layer implements all of
//! them against the devices.

mod cipher;
mod devices;
mod latency;

pub use cipher::CipherLayer;
pub use devices::DeviceLayer;
pub use latency::{LatencyRecorder, LatencyRegistry, LatencyTimer};

use crate::error::{Error, Result};
use crate::storage::{Access, DirEntry, DirHandle, FileAttr, FileHandle, FsStats, LayerPath};

/// One transform stage.
pub trait Layer: Send + Sync {
    /// Short name used in logs and latency dumps.
    fn name(&self) -> &'static str;

    /// The layer below, if any.
    fn next(&self) -> Option<&dyn Layer>;

    /// The layer below, or `Unsupported` at the bottom of the stack.
    fn lower(&self) -> Result<&dyn Layer> {
        self.next().ok_or(Error::Unsupported(self.name()))
    }

    fn create(&self, path: &LayerPath, mode: u32) -> Result<FileHandle> {
        self.lower()?.create(path, mode)
    }

    fn open(&self, path: &LayerPath, access: Access) -> Result<FileHandle> {
        self.lower()?.open(path, access)
    }

    fn release(&self, path: &LayerPath, handle: FileHandle) -> Result<()> {
        self.lower()?.release(path, handle)
    }

    /// Read up to `buf.len()` bytes at `offset`. Returns the bytes read.
    fn read(&self, path: &LayerPath, buf: &mut [u8], offset: u64, handle: &FileHandle) -> Result<usize> {
        self.lower()?.read(path, buf, offset, handle)
    }

    /// Write `buf` at `offset`. Returns the bytes written.
    fn write(&self, path: &LayerPath, buf: &[u8], offset: u64, handle: &FileHandle) -> Result<usize> {
        self.lower()?.write(path, buf, offset, handle)
    }

    fn truncate(&self, path: &LayerPath, size: u64, handle: Option<&FileHandle>) -> Result<()> {
        self.lower()?.truncate(path, size, handle)
    }

    /// File size in this layer's logical view.
    fn file_size(&self, path: &LayerPath, handle: Option<&FileHandle>) -> Result<u64> {
        self.lower()?.file_size(path, handle)
    }

    /// Logical size for the size `reported_size` the layer below reported.
    ///
    /// Only layers that change block sizes translate; the bottom layer
    /// reports its own size unchanged.
    fn logical_file_size(&self, path: &LayerPath, reported_size: u64, handle: Option<&FileHandle>) -> Result<u64> {
        match self.next() {
            Some(next) => next.logical_file_size(path, reported_size, handle),
            None => Ok(reported_size),
        }
    }

    fn getattr(&self, path: &LayerPath, handle: Option<&FileHandle>) -> Result<FileAttr> {
        self.lower()?.getattr(path, handle)
    }

    fn flush(&self, path: &LayerPath, handle: &FileHandle) -> Result<()> {
        self.lower()?.flush(path, handle)
    }

    fn fsync(&self, path: &LayerPath, datasync: bool, handle: &FileHandle) -> Result<()> {
        self.lower()?.fsync(path, datasync, handle)
    }

    fn mkdir(&self, path: &LayerPath, mode: u32) -> Result<()> {
        self.lower()?.mkdir(path, mode)
    }

    fn rmdir(&self, path: &LayerPath) -> Result<()> {
        self.lower()?.rmdir(path)
    }

    fn unlink(&self, path: &LayerPath) -> Result<()> {
        self.lower()?.unlink(path)
    }

    fn rename(&self, from: &LayerPath, to: &LayerPath) -> Result<()> {
        self.lower()?.rename(from, to)
    }

    fn symlink(&self, target: &str, link: &LayerPath) -> Result<()> {
        self.lower()?.symlink(target, link)
    }

    fn readlink(&self, path: &LayerPath) -> Result<String> {
        self.lower()?.readlink(path)
    }

    fn link(&self, from: &LayerPath, to: &LayerPath) -> Result<()> {
        self.lower()?.link(from, to)
    }

    fn chmod(&self, path: &LayerPath, mode: u32) -> Result<()> {
        self.lower()?.chmod(path, mode)
    }

    fn chown(&self, path: &LayerPath, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        self.lower()?.chown(path, uid, gid)
    }

    fn opendir(&self, path: &LayerPath) -> Result<DirHandle> {
        self.lower()?.opendir(path)
    }

    fn readdir(&self, path: &LayerPath, handle: &DirHandle) -> Result<Vec<DirEntry>> {
        self.lower()?.readdir(path, handle)
    }

    fn releasedir(&self, path: &LayerPath, handle: DirHandle) -> Result<()> {
        self.lower()?.releasedir(path, handle)
    }

    fn statfs(&self, path: &LayerPath) -> Result<FsStats> {
        self.lower()?.statfs(path)
    }
}

/// Run `f` with `handle`, or with a transient handle opened on `layer` with
/// `access` and released afterwards.
pub(crate) fn with_handle<T, F>(layer: &dyn Layer, path: &LayerPath, handle: Option<&FileHandle>, access: Access, f: F) -> Result<T>
where
    F: FnOnce(&FileHandle) -> Result<T>,
{
    if let Some(handle) = handle {
        return f(handle);
    }

    let transient = layer.open(path, access)?;
    let result = f(&transient);
    let released = layer.release(path, transient);
    let value = result?;
    released?;
    Ok(value)
}
