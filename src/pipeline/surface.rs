//! errno-returning filesystem calls.
//!
//! Every call returns a non-negative result on success and `-errno` on
//! failure, the convention of a filesystem-call dispatcher.

use crate::error::{status, status_unit, Result};
use crate::pipeline::Pipeline;
use crate::storage::{Access, FileHandle, LayerPath};

/// Borrowed errno view of a [`Pipeline`].
pub struct FsSurface<'a> {
    pipeline: &'a Pipeline,
}

impl<'a> FsSurface<'a> {
    pub fn new(pipeline: &'a Pipeline) -> Self {
        Self { pipeline }
    }

    /// Bytes read, or `-errno`.
    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64, handle: &FileHandle) -> isize {
        status(self.pipeline.read(path, buf, offset, handle))
    }

    /// Bytes written, or `-errno`.
    pub fn write(&self, path: &str, buf: &[u8], offset: u64, handle: &FileHandle) -> isize {
        status(self.pipeline.write(path, buf, offset, handle))
    }

    /// Create `path`; on success the new handle is stored in `handle`.
    pub fn create(&self, path: &str, mode: u32, handle: &mut Option<FileHandle>) -> isize {
        status_unit(
            self.pipeline
                .create(path, mode)
                .map(|opened| *handle = Some(opened)),
        )
    }

    /// Open `path` with POSIX `flags`; on success the handle is stored in `handle`.
    pub fn open(&self, path: &str, flags: i32, handle: &mut Option<FileHandle>) -> isize {
        status_unit(
            self.pipeline
                .open(path, Access::from_flags(flags))
                .map(|opened| *handle = Some(opened)),
        )
    }

    pub fn release(&self, path: &str, handle: &mut Option<FileHandle>) -> isize {
        match handle.take() {
            Some(opened) => status_unit(self.pipeline.release(path, opened)),
            None => 0,
        }
    }

    pub fn truncate(&self, path: &str, size: u64, handle: Option<&FileHandle>) -> isize {
        status_unit(self.pipeline.truncate(path, size, handle))
    }

    /// Logical size for the physical size `reported_size`, or `-errno`.
    pub fn get_file_size(&self, path: &str, reported_size: u64, handle: Option<&FileHandle>) -> i64 {
        let result: Result<u64> = LayerPath::parse(path).and_then(|path| {
            self.pipeline
                .top()
                .logical_file_size(&path, reported_size, handle)
        });
        match result {
            Ok(size) => size as i64,
            Err(e) => -(e.errno() as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    #[test]
    fn test_errors_become_negative_errno() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::assemble(PipelineConfig::new([dir.path().join("d0")])).unwrap();
        let fs = pipeline.surface();

        let mut handle = None;
        assert_eq!(fs.open("/missing", libc::O_RDONLY, &mut handle), -(libc::ENOENT as isize));
        assert!(handle.is_none());
        assert_eq!(fs.open("relative", libc::O_RDONLY, &mut handle), -(libc::EINVAL as isize));
    }

    #[test]
    fn test_create_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::assemble(PipelineConfig::new([dir.path().join("d0")])).unwrap();
        let fs = pipeline.surface();

        let mut handle = None;
        assert_eq!(fs.create("/f", 0o644, &mut handle), 0);
        let opened = handle.as_ref().unwrap();
        assert_eq!(fs.write("/f", b"abcdef", 0, opened), 6);

        let mut buf = [0u8; 6];
        assert_eq!(fs.read("/f", &mut buf, 0, opened), 6);
        assert_eq!(&buf, b"abcdef");
        assert_eq!(fs.get_file_size("/f", 6, Some(opened)), 6);
        assert_eq!(fs.truncate("/f", 2, Some(opened)), 0);
        assert_eq!(fs.release("/f", &mut handle), 0);
        assert_eq!(pipeline.file_size("/f").unwrap(), 2);
    }
}
