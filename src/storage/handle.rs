//! Open-file and open-directory handles.

use crate::storage::types::DirEntry;
use std::fs::{File, OpenOptions};
use std::sync::Arc;

/// Requested access mode of an open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    /// Decode the access bits of POSIX open flags.
    pub fn from_flags(flags: i32) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => Access::WriteOnly,
            libc::O_RDWR => Access::ReadWrite,
            _ => Access::ReadOnly,
        }
    }

    pub fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Access::ReadOnly => options.read(true),
            Access::WriteOnly => options.write(true),
            Access::ReadWrite => options.read(true).write(true),
        };
        options
    }
}

/// Handle of one open logical file: one open backing file per device.
#[derive(Debug)]
pub struct FileHandle {
    files: Vec<Arc<File>>,
}

impl FileHandle {
    pub fn new(files: Vec<File>) -> Self {
        Self {
            files: files.into_iter().map(Arc::new).collect(),
        }
    }

    /// Number of devices this handle spans.
    pub fn devices(&self) -> usize {
        self.files.len()
    }

    pub fn file(&self, device: usize) -> Option<&Arc<File>> {
        self.files.get(device)
    }

    pub fn files(&self) -> &[Arc<File>] {
        &self.files
    }

    pub(crate) fn into_files(self) -> Vec<Arc<File>> {
        self.files
    }
}

/// Handle of one open directory: the listing of every device.
#[derive(Debug)]
pub struct DirHandle {
    listings: Vec<Vec<DirEntry>>,
}

impl DirHandle {
    pub fn new(listings: Vec<Vec<DirEntry>>) -> Self {
        Self { listings }
    }

    pub fn devices(&self) -> usize {
        self.listings.len()
    }

    /// Entries reported by the first device.
    pub fn primary(&self) -> &[DirEntry] {
        self.listings.first().map(|l| l.as_slice()).unwrap_or(&[])
    }
}
