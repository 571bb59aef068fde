//! Attribute and listing types returned by the layers.

use serde::{Deserialize, Serialize};
use std::fs::{FileType, Metadata};
use std::os::unix::fs::MetadataExt;
use std::time::UNIX_EPOCH;

/// Type of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl From<FileType> for FileKind {
    fn from(file_type: FileType) -> Self {
        if file_type.is_file() {
            FileKind::File
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::Other
        }
    }
}

/// Attributes of one path.
///
/// `size` is in the units of the layer that produced it; every layer above
/// the devices rewrites it into its own logical view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttr {
    pub kind: FileKind,
    pub size: u64,
    /// Permission bits and file type, as in `st_mode`.
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    /// Last modification time (Unix epoch seconds).
    pub modified: u64,
}

impl FileAttr {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

impl From<&Metadata> for FileAttr {
    fn from(metadata: &Metadata) -> Self {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            kind: metadata.file_type().into(),
            size: metadata.len(),
            mode: metadata.mode(),
            nlink: metadata.nlink(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            modified,
        }
    }
}

/// A directory entry for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

/// Filesystem statistics of the first device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FsStats {
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_max: u64,
}
