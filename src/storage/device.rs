//! Backing stores: the directory roots the bottom layer fans out to.

use crate::error::{Error, Result};
use crate::storage::path::LayerPath;
use crate::storage::types::FsStats;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// One backing device rooted at a host directory.
#[derive(Debug, Clone)]
pub struct BackingStore {
    index: usize,
    root: PathBuf,
}

impl BackingStore {
    /// Open the store at `root`, creating the directory if needed.
    pub fn open(index: usize, root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|source| Error::Device {
            device: index,
            source,
        })?;
        let root = root.canonicalize().map_err(|source| Error::Device {
            device: index,
            source,
        })?;
        Ok(Self { index, root })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path of a pipeline path on this device.
    pub fn resolve(&self, path: &LayerPath) -> PathBuf {
        self.root.join(path.relative())
    }

    /// Pipeline form of a host path inside this device, if it is one.
    pub fn unresolve(&self, host: &Path) -> Option<String> {
        let relative = host.strip_prefix(&self.root).ok()?;
        Some(format!("/{}", relative.display()))
    }

    /// Filesystem statistics of the host filesystem holding this store.
    pub fn statfs(&self) -> Result<FsStats> {
        let c_path = CString::new(self.root.as_os_str().as_bytes())
            .map_err(|e| Error::InvalidPath(e.to_string()))?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };

        // SAFETY: c_path is NUL-terminated and stat is a valid out pointer.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(Error::Device {
                device: self.index,
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(FsStats {
            block_size: stat.f_bsize as u64,
            blocks: stat.f_blocks as u64,
            blocks_free: stat.f_bfree as u64,
            blocks_available: stat.f_bavail as u64,
            files: stat.f_files as u64,
            files_free: stat.f_ffree as u64,
            name_max: stat.f_namemax as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackingStore::open(3, &dir.path().join("dev3")).unwrap();
        assert_eq!(store.index(), 3);
        assert!(store.root().is_dir());

        let host = store.resolve(&LayerPath::parse("/a/b").unwrap());
        assert_eq!(host, store.root().join("a/b"));
        assert_eq!(store.unresolve(&host).as_deref(), Some("/a/b"));
        assert_eq!(store.unresolve(Path::new("/elsewhere")), None);
    }

    #[test]
    fn test_statfs() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackingStore::open(0, dir.path()).unwrap();
        let stats = store.statfs().unwrap();
        assert!(stats.block_size > 0);
        assert!(stats.name_max > 0);
    }
}
