//! Bottom layer: fans every operation out to the backing devices.

use crate::coding::DeviceCoder;
use crate::config::{CoderMode, DeviceConfig};
use crate::dispatch::{DeviceOp, DeviceOutcome, Dispatcher};
use crate::error::{Error, Result};
use crate::layer::{Layer, LatencyRecorder};
use crate::storage::{
    Access, BackingStore, DirEntry, DirHandle, FileAttr, FileHandle, FileKind, FsStats, LayerPath,
};
use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Multi-device stage: one coder, one dispatcher, `ndevs` backing stores.
pub struct DeviceLayer {
    stores: Vec<BackingStore>,
    coder: DeviceCoder,
    dispatcher: Dispatcher,
    latency: Arc<LatencyRecorder>,
}

fn expect_handle(outcome: DeviceOutcome, device: usize) -> Result<fs::File> {
    match outcome {
        DeviceOutcome::Opened(file) => Ok(file),
        _ => Err(Error::WorkerLost { device }),
    }
}

impl DeviceLayer {
    pub fn new(config: &DeviceConfig, dispatcher: Dispatcher, latency: Arc<LatencyRecorder>) -> Result<Self> {
        let stores = config
            .paths
            .iter()
            .enumerate()
            .map(|(i, root)| BackingStore::open(i, root))
            .collect::<Result<Vec<_>>>()?;
        let coder = DeviceCoder::from_config(config)?;
        info!(
            "device stage: {:?} over {} devices ({})",
            coder.mode(),
            stores.len(),
            stores
                .iter()
                .map(|s| s.root().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            stores,
            coder,
            dispatcher,
            latency,
        })
    }

    pub fn ndevs(&self) -> usize {
        self.stores.len()
    }

    pub fn stores(&self) -> &[BackingStore] {
        &self.stores
    }

    /// Host directory of every device.
    pub fn roots(&self) -> Vec<&Path> {
        self.stores.iter().map(BackingStore::root).collect()
    }

    pub fn coder(&self) -> &DeviceCoder {
        &self.coder
    }

    /// Host path of the file holding `path`'s fragment on every device.
    pub fn file_paths(&self, path: &LayerPath) -> Vec<PathBuf> {
        self.stores
            .iter()
            .map(|store| store.resolve(&self.coder.device_path(path, store.index())))
            .collect()
    }

    /// Host path of `path` itself on every device (directories, links).
    pub fn dir_paths(&self, path: &LayerPath) -> Vec<PathBuf> {
        self.stores.iter().map(|store| store.resolve(path)).collect()
    }

    fn fan_out(&self, ops: Vec<DeviceOp>) -> Result<Vec<DeviceOutcome>> {
        self.dispatcher.dispatch_and_join(ops)
    }

    fn fan_out_done(&self, ops: Vec<DeviceOp>) -> Result<()> {
        self.fan_out(ops).map(|_| ())
    }

    fn primary(&self) -> Result<&BackingStore> {
        self.stores
            .first()
            .ok_or_else(|| Error::Config("device stage has no devices".to_string()))
    }

    /// Metadata of `path` on device 0, falling back to the bare path for
    /// directories in fragment-naming modes.
    fn primary_metadata(&self, path: &LayerPath) -> Result<fs::Metadata> {
        let store = self.primary()?;
        let fragment = store.resolve(&self.coder.device_path(path, 0));
        match fs::symlink_metadata(&fragment) {
            Ok(metadata) => Ok(metadata),
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.coder.mode() == CoderMode::Erasure => {
                fs::symlink_metadata(store.resolve(path)).map_err(Error::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Host paths to use for a path-based operation on an existing object.
    fn existing_paths(&self, path: &LayerPath) -> Result<Vec<PathBuf>> {
        if self.primary_metadata(path)?.is_dir() {
            Ok(self.dir_paths(path))
        } else {
            Ok(self.file_paths(path))
        }
    }

    fn handle_ops<F>(&self, handle: &FileHandle, make: F) -> Vec<DeviceOp>
    where
        F: Fn(Arc<fs::File>) -> DeviceOp,
    {
        handle.files().iter().map(|file| make(Arc::clone(file))).collect()
    }
}

impl Layer for DeviceLayer {
    fn name(&self) -> &'static str {
        "devices"
    }

    fn next(&self) -> Option<&dyn Layer> {
        None
    }

    fn create(&self, path: &LayerPath, mode: u32) -> Result<FileHandle> {
        let ops = self
            .file_paths(path)
            .into_iter()
            .map(|path| DeviceOp::Create { path, mode })
            .collect();
        let files = self
            .fan_out(ops)?
            .into_iter()
            .enumerate()
            .map(|(device, outcome)| expect_handle(outcome, device))
            .collect::<Result<Vec<_>>>()?;
        self.coder.on_create(path);
        Ok(FileHandle::new(files))
    }

    fn open(&self, path: &LayerPath, access: Access) -> Result<FileHandle> {
        let ops = self
            .file_paths(path)
            .into_iter()
            .map(|path| DeviceOp::Open { path, access })
            .collect();
        let files = self
            .fan_out(ops)?
            .into_iter()
            .enumerate()
            .map(|(device, outcome)| expect_handle(outcome, device))
            .collect::<Result<Vec<_>>>()?;
        Ok(FileHandle::new(files))
    }

    fn release(&self, _path: &LayerPath, handle: FileHandle) -> Result<()> {
        let ops = handle
            .into_files()
            .into_iter()
            .map(|file| DeviceOp::Release { file })
            .collect();
        self.fan_out_done(ops)
    }

    fn read(&self, path: &LayerPath, buf: &mut [u8], offset: u64, handle: &FileHandle) -> Result<usize> {
        let _timer = self.latency.start("read");
        let placement = match self.coder.locate(path, offset, buf.len())? {
            Some(placement) => placement,
            None => return Ok(0),
        };
        if placement.length == 0 {
            return Ok(0);
        }

        let ops = self.handle_ops(handle, |file| DeviceOp::Read {
            file,
            offset: placement.offset,
            len: placement.length,
        });
        let fragments = self
            .fan_out(ops)?
            .into_iter()
            .map(|outcome| match outcome {
                DeviceOutcome::Data(data) => data,
                _ => Vec::new(),
            })
            .collect::<Vec<_>>();
        if fragments.first().map_or(true, Vec::is_empty) {
            return Ok(0);
        }

        let block = self.coder.decode(fragments, &placement)?;
        let n = block.len().min(buf.len());
        buf[..n].copy_from_slice(&block[..n]);
        debug!(
            "{}: read {} bytes at {} (device offset {})",
            path, n, offset, placement.offset
        );
        Ok(n)
    }

    fn write(&self, path: &LayerPath, buf: &[u8], offset: u64, handle: &FileHandle) -> Result<usize> {
        let _timer = self.latency.start("write");
        if buf.is_empty() {
            return Ok(0);
        }

        let set = self.coder.encode(path, buf, offset, self.ndevs())?;
        let ops = handle
            .files()
            .iter()
            .zip(set.fragments)
            .map(|(file, data)| DeviceOp::Write {
                file: Arc::clone(file),
                offset: set.placement.offset,
                data,
            })
            .collect();
        let outcomes = self.fan_out(ops)?;

        let written = outcomes.first().and_then(DeviceOutcome::transferred).unwrap_or(0);
        if written < set.placement.length {
            return Err(Error::ShortTransfer {
                expected: set.placement.length,
                actual: written,
            });
        }
        debug!(
            "{}: wrote {} bytes at {} (device offset {}, {} per device)",
            path,
            buf.len(),
            offset,
            set.placement.offset,
            set.placement.length
        );
        Ok(buf.len())
    }

    fn truncate(&self, path: &LayerPath, size: u64, handle: Option<&FileHandle>) -> Result<()> {
        let physical = match self.coder.truncate(path, size) {
            Some(physical) => physical,
            None => return Ok(()),
        };

        let ops = match handle {
            Some(handle) => self.handle_ops(handle, |file| DeviceOp::FTruncate {
                file,
                size: physical,
            }),
            None => self
                .file_paths(path)
                .into_iter()
                .map(|path| DeviceOp::Truncate {
                    path,
                    size: physical,
                })
                .collect(),
        };
        self.fan_out_done(ops)
    }

    fn file_size(&self, path: &LayerPath, handle: Option<&FileHandle>) -> Result<u64> {
        Ok(self.getattr(path, handle)?.size)
    }

    fn getattr(&self, path: &LayerPath, handle: Option<&FileHandle>) -> Result<FileAttr> {
        let metadata = match handle.and_then(|h| h.file(0)) {
            Some(file) => file.metadata()?,
            None => self.primary_metadata(path)?,
        };

        let mut attr = FileAttr::from(&metadata);
        if attr.is_file() {
            if let Some(size) = self.coder.tracked_size(path) {
                attr.size = size;
            }
        }
        Ok(attr)
    }

    fn flush(&self, _path: &LayerPath, handle: &FileHandle) -> Result<()> {
        self.fan_out_done(self.handle_ops(handle, |file| DeviceOp::Flush { file }))
    }

    fn fsync(&self, _path: &LayerPath, datasync: bool, handle: &FileHandle) -> Result<()> {
        self.fan_out_done(self.handle_ops(handle, |file| DeviceOp::Fsync { file, datasync }))
    }

    fn mkdir(&self, path: &LayerPath, mode: u32) -> Result<()> {
        let ops = self
            .dir_paths(path)
            .into_iter()
            .map(|path| DeviceOp::Mkdir { path, mode })
            .collect();
        self.fan_out_done(ops)
    }

    fn rmdir(&self, path: &LayerPath) -> Result<()> {
        let ops = self
            .dir_paths(path)
            .into_iter()
            .map(|path| DeviceOp::Rmdir { path })
            .collect();
        self.fan_out_done(ops)
    }

    fn unlink(&self, path: &LayerPath) -> Result<()> {
        let ops = self
            .file_paths(path)
            .into_iter()
            .map(|path| DeviceOp::Unlink { path })
            .collect();
        self.fan_out_done(ops)?;
        self.coder.on_unlink(path);
        Ok(())
    }

    fn rename(&self, from: &LayerPath, to: &LayerPath) -> Result<()> {
        let is_dir = self.primary_metadata(from)?.is_dir();
        let (sources, targets) = if is_dir {
            (self.dir_paths(from), self.dir_paths(to))
        } else {
            (self.file_paths(from), self.file_paths(to))
        };
        let ops = sources
            .into_iter()
            .zip(targets)
            .map(|(from, to)| DeviceOp::Rename { from, to })
            .collect();
        self.fan_out_done(ops)?;
        if is_dir {
            self.coder.on_rename_dir(from, to);
        } else {
            self.coder.on_rename(from, to);
        }
        Ok(())
    }

    fn symlink(&self, target: &str, link: &LayerPath) -> Result<()> {
        let ops = self
            .stores
            .iter()
            .map(|store| {
                // Absolute targets stay inside the device holding the link.
                let target = match target.strip_prefix('/') {
                    Some(inside) => store.root().join(inside),
                    None => PathBuf::from(target),
                };
                DeviceOp::Symlink {
                    target,
                    link: store.resolve(link),
                }
            })
            .collect();
        self.fan_out_done(ops)
    }

    fn readlink(&self, path: &LayerPath) -> Result<String> {
        let store = self.primary()?;
        let target = fs::read_link(store.resolve(path))?;
        Ok(store
            .unresolve(&target)
            .unwrap_or_else(|| target.display().to_string()))
    }

    fn link(&self, from: &LayerPath, to: &LayerPath) -> Result<()> {
        let ops = self
            .file_paths(from)
            .into_iter()
            .zip(self.file_paths(to))
            .map(|(from, to)| DeviceOp::Link { from, to })
            .collect();
        self.fan_out_done(ops)?;
        self.coder.on_link(from, to);
        Ok(())
    }

    fn chmod(&self, path: &LayerPath, mode: u32) -> Result<()> {
        let ops = self
            .existing_paths(path)?
            .into_iter()
            .map(|path| DeviceOp::Chmod { path, mode })
            .collect();
        self.fan_out_done(ops)
    }

    fn chown(&self, path: &LayerPath, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let ops = self
            .existing_paths(path)?
            .into_iter()
            .map(|path| DeviceOp::Chown { path, uid, gid })
            .collect();
        self.fan_out_done(ops)
    }

    fn opendir(&self, path: &LayerPath) -> Result<DirHandle> {
        let ops = self
            .dir_paths(path)
            .into_iter()
            .map(|path| DeviceOp::ListDir { path })
            .collect();
        let listings = self
            .fan_out(ops)?
            .into_iter()
            .map(|outcome| match outcome {
                DeviceOutcome::Listing(entries) => entries,
                _ => Vec::new(),
            })
            .collect();
        Ok(DirHandle::new(listings))
    }

    fn readdir(&self, _path: &LayerPath, handle: &DirHandle) -> Result<Vec<DirEntry>> {
        Ok(handle
            .primary()
            .iter()
            .filter_map(|entry| {
                self.coder
                    .listed_name(&entry.name, entry.kind == FileKind::Directory)
                    .map(|name| DirEntry {
                        name,
                        kind: entry.kind,
                    })
            })
            .collect())
    }

    fn releasedir(&self, _path: &LayerPath, handle: DirHandle) -> Result<()> {
        debug!("closing directory listing of {} devices", handle.devices());
        Ok(())
    }

    fn statfs(&self, _path: &LayerPath) -> Result<FsStats> {
        self.primary()?.statfs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErasureParams;
    use crate::dispatch::WorkerPool;
    use tempfile::TempDir;

    fn layer(dir: &TempDir, mode: CoderMode, ndevs: usize) -> DeviceLayer {
        let config = DeviceConfig {
            mode,
            paths: (0..ndevs).map(|i| dir.path().join(format!("dev{}", i))).collect(),
            ndevs: Some(ndevs),
            erasure: ErasureParams { k: 2, m: 1 },
        };
        let dispatcher = Dispatcher::new(Arc::new(WorkerPool::new(4).unwrap()));
        DeviceLayer::new(&config, dispatcher, Arc::new(LatencyRecorder::new("devices"))).unwrap()
    }

    fn path(p: &str) -> LayerPath {
        LayerPath::parse(p).unwrap()
    }

    #[test]
    fn test_replicate_writes_every_device() {
        let dir = tempfile::tempdir().unwrap();
        let devices = layer(&dir, CoderMode::Replicate, 3);
        let f = path("/file");

        let handle = devices.create(&f, 0o644).unwrap();
        assert_eq!(devices.write(&f, b"replicated", 0, &handle).unwrap(), 10);
        devices.release(&f, handle).unwrap();

        for root in devices.roots() {
            assert_eq!(fs::read(root.join("file")).unwrap(), b"replicated");
        }
        assert_eq!(devices.file_size(&f, None).unwrap(), 10);
    }

    #[test]
    fn test_xor_devices_hold_no_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let devices = layer(&dir, CoderMode::Xor, 2);
        let f = path("/secret");
        let data = vec![0x41u8; 256];

        let handle = devices.create(&f, 0o600).unwrap();
        devices.write(&f, &data, 0, &handle).unwrap();
        let mut back = vec![0u8; 256];
        assert_eq!(devices.read(&f, &mut back, 0, &handle).unwrap(), 256);
        devices.release(&f, handle).unwrap();

        assert_eq!(back, data);
        for root in devices.roots() {
            assert_ne!(fs::read(root.join("secret")).unwrap(), data);
        }
    }

    #[test]
    fn test_erasure_fragment_files() {
        let dir = tempfile::tempdir().unwrap();
        let devices = layer(&dir, CoderMode::Erasure, 3);
        let f = path("/doc");

        let handle = devices.create(&f, 0o644).unwrap();
        devices.write(&f, b"hello", 0, &handle).unwrap();
        devices.release(&f, handle).unwrap();

        let roots = devices.roots();
        assert_eq!(fs::metadata(roots[0].join("doc-00000.data")).unwrap().len(), 3);
        assert_eq!(fs::metadata(roots[1].join("doc-00001.data")).unwrap().len(), 3);
        assert_eq!(fs::metadata(roots[2].join("doc-00000.parity")).unwrap().len(), 3);
        assert_eq!(devices.getattr(&f, None).unwrap().size, 5);

        let listing = devices.opendir(&path("/")).unwrap();
        let names: Vec<String> = devices
            .readdir(&path("/"), &listing)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["doc".to_string()]);
    }

    #[test]
    fn test_namespace_ops_fan_out() {
        let dir = tempfile::tempdir().unwrap();
        let devices = layer(&dir, CoderMode::Replicate, 2);

        devices.mkdir(&path("/d"), 0o755).unwrap();
        let handle = devices.create(&path("/d/a"), 0o644).unwrap();
        devices.release(&path("/d/a"), handle).unwrap();
        devices.rename(&path("/d/a"), &path("/d/b")).unwrap();
        devices.symlink("/d/b", &path("/link")).unwrap();
        assert_eq!(devices.readlink(&path("/link")).unwrap(), "/d/b");

        for root in devices.roots() {
            assert!(root.join("d/b").is_file());
            assert!(!root.join("d/a").exists());
        }

        devices.unlink(&path("/d/b")).unwrap();
        devices.rmdir(&path("/d")).unwrap();
        assert!(devices.getattr(&path("/d"), None).unwrap_err().is_not_found());
    }

    #[test]
    fn test_statfs_reports_first_device() {
        let dir = tempfile::tempdir().unwrap();
        let devices = layer(&dir, CoderMode::Replicate, 2);
        assert!(devices.statfs(&path("/")).unwrap().blocks > 0);
    }
}
