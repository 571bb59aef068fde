//! Concurrent per-device dispatch.
//!
//! Every multi-device operation becomes one [`DeviceOp`] per device. The
//! dispatcher hands them to the worker pool, blocks until all have reported,
//! and reduces the outcomes: any failure fails the call, and byte-transfer
//! operations must agree on their counts.

mod pool;

pub use pool::WorkerPool;

use crate::error::{Error, Result};
use crate::storage::{Access, DirEntry, FileKind};
use crossbeam::sync::WaitGroup;
use log::warn;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;
use std::sync::Arc;

/// One operation against one backing device.
#[derive(Debug)]
pub enum DeviceOp {
    Open { path: PathBuf, access: Access },
    Create { path: PathBuf, mode: u32 },
    Release { file: Arc<File> },
    Read { file: Arc<File>, offset: u64, len: usize },
    Write { file: Arc<File>, offset: u64, data: Vec<u8> },
    Flush { file: Arc<File> },
    Fsync { file: Arc<File>, datasync: bool },
    Truncate { path: PathBuf, size: u64 },
    FTruncate { file: Arc<File>, size: u64 },
    Mkdir { path: PathBuf, mode: u32 },
    Rmdir { path: PathBuf },
    Unlink { path: PathBuf },
    Rename { from: PathBuf, to: PathBuf },
    Symlink { target: PathBuf, link: PathBuf },
    Link { from: PathBuf, to: PathBuf },
    Chmod { path: PathBuf, mode: u32 },
    Chown { path: PathBuf, uid: Option<u32>, gid: Option<u32> },
    ListDir { path: PathBuf },
}

/// Result of one successful [`DeviceOp`].
#[derive(Debug)]
pub enum DeviceOutcome {
    Done,
    Opened(File),
    Data(Vec<u8>),
    Written(usize),
    Listing(Vec<DirEntry>),
}

impl DeviceOutcome {
    /// Byte count of a read or write outcome.
    pub fn transferred(&self) -> Option<usize> {
        match self {
            DeviceOutcome::Data(data) => Some(data.len()),
            DeviceOutcome::Written(n) => Some(*n),
            _ => None,
        }
    }
}

impl DeviceOp {
    fn is_transfer(&self) -> bool {
        matches!(self, DeviceOp::Read { .. } | DeviceOp::Write { .. })
    }

    /// Execute against the host filesystem.
    pub fn run(self) -> io::Result<DeviceOutcome> {
        match self {
            DeviceOp::Open { path, access } => access.options().open(path).map(DeviceOutcome::Opened),
            DeviceOp::Create { path, mode } => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .open(path)
                .map(DeviceOutcome::Opened),
            DeviceOp::Release { file } => {
                drop(file);
                Ok(DeviceOutcome::Done)
            }
            DeviceOp::Read { file, offset, len } => {
                let mut buf = vec![0u8; len];
                let mut filled = 0;
                while filled < len {
                    match file.read_at(&mut buf[filled..], offset + filled as u64) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                buf.truncate(filled);
                Ok(DeviceOutcome::Data(buf))
            }
            DeviceOp::Write { file, offset, data } => {
                file.write_all_at(&data, offset)?;
                Ok(DeviceOutcome::Written(data.len()))
            }
            DeviceOp::Flush { file } => {
                // Closing a duplicate descriptor surfaces deferred write errors.
                drop(file.try_clone()?);
                Ok(DeviceOutcome::Done)
            }
            DeviceOp::Fsync { file, datasync } => {
                if datasync {
                    file.sync_data()?;
                } else {
                    file.sync_all()?;
                }
                Ok(DeviceOutcome::Done)
            }
            DeviceOp::Truncate { path, size } => {
                OpenOptions::new().write(true).open(path)?.set_len(size)?;
                Ok(DeviceOutcome::Done)
            }
            DeviceOp::FTruncate { file, size } => {
                file.set_len(size)?;
                Ok(DeviceOutcome::Done)
            }
            DeviceOp::Mkdir { path, mode } => {
                fs::DirBuilder::new().mode(mode).create(path)?;
                Ok(DeviceOutcome::Done)
            }
            DeviceOp::Rmdir { path } => fs::remove_dir(path).map(|_| DeviceOutcome::Done),
            DeviceOp::Unlink { path } => fs::remove_file(path).map(|_| DeviceOutcome::Done),
            DeviceOp::Rename { from, to } => fs::rename(from, to).map(|_| DeviceOutcome::Done),
            DeviceOp::Symlink { target, link } => {
                std::os::unix::fs::symlink(target, link).map(|_| DeviceOutcome::Done)
            }
            DeviceOp::Link { from, to } => fs::hard_link(from, to).map(|_| DeviceOutcome::Done),
            DeviceOp::Chmod { path, mode } => {
                fs::set_permissions(path, Permissions::from_mode(mode)).map(|_| DeviceOutcome::Done)
            }
            DeviceOp::Chown { path, uid, gid } => {
                std::os::unix::fs::lchown(path, uid, gid).map(|_| DeviceOutcome::Done)
            }
            DeviceOp::ListDir { path } => {
                let mut entries = Vec::new();
                for entry in fs::read_dir(path)? {
                    let entry = entry?;
                    entries.push(DirEntry {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        kind: entry.file_type().map(FileKind::from)?,
                    });
                }
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(DeviceOutcome::Listing(entries))
            }
        }
    }
}

/// Fans device operations out over a shared worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run `ops[i]` against device `i` concurrently and wait for all of them.
    ///
    /// Fails with the first failing device's error in device order. For reads
    /// and writes, every device must report device 0's byte count.
    pub fn dispatch_and_join(&self, ops: Vec<DeviceOp>) -> Result<Vec<DeviceOutcome>> {
        let transfer = ops.iter().any(DeviceOp::is_transfer);
        let slots: Arc<Mutex<Vec<Option<io::Result<DeviceOutcome>>>>> =
            Arc::new(Mutex::new((0..ops.len()).map(|_| None).collect()));
        let done = WaitGroup::new();

        for (device, op) in ops.into_iter().enumerate() {
            let slots = Arc::clone(&slots);
            let done = done.clone();
            self.pool.execute(move || {
                let outcome = op.run();
                slots.lock()[device] = Some(outcome);
                drop(done);
            })?;
        }
        done.wait();

        let results = std::mem::take(&mut *slots.lock());
        join_outcomes(results, transfer)
    }
}

fn join_outcomes(
    results: Vec<Option<io::Result<DeviceOutcome>>>,
    transfer: bool,
) -> Result<Vec<DeviceOutcome>> {
    let mut outcomes = Vec::with_capacity(results.len());
    for (device, result) in results.into_iter().enumerate() {
        match result {
            None => return Err(Error::WorkerLost { device }),
            Some(Err(source)) => return Err(Error::Device { device, source }),
            Some(Ok(outcome)) => outcomes.push(outcome),
        }
    }

    if transfer {
        let expected = outcomes.first().and_then(DeviceOutcome::transferred).unwrap_or(0);
        for (device, outcome) in outcomes.iter().enumerate().skip(1) {
            let found = outcome.transferred().unwrap_or(0);
            if found != expected {
                warn!(
                    "device {} transferred {} bytes, device 0 transferred {}",
                    device, found, expected
                );
                return Err(Error::Divergence {
                    device,
                    expected,
                    found,
                });
            }
        }
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(WorkerPool::new(4).unwrap()))
    }

    fn open_files(dir: &TempDir, contents: &[&[u8]]) -> Vec<Arc<File>> {
        contents
            .iter()
            .enumerate()
            .map(|(i, data)| {
                let path = dir.path().join(format!("f{}", i));
                fs::write(&path, data).unwrap();
                Arc::new(
                    OpenOptions::new()
                        .read(true)
                        .write(true)
                        .open(path)
                        .unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_reads_agree() {
        let dir = tempfile::tempdir().unwrap();
        let files = open_files(&dir, &[b"abcdef", b"abcdef", b"abcdef"]);
        let ops = files
            .into_iter()
            .map(|file| DeviceOp::Read {
                file,
                offset: 2,
                len: 10,
            })
            .collect();

        let outcomes = dispatcher().dispatch_and_join(ops).unwrap();
        assert_eq!(outcomes.len(), 3);
        for outcome in outcomes {
            match outcome {
                DeviceOutcome::Data(data) => assert_eq!(data, b"cdef"),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[test]
    fn test_count_mismatch_is_divergence() {
        let dir = tempfile::tempdir().unwrap();
        let files = open_files(&dir, &[b"abcdef", b"abc"]);
        let ops = files
            .into_iter()
            .map(|file| DeviceOp::Read {
                file,
                offset: 0,
                len: 6,
            })
            .collect();

        let err = dispatcher().dispatch_and_join(ops).unwrap_err();
        assert!(matches!(
            err,
            Error::Divergence {
                device: 1,
                expected: 6,
                found: 3
            }
        ));
    }

    #[test]
    fn test_any_failure_fails_call() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("d0")).unwrap();
        let ops = vec![
            DeviceOp::Rmdir {
                path: dir.path().join("d0"),
            },
            DeviceOp::Rmdir {
                path: dir.path().join("missing"),
            },
        ];

        let err = dispatcher().dispatch_and_join(ops).unwrap_err();
        match err {
            Error::Device { device, source } => {
                assert_eq!(device, 1);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!dir.path().join("d0").exists());
    }

    #[test]
    fn test_write_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher();
        let ops = (0..2)
            .map(|i| DeviceOp::Create {
                path: dir.path().join(format!("c{}", i)),
                mode: 0o644,
            })
            .collect();
        let files: Vec<Arc<File>> = d
            .dispatch_and_join(ops)
            .unwrap()
            .into_iter()
            .map(|o| match o {
                DeviceOutcome::Opened(f) => Arc::new(f),
                other => panic!("unexpected outcome {:?}", other),
            })
            .collect();

        let ops = files
            .iter()
            .map(|file| DeviceOp::Write {
                file: Arc::clone(file),
                offset: 0,
                data: b"payload".to_vec(),
            })
            .collect();
        let outcomes = d.dispatch_and_join(ops).unwrap();
        assert_eq!(outcomes[0].transferred(), Some(7));

        let listing = d
            .dispatch_and_join(vec![DeviceOp::ListDir {
                path: dir.path().to_path_buf(),
            }])
            .unwrap();
        match &listing[0] {
            DeviceOutcome::Listing(entries) => {
                let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
                assert_eq!(names, vec!["c0", "c1"]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
