//! Pipeline assembly and the filesystem-call surface.
//!
//! A pipeline is built once from a [`PipelineConfig`]: the layers are created
//! bottom-up in the configured order, sharing one [`PipelineContext`] that
//! owns the worker pool and the latency registry.

mod surface;

pub use surface::FsSurface;

use crate::align::BlockAligner;
use crate::config::{LayerKind, PipelineConfig};
use crate::crypto::CipherFramer;
use crate::dispatch::{Dispatcher, WorkerPool};
use crate::error::{Error, Result};
use crate::layer::{CipherLayer, DeviceLayer, LatencyRegistry, Layer};
use crate::storage::{Access, DirEntry, DirHandle, FileAttr, FileHandle, FsStats, LayerPath};
use log::{debug, info};
use std::sync::Arc;

/// State shared by every layer of one pipeline.
pub struct PipelineContext {
    config: PipelineConfig,
    dispatcher: Dispatcher,
    latencies: LatencyRegistry,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let pool = WorkerPool::new(config.worker_threads)?;
        Ok(Self {
            config,
            dispatcher: Dispatcher::new(Arc::new(pool)),
            latencies: LatencyRegistry::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn latencies(&self) -> &LatencyRegistry {
        &self.latencies
    }
}

/// An assembled layer stack.
pub struct Pipeline {
    context: Arc<PipelineContext>,
    top: Box<dyn Layer>,
}

fn no_prompt(_: &str) -> Result<String> {
    Err(Error::Config(
        "key material asks for a passphrase prompt; assemble with a prompt".to_string(),
    ))
}

impl Pipeline {
    /// Assemble a pipeline; prompted key material is rejected.
    pub fn assemble(config: PipelineConfig) -> Result<Self> {
        Self::assemble_with_prompt(config, no_prompt)
    }

    /// Assemble a pipeline, asking `prompt` for a passphrase if the key
    /// material needs one.
    pub fn assemble_with_prompt<F>(config: PipelineConfig, prompt: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        config.validate()?;
        let context = Arc::new(PipelineContext::new(config)?);
        let config = context.config();
        let mut prompt = Some(prompt);
        let mut below: Option<Box<dyn Layer>> = None;

        for kind in config.layers.iter().rev() {
            let layer: Box<dyn Layer> = match kind {
                LayerKind::Devices => Box::new(DeviceLayer::new(
                    &config.devices,
                    context.dispatcher().clone(),
                    context.latencies().recorder("devices"),
                )?),
                LayerKind::Cipher => {
                    let next = below.take().ok_or_else(|| missing_below(*kind))?;
                    let prompt = prompt
                        .take()
                        .ok_or_else(|| Error::Config("cipher layer configured twice".to_string()))?;
                    let framer = CipherFramer::from_config(config.block_size, &config.cipher, prompt)?;
                    Box::new(CipherLayer::new(
                        framer,
                        next,
                        context.latencies().recorder("cipher"),
                    ))
                }
                LayerKind::Align => {
                    let next = below.take().ok_or_else(|| missing_below(*kind))?;
                    Box::new(BlockAligner::new(config.block_size, next))
                }
            };
            below = Some(layer);
        }

        let top = below.ok_or_else(|| Error::Config("no layers configured".to_string()))?;
        let pipeline = Self {
            context: Arc::clone(&context),
            top,
        };
        info!(
            "pipeline assembled: {} (block size {}, {:?} cipher, {} workers)",
            pipeline.layer_names().join(" -> "),
            pipeline.config().block_size,
            pipeline.config().cipher.mode,
            pipeline.context.dispatcher().pool().size()
        );
        Ok(pipeline)
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn config(&self) -> &PipelineConfig {
        self.context.config()
    }

    pub fn top(&self) -> &dyn Layer {
        self.top.as_ref()
    }

    /// Names of the layers, top first.
    pub fn layer_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut layer = Some(self.top.as_ref());
        while let Some(current) = layer {
            names.push(current.name());
            layer = current.next();
        }
        names
    }

    /// errno-returning view of this pipeline.
    pub fn surface(&self) -> FsSurface<'_> {
        FsSurface::new(self)
    }

    /// Tear the pipeline down, writing latency samples if configured.
    pub fn shutdown(self) -> Result<()> {
        if let Some(dir) = &self.config().latency_dump_dir {
            self.context.latencies().dump_all(dir)?;
        }
        info!("pipeline shut down");
        Ok(())
    }

    pub fn getattr(&self, path: &str) -> Result<FileAttr> {
        self.top.getattr(&LayerPath::parse(path)?, None)
    }

    pub fn fgetattr(&self, path: &str, handle: &FileHandle) -> Result<FileAttr> {
        self.top.getattr(&LayerPath::parse(path)?, Some(handle))
    }

    pub fn readlink(&self, path: &str) -> Result<String> {
        self.top.readlink(&LayerPath::parse(path)?)
    }

    pub fn opendir(&self, path: &str) -> Result<DirHandle> {
        self.top.opendir(&LayerPath::parse(path)?)
    }

    pub fn readdir(&self, path: &str, handle: &DirHandle) -> Result<Vec<DirEntry>> {
        self.top.readdir(&LayerPath::parse(path)?, handle)
    }

    pub fn releasedir(&self, path: &str, handle: DirHandle) -> Result<()> {
        self.top.releasedir(&LayerPath::parse(path)?, handle)
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        self.top.mkdir(&LayerPath::parse(path)?, mode)
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        self.top.unlink(&LayerPath::parse(path)?)
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        self.top.rmdir(&LayerPath::parse(path)?)
    }

    pub fn symlink(&self, target: &str, link: &str) -> Result<()> {
        self.top.symlink(target, &LayerPath::parse(link)?)
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.top
            .rename(&LayerPath::parse(from)?, &LayerPath::parse(to)?)
    }

    pub fn link(&self, from: &str, to: &str) -> Result<()> {
        self.top.link(&LayerPath::parse(from)?, &LayerPath::parse(to)?)
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.top.chmod(&LayerPath::parse(path)?, mode)
    }

    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        self.top.chown(&LayerPath::parse(path)?, uid, gid)
    }

    pub fn truncate(&self, path: &str, size: u64, handle: Option<&FileHandle>) -> Result<()> {
        self.top.truncate(&LayerPath::parse(path)?, size, handle)
    }

    pub fn create(&self, path: &str, mode: u32) -> Result<FileHandle> {
        self.top.create(&LayerPath::parse(path)?, mode)
    }

    pub fn open(&self, path: &str, access: Access) -> Result<FileHandle> {
        self.top.open(&LayerPath::parse(path)?, access)
    }

    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64, handle: &FileHandle) -> Result<usize> {
        self.top.read(&LayerPath::parse(path)?, buf, offset, handle)
    }

    pub fn write(&self, path: &str, buf: &[u8], offset: u64, handle: &FileHandle) -> Result<usize> {
        self.top.write(&LayerPath::parse(path)?, buf, offset, handle)
    }

    pub fn statfs(&self, path: &str) -> Result<FsStats> {
        self.top.statfs(&LayerPath::parse(path)?)
    }

    pub fn flush(&self, path: &str, handle: &FileHandle) -> Result<()> {
        self.top.flush(&LayerPath::parse(path)?, handle)
    }

    pub fn release(&self, path: &str, handle: FileHandle) -> Result<()> {
        self.top.release(&LayerPath::parse(path)?, handle)
    }

    pub fn fsync(&self, path: &str, datasync: bool, handle: &FileHandle) -> Result<()> {
        self.top.fsync(&LayerPath::parse(path)?, datasync, handle)
    }

    /// Logical file size of `path`.
    pub fn file_size(&self, path: &str) -> Result<u64> {
        self.top.file_size(&LayerPath::parse(path)?, None)
    }

    /// Write `data` at `offset`, creating the file if it does not exist.
    pub fn write_file(&self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        let layer_path = LayerPath::parse(path)?;
        let handle = match self.top.getattr(&layer_path, None) {
            Ok(_) => self.top.open(&layer_path, Access::ReadWrite)?,
            Err(e) if e.is_not_found() => self.top.create(&layer_path, 0o644)?,
            Err(e) => return Err(e),
        };

        let result = self.top.write(&layer_path, data, offset, &handle);
        let released = self.top.release(&layer_path, handle);
        let written = result?;
        released?;
        debug!("{}: wrote {} bytes at {}", path, written, offset);
        Ok(written)
    }

    /// Read `size` bytes at `offset`, or everything from `offset` to the end.
    pub fn read_file(&self, path: &str, offset: u64, size: Option<usize>) -> Result<Vec<u8>> {
        let layer_path = LayerPath::parse(path)?;
        let handle = self.top.open(&layer_path, Access::ReadOnly)?;

        let result: Result<Vec<u8>> = (|| {
            let size = match size {
                Some(size) => size,
                None => self
                    .top
                    .file_size(&layer_path, Some(&handle))?
                    .saturating_sub(offset) as usize,
            };
            let mut buf = vec![0u8; size];
            let n = self.top.read(&layer_path, &mut buf, offset, &handle)?;
            buf.truncate(n);
            Ok(buf)
        })();
        let released = self.top.release(&layer_path, handle);
        let data = result?;
        released?;
        Ok(data)
    }
}

fn missing_below(kind: LayerKind) -> Error {
    Error::Config(format!("{:?} layer has no layer below it", kind))
}
