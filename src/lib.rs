//! Stackable block-transform filesystem pipeline
//!
//! Filesystem calls enter at the top of a chain of layers and travel down to
//! a set of backing directories, each layer transforming the call on the way.
//!
//! # Features
//!
//! - **Block alignment**: Arbitrary reads and writes become whole-block calls
//! - **Block ciphers**: Null, padded, deterministic-IV and random-IV AES-256-GCM framing
//! - **Device coding**: Replication, XOR secret splitting or Reed-Solomon erasure coding
//! - **Parallel dispatch**: One worker-pool job per device, joined before returning
//!
//! # Architecture
//!
//! ```text
//! call → BlockAligner → CipherLayer → DeviceLayer → device 0..n
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use layerfs::config::{CipherMode, CoderMode, PipelineConfig};
//! use layerfs::Pipeline;
//!
//! let config = PipelineConfig::new(["/srv/d0", "/srv/d1"])
//!     .with_cipher(CipherMode::NullPadded, None)
//!     .with_coder(CoderMode::Replicate);
//! let pipeline = Pipeline::assemble(config).unwrap();
//!
//! pipeline.write_file("/notes.txt", b"hello", 0).unwrap();
//! assert_eq!(pipeline.read_file("/notes.txt", 0, None).unwrap(), b"hello");
//! ```

pub mod align;
pub mod coding;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod layer;
pub mod pipeline;
pub mod storage;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use layer::Layer;
pub use pipeline::{FsSurface, Pipeline};
pub use storage::{Access, DirEntry, FileAttr, FileHandle, FileKind, LayerPath};
