//! Storage primitives shared by the layers.
//!
//! This module handles:
//! - Validated pipeline paths
//! - Backing device roots
//! - Open file and directory handles
//! - Attribute and listing types

mod device;
mod handle;
mod path;
mod types;

pub use device::BackingStore;
pub use handle::{Access, DirHandle, FileHandle};
pub use path::LayerPath;
pub use types::{DirEntry, FileAttr, FileKind, FsStats};
