//! Error types for the layer pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while moving a request through the layers.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error on a backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A fan-out operation failed on one device.
    #[error("device {device} failed: {source}")]
    Device {
        device: usize,
        #[source]
        source: std::io::Error,
    },

    /// Append write not positioned at the true end of file.
    #[error("alignment violation on {path}: block at {block_offset} (+{extra_offset}) past end of file {file_size}")]
    Alignment {
        path: String,
        block_offset: u64,
        extra_offset: u64,
        file_size: u64,
    },

    /// Devices disagree on the result of a read or write.
    #[error("device divergence: device 0 reported {expected} bytes, device {device} reported {found}")]
    Divergence {
        device: usize,
        expected: usize,
        found: usize,
    },

    /// Erasure read at a logical offset that was never written.
    #[error("no offset index entry for {path} at offset {offset}")]
    MissingOffset { path: String, offset: u64 },

    /// A lower layer moved fewer bytes than a framed block needs.
    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    /// Encryption error.
    #[error("Encryption error: {0}")]
    Cipher(String),

    /// Decryption error (wrong key or corrupted block).
    #[error("Decryption failed: wrong key or corrupted block")]
    Decryption,

    /// Key derivation error.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Erasure coding primitive failure.
    #[error("Erasure coding error: {0}")]
    Erasure(String),

    /// Invalid pipeline configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("Cannot load configuration from {path}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    /// Invalid path format.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation has no implementation below this layer.
    #[error("Operation not supported by layer {0}")]
    Unsupported(&'static str),

    /// A worker stopped before reporting its device result.
    #[error("worker for device {device} stopped before completing")]
    WorkerLost { device: usize },
}

impl Error {
    /// Positive POSIX errno for this error.
    ///
    /// The filesystem-call surface negates this value.
    pub fn errno(&self) -> i32 {
        match self {
            Error::Io(e) | Error::Device { source: e, .. } => e.raw_os_error().unwrap_or(libc::EIO),
            Error::InvalidPath(_) => libc::EINVAL,
            Error::Config(_) | Error::ConfigLoad { .. } => libc::EINVAL,
            Error::Unsupported(_) => libc::ENOSYS,
            Error::Decryption => libc::EIO,
            Error::Alignment { .. }
            | Error::Divergence { .. }
            | Error::MissingOffset { .. }
            | Error::ShortTransfer { .. }
            | Error::Cipher(_)
            | Error::KeyDerivation(_)
            | Error::Erasure(_)
            | Error::Serialization(_)
            | Error::WorkerLost { .. } => libc::EIO,
        }
    }

    /// Whether this error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        self.errno() == libc::ENOENT
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reed_solomon_erasure::Error> for Error {
    fn from(e: reed_solomon_erasure::Error) -> Self {
        Error::Erasure(format!("{:?}", e))
    }
}

/// Convert a byte-count result into the signed status of the call surface.
pub fn status(result: Result<usize>) -> isize {
    match result {
        Ok(n) => n as isize,
        Err(e) => -(e.errno() as isize),
    }
}

/// Convert a unit result into the signed status of the call surface.
pub fn status_unit(result: Result<()>) -> isize {
    match result {
        Ok(()) => 0,
        Err(e) => -(e.errno() as isize),
    }
}
