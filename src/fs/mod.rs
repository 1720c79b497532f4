//! Filesystem device drivers
//!
//! A filesystem driver exposes one mounted backing store through a
//! uniform capability set. Paths handed to a driver are always relative
//! to its own root ("" is the root); the dispatcher performs the
//! cross-mount translation before a driver ever sees a path.

pub mod editor;
pub mod root;
pub mod static_dir;

pub use editor::EditorFsDriver;
pub use root::{MountMap, RootFsDriver};
pub use static_dir::{DirectoryManifest, ManifestNode, StaticFsDriver};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;

use thiserror::Error;
use url::Url;

use crate::device::DeviceId;
use crate::wasi::{Errno, Fdflags, Filetype, Oflags, Rights, Whence};

/// Typed driver failures. The dispatcher converts these into WASI
/// error numbers at the syscall boundary; no typed error crosses into
/// guest memory.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("read-only filesystem")]
    ReadOnly,
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("bad driver handle: {0}")]
    BadHandle(u32),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("i/o error: {0}")]
    Io(String),
}

impl FsError {
    /// Map into the WASI errno namespace.
    pub fn errno(&self) -> Errno {
        match self {
            FsError::NotFound(_) => Errno::Noent,
            FsError::AlreadyExists(_) => Errno::Exist,
            FsError::NotADirectory(_) => Errno::Notdir,
            FsError::IsADirectory(_) => Errno::Isdir,
            FsError::PermissionDenied(_) => Errno::Acces,
            FsError::ReadOnly => Errno::Rofs,
            FsError::NotEmpty(_) => Errno::Notempty,
            FsError::BadHandle(_) => Errno::Badf,
            FsError::InvalidPath(_) => Errno::Inval,
            FsError::Unsupported(_) => Errno::Notsup,
            FsError::Io(_) => Errno::Io,
        }
    }

    /// Convert an editor-filesystem error for a given path. Unknown
    /// kinds default to a permission failure, which is what the editor
    /// API surfaces for scheme-level refusals.
    pub fn from_io(err: io::Error, path: &str) -> FsError {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
            io::ErrorKind::DirectoryNotEmpty => FsError::NotEmpty(path.to_string()),
            io::ErrorKind::Unsupported => FsError::Unsupported("editor filesystem"),
            io::ErrorKind::InvalidInput => FsError::InvalidPath(path.to_string()),
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.to_string()),
            _ => FsError::Io(err.to_string()),
        }
    }
}

/// Metadata for one node, driver-relative.
#[derive(Debug, Clone, Copy)]
pub struct NodeStat {
    pub filetype: Filetype,
    pub size: u64,
    pub mtime_ns: u64,
    pub ino: u64,
}

/// One directory entry as a driver reports it.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub filetype: Filetype,
    pub ino: u64,
}

/// Result of a successful driver open.
#[derive(Debug, Clone)]
pub struct OpenedNode {
    /// Driver file handle; `None` for directories.
    pub handle: Option<u32>,
    pub filetype: Filetype,
    /// Normalized driver-relative path of the opened node.
    pub path: String,
}

/// The filesystem capability set.
pub trait FileSystemDevice: Send + Sync {
    fn id(&self) -> DeviceId;

    fn uri(&self) -> &Url;

    /// Whether the backing store accepts writes.
    fn writable(&self) -> bool;

    /// Rights for a preopen descriptor of this device's root, masked to
    /// read-only when the backing store is.
    fn prestat_rights(&self) -> (Rights, Rights) {
        let base = Rights::directory_base();
        let inheriting = Rights::directory_inheriting();
        if self.writable() {
            (base, inheriting)
        } else {
            (base.read_only(), inheriting.read_only())
        }
    }

    // ---- descriptor-level operations ----

    fn open(
        &self,
        path: &str,
        oflags: Oflags,
        fdflags: Fdflags,
        write: bool,
    ) -> Result<OpenedNode, FsError>;

    fn close_handle(&self, handle: u32) -> Result<(), FsError>;

    fn read(&self, handle: u32, max: usize) -> Result<Vec<u8>, FsError>;

    fn write(&self, handle: u32, bytes: &[u8]) -> Result<usize, FsError>;

    fn seek(&self, handle: u32, offset: i64, whence: Whence) -> Result<u64, FsError>;

    /// Bytes between the current position and end of file.
    fn bytes_available(&self, handle: u32) -> Result<u64, FsError>;

    fn set_size(&self, handle: u32, size: u64) -> Result<(), FsError>;

    /// Flush buffered contents to the backing store.
    fn sync(&self, handle: u32) -> Result<(), FsError>;

    fn stat_handle(&self, handle: u32) -> Result<NodeStat, FsError>;

    // ---- path-level operations (driver-relative, normalized) ----

    fn stat_path(&self, path: &str) -> Result<NodeStat, FsError>;

    fn create_directory(&self, path: &str) -> Result<(), FsError>;

    fn read_directory(&self, path: &str) -> Result<Vec<DirectoryEntry>, FsError>;

    fn read_link(&self, path: &str) -> Result<String, FsError>;

    fn rename(&self, from: &str, to: &str) -> Result<(), FsError>;

    fn remove_directory(&self, path: &str) -> Result<(), FsError>;

    fn unlink_file(&self, path: &str) -> Result<(), FsError>;
}

/// Stable synthetic inode number for `(device, path)`. The editor API
/// exposes no inodes, so one is derived; equal paths on the same device
/// always agree.
pub fn synthetic_ino(device: DeviceId, path: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    device.0.hash(&mut hasher);
    path.hash(&mut hasher);
    // Avoid 0, some guests treat it as "no inode".
    hasher.finish() | 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(FsError::NotFound("x".into()).errno(), Errno::Noent);
        assert_eq!(FsError::ReadOnly.errno(), Errno::Rofs);
        assert_eq!(FsError::BadHandle(7).errno(), Errno::Badf);
        assert_eq!(FsError::NotADirectory("x".into()).errno(), Errno::Notdir);
        assert_eq!(FsError::Unsupported("x").errno(), Errno::Notsup);
    }

    #[test]
    fn io_error_conversion() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(FsError::from_io(err, "a/b"), FsError::NotFound(_)));
        let err = io::Error::other("disk fell over");
        assert!(matches!(FsError::from_io(err, "a"), FsError::Io(_)));
    }

    #[test]
    fn synthetic_ino_is_stable_and_nonzero() {
        let a = synthetic_ino(DeviceId(1), "src/main.rs");
        let b = synthetic_ino(DeviceId(1), "src/main.rs");
        let c = synthetic_ino(DeviceId(2), "src/main.rs");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, 0);
    }
}
