//! Composing root driver
//!
//! When a process mounts more than one filesystem and none of them owns
//! `/`, a synthetic root is constructed. It holds the mount table, routes
//! absolute paths to the owning driver by longest matching prefix, and
//! materializes the virtual directories that sit between `/` and the
//! mount points (`/workspaces` when folders are mounted at
//! `/workspaces/<name>`).
//!
//! Resolution of paths *into* a mount happens in the dispatcher through
//! [`MountMap::resolve`], so descriptors always end up owned by the
//! delegate driver; this driver only answers for the synthetic nodes.

use std::collections::BTreeSet;
use std::sync::Arc;

use url::Url;

use super::{
    synthetic_ino, DirectoryEntry, FileSystemDevice, FsError, NodeStat, OpenedNode,
};
use crate::device::{Device, DeviceId};
use crate::path;
use crate::wasi::{Fdflags, Filetype, Oflags, Whence};

/// One mounted filesystem.
#[derive(Clone)]
pub struct MountEntry {
    /// Absolute mount point (`/`, `/workspace`, `/.agdaData`, ...).
    pub point: String,
    pub device: Device,
}

/// The process's mount table, ordered for longest-prefix matching.
pub struct MountMap {
    entries: Vec<MountEntry>,
}

impl MountMap {
    pub fn new(mut entries: Vec<MountEntry>) -> Self {
        // Longest mount point first so `/workspaces/a` wins over `/`.
        entries.sort_by(|a, b| b.point.len().cmp(&a.point.len()));
        Self { entries }
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    pub fn has_root_mount(&self) -> bool {
        self.entries.iter().any(|e| e.point == "/")
    }

    /// Resolve a normalized root-relative path ("" is `/`) to the
    /// owning device and the device-relative remainder.
    pub fn resolve(&self, root_relative: &str) -> Option<(Device, String)> {
        let absolute = format!("/{root_relative}");
        for entry in &self.entries {
            if let Some(rest) = path::strip_mount_prefix(&entry.point, &absolute) {
                return Some((entry.device.clone(), rest.to_string()));
            }
        }
        None
    }

    /// The mount point a device is exposed under.
    pub fn mount_point_of(&self, id: DeviceId) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.device.id() == id)
            .map(|e| e.point.as_str())
    }

    /// Whether `root_relative` names a virtual directory strictly above
    /// some mount point (or the root itself).
    fn is_synthetic_dir(&self, root_relative: &str) -> bool {
        if root_relative.is_empty() {
            return true;
        }
        let prefix = format!("/{root_relative}/");
        self.entries.iter().any(|e| e.point.starts_with(&prefix))
    }

    /// Direct children of a synthetic directory: the next path component
    /// of every mount point below it.
    fn synthetic_children(&self, root_relative: &str) -> Vec<String> {
        let prefix = if root_relative.is_empty() {
            "/".to_string()
        } else {
            format!("/{root_relative}/")
        };
        let mut names = BTreeSet::new();
        for entry in &self.entries {
            if entry.point == "/" {
                continue;
            }
            if let Some(rest) = entry.point.strip_prefix(&prefix) {
                if let Some(first) = rest.split('/').next() {
                    if !first.is_empty() {
                        names.insert(first.to_string());
                    }
                }
            }
        }
        names.into_iter().collect()
    }
}

/// Driver owning `/` when several non-root mounts are composed.
pub struct RootFsDriver {
    id: DeviceId,
    uri: Url,
    mounts: Arc<MountMap>,
}

impl RootFsDriver {
    pub fn new(id: DeviceId, mounts: Arc<MountMap>) -> Self {
        let uri = Url::parse("vfs://root/").expect("static url");
        Self { id, uri, mounts }
    }

    pub fn mounts(&self) -> &Arc<MountMap> {
        &self.mounts
    }

    fn synthetic_stat(&self, path: &str) -> Result<NodeStat, FsError> {
        if self.mounts.is_synthetic_dir(path) {
            Ok(NodeStat {
                filetype: Filetype::Directory,
                size: 0,
                mtime_ns: 0,
                ino: synthetic_ino(self.id, path),
            })
        } else {
            Err(FsError::NotFound(path.to_string()))
        }
    }
}

impl FileSystemDevice for RootFsDriver {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn uri(&self) -> &Url {
        &self.uri
    }

    fn writable(&self) -> bool {
        // Write enforcement is per-mount: descriptors opened through
        // the root carry full rights and the delegate drivers refuse
        // what their backing store cannot do. Only the synthetic
        // namespace itself is immutable.
        true
    }

    fn open(
        &self,
        path: &str,
        oflags: Oflags,
        _fdflags: Fdflags,
        write: bool,
    ) -> Result<OpenedNode, FsError> {
        if write || oflags.intersects(Oflags::CREAT | Oflags::TRUNC) {
            return Err(FsError::ReadOnly);
        }
        self.synthetic_stat(path)?;
        Ok(OpenedNode {
            handle: None,
            filetype: Filetype::Directory,
            path: path.to_string(),
        })
    }

    fn close_handle(&self, handle: u32) -> Result<(), FsError> {
        Err(FsError::BadHandle(handle))
    }

    fn read(&self, handle: u32, _max: usize) -> Result<Vec<u8>, FsError> {
        Err(FsError::BadHandle(handle))
    }

    fn write(&self, handle: u32, _bytes: &[u8]) -> Result<usize, FsError> {
        Err(FsError::BadHandle(handle))
    }

    fn seek(&self, handle: u32, _offset: i64, _whence: Whence) -> Result<u64, FsError> {
        Err(FsError::BadHandle(handle))
    }

    fn bytes_available(&self, handle: u32) -> Result<u64, FsError> {
        Err(FsError::BadHandle(handle))
    }

    fn set_size(&self, _handle: u32, _size: u64) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn sync(&self, _handle: u32) -> Result<(), FsError> {
        Ok(())
    }

    fn stat_handle(&self, handle: u32) -> Result<NodeStat, FsError> {
        Err(FsError::BadHandle(handle))
    }

    fn stat_path(&self, path: &str) -> Result<NodeStat, FsError> {
        self.synthetic_stat(path)
    }

    fn create_directory(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn read_directory(&self, path: &str) -> Result<Vec<DirectoryEntry>, FsError> {
        if !self.mounts.is_synthetic_dir(path) {
            return Err(FsError::NotFound(path.to_string()));
        }
        Ok(self
            .mounts
            .synthetic_children(path)
            .into_iter()
            .map(|name| DirectoryEntry {
                ino: synthetic_ino(self.id, &path::join(path, &name)),
                filetype: Filetype::Directory,
                name,
            })
            .collect())
    }

    fn read_link(&self, _path: &str) -> Result<String, FsError> {
        Err(FsError::Unsupported("read_link"))
    }

    fn rename(&self, _from: &str, _to: &str) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn remove_directory(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn unlink_file(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }
}
