//! Static extension-data driver
//!
//! Packaged read-only assets (prelude libraries, data files) ship with a
//! pre-computed directory-listing manifest so the host never has to walk
//! the packaged tree. Stats and listings are answered from the manifest;
//! file contents are read through the backing editor filesystem on
//! demand.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use slab::Slab;
use url::Url;

use super::{
    synthetic_ino, DirectoryEntry, FileSystemDevice, FsError, NodeStat, OpenedNode,
};
use crate::device::DeviceId;
use crate::wasi::{Fdflags, Filetype, Oflags, Whence};

/// One node of the pre-indexed directory tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ManifestNode {
    File {
        size: u64,
    },
    Directory {
        #[serde(default)]
        entries: BTreeMap<String, ManifestNode>,
    },
}

impl ManifestNode {
    fn filetype(&self) -> Filetype {
        match self {
            ManifestNode::File { .. } => Filetype::RegularFile,
            ManifestNode::Directory { .. } => Filetype::Directory,
        }
    }

    fn size(&self) -> u64 {
        match self {
            ManifestNode::File { size } => *size,
            ManifestNode::Directory { .. } => 0,
        }
    }
}

/// The manifest document: a directory tree rooted at the dump root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryManifest {
    pub root: ManifestNode,
}

impl DirectoryManifest {
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Walk a normalized relative path ("" is the root).
    fn lookup(&self, path: &str) -> Option<&ManifestNode> {
        let mut node = &self.root;
        for part in path.split('/').filter(|s| !s.is_empty()) {
            match node {
                ManifestNode::Directory { entries } => node = entries.get(part)?,
                ManifestNode::File { .. } => return None,
            }
        }
        Some(node)
    }
}

/// An open file: manifest-declared size plus lazily loaded contents.
struct OpenFile {
    path: String,
    position: u64,
    content: Vec<u8>,
}

/// Read-only driver over a [`DirectoryManifest`].
pub struct StaticFsDriver {
    id: DeviceId,
    uri: Url,
    manifest: DirectoryManifest,
    /// Backing store the packaged files are actually read from.
    base: Arc<dyn crate::editor::EditorFileSystem>,
    handles: Mutex<Slab<OpenFile>>,
}

impl StaticFsDriver {
    pub fn new(
        id: DeviceId,
        uri: Url,
        manifest: DirectoryManifest,
        base: Arc<dyn crate::editor::EditorFileSystem>,
    ) -> Self {
        Self {
            id,
            uri,
            manifest,
            base,
            handles: Mutex::new(Slab::new()),
        }
    }

    fn node(&self, path: &str) -> Result<&ManifestNode, FsError> {
        self.manifest
            .lookup(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn stat_of(&self, path: &str) -> Result<NodeStat, FsError> {
        let node = self.node(path)?;
        Ok(NodeStat {
            filetype: node.filetype(),
            size: node.size(),
            mtime_ns: 0,
            ino: synthetic_ino(self.id, path),
        })
    }
}

impl FileSystemDevice for StaticFsDriver {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn uri(&self) -> &Url {
        &self.uri
    }

    fn writable(&self) -> bool {
        false
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
        match self.node(path)? {
            ManifestNode::Directory { .. } => Ok(OpenedNode {
                handle: None,
                filetype: Filetype::Directory,
                path: path.to_string(),
            }),
            ManifestNode::File { .. } => {
                if oflags.contains(Oflags::DIRECTORY) {
                    return Err(FsError::NotADirectory(path.to_string()));
                }
                let content = self
                    .base
                    .read_file(path)
                    .map_err(|e| FsError::from_io(e, path))?;
                let handle = self.handles.lock().unwrap().insert(OpenFile {
                    path: path.to_string(),
                    position: 0,
                    content,
                }) as u32;
                Ok(OpenedNode {
                    handle: Some(handle),
                    filetype: Filetype::RegularFile,
                    path: path.to_string(),
                })
            }
        }
    }

    fn close_handle(&self, handle: u32) -> Result<(), FsError> {
        self.handles
            .lock()
            .unwrap()
            .try_remove(handle as usize)
            .map(|_| ())
            .ok_or(FsError::BadHandle(handle))
    }

    fn read(&self, handle: u32, max: usize) -> Result<Vec<u8>, FsError> {
        let mut handles = self.handles.lock().unwrap();
        let file = handles
            .get_mut(handle as usize)
            .ok_or(FsError::BadHandle(handle))?;
        let position = file.position as usize;
        let available = file.content.len().saturating_sub(position);
        let to_read = max.min(available);
        let bytes = file.content[position..position + to_read].to_vec();
        file.position += to_read as u64;
        Ok(bytes)
    }

    fn write(&self, _handle: u32, _bytes: &[u8]) -> Result<usize, FsError> {
        Err(FsError::ReadOnly)
    }

    fn seek(&self, handle: u32, offset: i64, whence: Whence) -> Result<u64, FsError> {
        let mut handles = self.handles.lock().unwrap();
        let file = handles
            .get_mut(handle as usize)
            .ok_or(FsError::BadHandle(handle))?;
        let size = file.content.len() as i64;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => file.position as i64,
            Whence::End => size,
        };
        let target = base.checked_add(offset).filter(|n| *n >= 0).ok_or_else(|| {
            FsError::InvalidPath(format!("seek out of range: {offset} from {base}"))
        })?;
        file.position = target as u64;
        Ok(file.position)
    }

    fn bytes_available(&self, handle: u32) -> Result<u64, FsError> {
        let handles = self.handles.lock().unwrap();
        let file = handles
            .get(handle as usize)
            .ok_or(FsError::BadHandle(handle))?;
        Ok((file.content.len() as u64).saturating_sub(file.position))
    }

    fn set_size(&self, _handle: u32, _size: u64) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn sync(&self, handle: u32) -> Result<(), FsError> {
        let handles = self.handles.lock().unwrap();
        handles
            .get(handle as usize)
            .map(|_| ())
            .ok_or(FsError::BadHandle(handle))
    }

    fn stat_handle(&self, handle: u32) -> Result<NodeStat, FsError> {
        let handles = self.handles.lock().unwrap();
        let file = handles
            .get(handle as usize)
            .ok_or(FsError::BadHandle(handle))?;
        Ok(NodeStat {
            filetype: Filetype::RegularFile,
            size: file.content.len() as u64,
            mtime_ns: 0,
            ino: synthetic_ino(self.id, &file.path),
        })
    }

    fn stat_path(&self, path: &str) -> Result<NodeStat, FsError> {
        self.stat_of(path)
    }

    fn create_directory(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn read_directory(&self, path: &str) -> Result<Vec<DirectoryEntry>, FsError> {
        match self.node(path)? {
            ManifestNode::Directory { entries } => Ok(entries
                .iter()
                .map(|(name, node)| DirectoryEntry {
                    ino: synthetic_ino(self.id, &crate::path::join(path, name)),
                    filetype: node.filetype(),
                    name: name.clone(),
                })
                .collect()),
            ManifestNode::File { .. } => Err(FsError::NotADirectory(path.to_string())),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::MemoryEditorFs;

    fn manifest_json() -> &'static str {
        r#"{
            "root": {
                "kind": "directory",
                "entries": {
                    "lib": {
                        "kind": "directory",
                        "entries": {
                            "Prelude.agda": { "kind": "file", "size": 17 }
                        }
                    },
                    "VERSION": { "kind": "file", "size": 5 }
                }
            }
        }"#
    }

    fn driver() -> StaticFsDriver {
        let manifest = DirectoryManifest::from_json(manifest_json().as_bytes()).unwrap();
        let base = Arc::new(MemoryEditorFs::with_files(&[
            ("lib/Prelude.agda", b"module Prelude where".as_slice()),
            ("VERSION", b"1.0.0".as_slice()),
        ]));
        StaticFsDriver::new(
            DeviceId(7),
            Url::parse("extension://publisher.ext/data/").unwrap(),
            manifest,
            base,
        )
    }

    #[test]
    fn manifest_roundtrips_through_json() {
        let manifest = DirectoryManifest::from_json(manifest_json().as_bytes()).unwrap();
        let encoded = manifest.to_json().unwrap();
        assert_eq!(DirectoryManifest::from_json(&encoded).unwrap(), manifest);
    }

    #[test]
    fn listings_come_from_the_manifest() {
        let drv = driver();
        let entries = drv.read_directory("").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["VERSION", "lib"]);
        assert_eq!(drv.stat_path("lib/Prelude.agda").unwrap().size, 17);
    }

    #[test]
    fn contents_come_from_the_backing_store() {
        let drv = driver();
        let node = drv
            .open("lib/Prelude.agda", Oflags::empty(), Fdflags::empty(), false)
            .unwrap();
        let handle = node.handle.unwrap();
        assert_eq!(drv.read(handle, 64).unwrap(), b"module Prelude where");
    }

    #[test]
    fn every_mutation_is_read_only() {
        let drv = driver();
        assert!(matches!(drv.write(0, b"x"), Err(FsError::ReadOnly)));
        assert!(matches!(drv.create_directory("new"), Err(FsError::ReadOnly)));
        assert!(matches!(drv.unlink_file("VERSION"), Err(FsError::ReadOnly)));
        assert!(matches!(
            drv.open("VERSION", Oflags::TRUNC, Fdflags::empty(), false),
            Err(FsError::ReadOnly)
        ));
    }

    #[test]
    fn missing_paths_are_not_found() {
        let drv = driver();
        assert!(matches!(
            drv.stat_path("lib/Missing.agda"),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            drv.read_directory("VERSION"),
            Err(FsError::NotADirectory(_))
        ));
    }
}
