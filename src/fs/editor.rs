//! Editor-backed filesystem driver
//!
//! Translates the driver capability set into the editor's abstracted
//! file primitives. Open files cache their contents and write through on
//! every mutation, so concurrent observers of the editor filesystem see
//! updates without an explicit flush; `sync` is then nearly free.

use std::sync::{Arc, Mutex};

use slab::Slab;
use url::Url;

use super::{
    synthetic_ino, DirectoryEntry, FileSystemDevice, FsError, NodeStat, OpenedNode,
};
use crate::device::DeviceId;
use crate::editor::{EditorFileSystem, FileKind};
use crate::wasi::{Fdflags, Filetype, Oflags, Whence};

/// A file opened through this driver.
struct OpenFile {
    path: String,
    position: u64,
    append: bool,
    writable: bool,
    content: Vec<u8>,
}

/// Read-write driver over an [`EditorFileSystem`].
pub struct EditorFsDriver {
    id: DeviceId,
    uri: Url,
    fs: Arc<dyn EditorFileSystem>,
    handles: Mutex<Slab<OpenFile>>,
}

impl EditorFsDriver {
    pub fn new(id: DeviceId, uri: Url, fs: Arc<dyn EditorFileSystem>) -> Self {
        Self {
            id,
            uri,
            fs,
            handles: Mutex::new(Slab::new()),
        }
    }

    fn stat_of(&self, path: &str) -> Result<NodeStat, FsError> {
        let info = self
            .fs
            .stat(path)
            .map_err(|e| FsError::from_io(e, path))?;
        let filetype = match info.kind {
            FileKind::File => Filetype::RegularFile,
            FileKind::Directory => Filetype::Directory,
        };
        Ok(NodeStat {
            filetype,
            size: info.size,
            mtime_ns: info.mtime_ns,
            ino: synthetic_ino(self.id, path),
        })
    }

    fn require_writable(&self) -> Result<(), FsError> {
        if self.fs.is_writable() {
            Ok(())
        } else {
            Err(FsError::ReadOnly)
        }
    }

    fn flush(&self, file: &OpenFile) -> Result<(), FsError> {
        self.fs
            .write_file(&file.path, &file.content)
            .map_err(|e| FsError::from_io(e, &file.path))
    }
}

impl FileSystemDevice for EditorFsDriver {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn uri(&self) -> &Url {
        &self.uri
    }

    fn writable(&self) -> bool {
        self.fs.is_writable()
    }

    fn open(
        &self,
        path: &str,
        oflags: Oflags,
        fdflags: Fdflags,
        write: bool,
    ) -> Result<OpenedNode, FsError> {
        let existing = match self.fs.stat(path) {
            Ok(info) => Some(info),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(FsError::from_io(e, path)),
        };

        if let Some(info) = &existing {
            if oflags.contains(Oflags::CREAT) && oflags.contains(Oflags::EXCL) {
                return Err(FsError::AlreadyExists(path.to_string()));
            }
            if info.kind == FileKind::Directory {
                if write || oflags.contains(Oflags::TRUNC) {
                    return Err(FsError::IsADirectory(path.to_string()));
                }
                return Ok(OpenedNode {
                    handle: None,
                    filetype: Filetype::Directory,
                    path: path.to_string(),
                });
            }
            if oflags.contains(Oflags::DIRECTORY) {
                return Err(FsError::NotADirectory(path.to_string()));
            }
        } else {
            if !oflags.contains(Oflags::CREAT) {
                return Err(FsError::NotFound(path.to_string()));
            }
            self.require_writable()?;
            self.fs
                .write_file(path, &[])
                .map_err(|e| FsError::from_io(e, path))?;
        }

        if write || oflags.contains(Oflags::TRUNC) {
            self.require_writable()?;
        }

        let content = if oflags.contains(Oflags::TRUNC) {
            self.fs
                .write_file(path, &[])
                .map_err(|e| FsError::from_io(e, path))?;
            Vec::new()
        } else {
            self.fs
                .read_file(path)
                .map_err(|e| FsError::from_io(e, path))?
        };

        let handle = self.handles.lock().unwrap().insert(OpenFile {
            path: path.to_string(),
            position: 0,
            append: fdflags.contains(Fdflags::APPEND),
            writable: write,
            content,
        }) as u32;

        Ok(OpenedNode {
            handle: Some(handle),
            filetype: Filetype::RegularFile,
            path: path.to_string(),
        })
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

    fn write(&self, handle: u32, bytes: &[u8]) -> Result<usize, FsError> {
        self.require_writable()?;
        let mut handles = self.handles.lock().unwrap();
        let file = handles
            .get_mut(handle as usize)
            .ok_or(FsError::BadHandle(handle))?;
        if !file.writable {
            return Err(FsError::PermissionDenied(file.path.clone()));
        }
        if file.append {
            file.position = file.content.len() as u64;
        }
        let position = file.position as usize;
        if position + bytes.len() > file.content.len() {
            file.content.resize(position + bytes.len(), 0);
        }
        file.content[position..position + bytes.len()].copy_from_slice(bytes);
        file.position += bytes.len() as u64;
        let file = &handles[handle as usize];
        self.flush(file)?;
        Ok(bytes.len())
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

    fn set_size(&self, handle: u32, size: u64) -> Result<(), FsError> {
        self.require_writable()?;
        let mut handles = self.handles.lock().unwrap();
        let file = handles
            .get_mut(handle as usize)
            .ok_or(FsError::BadHandle(handle))?;
        if !file.writable {
            return Err(FsError::PermissionDenied(file.path.clone()));
        }
        file.content.resize(size as usize, 0);
        let file = &handles[handle as usize];
        self.flush(file)
    }

    fn sync(&self, handle: u32) -> Result<(), FsError> {
        let handles = self.handles.lock().unwrap();
        let file = handles
            .get(handle as usize)
            .ok_or(FsError::BadHandle(handle))?;
        if file.writable {
            self.flush(file)?;
        }
        Ok(())
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

    fn create_directory(&self, path: &str) -> Result<(), FsError> {
        self.require_writable()?;
        self.fs
            .create_directory(path)
            .map_err(|e| FsError::from_io(e, path))
    }

    fn read_directory(&self, path: &str) -> Result<Vec<DirectoryEntry>, FsError> {
        let entries = self
            .fs
            .read_directory(path)
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(entries
            .into_iter()
            .map(|(name, kind)| {
                let child = crate::path::join(path, &name);
                DirectoryEntry {
                    ino: synthetic_ino(self.id, &child),
                    filetype: match kind {
                        FileKind::File => Filetype::RegularFile,
                        FileKind::Directory => Filetype::Directory,
                    },
                    name,
                }
            })
            .collect())
    }

    fn read_link(&self, _path: &str) -> Result<String, FsError> {
        // The editor file API exposes no symlink targets.
        Err(FsError::Unsupported("read_link"))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        self.require_writable()?;
        self.fs.rename(from, to).map_err(|e| FsError::from_io(e, from))
    }

    fn remove_directory(&self, path: &str) -> Result<(), FsError> {
        self.require_writable()?;
        let stat = self.stat_of(path)?;
        if stat.filetype != Filetype::Directory {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        self.fs.delete(path).map_err(|e| FsError::from_io(e, path))
    }

    fn unlink_file(&self, path: &str) -> Result<(), FsError> {
        self.require_writable()?;
        let stat = self.stat_of(path)?;
        if stat.filetype == Filetype::Directory {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        self.fs.delete(path).map_err(|e| FsError::from_io(e, path))
    }
}
