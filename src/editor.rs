//! Editor filesystem abstraction
//!
//! The embedding editor exposes its workspace through an abstracted file
//! API; this trait is the seam. The trait is intentionally small so it
//! can be implemented for different backends (a real editor binding, the
//! in-memory store below, archives). Paths are normalized and relative
//! to the backend root ("" is the root, no leading slash).

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use crate::path;

/// Kind of a directory entry as the editor reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// Metadata for a single node.
#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    pub kind: FileKind,
    pub size: u64,
    /// Modification time, nanoseconds since the epoch.
    pub mtime_ns: u64,
}

/// The editor's abstracted filesystem.
pub trait EditorFileSystem: Send + Sync {
    fn stat(&self, path: &str) -> io::Result<FileInfo>;

    fn read_directory(&self, path: &str) -> io::Result<Vec<(String, FileKind)>>;

    fn read_file(&self, path: &str) -> io::Result<Vec<u8>>;

    fn write_file(&self, path: &str, contents: &[u8]) -> io::Result<()>;

    fn create_directory(&self, path: &str) -> io::Result<()>;

    fn delete(&self, path: &str) -> io::Result<()>;

    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Whether the backing scheme accepts writes. Drivers mask write
    /// rights away when this is false.
    fn is_writable(&self) -> bool {
        true
    }
}

/// A stored file or directory
#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, mtime_ns: u64 },
    Directory,
}

/// In-memory editor filesystem. Backs tests and standalone use; data
/// lives as long as the value.
pub struct MemoryEditorFs {
    nodes: Mutex<HashMap<String, Node>>,
    writable: bool,
}

impl MemoryEditorFs {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        // Root directory always exists
        nodes.insert(String::new(), Node::Directory);
        Self {
            nodes: Mutex::new(nodes),
            writable: true,
        }
    }

    /// Build a store from `(path, contents)` pairs, creating
    /// intermediate directories.
    pub fn with_files(files: &[(&str, &[u8])]) -> Self {
        let fs = Self::new();
        for (p, contents) in files {
            fs.insert_file(p, contents);
        }
        fs
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Insert a file, creating parent directories (setup helper, ignores
    /// the writable flag).
    pub fn insert_file(&self, raw_path: &str, contents: &[u8]) {
        let p = match path::normalize(raw_path) {
            path::Normalized::Within(p) => p,
            path::Normalized::Escapes { .. } => return,
        };
        let mut nodes = self.nodes.lock().unwrap();
        let mut dir = String::new();
        if let Some(parent) = path::parent(&p) {
            for part in parent.split('/').filter(|s| !s.is_empty()) {
                dir = path::join(&dir, part);
                nodes.entry(dir.clone()).or_insert(Node::Directory);
            }
        }
        nodes.insert(
            p,
            Node::File {
                data: contents.to_vec(),
                mtime_ns: 0,
            },
        );
    }

    fn normalized(raw: &str) -> io::Result<String> {
        match path::normalize(raw) {
            path::Normalized::Within(p) => Ok(p),
            path::Normalized::Escapes { .. } => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path escapes root: {raw}"),
            )),
        }
    }

    fn not_found(path: &str) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("not found: /{path}"))
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "filesystem is read-only",
            ))
        }
    }

    fn bump_mtime(node: &mut Node) {
        if let Node::File { mtime_ns, .. } = node {
            *mtime_ns += 1;
        }
    }
}

impl Default for MemoryEditorFs {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorFileSystem for MemoryEditorFs {
    fn stat(&self, raw: &str) -> io::Result<FileInfo> {
        let p = Self::normalized(raw)?;
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(&p) {
            Some(Node::File { data, mtime_ns }) => Ok(FileInfo {
                kind: FileKind::File,
                size: data.len() as u64,
                mtime_ns: *mtime_ns,
            }),
            Some(Node::Directory) => Ok(FileInfo {
                kind: FileKind::Directory,
                size: 0,
                mtime_ns: 0,
            }),
            None => Err(Self::not_found(&p)),
        }
    }

    fn read_directory(&self, raw: &str) -> io::Result<Vec<(String, FileKind)>> {
        let p = Self::normalized(raw)?;
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(&p) {
            Some(Node::Directory) => {}
            Some(Node::File { .. }) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a directory: /{p}"),
                ));
            }
            None => return Err(Self::not_found(&p)),
        }

        let prefix = if p.is_empty() { String::new() } else { format!("{p}/") };
        let mut entries: Vec<(String, FileKind)> = nodes
            .iter()
            .filter_map(|(candidate, node)| {
                if candidate == &p || !candidate.starts_with(&prefix) {
                    return None;
                }
                let relative = &candidate[prefix.len()..];
                if relative.is_empty() || relative.contains('/') {
                    return None; // not a direct child
                }
                let kind = match node {
                    Node::Directory => FileKind::Directory,
                    Node::File { .. } => FileKind::File,
                };
                Some((relative.to_string(), kind))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    fn read_file(&self, raw: &str) -> io::Result<Vec<u8>> {
        let p = Self::normalized(raw)?;
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(&p) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Directory) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("is a directory: /{p}"),
            )),
            None => Err(Self::not_found(&p)),
        }
    }

    fn write_file(&self, raw: &str, contents: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        let p = Self::normalized(raw)?;
        let mut nodes = self.nodes.lock().unwrap();
        if let Some(parent) = path::parent(&p) {
            match nodes.get(parent) {
                Some(Node::Directory) => {}
                Some(Node::File { .. }) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("parent is a file: /{parent}"),
                    ));
                }
                None => return Err(Self::not_found(parent)),
            }
        }
        if matches!(nodes.get(&p), Some(Node::Directory)) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("is a directory: /{p}"),
            ));
        }
        let mtime_ns = match nodes.get(&p) {
            Some(Node::File { mtime_ns, .. }) => mtime_ns + 1,
            _ => 1,
        };
        nodes.insert(
            p,
            Node::File {
                data: contents.to_vec(),
                mtime_ns,
            },
        );
        Ok(())
    }

    fn create_directory(&self, raw: &str) -> io::Result<()> {
        self.check_writable()?;
        let p = Self::normalized(raw)?;
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&p) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: /{p}"),
            ));
        }
        if let Some(parent) = path::parent(&p) {
            if !matches!(nodes.get(parent), Some(Node::Directory)) {
                return Err(Self::not_found(parent));
            }
        }
        nodes.insert(p, Node::Directory);
        Ok(())
    }

    fn delete(&self, raw: &str) -> io::Result<()> {
        self.check_writable()?;
        let p = Self::normalized(raw)?;
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get(&p) {
            Some(Node::File { .. }) => {
                nodes.remove(&p);
                Ok(())
            }
            Some(Node::Directory) => {
                let prefix = format!("{p}/");
                if nodes.keys().any(|k| k.starts_with(&prefix)) {
                    return Err(io::Error::new(
                        io::ErrorKind::DirectoryNotEmpty,
                        format!("directory not empty: /{p}"),
                    ));
                }
                nodes.remove(&p);
                Ok(())
            }
            None => Err(Self::not_found(&p)),
        }
    }

    fn rename(&self, raw_from: &str, raw_to: &str) -> io::Result<()> {
        self.check_writable()?;
        let from = Self::normalized(raw_from)?;
        let to = Self::normalized(raw_to)?;
        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(&from) {
            return Err(Self::not_found(&from));
        }
        if let Some(parent) = path::parent(&to) {
            if !matches!(nodes.get(parent), Some(Node::Directory)) {
                return Err(Self::not_found(parent));
            }
        }
        // Move the node and, for directories, the whole subtree.
        let moved: Vec<String> = nodes
            .keys()
            .filter(|k| *k == &from || k.starts_with(&format!("{from}/")))
            .cloned()
            .collect();
        for old_key in moved {
            let mut node = nodes.remove(&old_key).unwrap();
            Self::bump_mtime(&mut node);
            let new_key = format!("{}{}", to, &old_key[from.len()..]);
            nodes.insert(new_key, node);
        }
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}
