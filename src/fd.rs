//! File descriptor table
//!
//! Maps the guest's small integer handles to open resources. Rights are
//! carried on the descriptor and enforced by the dispatcher; the table
//! only stores and resolves. Descriptor numbers are reused after close
//! but never duplicated while live.

use std::collections::HashMap;

use slab::Slab;

use crate::device::DeviceId;
use crate::wasi::{Errno, Fdflags, Filetype, Rights};

/// Disposal callback run when the descriptor is closed or the process
/// is torn down.
pub type Disposer = Box<dyn FnOnce() + Send>;

/// Cached directory-listing snapshot for `fd_readdir` pagination.
///
/// A nonzero cookie presented without a snapshot (or after the snapshot
/// was exhausted and discarded) reads as end-of-listing rather than an
/// error; strict preview-1 readers never ask past the reported buffer
/// usage, and lenience here tolerates the ones that do.
#[derive(Debug, Clone)]
pub struct ReaddirCursor {
    /// Pre-encoded entries, one per cookie position.
    pub entries: Vec<crate::wasi::Dirent>,
}

/// An open handle visible to the guest.
pub struct FileDescriptor {
    pub fd: u32,
    pub device: DeviceId,
    pub filetype: Filetype,
    pub rights_base: Rights,
    pub rights_inheriting: Rights,
    pub fdflags: Fdflags,
    /// Driver-relative normalized path of the node.
    pub path: String,
    /// Driver file handle for regular files.
    pub handle: Option<u32>,
    /// Mount-point name reported through `fd_prestat_dir_name`.
    pub preopen: Option<String>,
    pub readdir: Option<ReaddirCursor>,
    pub disposer: Option<Disposer>,
}

impl FileDescriptor {
    /// Check that the descriptor carries every requested right.
    pub fn assert_rights(&self, required: Rights) -> Result<(), Errno> {
        if self.rights_base.contains(required) {
            Ok(())
        } else {
            Err(Errno::Notcapable)
        }
    }

    pub fn is_preopen(&self) -> bool {
        self.preopen.is_some()
    }
}

/// The per-process descriptor table.
#[derive(Default)]
pub struct FdTable {
    entries: Slab<FileDescriptor>,
    /// Preopened root descriptor per device.
    roots: HashMap<DeviceId, u32>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor; the assigned fd is written into the entry
    /// and returned. No live fd is ever issued twice.
    pub fn add(&mut self, mut descriptor: FileDescriptor) -> u32 {
        let entry = self.entries.vacant_entry();
        let fd = entry.key() as u32;
        descriptor.fd = fd;
        entry.insert(descriptor);
        fd
    }

    pub fn get(&self, fd: u32) -> Result<&FileDescriptor, Errno> {
        self.entries.get(fd as usize).ok_or(Errno::Badf)
    }

    pub fn get_mut(&mut self, fd: u32) -> Result<&mut FileDescriptor, Errno> {
        self.entries.get_mut(fd as usize).ok_or(Errno::Badf)
    }

    /// Remove a descriptor, returning it for disposal.
    pub fn delete(&mut self, fd: u32) -> Result<FileDescriptor, Errno> {
        let descriptor = self.entries.try_remove(fd as usize).ok_or(Errno::Badf)?;
        if self.roots.get(&descriptor.device) == Some(&fd) {
            self.roots.remove(&descriptor.device);
        }
        Ok(descriptor)
    }

    /// Record `fd` as the root (preopen) descriptor of a device.
    pub fn set_root(&mut self, device: DeviceId, fd: u32) {
        self.roots.insert(device, fd);
    }

    pub fn get_root(&self, device: DeviceId) -> Option<u32> {
        self.roots.get(&device).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain every descriptor (process teardown).
    pub fn drain(&mut self) -> Vec<FileDescriptor> {
        self.roots.clear();
        let fds: Vec<usize> = self.entries.iter().map(|(k, _)| k).collect();
        fds.into_iter()
            .filter_map(|k| self.entries.try_remove(k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(device: u32) -> FileDescriptor {
        FileDescriptor {
            fd: 0,
            device: DeviceId(device),
            filetype: Filetype::RegularFile,
            rights_base: Rights::file_base(),
            rights_inheriting: Rights::empty(),
            fdflags: Fdflags::empty(),
            path: "file.txt".into(),
            handle: None,
            preopen: None,
            readdir: None,
            disposer: None,
        }
    }

    #[test]
    fn add_assigns_sequential_fds() {
        let mut table = FdTable::new();
        assert_eq!(table.add(descriptor(1)), 0);
        assert_eq!(table.add(descriptor(1)), 1);
        assert_eq!(table.add(descriptor(1)), 2);
    }

    #[test]
    fn unknown_fd_is_badf() {
        let table = FdTable::new();
        assert!(matches!(table.get(9), Err(Errno::Badf)));
    }

    #[test]
    fn delete_then_use_is_badf_and_fd_is_reused() {
        let mut table = FdTable::new();
        let a = table.add(descriptor(1));
        let b = table.add(descriptor(1));
        table.delete(a).unwrap();
        assert!(matches!(table.get(a), Err(Errno::Badf)));
        assert!(table.get(b).is_ok());
        // Slab hands the freed slot back out; never two live copies.
        let c = table.add(descriptor(1));
        assert_eq!(c, a);
        assert!(matches!(table.delete(9), Err(Errno::Badf)));
    }

    #[test]
    fn rights_are_checked_on_the_descriptor() {
        let mut desc = descriptor(1);
        desc.rights_base = Rights::FD_READ;
        assert!(desc.assert_rights(Rights::FD_READ).is_ok());
        assert_eq!(
            desc.assert_rights(Rights::FD_WRITE),
            Err(Errno::Notcapable)
        );
        assert_eq!(
            desc.assert_rights(Rights::FD_READ | Rights::FD_WRITE),
            Err(Errno::Notcapable)
        );
    }

    #[test]
    fn root_descriptor_tracking() {
        let mut table = FdTable::new();
        let fd = table.add(descriptor(3));
        table.set_root(DeviceId(3), fd);
        assert_eq!(table.get_root(DeviceId(3)), Some(fd));
        table.delete(fd).unwrap();
        assert_eq!(table.get_root(DeviceId(3)), None);
    }

    #[test]
    fn drain_empties_the_table() {
        let mut table = FdTable::new();
        table.add(descriptor(1));
        table.add(descriptor(2));
        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
