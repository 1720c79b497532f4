//! Syscall dispatcher (WASI service)
//!
//! One entry per WASI function. Every entry resolves the descriptor,
//! asserts the required rights, resolves the owning device (applying
//! cross-mount path translation when a path climbs out of a non-root
//! driver), delegates to the driver, and writes results into the call
//! frame. Driver failures are converted to WASI error numbers here; no
//! typed error crosses the boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tracing::{debug, trace};

use crate::device::{Device, DeviceRegistry};
use crate::fd::{FdTable, FileDescriptor, ReaddirCursor};
use crate::fs::{synthetic_ino, MountMap, NodeStat};
use crate::path;
use crate::pipe::ReadyCell;
use crate::transport::{CallFrame, SyscallDispatcher, SyscallNo};
use crate::wasi::{
    Clockid, Dirent, Errno, Event, Eventrwflags, Eventtype, Fdflags, Fdstat, Filestat, Filetype,
    Lookupflags, MemoryView, Oflags, Prestat, Rights, Subclockflags, Subscription, SubscriptionU,
    Whence,
};

/// Process clocks: a monotonic anchor plus the system realtime clock.
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ns(&self, id: Clockid) -> Result<u64, Errno> {
        match id {
            Clockid::Realtime => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .map_err(|_| Errno::Io),
            Clockid::Monotonic => Ok(self.origin.elapsed().as_nanos() as u64),
            // Well-formed but unsupported on this host.
            Clockid::ProcessCputime | Clockid::ThreadCputime => Err(Errno::Notsup),
        }
    }

    pub fn resolution_ns(&self, id: Clockid) -> Result<u64, Errno> {
        match id {
            Clockid::Realtime | Clockid::Monotonic => Ok(1_000),
            Clockid::ProcessCputime | Clockid::ThreadCputime => Err(Errno::Notsup),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-process syscall service. Owns the descriptor table, the
/// device registry, and the mount table; runs on the coordinating
/// thread.
pub struct WasiService {
    args: Vec<String>,
    env: Vec<(String, String)>,
    registry: DeviceRegistry,
    mounts: Arc<MountMap>,
    fds: FdTable,
    stdin_ready: Arc<ReadyCell>,
    clock: Clock,
    exit: Option<u32>,
}

impl WasiService {
    pub fn new(
        args: Vec<String>,
        env: Vec<(String, String)>,
        registry: DeviceRegistry,
        mounts: Arc<MountMap>,
        fds: FdTable,
        stdin_ready: Arc<ReadyCell>,
    ) -> Self {
        Self {
            args,
            env,
            registry,
            mounts,
            fds,
            stdin_ready,
            clock: Clock::new(),
            exit: None,
        }
    }

    pub fn fds(&self) -> &FdTable {
        &self.fds
    }

    // ---- resolution helpers ----

    fn device_of(&self, desc: &FileDescriptor) -> Result<Device, Errno> {
        self.registry.get(desc.device).map_err(|_| Errno::Badf)
    }

    fn filesystem_of(
        &self,
        desc: &FileDescriptor,
    ) -> Result<Arc<dyn crate::fs::FileSystemDevice>, Errno> {
        match self.device_of(desc)? {
            Device::FileSystem(d) => Ok(d),
            Device::Character(_) => Err(Errno::Badf),
        }
    }

    /// Resolve a guest-supplied path against a directory descriptor:
    /// normalize, and when the result escapes the descriptor's driver,
    /// translate through the mount table into the owning sibling mount.
    fn resolve_path(
        &self,
        desc: &FileDescriptor,
        raw: &str,
    ) -> Result<(Arc<dyn crate::fs::FileSystemDevice>, String), Errno> {
        if desc.filetype != Filetype::Directory {
            return Err(Errno::Notdir);
        }
        let device = self.filesystem_of(desc)?;

        if let Some(rooted) = raw.strip_prefix('/') {
            // Absolute paths resolve against the unified namespace.
            let p = path::normalize_absolute(rooted).ok_or(Errno::Noent)?;
            return self.resolve_root_relative(&p);
        }

        let joined = path::join(&desc.path, raw);
        match path::normalize(&joined) {
            path::Normalized::Within(p) => Ok((device, p)),
            path::Normalized::Escapes { .. } => {
                // Climbs above the driver root: rebase onto the mount
                // point and retry against the whole namespace.
                let mount_point = self
                    .mounts
                    .mount_point_of(desc.device)
                    .ok_or(Errno::Noent)?;
                let absolute = format!("{mount_point}/{joined}");
                let rooted = absolute.trim_start_matches('/');
                let p = path::normalize_absolute(rooted).ok_or(Errno::Noent)?;
                self.resolve_root_relative(&p)
            }
        }
    }

    fn resolve_root_relative(
        &self,
        root_relative: &str,
    ) -> Result<(Arc<dyn crate::fs::FileSystemDevice>, String), Errno> {
        let (device, rest) = self.mounts.resolve(root_relative).ok_or(Errno::Noent)?;
        match device {
            Device::FileSystem(d) => Ok((d, rest)),
            Device::Character(_) => Err(Errno::Noent),
        }
    }

    fn filestat_from(&self, device_id: crate::device::DeviceId, stat: NodeStat) -> Filestat {
        Filestat {
            dev: device_id.0 as u64,
            ino: stat.ino,
            filetype: stat.filetype,
            nlink: 1,
            size: stat.size,
            atim: stat.mtime_ns,
            mtim: stat.mtime_ns,
            ctim: stat.mtime_ns,
        }
    }

    // ---- argument / environment ----

    fn sys_args_sizes_get(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        frame.results[0] = self.args.len() as u64;
        frame.results[1] = self
            .args
            .iter()
            .map(|a| a.len() as u64 + 1)
            .sum();
        Ok(())
    }

    fn sys_args_get(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let strings: Vec<Vec<u8>> = self
            .args
            .iter()
            .map(|a| {
                let mut v = a.clone().into_bytes();
                v.push(0);
                v
            })
            .collect();
        Self::write_string_list(frame, &strings)
    }

    fn sys_environ_sizes_get(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        frame.results[0] = self.env.len() as u64;
        frame.results[1] = self
            .env
            .iter()
            .map(|(k, v)| k.len() as u64 + v.len() as u64 + 2)
            .sum();
        Ok(())
    }

    fn sys_environ_get(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let strings: Vec<Vec<u8>> = self
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}\0").into_bytes())
            .collect();
        Self::write_string_list(frame, &strings)
    }

    /// Fill the pointer-array and string-buffer out-regions shared by
    /// args_get and environ_get. The guest buffer base address travels
    /// in param 0 so pointers land on real guest offsets.
    fn write_string_list(frame: &mut CallFrame, strings: &[Vec<u8>]) -> Result<(), Errno> {
        let buf_base = frame.param_u32(0);
        let total: usize = strings.iter().map(|s| s.len()).sum();
        if frame.regions.len() < 2
            || (frame.region_bytes(0).len() as usize) < strings.len() * 4
            || (frame.region_bytes(1).len() as usize) < total
        {
            return Err(Errno::Overflow);
        }

        let mut pointers = Vec::with_capacity(strings.len() * 4);
        let mut offset = 0u32;
        {
            let buffer = frame.region_bytes_mut(1);
            for s in strings {
                pointers.extend_from_slice(&(buf_base + offset).to_le_bytes());
                buffer[offset as usize..offset as usize + s.len()].copy_from_slice(s);
                offset += s.len() as u32;
            }
        }
        frame.region_bytes_mut(0)[..pointers.len()].copy_from_slice(&pointers);
        Ok(())
    }

    // ---- clocks, randomness, scheduling ----

    fn sys_clock_res_get(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let id = Clockid::from_raw(frame.param_u32(0)).ok_or(Errno::Inval)?;
        frame.results[0] = self.clock.resolution_ns(id)?;
        Ok(())
    }

    fn sys_clock_time_get(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let id = Clockid::from_raw(frame.param_u32(0)).ok_or(Errno::Inval)?;
        frame.results[0] = self.clock.now_ns(id)?;
        Ok(())
    }

    fn sys_random_get(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        rand::thread_rng().fill_bytes(frame.region_bytes_mut(0));
        Ok(())
    }

    fn sys_sched_yield(&mut self) -> Result<(), Errno> {
        std::thread::yield_now();
        Ok(())
    }

    // ---- descriptors ----

    fn sys_fd_prestat_get(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let desc = self.fds.get(frame.param_u32(0))?;
        let name = desc.preopen.as_ref().ok_or(Errno::Badf)?;
        let prestat = Prestat {
            name_len: name.len() as u32,
        };
        frame.region_bytes_mut(0).copy_from_slice(&prestat.to_bytes());
        Ok(())
    }

    fn sys_fd_prestat_dir_name(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let desc = self.fds.get(frame.param_u32(0))?;
        let name = desc.preopen.clone().ok_or(Errno::Badf)?;
        let out = frame.region_bytes_mut(0);
        if out.len() < name.len() {
            return Err(Errno::Nametoolong);
        }
        out[..name.len()].copy_from_slice(name.as_bytes());
        Ok(())
    }

    fn sys_fd_close(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let fd = frame.param_u32(0);
        if self.fds.get(fd)?.is_preopen() {
            return Err(Errno::Notsup);
        }
        let mut desc = self.fds.delete(fd)?;
        if let Some(handle) = desc.handle {
            if let Ok(device) = self.filesystem_of(&desc) {
                let _ = device.close_handle(handle);
            }
        }
        if let Some(disposer) = desc.disposer.take() {
            disposer();
        }
        Ok(())
    }

    fn sys_fd_fdstat_get(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let desc = self.fds.get(frame.param_u32(0))?;
        let fdstat = Fdstat {
            filetype: desc.filetype,
            flags: desc.fdflags,
            rights_base: desc.rights_base,
            rights_inheriting: desc.rights_inheriting,
        };
        frame.region_bytes_mut(0).copy_from_slice(&fdstat.to_bytes());
        Ok(())
    }

    fn sys_fd_fdstat_set_flags(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let fd = frame.param_u32(0);
        let flags = Fdflags::from_bits_truncate(frame.param(1) as u16);
        let desc = self.fds.get_mut(fd)?;
        desc.assert_rights(Rights::FD_FDSTAT_SET_FLAGS)?;
        desc.fdflags = flags;
        Ok(())
    }

    fn sys_fd_filestat_get(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let desc = self.fds.get(frame.param_u32(0))?;
        desc.assert_rights(Rights::FD_FILESTAT_GET)?;
        let stat = match self.device_of(desc)? {
            Device::Character(_) => Filestat {
                dev: desc.device.0 as u64,
                ino: synthetic_ino(desc.device, &desc.path),
                filetype: Filetype::CharacterDevice,
                nlink: 1,
                size: 0,
                atim: 0,
                mtim: 0,
                ctim: 0,
            },
            Device::FileSystem(device) => {
                let stat = match desc.handle {
                    Some(handle) => device.stat_handle(handle),
                    None => device.stat_path(&desc.path),
                }
                .map_err(|e| e.errno())?;
                self.filestat_from(desc.device, stat)
            }
        };
        frame.region_bytes_mut(0).copy_from_slice(&stat.to_bytes());
        Ok(())
    }

    fn sys_fd_filestat_set_size(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let desc = self.fds.get(frame.param_u32(0))?;
        desc.assert_rights(Rights::FD_FILESTAT_SET_SIZE)?;
        let handle = desc.handle.ok_or(Errno::Badf)?;
        let device = self.filesystem_of(desc)?;
        device
            .set_size(handle, frame.param(1))
            .map_err(|e| e.errno())
    }

    fn sys_fd_read(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let desc = self.fds.get(frame.param_u32(0))?;
        desc.assert_rights(Rights::FD_READ)?;
        let max = frame.param(1) as usize;
        let bytes = match self.device_of(desc)? {
            Device::Character(dev) => dev.read(max)?,
            Device::FileSystem(device) => {
                let handle = desc.handle.ok_or(Errno::Badf)?;
                device.read(handle, max).map_err(|e| e.errno())?
            }
        };
        frame.region_bytes_mut(0)[..bytes.len()].copy_from_slice(&bytes);
        frame.results[0] = bytes.len() as u64;
        Ok(())
    }

    fn sys_fd_write(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let desc = self.fds.get(frame.param_u32(0))?;
        desc.assert_rights(Rights::FD_WRITE)?;
        let append = desc.fdflags.contains(Fdflags::APPEND);
        let bytes = frame.region_bytes(0).to_vec();
        let written = match self.device_of(desc)? {
            Device::Character(dev) => dev.write(&bytes)?,
            Device::FileSystem(device) => {
                let handle = desc.handle.ok_or(Errno::Badf)?;
                if append {
                    device.seek(handle, 0, Whence::End).map_err(|e| e.errno())?;
                }
                device.write(handle, &bytes).map_err(|e| e.errno())?
            }
        };
        frame.results[0] = written as u64;
        Ok(())
    }

    fn sys_fd_seek(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let fd = frame.param_u32(0);
        let offset = frame.param(1) as i64;
        let whence = Whence::from_raw(frame.param(2) as u8).ok_or(Errno::Inval)?;
        let desc = self.fds.get(fd)?;
        let required = if offset == 0 && whence == Whence::Cur {
            Rights::FD_TELL
        } else {
            Rights::FD_SEEK | Rights::FD_TELL
        };
        desc.assert_rights(required)?;
        let device = match self.device_of(desc)? {
            Device::Character(_) => return Err(Errno::Spipe),
            Device::FileSystem(d) => d,
        };
        let handle = desc.handle.ok_or(Errno::Badf)?;
        frame.results[0] = device.seek(handle, offset, whence).map_err(|e| e.errno())?;
        Ok(())
    }

    fn sys_fd_sync(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        self.flush_handle(frame.param_u32(0), Rights::FD_SYNC)
    }

    fn sys_fd_datasync(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        // Contents are written through on every mutation, so data sync
        // and full sync coincide.
        self.flush_handle(frame.param_u32(0), Rights::FD_DATASYNC)
    }

    fn flush_handle(&self, fd: u32, required: Rights) -> Result<(), Errno> {
        let desc = self.fds.get(fd)?;
        desc.assert_rights(required)?;
        let handle = desc.handle.ok_or(Errno::Badf)?;
        self.filesystem_of(desc)?
            .sync(handle)
            .map_err(|e| e.errno())
    }

    fn sys_fd_readdir(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let fd = frame.param_u32(0);
        let buf_len = frame.param_u32(1) as usize;
        let cookie = frame.param(2);

        let (device_id, dir_path) = {
            let desc = self.fds.get(fd)?;
            desc.assert_rights(Rights::FD_READDIR)?;
            if desc.filetype != Filetype::Directory {
                return Err(Errno::Notdir);
            }
            (desc.device, desc.path.clone())
        };

        if cookie == 0 {
            // Fresh listing snapshot, dot entries first.
            let desc = self.fds.get(fd)?;
            let device = self.filesystem_of(desc)?;
            let listed = device.read_directory(&dir_path).map_err(|e| e.errno())?;
            let parent = path::parent(&dir_path).unwrap_or("");
            let mut entries = vec![
                Dirent {
                    next_cookie: 0,
                    ino: synthetic_ino(device_id, &dir_path),
                    filetype: Filetype::Directory,
                    name: ".".to_string(),
                },
                Dirent {
                    next_cookie: 0,
                    ino: synthetic_ino(device_id, parent),
                    filetype: Filetype::Directory,
                    name: "..".to_string(),
                },
            ];
            entries.extend(listed.into_iter().map(|e| Dirent {
                next_cookie: 0,
                ino: e.ino,
                filetype: e.filetype,
                name: e.name,
            }));
            for (index, entry) in entries.iter_mut().enumerate() {
                entry.next_cookie = index as u64 + 1;
            }
            self.fds.get_mut(fd)?.readdir = Some(ReaddirCursor { entries });
        }

        let Some(cursor) = self.fds.get(fd)?.readdir.clone() else {
            // Nonzero cookie without a snapshot: lenient end-of-listing.
            frame.results[0] = 0;
            return Ok(());
        };

        let mut packed = Vec::with_capacity(buf_len);
        let mut exhausted = true;
        for entry in cursor.entries.iter().skip(cookie as usize) {
            let mut encoded = Vec::with_capacity(entry.encoded_size());
            entry.encode_into(&mut encoded);
            if packed.len() + encoded.len() > buf_len {
                // Truncate to signal the caller to come back with an
                // advanced cookie.
                let take = buf_len - packed.len();
                packed.extend_from_slice(&encoded[..take]);
                exhausted = false;
                break;
            }
            packed.extend_from_slice(&encoded);
        }

        let used = packed.len();
        frame.region_bytes_mut(0)[..used].copy_from_slice(&packed);
        frame.results[0] = used as u64;
        if exhausted {
            self.fds.get_mut(fd)?.readdir = None;
        }
        Ok(())
    }

    // ---- paths ----

    fn sys_path_create_directory(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let raw = frame.region_str(0)?.to_string();
        let desc = self.fds.get(frame.param_u32(0))?;
        desc.assert_rights(Rights::PATH_CREATE_DIRECTORY)?;
        let (device, rel) = self.resolve_path(desc, &raw)?;
        device.create_directory(&rel).map_err(|e| e.errno())
    }

    fn sys_path_filestat_get(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let raw = frame.region_str(0)?.to_string();
        let _flags = Lookupflags::from_bits_truncate(frame.param_u32(1));
        let desc = self.fds.get(frame.param_u32(0))?;
        desc.assert_rights(Rights::PATH_FILESTAT_GET)?;
        let (device, rel) = self.resolve_path(desc, &raw)?;
        let stat = device.stat_path(&rel).map_err(|e| e.errno())?;
        let encoded = self.filestat_from(device.id(), stat).to_bytes();
        frame.region_bytes_mut(1).copy_from_slice(&encoded);
        Ok(())
    }

    fn sys_path_open(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let raw = frame.region_str(0)?.to_string();
        let oflags = Oflags::from_bits_truncate(frame.param(2) as u16);
        let rights_base = Rights::from_bits_truncate(frame.param(3));
        let rights_inheriting = Rights::from_bits_truncate(frame.param(4));
        let fdflags = Fdflags::from_bits_truncate(frame.param(5) as u16);

        let (device, rel, parent_inheriting) = {
            let desc = self.fds.get(frame.param_u32(0))?;
            let mut needed = Rights::PATH_OPEN;
            if oflags.contains(Oflags::CREAT) {
                needed |= Rights::PATH_CREATE_FILE;
            }
            if oflags.contains(Oflags::TRUNC) {
                needed |= Rights::PATH_FILESTAT_SET_SIZE;
            }
            desc.assert_rights(needed)?;
            // Rights are only ever narrowed at open, never escalated.
            if !desc.rights_inheriting.contains(rights_base | rights_inheriting) {
                return Err(Errno::Notcapable);
            }
            let (device, rel) = self.resolve_path(desc, &raw)?;
            (device, rel, desc.rights_inheriting)
        };

        let write = rights_base
            .intersects(Rights::FD_WRITE | Rights::FD_ALLOCATE | Rights::FD_FILESTAT_SET_SIZE);
        let node = device
            .open(&rel, oflags, fdflags, write)
            .map_err(|e| e.errno())?;

        let read_only = !device.writable();
        let (mut base, mut inheriting) = match node.filetype {
            Filetype::Directory => (
                rights_base & Rights::directory_base(),
                (rights_inheriting & parent_inheriting) & Rights::directory_inheriting(),
            ),
            _ => (rights_base & Rights::file_base(), Rights::empty()),
        };
        if read_only {
            base = base.read_only();
            inheriting = inheriting.read_only();
        }

        let fd = self.fds.add(FileDescriptor {
            fd: 0,
            device: device.id(),
            filetype: node.filetype,
            rights_base: base,
            rights_inheriting: inheriting,
            fdflags,
            path: node.path,
            handle: node.handle,
            preopen: None,
            readdir: None,
            disposer: None,
        });
        frame.results[0] = fd as u64;
        Ok(())
    }

    fn sys_path_readlink(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let raw = frame.region_str(0)?.to_string();
        let desc = self.fds.get(frame.param_u32(0))?;
        desc.assert_rights(Rights::PATH_READLINK)?;
        let (device, rel) = self.resolve_path(desc, &raw)?;
        let target = device.read_link(&rel).map_err(|e| e.errno())?;
        let out = frame.region_bytes_mut(1);
        let n = target.len().min(out.len());
        out[..n].copy_from_slice(&target.as_bytes()[..n]);
        frame.results[0] = n as u64;
        Ok(())
    }

    fn sys_path_rename(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let old_raw = frame.region_str(0)?.to_string();
        let new_raw = frame.region_str(1)?.to_string();

        let (old_device, old_rel) = {
            let desc = self.fds.get(frame.param_u32(0))?;
            desc.assert_rights(Rights::PATH_RENAME_SOURCE)?;
            self.resolve_path(desc, &old_raw)?
        };
        let (new_device, new_rel) = {
            let desc = self.fds.get(frame.param_u32(1))?;
            desc.assert_rights(Rights::PATH_RENAME_TARGET)?;
            self.resolve_path(desc, &new_raw)?
        };
        if old_device.id() != new_device.id() {
            return Err(Errno::Xdev);
        }
        old_device.rename(&old_rel, &new_rel).map_err(|e| e.errno())
    }

    fn sys_path_remove_directory(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let raw = frame.region_str(0)?.to_string();
        let desc = self.fds.get(frame.param_u32(0))?;
        desc.assert_rights(Rights::PATH_REMOVE_DIRECTORY)?;
        let (device, rel) = self.resolve_path(desc, &raw)?;
        device.remove_directory(&rel).map_err(|e| e.errno())
    }

    fn sys_path_unlink_file(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let raw = frame.region_str(0)?.to_string();
        let desc = self.fds.get(frame.param_u32(0))?;
        desc.assert_rights(Rights::PATH_UNLINK_FILE)?;
        let (device, rel) = self.resolve_path(desc, &raw)?;
        device.unlink_file(&rel).map_err(|e| e.errno())
    }

    // ---- polling ----

    fn sys_poll_oneoff(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        let nsubs = frame.param_u32(0);
        let subs = {
            let mut raw = frame.region_bytes(0).to_vec();
            let view = MemoryView::new(&mut raw);
            Subscription::decode_array(&view, 0, nsubs)?
        };

        let now = Instant::now();
        // Earliest relative clock deadline, if any.
        let mut deadline: Option<Instant> = None;
        for sub in &subs {
            if let SubscriptionU::Clock {
                timeout_ns, flags, ..
            } = sub.u
            {
                if !flags.contains(Subclockflags::ABSTIME) {
                    let due = now + Duration::from_nanos(timeout_ns);
                    deadline = Some(deadline.map_or(due, |d: Instant| d.min(due)));
                }
            }
        }

        let events = loop {
            let events = self.collect_poll_events(&subs, now);
            if !events.is_empty() {
                break events;
            }
            // Nothing ready: sleep until stdio activity or the earliest
            // clock deadline. Reads on regular files and all writes
            // report ready above, so only stdin readiness can unblock us.
            let seen = self.stdin_ready.generation();
            self.stdin_ready.wait_change(seen, deadline);
        };

        for (i, event) in events.iter().enumerate() {
            let offset = i * Event::SIZE;
            frame.region_bytes_mut(1)[offset..offset + Event::SIZE]
                .copy_from_slice(&event.to_bytes());
        }
        frame.results[0] = events.len() as u64;
        Ok(())
    }

    fn collect_poll_events(&self, subs: &[Subscription], start: Instant) -> Vec<Event> {
        let mut events = Vec::new();
        for sub in subs {
            match sub.u {
                SubscriptionU::Clock {
                    id,
                    timeout_ns,
                    flags,
                    ..
                } => {
                    if flags.contains(Subclockflags::ABSTIME) {
                        // Absolute-time clocks are well-formed but not
                        // supported by this host.
                        events.push(Self::clock_event(sub.userdata, Errno::Notsup));
                        continue;
                    }
                    if Clockid::from_raw(id).is_none() {
                        events.push(Self::clock_event(sub.userdata, Errno::Inval));
                        continue;
                    }
                    let due = start + Duration::from_nanos(timeout_ns);
                    if Instant::now() >= due {
                        events.push(Self::clock_event(sub.userdata, Errno::Success));
                    }
                }
                SubscriptionU::FdRead { fd } => match self.poll_read_readiness(fd) {
                    Ok(Some((nbytes, flags))) => events.push(Event {
                        userdata: sub.userdata,
                        errno: Errno::Success,
                        kind: Eventtype::FdRead,
                        nbytes,
                        flags,
                    }),
                    Ok(None) => {}
                    Err(errno) => events.push(Event {
                        userdata: sub.userdata,
                        errno,
                        kind: Eventtype::FdRead,
                        nbytes: 0,
                        flags: Eventrwflags::empty(),
                    }),
                },
                SubscriptionU::FdWrite { fd } => {
                    // Writes are buffered: always report ready.
                    let errno = match self.fds.get(fd) {
                        Ok(desc) => desc
                            .assert_rights(Rights::FD_WRITE | Rights::POLL_FD_READWRITE)
                            .err()
                            .unwrap_or(Errno::Success),
                        Err(e) => e,
                    };
                    events.push(Event {
                        userdata: sub.userdata,
                        errno,
                        kind: Eventtype::FdWrite,
                        nbytes: 0,
                        flags: Eventrwflags::empty(),
                    });
                }
            }
        }
        events
    }

    fn clock_event(userdata: u64, errno: Errno) -> Event {
        Event {
            userdata,
            errno,
            kind: Eventtype::Clock,
            nbytes: 0,
            flags: Eventrwflags::empty(),
        }
    }

    /// Readiness of one read subscription: `Some` when an event should
    /// fire now, `None` when the poll should keep waiting.
    fn poll_read_readiness(&self, fd: u32) -> Result<Option<(u64, Eventrwflags)>, Errno> {
        let desc = self.fds.get(fd)?;
        desc.assert_rights(Rights::FD_READ | Rights::POLL_FD_READWRITE)?;
        match self.device_of(desc)? {
            Device::Character(dev) => {
                let available = dev.bytes_available();
                if available > 0 {
                    Ok(Some((available, Eventrwflags::empty())))
                } else if self.stdin_ready.is_closed() || self.stdin_ready.is_destroyed() {
                    Ok(Some((0, Eventrwflags::HANGUP)))
                } else {
                    Ok(None)
                }
            }
            Device::FileSystem(device) => {
                // Regular files are always ready.
                let handle = desc.handle.ok_or(Errno::Badf)?;
                let available = device.bytes_available(handle).map_err(|e| e.errno())?;
                Ok(Some((available, Eventrwflags::empty())))
            }
        }
    }

    fn sys_proc_exit(&mut self, frame: &mut CallFrame) -> Result<(), Errno> {
        self.exit = Some(frame.param_u32(0));
        Ok(())
    }
}

impl SyscallDispatcher for WasiService {
    fn dispatch(&mut self, frame: &mut CallFrame) -> Errno {
        trace!(syscall = frame.syscall.name(), params = ?frame.params, "dispatch");
        let result = match frame.syscall {
            SyscallNo::ArgsSizesGet => self.sys_args_sizes_get(frame),
            SyscallNo::ArgsGet => self.sys_args_get(frame),
            SyscallNo::EnvironSizesGet => self.sys_environ_sizes_get(frame),
            SyscallNo::EnvironGet => self.sys_environ_get(frame),
            SyscallNo::ClockResGet => self.sys_clock_res_get(frame),
            SyscallNo::ClockTimeGet => self.sys_clock_time_get(frame),
            SyscallNo::RandomGet => self.sys_random_get(frame),
            SyscallNo::SchedYield => self.sys_sched_yield(),
            SyscallNo::FdPrestatGet => self.sys_fd_prestat_get(frame),
            SyscallNo::FdPrestatDirName => self.sys_fd_prestat_dir_name(frame),
            SyscallNo::FdClose => self.sys_fd_close(frame),
            SyscallNo::FdFdstatGet => self.sys_fd_fdstat_get(frame),
            SyscallNo::FdFdstatSetFlags => self.sys_fd_fdstat_set_flags(frame),
            SyscallNo::FdFilestatGet => self.sys_fd_filestat_get(frame),
            SyscallNo::FdFilestatSetSize => self.sys_fd_filestat_set_size(frame),
            SyscallNo::FdRead => self.sys_fd_read(frame),
            SyscallNo::FdReaddir => self.sys_fd_readdir(frame),
            SyscallNo::FdSeek => self.sys_fd_seek(frame),
            SyscallNo::FdSync => self.sys_fd_sync(frame),
            SyscallNo::FdWrite => self.sys_fd_write(frame),
            SyscallNo::PathCreateDirectory => self.sys_path_create_directory(frame),
            SyscallNo::PathFilestatGet => self.sys_path_filestat_get(frame),
            SyscallNo::PathOpen => self.sys_path_open(frame),
            SyscallNo::PathReadlink => self.sys_path_readlink(frame),
            SyscallNo::PathRename => self.sys_path_rename(frame),
            SyscallNo::PathRemoveDirectory => self.sys_path_remove_directory(frame),
            SyscallNo::PathUnlinkFile => self.sys_path_unlink_file(frame),
            SyscallNo::PollOneoff => self.sys_poll_oneoff(frame),
            SyscallNo::ProcExit => self.sys_proc_exit(frame),
            SyscallNo::FdDatasync => self.sys_fd_datasync(frame),
        };
        match result {
            Ok(()) => Errno::Success,
            Err(errno) => {
                trace!(syscall = frame.syscall.name(), %errno, "syscall failed");
                errno
            }
        }
    }

    fn exit_code(&self) -> Option<u32> {
        self.exit
    }

    fn shutdown(&mut self) {
        for mut desc in self.fds.drain() {
            if let Some(handle) = desc.handle {
                if let Ok(Device::FileSystem(device)) = self.registry.get(desc.device) {
                    let _ = device.close_handle(handle);
                }
            }
            if let Some(disposer) = desc.disposer.take() {
                disposer();
            }
        }
    }
}

/// Explicit tracing decorator: wraps a dispatcher, times every call,
/// logs per-call durations, and emits a per-syscall summary at
/// shutdown.
pub struct TracedService<D: SyscallDispatcher> {
    inner: D,
    stats: HashMap<&'static str, (u64, Duration)>,
}

impl<D: SyscallDispatcher> TracedService<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            stats: HashMap::new(),
        }
    }
}

impl<D: SyscallDispatcher> SyscallDispatcher for TracedService<D> {
    fn dispatch(&mut self, frame: &mut CallFrame) -> Errno {
        let name = frame.syscall.name();
        let start = Instant::now();
        let errno = self.inner.dispatch(frame);
        let elapsed = start.elapsed();
        let entry = self.stats.entry(name).or_insert((0, Duration::ZERO));
        entry.0 += 1;
        entry.1 += elapsed;
        debug!(syscall = name, %errno, micros = elapsed.as_micros() as u64, "traced syscall");
        errno
    }

    fn exit_code(&self) -> Option<u32> {
        self.inner.exit_code()
    }

    fn shutdown(&mut self) {
        let mut lines: Vec<(&'static str, u64, Duration)> = self
            .stats
            .iter()
            .map(|(name, (count, total))| (*name, *count, *total))
            .collect();
        lines.sort_by(|a, b| b.2.cmp(&a.2));
        for (name, count, total) in lines {
            debug!(
                syscall = name,
                calls = count,
                total_micros = total.as_micros() as u64,
                avg_micros = (total.as_micros() as u64) / count.max(1),
                "syscall summary"
            );
        }
        self.inner.shutdown();
    }
}
