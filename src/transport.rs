//! Cross-thread syscall transport
//!
//! The compute thread cannot call into the coordinating context
//! directly: it marshals the syscall number, scalar arguments, and any
//! memory regions into a shared call frame, posts the frame over a
//! channel, and blocks on the frame's synchronization cell until the
//! service resolves it. Results are copied back into guest linear
//! memory at exactly the offsets recorded at call time (the reverse
//! transfer), including for pointer-bearing arrays such as `fd_read`
//! iovecs.
//!
//! Every failure path terminates in an errno: a timed-out wait returns
//! `Timedout`, an unexpected synchronization value returns `Nosys`, and
//! a disconnected service returns `Canceled`. Nothing here ever panics
//! into the guest.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::trace;

use crate::pipe::ReadyCell;
use crate::wasi::{
    Errno, Event, Eventrwflags, Eventtype, Iovec, MemoryView, Subscription, SubscriptionU,
    STDIN_FD,
};

/// Scalar argument slots per call frame.
pub const MAX_PARAMS: usize = 8;

/// Syscall numbers carried in the call frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SyscallNo {
    ArgsSizesGet = 0,
    ArgsGet = 1,
    EnvironSizesGet = 2,
    EnvironGet = 3,
    ClockResGet = 4,
    ClockTimeGet = 5,
    RandomGet = 6,
    SchedYield = 7,
    FdPrestatGet = 8,
    FdPrestatDirName = 9,
    FdClose = 10,
    FdFdstatGet = 11,
    FdFdstatSetFlags = 12,
    FdFilestatGet = 13,
    FdFilestatSetSize = 14,
    FdRead = 15,
    FdReaddir = 16,
    FdSeek = 17,
    FdSync = 18,
    FdWrite = 19,
    PathCreateDirectory = 20,
    PathFilestatGet = 21,
    PathOpen = 22,
    PathReadlink = 23,
    PathRename = 24,
    PathRemoveDirectory = 25,
    PathUnlinkFile = 26,
    PollOneoff = 27,
    ProcExit = 28,
    FdDatasync = 29,
}

impl SyscallNo {
    pub fn name(&self) -> &'static str {
        match self {
            SyscallNo::ArgsSizesGet => "args_sizes_get",
            SyscallNo::ArgsGet => "args_get",
            SyscallNo::EnvironSizesGet => "environ_sizes_get",
            SyscallNo::EnvironGet => "environ_get",
            SyscallNo::ClockResGet => "clock_res_get",
            SyscallNo::ClockTimeGet => "clock_time_get",
            SyscallNo::RandomGet => "random_get",
            SyscallNo::SchedYield => "sched_yield",
            SyscallNo::FdPrestatGet => "fd_prestat_get",
            SyscallNo::FdPrestatDirName => "fd_prestat_dir_name",
            SyscallNo::FdClose => "fd_close",
            SyscallNo::FdFdstatGet => "fd_fdstat_get",
            SyscallNo::FdFdstatSetFlags => "fd_fdstat_set_flags",
            SyscallNo::FdFilestatGet => "fd_filestat_get",
            SyscallNo::FdFilestatSetSize => "fd_filestat_set_size",
            SyscallNo::FdRead => "fd_read",
            SyscallNo::FdReaddir => "fd_readdir",
            SyscallNo::FdSeek => "fd_seek",
            SyscallNo::FdSync => "fd_sync",
            SyscallNo::FdWrite => "fd_write",
            SyscallNo::PathCreateDirectory => "path_create_directory",
            SyscallNo::PathFilestatGet => "path_filestat_get",
            SyscallNo::PathOpen => "path_open",
            SyscallNo::PathReadlink => "path_readlink",
            SyscallNo::PathRename => "path_rename",
            SyscallNo::PathRemoveDirectory => "path_remove_directory",
            SyscallNo::PathUnlinkFile => "path_unlink_file",
            SyscallNo::PollOneoff => "poll_oneoff",
            SyscallNo::ProcExit => "proc_exit",
            SyscallNo::FdDatasync => "fd_datasync",
        }
    }
}

/// Transfer direction of one recorded memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Copied from guest memory into the frame at call time.
    In,
    /// Filled by the service, copied back at resolve time.
    Out,
}

/// One memory region recorded in the frame's transfer buffer.
#[derive(Debug, Clone)]
pub struct Region {
    /// Where the bytes live in guest memory. `None` when the caller
    /// performs the reverse transfer itself (scatter targets).
    pub guest_ptr: Option<u32>,
    pub len: u32,
    pub direction: Direction,
    /// Offset into the frame payload.
    pub offset: u32,
}

/// A marshalled syscall: number, scalar params, transfer buffer.
pub struct CallFrame {
    pub syscall: SyscallNo,
    pub params: [u64; MAX_PARAMS],
    pub payload: Vec<u8>,
    pub regions: Vec<Region>,
    pub results: [u64; 2],
    pub errno: u16,
}

impl CallFrame {
    pub fn new(syscall: SyscallNo) -> Self {
        Self {
            syscall,
            params: [0; MAX_PARAMS],
            payload: Vec::new(),
            regions: Vec::new(),
            results: [0; 2],
            errno: Errno::Success.code(),
        }
    }

    pub fn param(&self, index: usize) -> u64 {
        self.params[index]
    }

    pub fn param_u32(&self, index: usize) -> u32 {
        self.params[index] as u32
    }

    /// Record an input region, copying the bytes into the payload.
    pub fn push_in(&mut self, bytes: &[u8]) -> usize {
        let offset = self.payload.len() as u32;
        self.payload.extend_from_slice(bytes);
        self.regions.push(Region {
            guest_ptr: None,
            len: bytes.len() as u32,
            direction: Direction::In,
            offset,
        });
        self.regions.len() - 1
    }

    /// Record an output region of `len` zeroed bytes to be filled by the
    /// service and copied back to `guest_ptr` (when given).
    pub fn push_out(&mut self, len: u32, guest_ptr: Option<u32>) -> usize {
        let offset = self.payload.len() as u32;
        self.payload.resize(self.payload.len() + len as usize, 0);
        self.regions.push(Region {
            guest_ptr,
            len,
            direction: Direction::Out,
            offset,
        });
        self.regions.len() - 1
    }

    pub fn region_bytes(&self, index: usize) -> &[u8] {
        let region = &self.regions[index];
        let start = region.offset as usize;
        &self.payload[start..start + region.len as usize]
    }

    pub fn region_bytes_mut(&mut self, index: usize) -> &mut [u8] {
        let region = self.regions[index].clone();
        let start = region.offset as usize;
        &mut self.payload[start..start + region.len as usize]
    }

    pub fn region_str(&self, index: usize) -> Result<&str, Errno> {
        std::str::from_utf8(self.region_bytes(index)).map_err(|_| Errno::Ilseq)
    }
}

/// Call frame synchronization states.
const CALL_IDLE: u32 = 0;
const CALL_REQUESTED: u32 = 1;
const CALL_DONE: u32 = 2;

/// Outcome of the caller's blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Done,
    TimedOut,
    /// The cell held a value that is neither requested nor done.
    Desynchronized(u32),
}

/// The designated synchronization cell of one call frame: the caller
/// blocks on it, the service resolves it. This is the lowest-level
/// cross-thread blocking primitive of the transport.
pub struct SyncCell {
    state: Mutex<u32>,
    cond: Condvar,
}

impl SyncCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CALL_IDLE),
            cond: Condvar::new(),
        }
    }

    pub fn request(&self) {
        *self.state.lock().unwrap() = CALL_REQUESTED;
    }

    /// Transition requested -> done and wake the caller. A second
    /// resolution of the same frame is ignored.
    pub fn resolve(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != CALL_REQUESTED {
            return false;
        }
        *state = CALL_DONE;
        self.cond.notify_all();
        true
    }

    /// Block until resolved or the timeout elapses.
    pub fn wait_done(&self, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap();
        loop {
            match *state {
                CALL_DONE => return WaitOutcome::Done,
                CALL_REQUESTED => {}
                other => return WaitOutcome::Desynchronized(other),
            }
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return WaitOutcome::TimedOut;
                    }
                    let (next, timeout) = self.cond.wait_timeout(state, d - now).unwrap();
                    state = next;
                    if timeout.timed_out() && *state != CALL_DONE {
                        return WaitOutcome::TimedOut;
                    }
                }
                None => state = self.cond.wait(state).unwrap(),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, value: u32) {
        *self.state.lock().unwrap() = value;
        self.cond.notify_all();
    }
}

impl Default for SyncCell {
    fn default() -> Self {
        Self::new()
    }
}

/// One in-flight call: the frame plus its synchronization cell.
pub struct SharedFrame {
    pub cell: SyncCell,
    pub frame: Mutex<CallFrame>,
}

impl SharedFrame {
    pub fn new(frame: CallFrame) -> Self {
        Self {
            cell: SyncCell::new(),
            frame: Mutex::new(frame),
        }
    }
}

/// The service half: unmarshal, dispatch, reply.
pub trait SyscallDispatcher: Send {
    fn dispatch(&mut self, frame: &mut CallFrame) -> Errno;

    /// Set once the guest has requested `proc_exit`.
    fn exit_code(&self) -> Option<u32>;

    /// Teardown hook run when the listener stops.
    fn shutdown(&mut self) {}
}

/// Service-side message loop. Runs on the coordinating thread until the
/// channel disconnects or the guest exits.
pub struct ServiceListener {
    rx: Receiver<Arc<SharedFrame>>,
    dispatcher: Box<dyn SyscallDispatcher>,
}

impl ServiceListener {
    pub fn new(rx: Receiver<Arc<SharedFrame>>, dispatcher: Box<dyn SyscallDispatcher>) -> Self {
        Self { rx, dispatcher }
    }

    /// Process calls until exit. Returns the exit code if `proc_exit`
    /// was requested.
    pub fn run(mut self) -> Option<u32> {
        let exit = loop {
            let shared = match self.rx.recv() {
                Ok(shared) => shared,
                Err(_) => break None,
            };
            {
                let mut frame = shared.frame.lock().unwrap();
                let errno = self.dispatcher.dispatch(&mut frame);
                frame.errno = errno.code();
            }
            shared.cell.resolve();
            if let Some(code) = self.dispatcher.exit_code() {
                break Some(code);
            }
        };
        // Release anything still queued; the caller is strictly
        // sequential so this is normally empty.
        while let Ok(pending) = self.rx.try_recv() {
            pending.frame.lock().unwrap().errno = Errno::Canceled.code();
            pending.cell.resolve();
        }
        self.dispatcher.shutdown();
        exit
    }
}

/// Caller-side syscall stub with the exact preview-1 signatures.
///
/// All pointer parameters are offsets into the guest's linear memory
/// slice. The stub performs iovec gather/scatter and scalar result
/// stores so guests are byte-layout compatible with a real module.
pub struct Syscalls {
    tx: Sender<Arc<SharedFrame>>,
    timeout: Option<Duration>,
    stdin_ready: Arc<ReadyCell>,
}

impl Syscalls {
    pub fn new(
        tx: Sender<Arc<SharedFrame>>,
        timeout: Option<Duration>,
        stdin_ready: Arc<ReadyCell>,
    ) -> Self {
        Self {
            tx,
            timeout,
            stdin_ready,
        }
    }

    /// Send the frame and block until the service resolves it. On
    /// success, automatic out-regions are copied back into guest memory.
    fn roundtrip(&self, mem: &mut [u8], frame: CallFrame) -> Result<CallFrame, Errno> {
        let name = frame.syscall.name();
        let shared = Arc::new(SharedFrame::new(frame));
        shared.cell.request();
        if self.tx.send(shared.clone()).is_err() {
            trace!(syscall = name, "transport disconnected");
            return Err(Errno::Canceled);
        }
        match shared.cell.wait_done(self.timeout) {
            WaitOutcome::Done => {}
            WaitOutcome::TimedOut => {
                trace!(syscall = name, "transport wait timed out");
                return Err(Errno::Timedout);
            }
            WaitOutcome::Desynchronized(value) => {
                trace!(syscall = name, value, "transport desynchronized");
                return Err(Errno::Nosys);
            }
        }
        let frame = {
            let mut guard = shared.frame.lock().unwrap();
            std::mem::replace(&mut *guard, CallFrame::new(SyscallNo::SchedYield))
        };
        let errno = Errno::from_raw(frame.errno);
        if errno != Errno::Success {
            return Err(errno);
        }
        // Reverse transfer: restore service-written regions at the
        // offsets recorded at call time.
        let mut view = MemoryView::new(mem);
        for region in &frame.regions {
            if region.direction == Direction::Out {
                if let Some(ptr) = region.guest_ptr {
                    let start = region.offset as usize;
                    view.write_bytes(ptr, &frame.payload[start..start + region.len as usize])?;
                }
            }
        }
        Ok(frame)
    }

    fn store_u32(mem: &mut [u8], ptr: u32, value: u32) -> Errno {
        match MemoryView::new(mem).write_u32(ptr, value) {
            Ok(()) => Errno::Success,
            Err(e) => e,
        }
    }

    fn store_u64(mem: &mut [u8], ptr: u32, value: u64) -> Errno {
        match MemoryView::new(mem).write_u64(ptr, value) {
            Ok(()) => Errno::Success,
            Err(e) => e,
        }
    }

    fn sizes_roundtrip(&self, mem: &mut [u8], syscall: SyscallNo) -> Result<(u32, u32), Errno> {
        let frame = self.roundtrip(mem, CallFrame::new(syscall))?;
        Ok((frame.results[0] as u32, frame.results[1] as u32))
    }

    // ---- argument / environment ----

    pub fn args_sizes_get(&self, mem: &mut [u8], argc_ptr: u32, argv_buf_size_ptr: u32) -> Errno {
        match self.sizes_roundtrip(mem, SyscallNo::ArgsSizesGet) {
            Ok((argc, size)) => {
                let e = Self::store_u32(mem, argc_ptr, argc);
                if e != Errno::Success {
                    return e;
                }
                Self::store_u32(mem, argv_buf_size_ptr, size)
            }
            Err(e) => e,
        }
    }

    pub fn args_get(&self, mem: &mut [u8], argv_ptr: u32, argv_buf_ptr: u32) -> Errno {
        self.list_get(mem, SyscallNo::ArgsSizesGet, SyscallNo::ArgsGet, argv_ptr, argv_buf_ptr)
    }

    pub fn environ_sizes_get(&self, mem: &mut [u8], count_ptr: u32, buf_size_ptr: u32) -> Errno {
        match self.sizes_roundtrip(mem, SyscallNo::EnvironSizesGet) {
            Ok((count, size)) => {
                let e = Self::store_u32(mem, count_ptr, count);
                if e != Errno::Success {
                    return e;
                }
                Self::store_u32(mem, buf_size_ptr, size)
            }
            Err(e) => e,
        }
    }

    pub fn environ_get(&self, mem: &mut [u8], environ_ptr: u32, environ_buf_ptr: u32) -> Errno {
        self.list_get(
            mem,
            SyscallNo::EnvironSizesGet,
            SyscallNo::EnvironGet,
            environ_ptr,
            environ_buf_ptr,
        )
    }

    /// Shared shape of args_get/environ_get: a pointer array plus a
    /// nul-separated string buffer, sized by the matching sizes call.
    fn list_get(
        &self,
        mem: &mut [u8],
        sizes: SyscallNo,
        get: SyscallNo,
        array_ptr: u32,
        buf_ptr: u32,
    ) -> Errno {
        let (count, buf_size) = match self.sizes_roundtrip(mem, sizes) {
            Ok(pair) => pair,
            Err(e) => return e,
        };
        let mut frame = CallFrame::new(get);
        frame.params[0] = buf_ptr as u64;
        frame.push_out(count.saturating_mul(4), Some(array_ptr));
        frame.push_out(buf_size, Some(buf_ptr));
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    // ---- clocks, randomness, scheduling ----

    pub fn clock_res_get(&self, mem: &mut [u8], clockid: u32, resolution_ptr: u32) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::ClockResGet);
        frame.params[0] = clockid as u64;
        match self.roundtrip(mem, frame) {
            Ok(frame) => Self::store_u64(mem, resolution_ptr, frame.results[0]),
            Err(e) => e,
        }
    }

    pub fn clock_time_get(
        &self,
        mem: &mut [u8],
        clockid: u32,
        precision: u64,
        time_ptr: u32,
    ) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::ClockTimeGet);
        frame.params[0] = clockid as u64;
        frame.params[1] = precision;
        match self.roundtrip(mem, frame) {
            Ok(frame) => Self::store_u64(mem, time_ptr, frame.results[0]),
            Err(e) => e,
        }
    }

    pub fn random_get(&self, mem: &mut [u8], buf_ptr: u32, buf_len: u32) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::RandomGet);
        frame.push_out(buf_len, Some(buf_ptr));
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn sched_yield(&self, mem: &mut [u8]) -> Errno {
        match self.roundtrip(mem, CallFrame::new(SyscallNo::SchedYield)) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    // ---- descriptors ----

    pub fn fd_prestat_get(&self, mem: &mut [u8], fd: u32, prestat_ptr: u32) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::FdPrestatGet);
        frame.params[0] = fd as u64;
        frame.push_out(crate::wasi::Prestat::SIZE as u32, Some(prestat_ptr));
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn fd_prestat_dir_name(&self, mem: &mut [u8], fd: u32, path_ptr: u32, path_len: u32) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::FdPrestatDirName);
        frame.params[0] = fd as u64;
        frame.push_out(path_len, Some(path_ptr));
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn fd_close(&self, mem: &mut [u8], fd: u32) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::FdClose);
        frame.params[0] = fd as u64;
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn fd_fdstat_get(&self, mem: &mut [u8], fd: u32, fdstat_ptr: u32) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::FdFdstatGet);
        frame.params[0] = fd as u64;
        frame.push_out(crate::wasi::Fdstat::SIZE as u32, Some(fdstat_ptr));
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn fd_fdstat_set_flags(&self, mem: &mut [u8], fd: u32, flags: u16) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::FdFdstatSetFlags);
        frame.params[0] = fd as u64;
        frame.params[1] = flags as u64;
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn fd_filestat_get(&self, mem: &mut [u8], fd: u32, filestat_ptr: u32) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::FdFilestatGet);
        frame.params[0] = fd as u64;
        frame.push_out(crate::wasi::Filestat::SIZE as u32, Some(filestat_ptr));
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn fd_filestat_set_size(&self, mem: &mut [u8], fd: u32, size: u64) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::FdFilestatSetSize);
        frame.params[0] = fd as u64;
        frame.params[1] = size;
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn fd_read(
        &self,
        mem: &mut [u8],
        fd: u32,
        iovs_ptr: u32,
        iovs_len: u32,
        nread_ptr: u32,
    ) -> Errno {
        let iovs = {
            let view = MemoryView::new(mem);
            match Iovec::decode_array(&view, iovs_ptr, iovs_len) {
                Ok(iovs) => iovs,
                Err(e) => return e,
            }
        };
        let total: u64 = iovs.iter().map(|v| v.buf_len as u64).sum();
        let total = total.min(u32::MAX as u64) as u32;

        let mut frame = CallFrame::new(SyscallNo::FdRead);
        frame.params[0] = fd as u64;
        frame.params[1] = total as u64;
        // The scatter targets are pointer-bearing: the reverse transfer
        // is performed here against the iovec list recorded above.
        let region = frame.push_out(total, None);
        let frame = match self.roundtrip(mem, frame) {
            Ok(frame) => frame,
            Err(e) => return e,
        };
        let nread = (frame.results[0] as usize).min(total as usize);
        let bytes = &frame.region_bytes(region)[..nread];

        let mut view = MemoryView::new(mem);
        let mut consumed = 0usize;
        for iov in &iovs {
            if consumed >= nread {
                break;
            }
            let take = (iov.buf_len as usize).min(nread - consumed);
            if let Err(e) = view.write_bytes(iov.buf, &bytes[consumed..consumed + take]) {
                return e;
            }
            consumed += take;
        }
        Self::store_u32(mem, nread_ptr, nread as u32)
    }

    pub fn fd_write(
        &self,
        mem: &mut [u8],
        fd: u32,
        iovs_ptr: u32,
        iovs_len: u32,
        nwritten_ptr: u32,
    ) -> Errno {
        let gathered = {
            let view = MemoryView::new(mem);
            let iovs = match Iovec::decode_array(&view, iovs_ptr, iovs_len) {
                Ok(iovs) => iovs,
                Err(e) => return e,
            };
            let mut bytes = Vec::new();
            for iov in &iovs {
                match view.read_bytes(iov.buf, iov.buf_len) {
                    Ok(slice) => bytes.extend_from_slice(slice),
                    Err(e) => return e,
                }
            }
            bytes
        };
        let mut frame = CallFrame::new(SyscallNo::FdWrite);
        frame.params[0] = fd as u64;
        frame.push_in(&gathered);
        match self.roundtrip(mem, frame) {
            Ok(frame) => Self::store_u32(mem, nwritten_ptr, frame.results[0] as u32),
            Err(e) => e,
        }
    }

    pub fn fd_readdir(
        &self,
        mem: &mut [u8],
        fd: u32,
        buf_ptr: u32,
        buf_len: u32,
        cookie: u64,
        bufused_ptr: u32,
    ) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::FdReaddir);
        frame.params[0] = fd as u64;
        frame.params[1] = buf_len as u64;
        frame.params[2] = cookie;
        frame.push_out(buf_len, Some(buf_ptr));
        match self.roundtrip(mem, frame) {
            Ok(frame) => Self::store_u32(mem, bufused_ptr, frame.results[0] as u32),
            Err(e) => e,
        }
    }

    pub fn fd_seek(
        &self,
        mem: &mut [u8],
        fd: u32,
        offset: i64,
        whence: u8,
        newoffset_ptr: u32,
    ) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::FdSeek);
        frame.params[0] = fd as u64;
        frame.params[1] = offset as u64;
        frame.params[2] = whence as u64;
        match self.roundtrip(mem, frame) {
            Ok(frame) => Self::store_u64(mem, newoffset_ptr, frame.results[0]),
            Err(e) => e,
        }
    }

    pub fn fd_sync(&self, mem: &mut [u8], fd: u32) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::FdSync);
        frame.params[0] = fd as u64;
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn fd_datasync(&self, mem: &mut [u8], fd: u32) -> Errno {
        let mut frame = CallFrame::new(SyscallNo::FdDatasync);
        frame.params[0] = fd as u64;
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    // ---- paths ----

    fn path_frame(
        &self,
        mem: &mut [u8],
        syscall: SyscallNo,
        fd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<CallFrame, Errno> {
        let view = MemoryView::new(mem);
        let path = view.read_bytes(path_ptr, path_len)?.to_vec();
        let mut frame = CallFrame::new(syscall);
        frame.params[0] = fd as u64;
        frame.push_in(&path);
        Ok(frame)
    }

    pub fn path_create_directory(&self, mem: &mut [u8], fd: u32, path_ptr: u32, path_len: u32) -> Errno {
        let frame = match self.path_frame(mem, SyscallNo::PathCreateDirectory, fd, path_ptr, path_len) {
            Ok(frame) => frame,
            Err(e) => return e,
        };
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn path_filestat_get(
        &self,
        mem: &mut [u8],
        fd: u32,
        lookupflags: u32,
        path_ptr: u32,
        path_len: u32,
        filestat_ptr: u32,
    ) -> Errno {
        let mut frame = match self.path_frame(mem, SyscallNo::PathFilestatGet, fd, path_ptr, path_len) {
            Ok(frame) => frame,
            Err(e) => return e,
        };
        frame.params[1] = lookupflags as u64;
        frame.push_out(crate::wasi::Filestat::SIZE as u32, Some(filestat_ptr));
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn path_open(
        &self,
        mem: &mut [u8],
        fd: u32,
        dirflags: u32,
        path_ptr: u32,
        path_len: u32,
        oflags: u16,
        rights_base: u64,
        rights_inheriting: u64,
        fdflags: u16,
        opened_fd_ptr: u32,
    ) -> Errno {
        let mut frame = match self.path_frame(mem, SyscallNo::PathOpen, fd, path_ptr, path_len) {
            Ok(frame) => frame,
            Err(e) => return e,
        };
        frame.params[1] = dirflags as u64;
        frame.params[2] = oflags as u64;
        frame.params[3] = rights_base;
        frame.params[4] = rights_inheriting;
        frame.params[5] = fdflags as u64;
        match self.roundtrip(mem, frame) {
            Ok(frame) => Self::store_u32(mem, opened_fd_ptr, frame.results[0] as u32),
            Err(e) => e,
        }
    }

    pub fn path_readlink(
        &self,
        mem: &mut [u8],
        fd: u32,
        path_ptr: u32,
        path_len: u32,
        buf_ptr: u32,
        buf_len: u32,
        bufused_ptr: u32,
    ) -> Errno {
        let mut frame = match self.path_frame(mem, SyscallNo::PathReadlink, fd, path_ptr, path_len) {
            Ok(frame) => frame,
            Err(e) => return e,
        };
        frame.push_out(buf_len, Some(buf_ptr));
        match self.roundtrip(mem, frame) {
            Ok(frame) => Self::store_u32(mem, bufused_ptr, frame.results[0] as u32),
            Err(e) => e,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn path_rename(
        &self,
        mem: &mut [u8],
        old_fd: u32,
        old_path_ptr: u32,
        old_path_len: u32,
        new_fd: u32,
        new_path_ptr: u32,
        new_path_len: u32,
    ) -> Errno {
        let mut frame = match self.path_frame(mem, SyscallNo::PathRename, old_fd, old_path_ptr, old_path_len) {
            Ok(frame) => frame,
            Err(e) => return e,
        };
        frame.params[1] = new_fd as u64;
        let new_path = {
            let view = MemoryView::new(mem);
            match view.read_bytes(new_path_ptr, new_path_len) {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => return e,
            }
        };
        frame.push_in(&new_path);
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn path_remove_directory(&self, mem: &mut [u8], fd: u32, path_ptr: u32, path_len: u32) -> Errno {
        let frame = match self.path_frame(mem, SyscallNo::PathRemoveDirectory, fd, path_ptr, path_len) {
            Ok(frame) => frame,
            Err(e) => return e,
        };
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    pub fn path_unlink_file(&self, mem: &mut [u8], fd: u32, path_ptr: u32, path_len: u32) -> Errno {
        let frame = match self.path_frame(mem, SyscallNo::PathUnlinkFile, fd, path_ptr, path_len) {
            Ok(frame) => frame,
            Err(e) => return e,
        };
        match self.roundtrip(mem, frame) {
            Ok(_) => Errno::Success,
            Err(e) => e,
        }
    }

    // ---- polling and exit ----

    pub fn poll_oneoff(
        &self,
        mem: &mut [u8],
        in_ptr: u32,
        out_ptr: u32,
        nsubscriptions: u32,
        nevents_ptr: u32,
    ) -> Errno {
        if nsubscriptions == 0 {
            return Errno::Inval;
        }
        let subs = {
            let view = MemoryView::new(mem);
            match Subscription::decode_array(&view, in_ptr, nsubscriptions) {
                Ok(subs) => subs,
                Err(e) => return e,
            }
        };

        if let Some(events) = self.poll_fast_path(&subs) {
            let mut view = MemoryView::new(mem);
            for (i, event) in events.iter().enumerate() {
                let ptr = out_ptr + (i * Event::SIZE) as u32;
                if let Err(e) = view.write_bytes(ptr, &event.to_bytes()) {
                    return e;
                }
            }
            return Self::store_u32(mem, nevents_ptr, events.len() as u32);
        }

        // Slow path: full round trip, raw subscriptions in, events out.
        let raw = {
            let view = MemoryView::new(mem);
            match view.read_bytes(in_ptr, nsubscriptions.saturating_mul(Subscription::SIZE)) {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => return e,
            }
        };
        let mut frame = CallFrame::new(SyscallNo::PollOneoff);
        frame.params[0] = nsubscriptions as u64;
        frame.push_in(&raw);
        frame.push_out(nsubscriptions.saturating_mul(Event::SIZE as u32), Some(out_ptr));
        match self.roundtrip(mem, frame) {
            Ok(frame) => Self::store_u32(mem, nevents_ptr, frame.results[0] as u32),
            Err(e) => e,
        }
    }

    /// Host-side fast path: when every subscription is an immediate
    /// clock or a read on the canonical stdin descriptor, resolve
    /// against the shared readiness cell without a round trip.
    fn poll_fast_path(&self, subs: &[Subscription]) -> Option<Vec<Event>> {
        let mut has_immediate_clock = false;
        for sub in subs {
            match sub.u {
                SubscriptionU::Clock {
                    timeout_ns, flags, ..
                } if timeout_ns == 0 && !flags.contains(crate::wasi::Subclockflags::ABSTIME) => {
                    has_immediate_clock = true;
                }
                SubscriptionU::FdRead { fd } if fd == STDIN_FD => {}
                _ => return None,
            }
        }

        let stdin_bytes = if has_immediate_clock {
            // Non-blocking poll: report whatever is buffered right now.
            self.stdin_ready.bytes()
        } else {
            // Only stdin reads: block on the cell until data arrives.
            self.stdin_ready.wait_nonzero(None)
        };
        let hangup = self.stdin_ready.is_destroyed() || self.stdin_ready.is_closed();

        let mut events = Vec::new();
        for sub in subs {
            match sub.u {
                SubscriptionU::Clock { .. } => events.push(Event {
                    userdata: sub.userdata,
                    errno: Errno::Success,
                    kind: Eventtype::Clock,
                    nbytes: 0,
                    flags: Eventrwflags::empty(),
                }),
                SubscriptionU::FdRead { .. } => {
                    if stdin_bytes > 0 || hangup {
                        events.push(Event {
                            userdata: sub.userdata,
                            errno: Errno::Success,
                            kind: Eventtype::FdRead,
                            nbytes: stdin_bytes,
                            flags: if hangup && stdin_bytes == 0 {
                                Eventrwflags::HANGUP
                            } else {
                                Eventrwflags::empty()
                            },
                        });
                    }
                }
                SubscriptionU::FdWrite { .. } => unreachable!("filtered above"),
            }
        }
        Some(events)
    }

    pub fn proc_exit(&self, mem: &mut [u8], code: u32) {
        let mut frame = CallFrame::new(SyscallNo::ProcExit);
        frame.params[0] = code as u64;
        let _ = self.roundtrip(mem, frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::thread;

    #[test]
    fn sync_cell_resolves_once() {
        let cell = SyncCell::new();
        cell.request();
        assert!(cell.resolve());
        // The second reply for the same call is ignored.
        assert!(!cell.resolve());
        assert_eq!(cell.wait_done(None), WaitOutcome::Done);
    }

    #[test]
    fn wait_times_out_without_reply() {
        let cell = SyncCell::new();
        cell.request();
        let outcome = cell.wait_done(Some(Duration::from_millis(30)));
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn desynchronized_state_is_reported() {
        let cell = SyncCell::new();
        cell.force_state(7);
        assert_eq!(cell.wait_done(None), WaitOutcome::Desynchronized(7));
    }

    #[test]
    fn wait_wakes_when_resolved_from_another_thread() {
        let shared = Arc::new(SyncCell::new());
        shared.request();
        let waiter = {
            let shared = shared.clone();
            thread::spawn(move || shared.wait_done(None))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(shared.resolve());
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Done);
    }

    #[test]
    fn call_to_disconnected_service_is_canceled() {
        let (tx, rx) = unbounded();
        drop(rx);
        let sys = Syscalls::new(tx, Some(Duration::from_millis(100)), Arc::new(ReadyCell::new()));
        let mut mem = vec![0u8; 64];
        assert_eq!(sys.fd_close(&mut mem, 3), Errno::Canceled);
    }

    #[test]
    fn call_with_unresponsive_service_times_out() {
        let (tx, _rx) = unbounded();
        let sys = Syscalls::new(tx, Some(Duration::from_millis(50)), Arc::new(ReadyCell::new()));
        let mut mem = vec![0u8; 64];
        let start = Instant::now();
        assert_eq!(sys.fd_close(&mut mem, 3), Errno::Timedout);
        assert!(start.elapsed() >= Duration::from_millis(45));
        drop(_rx);
    }

    #[test]
    fn frame_regions_record_offsets() {
        let mut frame = CallFrame::new(SyscallNo::FdWrite);
        let a = frame.push_in(b"hello");
        let b = frame.push_out(4, Some(0x100));
        assert_eq!(frame.region_bytes(a), b"hello");
        assert_eq!(frame.regions[b].offset, 5);
        assert_eq!(frame.regions[b].guest_ptr, Some(0x100));
        frame.region_bytes_mut(b).copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(frame.region_bytes(b), &[1, 2, 3, 4]);
    }

    /// A trivial dispatcher echoing into out-regions to exercise the
    /// reverse transfer end to end.
    struct EchoDispatcher {
        exit: Option<u32>,
    }

    impl SyscallDispatcher for EchoDispatcher {
        fn dispatch(&mut self, frame: &mut CallFrame) -> Errno {
            match frame.syscall {
                SyscallNo::FdRead => {
                    let data = b"echo!";
                    let out = frame.region_bytes_mut(0);
                    let n = data.len().min(out.len());
                    out[..n].copy_from_slice(&data[..n]);
                    frame.results[0] = n as u64;
                    Errno::Success
                }
                SyscallNo::ProcExit => {
                    self.exit = Some(frame.param_u32(0));
                    Errno::Success
                }
                _ => Errno::Nosys,
            }
        }

        fn exit_code(&self) -> Option<u32> {
            self.exit
        }
    }

    #[test]
    fn reverse_transfer_scatters_into_iovecs() {
        let (tx, rx) = unbounded();
        let listener = ServiceListener::new(rx, Box::new(EchoDispatcher { exit: None }));
        let service = thread::spawn(move || listener.run());

        let sys = Syscalls::new(tx.clone(), None, Arc::new(ReadyCell::new()));
        let mut mem = vec![0u8; 256];
        // iovec array at 0: two entries -> (100, 3) and (200, 8)
        mem[0..4].copy_from_slice(&100u32.to_le_bytes());
        mem[4..8].copy_from_slice(&3u32.to_le_bytes());
        mem[8..12].copy_from_slice(&200u32.to_le_bytes());
        mem[12..16].copy_from_slice(&8u32.to_le_bytes());

        let errno = sys.fd_read(&mut mem, 0, 0, 2, 240);
        assert_eq!(errno, Errno::Success);
        assert_eq!(&mem[100..103], b"ech");
        assert_eq!(&mem[200..202], b"o!");
        assert_eq!(u32::from_le_bytes(mem[240..244].try_into().unwrap()), 5);

        sys.proc_exit(&mut mem, 0);
        drop(tx);
        assert_eq!(service.join().unwrap(), Some(0));
    }

    #[test]
    fn listener_reports_exit_code() {
        let (tx, rx) = unbounded();
        let listener = ServiceListener::new(rx, Box::new(EchoDispatcher { exit: None }));
        let service = thread::spawn(move || listener.run());
        let sys = Syscalls::new(tx, None, Arc::new(ReadyCell::new()));
        let mut mem = vec![0u8; 16];
        sys.proc_exit(&mut mem, 42);
        assert_eq!(service.join().unwrap(), Some(42));
    }
}
