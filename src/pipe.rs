//! In-memory pipes for standard streams
//!
//! A pipe is a bounded queue of byte chunks with blocking semantics on
//! both ends: writers suspend while the buffer is full, readers suspend
//! while it is empty. Every mutation updates a shared readiness cell
//! (buffered byte count plus a generation counter) that the poll fast
//! path and the dispatcher's slow path block on without a round trip.
//! Destroying a pipe releases all waiters with a terminal error instead
//! of leaving them suspended.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver};
use thiserror::Error;
use url::Url;

use crate::device::{CharacterDevice, DeviceId};
use crate::wasi::Errno;

/// Default stream buffer capacity.
pub const PIPE_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PipeError {
    /// The pipe was torn down while the operation was suspended.
    #[error("pipe destroyed")]
    Destroyed,
    /// The write end was closed; no further writes are accepted.
    #[error("pipe closed")]
    Closed,
}

#[derive(Debug)]
struct CellState {
    bytes: u64,
    generation: u64,
    closed: bool,
    destroyed: bool,
}

/// Shared readiness cell: the buffered byte count of one pipe, bumped on
/// every mutation. Pollers block on it directly.
pub struct ReadyCell {
    state: Mutex<CellState>,
    cond: Condvar,
}

impl ReadyCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CellState {
                bytes: 0,
                generation: 0,
                closed: false,
                destroyed: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn bytes(&self) -> u64 {
        self.state.lock().unwrap().bytes
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().unwrap().generation
    }

    fn publish(&self, bytes: u64) {
        let mut state = self.state.lock().unwrap();
        state.bytes = bytes;
        state.generation += 1;
        self.cond.notify_all();
    }

    fn mark_closed(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.generation += 1;
        self.cond.notify_all();
    }

    fn mark_destroyed(&self) {
        let mut state = self.state.lock().unwrap();
        state.destroyed = true;
        state.generation += 1;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().unwrap().destroyed
    }

    /// Block until data is buffered, the cell is destroyed, or the
    /// deadline passes. Returns the buffered byte count at wake-up.
    pub fn wait_nonzero(&self, deadline: Option<Instant>) -> u64 {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.bytes > 0 || state.closed || state.destroyed {
                return state.bytes;
            }
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return state.bytes;
                    }
                    let (next, timeout) = self.cond.wait_timeout(state, d - now).unwrap();
                    state = next;
                    if timeout.timed_out() && state.bytes == 0 {
                        return state.bytes;
                    }
                }
                None => state = self.cond.wait(state).unwrap(),
            }
        }
    }

    /// Block until the generation advances past `seen` or the deadline
    /// passes. Used by the dispatcher's poll loop to sleep between
    /// readiness checks.
    pub fn wait_change(&self, seen: u64, deadline: Option<Instant>) {
        let mut state = self.state.lock().unwrap();
        while state.generation == seen && !state.destroyed {
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return;
                    }
                    let (next, timeout) = self.cond.wait_timeout(state, d - now).unwrap();
                    state = next;
                    if timeout.timed_out() {
                        return;
                    }
                }
                None => state = self.cond.wait(state).unwrap(),
            }
        }
    }
}

impl Default for ReadyCell {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct PipeState {
    chunks: VecDeque<Vec<u8>>,
    len: usize,
    closed: bool,
    destroyed: bool,
}

/// A bounded in-memory byte queue with blocking ends.
pub struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
    ready: Arc<ReadyCell>,
}

impl Pipe {
    pub fn new(capacity: usize, ready: Arc<ReadyCell>) -> Self {
        Self {
            state: Mutex::new(PipeState {
                chunks: VecDeque::new(),
                len: 0,
                closed: false,
                destroyed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
            ready,
        }
    }

    pub fn with_default_capacity(ready: Arc<ReadyCell>) -> Self {
        Self::new(PIPE_CAPACITY, ready)
    }

    pub fn ready_cell(&self) -> &Arc<ReadyCell> {
        &self.ready
    }

    /// Queue a chunk, suspending while the buffer lacks space. Chunks
    /// larger than the capacity are written in capacity-sized pieces so
    /// a lone writer can never deadlock against an active reader.
    pub fn write(&self, bytes: &[u8]) -> Result<(), PipeError> {
        for piece in bytes.chunks(self.capacity.max(1)) {
            let mut state = self.state.lock().unwrap();
            loop {
                if state.destroyed {
                    return Err(PipeError::Destroyed);
                }
                if state.closed {
                    return Err(PipeError::Closed);
                }
                if state.len + piece.len() <= self.capacity {
                    break;
                }
                state = self.writable.wait(state).unwrap();
            }
            state.chunks.push_back(piece.to_vec());
            state.len += piece.len();
            self.ready.publish(state.len as u64);
            self.readable.notify_all();
        }
        Ok(())
    }

    /// Dequeue up to `max` bytes (all buffered bytes when `None`),
    /// suspending while the buffer is empty. An empty result means the
    /// write end was closed (end of stream).
    pub fn read(&self, max: Option<usize>) -> Result<Vec<u8>, PipeError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.destroyed {
                return Err(PipeError::Destroyed);
            }
            if state.len > 0 {
                break;
            }
            if state.closed {
                return Ok(Vec::new());
            }
            state = self.readable.wait(state).unwrap();
        }

        let want = max.unwrap_or(state.len).min(state.len);
        let mut out = Vec::with_capacity(want);
        while out.len() < want {
            let mut head = state.chunks.pop_front().expect("len > 0 implies chunks");
            let remaining = want - out.len();
            if head.len() > remaining {
                // Split the head chunk, keep the tail queued.
                let tail = head.split_off(remaining);
                state.chunks.push_front(tail);
            }
            out.extend_from_slice(&head);
        }
        state.len -= out.len();
        self.ready.publish(state.len as u64);
        self.writable.notify_all();
        Ok(out)
    }

    /// Suspend until any data is buffered and return the byte count
    /// without consuming it. Returns 0 at end of stream.
    pub fn wait_read(&self) -> Result<u64, PipeError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.destroyed {
                return Err(PipeError::Destroyed);
            }
            if state.len > 0 || state.closed {
                return Ok(state.len as u64);
            }
            state = self.readable.wait(state).unwrap();
        }
    }

    pub fn bytes_available(&self) -> u64 {
        self.state.lock().unwrap().len as u64
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Close the write end; buffered data can still be drained, then
    /// readers see end of stream.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.ready.mark_closed();
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Tear the pipe down, dropping buffered data and releasing every
    /// suspended reader and writer with [`PipeError::Destroyed`].
    pub fn destroy(&self) {
        let mut state = self.state.lock().unwrap();
        state.destroyed = true;
        state.chunks.clear();
        state.len = 0;
        self.ready.mark_destroyed();
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

/// Which side of the pipe the guest holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    /// Guest reads (stdin): the embedder writes.
    GuestReads,
    /// Guest writes (stdout/stderr): the embedder reads.
    GuestWrites,
}

/// Character device wrapping one pipe for the descriptor table.
pub struct PipeDevice {
    id: DeviceId,
    uri: Url,
    pipe: Arc<Pipe>,
    mode: PipeMode,
}

impl PipeDevice {
    pub fn new(id: DeviceId, uri: Url, pipe: Arc<Pipe>, mode: PipeMode) -> Self {
        Self { id, uri, pipe, mode }
    }

    pub fn pipe(&self) -> &Arc<Pipe> {
        &self.pipe
    }

    pub fn mode(&self) -> PipeMode {
        self.mode
    }
}

impl CharacterDevice for PipeDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn uri(&self) -> &Url {
        &self.uri
    }

    fn read(&self, max: usize) -> Result<Vec<u8>, Errno> {
        if self.mode != PipeMode::GuestReads {
            return Err(Errno::Badf);
        }
        match self.pipe.read(Some(max)) {
            Ok(bytes) => Ok(bytes),
            // Teardown reads as end of stream, not as a fault.
            Err(PipeError::Destroyed) => Ok(Vec::new()),
            Err(PipeError::Closed) => Ok(Vec::new()),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<usize, Errno> {
        if self.mode != PipeMode::GuestWrites {
            return Err(Errno::Badf);
        }
        match self.pipe.write(bytes) {
            Ok(()) => Ok(bytes.len()),
            Err(_) => Err(Errno::Pipe),
        }
    }

    fn bytes_available(&self) -> u64 {
        self.pipe.bytes_available()
    }
}

/// Embedder handle for the guest's stdin: writes feed the guest.
#[derive(Clone)]
pub struct StdinHandle {
    pipe: Arc<Pipe>,
}

impl StdinHandle {
    pub fn new(pipe: Arc<Pipe>) -> Self {
        Self { pipe }
    }

    /// Blocking, back-pressured write into the guest's stdin.
    pub fn write(&self, bytes: &[u8]) -> Result<(), PipeError> {
        self.pipe.write(bytes)
    }

    /// Signal end of input.
    pub fn close(&self) {
        self.pipe.close();
    }
}

/// Embedder handle for the guest's stdout or stderr.
#[derive(Clone)]
pub struct StdoutHandle {
    pipe: Arc<Pipe>,
}

impl StdoutHandle {
    pub fn new(pipe: Arc<Pipe>) -> Self {
        Self { pipe }
    }

    /// Blocking read of the next chunk. `None` is end of stream.
    pub fn read_chunk(&self) -> Result<Option<Vec<u8>>, PipeError> {
        match self.pipe.read(None) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(PipeError::Destroyed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Byte-chunk event emission: a background pump forwards every chunk
    /// to the returned channel until end of stream or teardown.
    pub fn chunks(&self) -> Receiver<Vec<u8>> {
        let (tx, rx) = unbounded();
        let pipe = self.pipe.clone();
        thread::spawn(move || {
            loop {
                match pipe.read(None) {
                    Ok(bytes) if bytes.is_empty() => break,
                    Ok(bytes) => {
                        if tx.send(bytes).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        rx
    }

    pub fn bytes_available(&self) -> u64 {
        self.pipe.bytes_available()
    }
}
