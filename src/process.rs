//! Process lifecycle
//!
//! A [`WasiProcess`] makes one guest believe it is a POSIX-like process:
//! `initialize` resolves mount descriptors into device drivers, composes
//! the root namespace, pre-opens descriptors, and rewrites URI-typed
//! arguments; `run` starts the compute thread and the coordinating
//! service thread and returns the exit code; `terminate` is a
//! best-effort forced stop that releases every suspended waiter.
//!
//! [`WasiHost`] is the long-lived context object created once at host
//! startup. It owns the global device table shared by all processes and
//! allocates device ids; there is no hidden module state.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::device::{Device, DeviceId, DeviceRegistry, DeviceTable, SharedDeviceTable};
use crate::editor::EditorFileSystem;
use crate::fd::{FdTable, FileDescriptor};
use crate::fs::{
    DirectoryManifest, EditorFsDriver, MountMap, RootFsDriver, StaticFsDriver,
};
use crate::fs::root::MountEntry;
use crate::pipe::{Pipe, PipeDevice, PipeMode, ReadyCell, StdinHandle, StdoutHandle};
use crate::service::{TracedService, WasiService};
use crate::transport::{ServiceListener, SyscallDispatcher, Syscalls};
use crate::wasi::{Fdflags, Filetype, Rights};

/// Exit code reported when a process is forcibly terminated.
pub const TERMINATED_EXIT_CODE: u32 = 128 + 15;

/// The single workspace folder mount point.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Prefix for mount points when several workspace folders are mounted.
pub const WORKSPACES_MOUNT_PREFIX: &str = "/workspaces";

/// Where a filesystem is mounted and what backs it.
pub enum MountPointDescriptor {
    /// An editor workspace folder. One folder maps to `/workspace`,
    /// several map to `/workspaces/<name>`.
    WorkspaceFolder {
        name: String,
        uri: Url,
        fs: Arc<dyn EditorFileSystem>,
    },
    /// Packaged extension data with a pre-computed listing manifest.
    ExtensionLocation {
        uri: Url,
        fs: Arc<dyn EditorFileSystem>,
        /// Path of the manifest file inside `fs`.
        manifest_path: String,
        mount_point: String,
    },
    /// Any other editor-provided filesystem.
    EditorFs {
        uri: Url,
        fs: Arc<dyn EditorFileSystem>,
        mount_point: String,
    },
}

/// A process argument: either a literal string or a URI that must be
/// rewritten into a mount-relative path.
#[derive(Debug, Clone)]
pub enum ProcessArg {
    Str(String),
    Uri(Url),
}

impl From<&str> for ProcessArg {
    fn from(value: &str) -> Self {
        ProcessArg::Str(value.to_string())
    }
}

impl From<String> for ProcessArg {
    fn from(value: String) -> Self {
        ProcessArg::Str(value)
    }
}

impl From<Url> for ProcessArg {
    fn from(value: Url) -> Self {
        ProcessArg::Uri(value)
    }
}

/// Recognized process options.
pub struct ProcessOptions {
    pub args: Vec<ProcessArg>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<MountPointDescriptor>,
    /// Wrap the dispatcher in the timing decorator.
    pub trace: bool,
    /// Per-syscall transport wait timeout; `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            env: Vec::new(),
            mounts: Vec::new(),
            trace: false,
            call_timeout: None,
        }
    }
}

/// Fatal process setup and lifecycle failures.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process is already initialized")]
    AlreadyInitialized,
    #[error("process is not initialized")]
    NotInitialized,
    #[error("process is already running or finished")]
    AlreadyRunning,
    #[error("more than one mount claims the root mount point /")]
    ConflictingRootMount,
    #[error("invalid mount point: {0}")]
    InvalidMountPoint(String),
    #[error("duplicate mount point: {0}")]
    DuplicateMountPoint(String),
    #[error("argument uri is outside every mount: {0}")]
    UnmappableArgument(Url),
    #[error("cannot read directory manifest {path}")]
    ManifestUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse directory manifest {path}")]
    ManifestInvalid {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The code that runs inside the compute context. The real embedding
/// instantiates a WebAssembly module here; tests implement guests
/// directly against the syscall stub, which exercises the same
/// marshalling paths.
pub trait GuestCode: Send + 'static {
    fn run(self: Box<Self>, sys: Syscalls) -> u32;
}

impl<F> GuestCode for F
where
    F: FnOnce(Syscalls) -> u32 + Send + 'static,
{
    fn run(self: Box<Self>, sys: Syscalls) -> u32 {
        (*self)(sys)
    }
}

/// Host-wide context: global device table and device-id allocation.
/// Created once at startup and threaded through process construction.
pub struct WasiHost {
    devices: SharedDeviceTable,
    next_device: AtomicU32,
}

impl WasiHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: Arc::new(Mutex::new(DeviceTable::new())),
            next_device: AtomicU32::new(1),
        })
    }

    pub fn allocate_device(&self) -> DeviceId {
        DeviceId(self.next_device.fetch_add(1, Ordering::Relaxed))
    }

    pub fn global_devices(&self) -> SharedDeviceTable {
        self.devices.clone()
    }

    /// Get or create the shared editor-backed driver for a source URI.
    /// Workspace filesystems are created once and reused by every
    /// process that mounts the same folder.
    fn shared_editor_driver(&self, uri: &Url, fs: Arc<dyn EditorFileSystem>) -> Device {
        let mut table = self.devices.lock().unwrap();
        if let Some(device) = table.get_by_uri(uri) {
            return device;
        }
        let device = Device::FileSystem(Arc::new(EditorFsDriver::new(
            self.allocate_device(),
            uri.clone(),
            fs,
        )));
        table.add(device.clone());
        device
    }

    fn shared_static_driver(
        &self,
        uri: &Url,
        fs: Arc<dyn EditorFileSystem>,
        manifest_path: &str,
    ) -> Result<Device, ProcessError> {
        {
            let table = self.devices.lock().unwrap();
            if let Some(device) = table.get_by_uri(uri) {
                return Ok(device);
            }
        }
        let bytes = fs
            .read_file(manifest_path)
            .map_err(|source| ProcessError::ManifestUnreadable {
                path: manifest_path.to_string(),
                source,
            })?;
        let manifest =
            DirectoryManifest::from_json(&bytes).map_err(|source| ProcessError::ManifestInvalid {
                path: manifest_path.to_string(),
                source,
            })?;
        let device = Device::FileSystem(Arc::new(StaticFsDriver::new(
            self.allocate_device(),
            uri.clone(),
            manifest,
            fs,
        )));
        self.devices.lock().unwrap().add(device.clone());
        Ok(device)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Initialized,
    Running,
    Exited(u32),
}

/// Everything `initialize` prepares for `run`.
struct Prepared {
    service: WasiService,
    trace: bool,
    call_timeout: Option<Duration>,
}

struct Inner {
    state: State,
    prepared: Option<Prepared>,
}

/// One managed guest process.
pub struct WasiProcess {
    host: Arc<WasiHost>,
    name: String,
    options: ProcessOptions,
    inner: Mutex<Inner>,
    terminated: Arc<AtomicBool>,
    stdin_ready: Arc<ReadyCell>,
    stdin_pipe: Arc<Pipe>,
    stdout_pipe: Arc<Pipe>,
    stderr_pipe: Arc<Pipe>,
}

impl WasiProcess {
    pub fn new(host: Arc<WasiHost>, name: impl Into<String>, options: ProcessOptions) -> Self {
        let stdin_ready = Arc::new(ReadyCell::new());
        let stdin_pipe = Arc::new(Pipe::with_default_capacity(stdin_ready.clone()));
        let stdout_pipe = Arc::new(Pipe::with_default_capacity(Arc::new(ReadyCell::new())));
        let stderr_pipe = Arc::new(Pipe::with_default_capacity(Arc::new(ReadyCell::new())));
        Self {
            host,
            name: name.into(),
            options,
            inner: Mutex::new(Inner {
                state: State::Created,
                prepared: None,
            }),
            terminated: Arc::new(AtomicBool::new(false)),
            stdin_ready,
            stdin_pipe,
            stdout_pipe,
            stderr_pipe,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writable end of the guest's stdin.
    pub fn stdin(&self) -> StdinHandle {
        StdinHandle::new(self.stdin_pipe.clone())
    }

    /// Readable end of the guest's stdout.
    pub fn stdout(&self) -> StdoutHandle {
        StdoutHandle::new(self.stdout_pipe.clone())
    }

    /// Readable end of the guest's stderr.
    pub fn stderr(&self) -> StdoutHandle {
        StdoutHandle::new(self.stderr_pipe.clone())
    }

    /// Resolve mounts, build the namespace, pre-open descriptors, and
    /// rewrite arguments. Idempotent setup: fails unless the process is
    /// in its initial state; every failure here is fatal and the guest
    /// never runs.
    pub fn initialize(&self) -> Result<(), ProcessError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != State::Created {
            return Err(ProcessError::AlreadyInitialized);
        }

        let mut registry = DeviceRegistry::new(self.host.global_devices());
        let workspace_folders = self
            .options
            .mounts
            .iter()
            .filter(|m| matches!(m, MountPointDescriptor::WorkspaceFolder { .. }))
            .count();

        // Resolve each mount descriptor into a driver and a mount point.
        let mut entries: Vec<MountEntry> = Vec::new();
        let mut sources: Vec<(String, Url)> = Vec::new();
        for descriptor in &self.options.mounts {
            let (point, uri, device) = match descriptor {
                MountPointDescriptor::WorkspaceFolder { name, uri, fs } => {
                    let point = if workspace_folders == 1 {
                        WORKSPACE_MOUNT.to_string()
                    } else {
                        format!("{WORKSPACES_MOUNT_PREFIX}/{name}")
                    };
                    (
                        point,
                        uri.clone(),
                        self.host.shared_editor_driver(uri, fs.clone()),
                    )
                }
                MountPointDescriptor::ExtensionLocation {
                    uri,
                    fs,
                    manifest_path,
                    mount_point,
                } => (
                    mount_point.clone(),
                    uri.clone(),
                    self.host.shared_static_driver(uri, fs.clone(), manifest_path)?,
                ),
                MountPointDescriptor::EditorFs {
                    uri,
                    fs,
                    mount_point,
                } => (
                    mount_point.clone(),
                    uri.clone(),
                    self.host.shared_editor_driver(uri, fs.clone()),
                ),
            };

            let point = normalize_mount_point(&point)?;
            if entries.iter().any(|e| e.point == point) {
                return Err(ProcessError::DuplicateMountPoint(point));
            }
            sources.push((point.clone(), uri));
            entries.push(MountEntry { point, device });
        }

        let roots = entries.iter().filter(|e| e.point == "/").count();
        if roots > 1 || (roots == 1 && entries.len() > 1) {
            return Err(ProcessError::ConflictingRootMount);
        }

        // Compose a synthetic root when several non-root mounts exist.
        let mut preopen_order: Vec<usize> = (0..entries.len()).collect();
        preopen_order.sort_by(|a, b| entries[*a].point.cmp(&entries[*b].point));
        if roots == 0 && entries.len() > 1 {
            let inner_map = Arc::new(MountMap::new(entries.clone()));
            let root_device = Device::FileSystem(Arc::new(RootFsDriver::new(
                self.host.allocate_device(),
                inner_map,
            )));
            registry.add(root_device.clone());
            entries.insert(
                0,
                MountEntry {
                    point: "/".to_string(),
                    device: root_device,
                },
            );
            preopen_order = (0..entries.len()).collect();
            preopen_order.sort_by(|a, b| entries[*a].point.cmp(&entries[*b].point));
        }
        let mounts = Arc::new(MountMap::new(entries.clone()));

        // Stdio devices are always process-private.
        let stdio = [
            (self.stdin_pipe.clone(), PipeMode::GuestReads, "stdin"),
            (self.stdout_pipe.clone(), PipeMode::GuestWrites, "stdout"),
            (self.stderr_pipe.clone(), PipeMode::GuestWrites, "stderr"),
        ];
        let mut fds = FdTable::new();
        for (pipe, mode, stream) in stdio {
            let uri = Url::parse(&format!("pipe://wasibox/{stream}"))
                .expect("static pipe uri");
            let device = Device::Character(Arc::new(PipeDevice::new(
                self.host.allocate_device(),
                uri,
                pipe,
                mode,
            )));
            registry.add(device.clone());
            let rights = match mode {
                PipeMode::GuestReads => {
                    Rights::FD_READ
                        | Rights::FD_FDSTAT_SET_FLAGS
                        | Rights::FD_FILESTAT_GET
                        | Rights::POLL_FD_READWRITE
                }
                PipeMode::GuestWrites => {
                    Rights::FD_WRITE
                        | Rights::FD_FDSTAT_SET_FLAGS
                        | Rights::FD_FILESTAT_GET
                        | Rights::POLL_FD_READWRITE
                }
            };
            fds.add(FileDescriptor {
                fd: 0,
                device: device.id(),
                filetype: Filetype::CharacterDevice,
                rights_base: rights,
                rights_inheriting: Rights::empty(),
                fdflags: Fdflags::empty(),
                path: stream.to_string(),
                handle: None,
                preopen: None,
                readdir: None,
                disposer: None,
            });
        }

        // Register mounted devices locally when they are not already in
        // the global table (the composed root is; shared drivers are
        // global) and pre-open one descriptor per mount.
        for index in preopen_order {
            let entry = &entries[index];
            if !registry.has(entry.device.id()) {
                registry.add(entry.device.clone());
            }
            let (base, inheriting) = match &entry.device {
                Device::FileSystem(d) => d.prestat_rights(),
                Device::Character(_) => continue,
            };
            let fd = fds.add(FileDescriptor {
                fd: 0,
                device: entry.device.id(),
                filetype: Filetype::Directory,
                rights_base: base,
                rights_inheriting: inheriting,
                fdflags: Fdflags::empty(),
                path: String::new(),
                handle: None,
                preopen: Some(entry.point.clone()),
                readdir: None,
                disposer: None,
            });
            fds.set_root(entry.device.id(), fd);
            debug!(process = %self.name, mount = %entry.point, fd, "preopened");
        }

        // Arguments: literal strings pass through, URIs are rewritten to
        // mount-relative paths and fail hard when unmappable.
        let mut args = vec![self.name.clone()];
        for arg in &self.options.args {
            match arg {
                ProcessArg::Str(s) => args.push(s.clone()),
                ProcessArg::Uri(uri) => {
                    let mapped = rewrite_uri_argument(&sources, uri)
                        .ok_or_else(|| ProcessError::UnmappableArgument(uri.clone()))?;
                    args.push(mapped);
                }
            }
        }

        inner.prepared = Some(Prepared {
            service: WasiService::new(
                args,
                self.options.env.clone(),
                registry,
                mounts,
                fds,
                self.stdin_ready.clone(),
            ),
            trace: self.options.trace,
            call_timeout: self.options.call_timeout,
        });
        inner.state = State::Initialized;
        Ok(())
    }

    /// Run the guest to completion and return its exit code. Fails if
    /// the process was never initialized.
    pub fn run(&self, guest: impl GuestCode) -> Result<u32, ProcessError> {
        let prepared = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                State::Created => return Err(ProcessError::NotInitialized),
                State::Initialized => {}
                State::Running | State::Exited(_) => return Err(ProcessError::AlreadyRunning),
            }
            inner.state = State::Running;
            inner.prepared.take().expect("initialized implies prepared")
        };

        let (tx, rx) = unbounded();
        let dispatcher: Box<dyn SyscallDispatcher> = if prepared.trace {
            Box::new(TracedService::new(prepared.service))
        } else {
            Box::new(prepared.service)
        };
        let listener = ServiceListener::new(rx, dispatcher);
        let service_thread = thread::Builder::new()
            .name(format!("{}-wasi", self.name))
            .spawn(move || listener.run())
            .expect("spawn service thread");

        let syscalls = Syscalls::new(tx, prepared.call_timeout, self.stdin_ready.clone());
        let guest_box: Box<dyn GuestCode> = Box::new(guest);
        let compute_thread = thread::Builder::new()
            .name(format!("{}-guest", self.name))
            .spawn(move || guest_box.run(syscalls))
            .expect("spawn compute thread");

        let guest_code = match compute_thread.join() {
            Ok(code) => code,
            Err(_) => {
                warn!(process = %self.name, "compute context panicked");
                1
            }
        };
        let service_code = service_thread.join().unwrap_or(None);

        // Stdio teardown: readers drain buffered output then see EOF;
        // a writer suspended on stdin back-pressure is released.
        self.stdout_pipe.close();
        self.stderr_pipe.close();
        self.stdin_pipe.destroy();

        let code = if self.terminated.load(Ordering::SeqCst) {
            TERMINATED_EXIT_CODE
        } else {
            service_code.unwrap_or(guest_code)
        };
        self.inner.lock().unwrap().state = State::Exited(code);
        debug!(process = %self.name, code, "process finished");
        Ok(code)
    }

    /// Best-effort forced stop: destroys the stream buffers (releasing
    /// suspended readers and writers with a terminal error) so a
    /// cooperating guest unwinds on its next I/O. Always resolves to
    /// the termination exit code; a guest that never issues another
    /// syscall cannot be stopped.
    pub fn terminate(&self) -> u32 {
        self.terminated.store(true, Ordering::SeqCst);
        self.stdin_pipe.destroy();
        self.stdout_pipe.destroy();
        self.stderr_pipe.destroy();
        TERMINATED_EXIT_CODE
    }

    /// The exit code, once the process has finished.
    pub fn exit_code(&self) -> Option<u32> {
        match self.inner.lock().unwrap().state {
            State::Exited(code) => Some(code),
            _ => None,
        }
    }
}

fn normalize_mount_point(point: &str) -> Result<String, ProcessError> {
    if !point.starts_with('/') {
        return Err(ProcessError::InvalidMountPoint(point.to_string()));
    }
    if point == "/" {
        return Ok(point.to_string());
    }
    let trimmed = point.trim_end_matches('/');
    match crate::path::normalize_absolute(trimmed.trim_start_matches('/')) {
        Some(p) if !p.is_empty() => Ok(format!("/{p}")),
        _ => Err(ProcessError::InvalidMountPoint(point.to_string())),
    }
}

/// Map a URI onto a mount-relative guest path by source-URI prefix.
fn rewrite_uri_argument(sources: &[(String, Url)], uri: &Url) -> Option<String> {
    let target = uri.as_str();
    for (point, base) in sources {
        let base = base.as_str().trim_end_matches('/');
        if target == base {
            return Some(point.clone());
        }
        if let Some(rest) = target.strip_prefix(base) {
            if let Some(rest) = rest.strip_prefix('/') {
                let prefix = if point == "/" { "" } else { point.as_str() };
                return Some(format!("{prefix}/{rest}"));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::MemoryEditorFs;

    fn workspace_mount(name: &str, files: &[(&str, &[u8])]) -> MountPointDescriptor {
        MountPointDescriptor::WorkspaceFolder {
            name: name.to_string(),
            uri: Url::parse(&format!("memfs://{name}/")).unwrap(),
            fs: Arc::new(MemoryEditorFs::with_files(files)),
        }
    }

    #[test]
    fn initialize_is_not_repeatable() {
        let host = WasiHost::new();
        let process = WasiProcess::new(
            host,
            "proc",
            ProcessOptions {
                mounts: vec![workspace_mount("a", &[])],
                ..Default::default()
            },
        );
        process.initialize().unwrap();
        assert!(matches!(
            process.initialize(),
            Err(ProcessError::AlreadyInitialized)
        ));
    }

    #[test]
    fn run_requires_initialize() {
        let host = WasiHost::new();
        let process = WasiProcess::new(host, "proc", ProcessOptions::default());
        let result = process.run(|_sys: Syscalls| 0);
        assert!(matches!(result, Err(ProcessError::NotInitialized)));
    }

    #[test]
    fn uri_arguments_are_rewritten_to_mount_paths() {
        let sources = vec![
            ("/workspace".to_string(), Url::parse("memfs://a/").unwrap()),
            (
                "/.agdaData".to_string(),
                Url::parse("ext://pub.ext/data/").unwrap(),
            ),
        ];
        let arg = Url::parse("memfs://a/src/Main.agda").unwrap();
        assert_eq!(
            rewrite_uri_argument(&sources, &arg),
            Some("/workspace/src/Main.agda".to_string())
        );
        let outside = Url::parse("memfs://other/file.txt").unwrap();
        assert_eq!(rewrite_uri_argument(&sources, &outside), None);
    }

    #[test]
    fn unmappable_uri_argument_is_fatal() {
        let host = WasiHost::new();
        let process = WasiProcess::new(
            host,
            "agda",
            ProcessOptions {
                args: vec![
                    ProcessArg::from("--lsp"),
                    ProcessArg::Uri(Url::parse("memfs://elsewhere/f.agda").unwrap()),
                ],
                mounts: vec![workspace_mount("a", &[])],
                ..Default::default()
            },
        );
        assert!(matches!(
            process.initialize(),
            Err(ProcessError::UnmappableArgument(_))
        ));
    }

    #[test]
    fn duplicate_mount_points_are_rejected() {
        let host = WasiHost::new();
        let fs: Arc<dyn EditorFileSystem> = Arc::new(MemoryEditorFs::new());
        let process = WasiProcess::new(
            host,
            "proc",
            ProcessOptions {
                mounts: vec![
                    MountPointDescriptor::EditorFs {
                        uri: Url::parse("memfs://one/").unwrap(),
                        fs: fs.clone(),
                        mount_point: "/data".into(),
                    },
                    MountPointDescriptor::EditorFs {
                        uri: Url::parse("memfs://two/").unwrap(),
                        fs,
                        mount_point: "/data/".into(),
                    },
                ],
                ..Default::default()
            },
        );
        assert!(matches!(
            process.initialize(),
            Err(ProcessError::DuplicateMountPoint(_))
        ));
    }

    #[test]
    fn root_mount_conflicts_are_fatal() {
        let host = WasiHost::new();
        let fs: Arc<dyn EditorFileSystem> = Arc::new(MemoryEditorFs::new());
        let process = WasiProcess::new(
            host,
            "proc",
            ProcessOptions {
                mounts: vec![
                    MountPointDescriptor::EditorFs {
                        uri: Url::parse("memfs://one/").unwrap(),
                        fs: fs.clone(),
                        mount_point: "/".into(),
                    },
                    MountPointDescriptor::EditorFs {
                        uri: Url::parse("memfs://two/").unwrap(),
                        fs,
                        mount_point: "/data".into(),
                    },
                ],
                ..Default::default()
            },
        );
        assert!(matches!(
            process.initialize(),
            Err(ProcessError::ConflictingRootMount)
        ));
    }

    #[test]
    fn workspace_drivers_are_shared_across_processes() {
        let host = WasiHost::new();
        let fs: Arc<dyn EditorFileSystem> = Arc::new(MemoryEditorFs::new());
        let uri = Url::parse("memfs://shared/").unwrap();
        let a = host.shared_editor_driver(&uri, fs.clone());
        let b = host.shared_editor_driver(&uri, fs);
        assert_eq!(a.id(), b.id());
        assert_eq!(host.global_devices().lock().unwrap().len(), 1);
    }

    #[test]
    fn bad_manifest_aborts_startup() {
        let host = WasiHost::new();
        let fs = Arc::new(MemoryEditorFs::with_files(&[(
            "manifest.json",
            b"not json".as_slice(),
        )]));
        let process = WasiProcess::new(
            host,
            "proc",
            ProcessOptions {
                mounts: vec![MountPointDescriptor::ExtensionLocation {
                    uri: Url::parse("ext://pub.ext/data/").unwrap(),
                    fs,
                    manifest_path: "manifest.json".into(),
                    mount_point: "/.agdaData".into(),
                }],
                ..Default::default()
            },
        );
        assert!(matches!(
            process.initialize(),
            Err(ProcessError::ManifestInvalid { .. })
        ));
    }

    #[test]
    fn normalize_mount_point_rules() {
        assert_eq!(normalize_mount_point("/workspace/").unwrap(), "/workspace");
        assert_eq!(normalize_mount_point("/").unwrap(), "/");
        assert!(normalize_mount_point("relative").is_err());
        assert!(normalize_mount_point("/a/../..").is_err());
    }
}
