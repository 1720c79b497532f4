//! wasibox - a virtual WASI preview-1 host
//!
//! Makes a sandboxed guest believe it is a POSIX-like process: file
//! descriptors, a filesystem composed from mounted virtual backends,
//! standard streams, and polling. Syscalls issued on the compute thread
//! cross a message-passing boundary into a coordinating service that
//! owns every device driver.
//!
//! Design principles:
//! - Explicit context objects, no hidden module state
//! - Tagged unions over duck typing; exhaustive matching at the seams
//! - The caller blocks, the callee never blocks the system
//!
//! The crate is the process layer of an editor integration that runs a
//! language server compiled to WebAssembly; the editor UI and the
//! language-server protocol surface live elsewhere and consume
//! [`process::WasiProcess`] plus its stdio streams.

pub mod device;
pub mod editor;
pub mod fd;
pub mod fs;
pub mod path;
pub mod pipe;
pub mod process;
pub mod service;
pub mod transport;
pub mod wasi;

pub use device::{CharacterDevice, Device, DeviceId, DeviceRegistry, DeviceTable};
pub use editor::{EditorFileSystem, FileInfo, FileKind, MemoryEditorFs};
pub use fs::{
    DirectoryManifest, EditorFsDriver, FileSystemDevice, FsError, ManifestNode, MountMap,
    RootFsDriver, StaticFsDriver,
};
pub use pipe::{Pipe, PipeError, ReadyCell, StdinHandle, StdoutHandle, PIPE_CAPACITY};
pub use process::{
    GuestCode, MountPointDescriptor, ProcessArg, ProcessError, ProcessOptions, WasiHost,
    WasiProcess, TERMINATED_EXIT_CODE,
};
pub use service::{TracedService, WasiService};
pub use transport::{Syscalls, SyscallNo};
pub use wasi::Errno;
