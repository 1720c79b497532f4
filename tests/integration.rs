//! End-to-end tests for the virtual WASI host
//!
//! Guests are closures running on the compute thread against the
//! syscall stub with their own linear memory, so every test exercises
//! the full path: marshalling, the cross-thread transport, the
//! dispatcher, and the filesystem/pipe drivers.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use url::Url;

use wasibox::wasi::{Fdflags, Oflags, Rights};
use wasibox::{
    Errno, MemoryEditorFs, MountPointDescriptor, ProcessArg, ProcessOptions, Syscalls, WasiHost,
    WasiProcess, TERMINATED_EXIT_CODE,
};

// ============================================================================
// Guest-side helpers
// ============================================================================

/// Guest linear memory with a bump allocator.
struct GuestMem {
    mem: Vec<u8>,
    brk: u32,
}

impl GuestMem {
    fn new() -> Self {
        Self {
            mem: vec![0u8; 64 * 1024],
            brk: 16,
        }
    }

    fn alloc(&mut self, len: u32) -> u32 {
        let at = self.brk;
        self.brk += (len + 7) & !7;
        at
    }

    fn place(&mut self, bytes: &[u8]) -> u32 {
        let at = self.alloc(bytes.len() as u32);
        self.mem[at as usize..at as usize + bytes.len()].copy_from_slice(bytes);
        at
    }

    fn put_u32(&mut self, ptr: u32, value: u32) {
        self.mem[ptr as usize..ptr as usize + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn u32_at(&self, ptr: u32) -> u32 {
        u32::from_le_bytes(self.mem[ptr as usize..ptr as usize + 4].try_into().unwrap())
    }

    fn u64_at(&self, ptr: u32) -> u64 {
        u64::from_le_bytes(self.mem[ptr as usize..ptr as usize + 8].try_into().unwrap())
    }

    fn bytes(&self, ptr: u32, len: u32) -> &[u8] {
        &self.mem[ptr as usize..(ptr + len) as usize]
    }
}

/// Walk the preopen descriptors until one matches the mount name.
fn find_preopen(sys: &Syscalls, m: &mut GuestMem, want: &str) -> Option<u32> {
    for fd in 3..32 {
        let prestat_ptr = m.alloc(8);
        match sys.fd_prestat_get(&mut m.mem, fd, prestat_ptr) {
            Errno::Success => {
                let len = m.u32_at(prestat_ptr + 4);
                let name_ptr = m.alloc(len);
                if sys.fd_prestat_dir_name(&mut m.mem, fd, name_ptr, len) != Errno::Success {
                    return None;
                }
                if m.bytes(name_ptr, len) == want.as_bytes() {
                    return Some(fd);
                }
            }
            _ => return None,
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn guest_open(
    sys: &Syscalls,
    m: &mut GuestMem,
    dirfd: u32,
    path: &str,
    oflags: Oflags,
    rights_base: Rights,
    rights_inheriting: Rights,
    fdflags: Fdflags,
) -> Result<u32, Errno> {
    let path_ptr = m.place(path.as_bytes());
    let out = m.alloc(4);
    let errno = sys.path_open(
        &mut m.mem,
        dirfd,
        1,
        path_ptr,
        path.len() as u32,
        oflags.bits(),
        rights_base.bits(),
        rights_inheriting.bits(),
        fdflags.bits(),
        out,
    );
    if errno == Errno::Success {
        Ok(m.u32_at(out))
    } else {
        Err(errno)
    }
}

fn guest_write(sys: &Syscalls, m: &mut GuestMem, fd: u32, data: &[u8]) -> Result<u32, Errno> {
    let buf = m.place(data);
    let iov = m.alloc(8);
    m.put_u32(iov, buf);
    m.put_u32(iov + 4, data.len() as u32);
    let nwritten = m.alloc(4);
    let errno = sys.fd_write(&mut m.mem, fd, iov, 1, nwritten);
    if errno == Errno::Success {
        Ok(m.u32_at(nwritten))
    } else {
        Err(errno)
    }
}

fn guest_read(sys: &Syscalls, m: &mut GuestMem, fd: u32, max: u32) -> Result<Vec<u8>, Errno> {
    let buf = m.alloc(max);
    let iov = m.alloc(8);
    m.put_u32(iov, buf);
    m.put_u32(iov + 4, max);
    let nread = m.alloc(4);
    let errno = sys.fd_read(&mut m.mem, fd, iov, 1, nread);
    if errno == Errno::Success {
        let n = m.u32_at(nread);
        Ok(m.bytes(buf, n).to_vec())
    } else {
        Err(errno)
    }
}

/// One fd_readdir page: complete entries as `(name, next_cookie)` plus
/// the reported buffer usage.
fn guest_readdir_page(
    sys: &Syscalls,
    m: &mut GuestMem,
    fd: u32,
    buf_len: u32,
    cookie: u64,
) -> Result<(Vec<(String, u64)>, u32), Errno> {
    let buf = m.alloc(buf_len);
    let bufused_ptr = m.alloc(4);
    let errno = sys.fd_readdir(&mut m.mem, fd, buf, buf_len, cookie, bufused_ptr);
    if errno != Errno::Success {
        return Err(errno);
    }
    let used = m.u32_at(bufused_ptr);
    let bytes = m.bytes(buf, used).to_vec();
    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset + 24 <= bytes.len() {
        let next = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
        let namlen =
            u32::from_le_bytes(bytes[offset + 16..offset + 20].try_into().unwrap()) as usize;
        if offset + 24 + namlen > bytes.len() {
            break; // truncated entry, re-request with the last cookie
        }
        let name = String::from_utf8(bytes[offset + 24..offset + 24 + namlen].to_vec()).unwrap();
        entries.push((name, next));
        offset += 24 + namlen;
    }
    Ok((entries, used))
}

/// Clock subscription (monotonic, relative timeout) at `ptr`.
fn put_clock_subscription(m: &mut GuestMem, ptr: u32, userdata: u64, timeout_ns: u64) {
    let base = ptr as usize;
    m.mem[base..base + 48].fill(0);
    m.mem[base..base + 8].copy_from_slice(&userdata.to_le_bytes());
    m.mem[base + 8] = 0; // clock
    m.mem[base + 16..base + 20].copy_from_slice(&1u32.to_le_bytes()); // monotonic
    m.mem[base + 24..base + 32].copy_from_slice(&timeout_ns.to_le_bytes());
}

fn put_fd_read_subscription(m: &mut GuestMem, ptr: u32, userdata: u64, fd: u32) {
    let base = ptr as usize;
    m.mem[base..base + 48].fill(0);
    m.mem[base..base + 8].copy_from_slice(&userdata.to_le_bytes());
    m.mem[base + 8] = 1; // fd_read
    m.mem[base + 16..base + 20].copy_from_slice(&fd.to_le_bytes());
}

// ============================================================================
// Mount setup helpers
// ============================================================================

const AGDA_MANIFEST: &str = r#"{
    "root": {
        "kind": "directory",
        "entries": {
            "lib": {
                "kind": "directory",
                "entries": {
                    "Prelude.agda": { "kind": "file", "size": 20 }
                }
            }
        }
    }
}"#;

fn workspace_fs(files: &[(&str, &[u8])]) -> Arc<MemoryEditorFs> {
    Arc::new(MemoryEditorFs::with_files(files))
}

fn workspace_mount(fs: Arc<MemoryEditorFs>) -> MountPointDescriptor {
    MountPointDescriptor::WorkspaceFolder {
        name: "project".to_string(),
        uri: Url::parse("memfs://project/").unwrap(),
        fs,
    }
}

fn agda_data_mount() -> MountPointDescriptor {
    let fs = Arc::new(MemoryEditorFs::with_files(&[
        ("manifest.json", AGDA_MANIFEST.as_bytes()),
        ("lib/Prelude.agda", b"module Prelude where".as_slice()),
    ]));
    MountPointDescriptor::ExtensionLocation {
        uri: Url::parse("ext://wasibox.agda/data/").unwrap(),
        fs,
        manifest_path: "manifest.json".to_string(),
        mount_point: "/.agdaData".to_string(),
    }
}

// ============================================================================
// Filesystem scenarios
// ============================================================================

#[test]
fn workspace_and_extension_mounts_resolve_to_distinct_drivers() {
    let ws = workspace_fs(&[("existing.txt", b"old")]);
    let host = WasiHost::new();
    let process = WasiProcess::new(
        host,
        "agda",
        ProcessOptions {
            mounts: vec![workspace_mount(ws.clone()), agda_data_mount()],
            ..Default::default()
        },
    );
    process.initialize().unwrap();

    let code = process
        .run(move |sys: Syscalls| {
            let m = &mut GuestMem::new();
            let ws_fd = find_preopen(&sys, m, "/workspace").expect("workspace preopen");
            let data_fd = find_preopen(&sys, m, "/.agdaData").expect("agdaData preopen");
            assert_ne!(ws_fd, data_fd);

            let out = guest_open(
                &sys,
                m,
                ws_fd,
                "x.txt",
                Oflags::CREAT,
                Rights::FD_READ | Rights::FD_WRITE | Rights::FD_SEEK | Rights::FD_TELL,
                Rights::empty(),
                Fdflags::empty(),
            )
            .expect("open workspace file");
            let lib = guest_open(
                &sys,
                m,
                data_fd,
                "lib/Prelude.agda",
                Oflags::empty(),
                Rights::FD_READ | Rights::FD_SEEK | Rights::FD_TELL,
                Rights::empty(),
                Fdflags::empty(),
            )
            .expect("open packaged file");
            assert_ne!(out, lib);

            assert_eq!(guest_write(&sys, m, out, b"hello wasi").unwrap(), 10);
            let contents = guest_read(&sys, m, lib, 64).unwrap();
            assert_eq!(contents, b"module Prelude where");

            // Writing to the read-only mount is rejected at open time.
            let err = guest_open(
                &sys,
                m,
                data_fd,
                "lib/Prelude.agda",
                Oflags::empty(),
                Rights::FD_WRITE,
                Rights::empty(),
                Fdflags::empty(),
            )
            .unwrap_err();
            assert_eq!(err, Errno::Notcapable);

            assert_eq!(sys.fd_close(&mut m.mem, out), Errno::Success);
            assert_eq!(sys.fd_close(&mut m.mem, lib), Errno::Success);
            0
        })
        .unwrap();
    assert_eq!(code, 0);

    use wasibox::EditorFileSystem;
    assert_eq!(ws.read_file("x.txt").unwrap(), b"hello wasi");
    assert_eq!(ws.read_file("existing.txt").unwrap(), b"old");
}

#[test]
fn cross_mount_escape_resolves_into_sibling_mount() {
    let ws = workspace_fs(&[("src/Main.agda", b"module Main where")]);
    let host = WasiHost::new();
    let process = WasiProcess::new(
        host,
        "agda",
        ProcessOptions {
            mounts: vec![workspace_mount(ws), agda_data_mount()],
            ..Default::default()
        },
    );
    process.initialize().unwrap();

    let code = process
        .run(|sys: Syscalls| {
            let m = &mut GuestMem::new();
            let ws_fd = find_preopen(&sys, m, "/workspace").unwrap();

            // Climbs out of the workspace mount into its sibling.
            let fd = guest_open(
                &sys,
                m,
                ws_fd,
                "../.agdaData/lib/Prelude.agda",
                Oflags::empty(),
                Rights::FD_READ,
                Rights::empty(),
                Fdflags::empty(),
            )
            .expect("cross-mount open");
            let contents = guest_read(&sys, m, fd, 64).unwrap();
            assert_eq!(contents, b"module Prelude where");

            // Escaping every mount reports no such entity.
            let err = guest_open(
                &sys,
                m,
                ws_fd,
                "../nowhere/file.txt",
                Oflags::empty(),
                Rights::FD_READ,
                Rights::empty(),
                Fdflags::empty(),
            )
            .unwrap_err();
            assert_eq!(err, Errno::Noent);
            0
        })
        .unwrap();
    assert_eq!(code, 0);
}

#[test]
fn closed_descriptor_is_badf() {
    let host = WasiHost::new();
    let process = WasiProcess::new(
        host,
        "proc",
        ProcessOptions {
            mounts: vec![workspace_mount(workspace_fs(&[("f.txt", b"data")]))],
            ..Default::default()
        },
    );
    process.initialize().unwrap();

    process
        .run(|sys: Syscalls| {
            let m = &mut GuestMem::new();
            let ws_fd = find_preopen(&sys, m, "/workspace").unwrap();
            let fd = guest_open(
                &sys,
                m,
                ws_fd,
                "f.txt",
                Oflags::empty(),
                Rights::FD_READ,
                Rights::empty(),
                Fdflags::empty(),
            )
            .unwrap();
            assert_eq!(sys.fd_close(&mut m.mem, fd), Errno::Success);
            assert_eq!(guest_read(&sys, m, fd, 8).unwrap_err(), Errno::Badf);
            assert_eq!(sys.fd_close(&mut m.mem, fd), Errno::Badf);
            0
        })
        .unwrap();
}

#[test]
fn readdir_pagination_is_idempotent() {
    let ws = workspace_fs(&[
        ("alpha.txt", b"a"),
        ("beta.txt", b"b"),
        ("gamma.txt", b"c"),
        ("sub/inner.txt", b"i"),
    ]);
    let host = WasiHost::new();
    let process = WasiProcess::new(
        host,
        "proc",
        ProcessOptions {
            mounts: vec![workspace_mount(ws)],
            ..Default::default()
        },
    );
    process.initialize().unwrap();

    process
        .run(|sys: Syscalls| {
            let m = &mut GuestMem::new();
            let ws_fd = find_preopen(&sys, m, "/workspace").unwrap();

            // One unpaginated listing.
            let (all, used) = guest_readdir_page(&sys, m, ws_fd, 4096, 0).unwrap();
            assert!(used < 4096);
            let all_names: Vec<String> = all.iter().map(|(n, _)| n.clone()).collect();
            assert_eq!(
                all_names,
                vec![".", "..", "alpha.txt", "beta.txt", "gamma.txt", "sub"]
            );

            // The same listing through a small buffer, page by page.
            let mut paged: Vec<String> = Vec::new();
            let mut cookie = 0u64;
            loop {
                let (entries, used) = guest_readdir_page(&sys, m, ws_fd, 64, cookie).unwrap();
                for (name, next) in &entries {
                    paged.push(name.clone());
                    cookie = *next;
                }
                if used < 64 {
                    break;
                }
            }
            assert_eq!(paged, all_names);

            // Lenient past-end behavior: a stale cookie with no cached
            // snapshot reads as end-of-listing, not an error.
            let (entries, used) = guest_readdir_page(&sys, m, ws_fd, 64, cookie).unwrap();
            assert!(entries.is_empty());
            assert_eq!(used, 0);
            0
        })
        .unwrap();
}

// ============================================================================
// Pipes and polling
// ============================================================================

#[test]
fn stdin_echo_roundtrip() {
    let host = WasiHost::new();
    let process = Arc::new(WasiProcess::new(
        host,
        "echo",
        ProcessOptions {
            mounts: vec![workspace_mount(workspace_fs(&[]))],
            ..Default::default()
        },
    ));
    process.initialize().unwrap();

    let stdin = process.stdin();
    let stdout_chunks = process.stdout().chunks();

    let runner = {
        let process = process.clone();
        thread::spawn(move || {
            process.run(|sys: Syscalls| {
                let m = &mut GuestMem::new();
                // Wait for input readiness (fast path), then echo.
                let sub = m.alloc(48);
                put_fd_read_subscription(m, sub, 7, 0);
                let events = m.alloc(32);
                let nevents = m.alloc(4);
                assert_eq!(
                    sys.poll_oneoff(&mut m.mem, sub, events, 1, nevents),
                    Errno::Success
                );
                assert_eq!(m.u32_at(nevents), 1);
                let nbytes = m.u64_at(events + 16);
                assert!(nbytes > 0);

                let line = guest_read(&sys, m, 0, 64).unwrap();
                let mut reply = b"echo: ".to_vec();
                reply.extend_from_slice(&line);
                guest_write(&sys, m, 1, &reply).unwrap();
                0
            })
        })
    };

    stdin.write(b"ping\n").unwrap();
    let chunk = stdout_chunks
        .recv_timeout(Duration::from_secs(5))
        .expect("stdout chunk");
    assert_eq!(chunk, b"echo: ping\n");
    assert_eq!(runner.join().unwrap().unwrap(), 0);
}

#[test]
fn poll_zero_timeout_clock_returns_immediately() {
    let host = WasiHost::new();
    let process = WasiProcess::new(
        host,
        "proc",
        ProcessOptions {
            mounts: vec![workspace_mount(workspace_fs(&[]))],
            ..Default::default()
        },
    );
    process.initialize().unwrap();

    process
        .run(|sys: Syscalls| {
            let m = &mut GuestMem::new();
            let sub = m.alloc(48);
            put_clock_subscription(m, sub, 11, 0);
            let events = m.alloc(32);
            let nevents = m.alloc(4);
            let start = Instant::now();
            assert_eq!(
                sys.poll_oneoff(&mut m.mem, sub, events, 1, nevents),
                Errno::Success
            );
            assert!(start.elapsed() < Duration::from_millis(100));
            assert_eq!(m.u32_at(nevents), 1);
            assert_eq!(m.u64_at(events), 11); // userdata
            assert_eq!(m.u32_at(events + 8) & 0xffff, 0); // errno success
            assert_eq!(m.mem[(events + 10) as usize], 0); // clock event
            0
        })
        .unwrap();
}

#[test]
fn poll_clock_timer_fires_after_deadline() {
    let host = WasiHost::new();
    let process = WasiProcess::new(
        host,
        "proc",
        ProcessOptions {
            mounts: vec![workspace_mount(workspace_fs(&[]))],
            ..Default::default()
        },
    );
    process.initialize().unwrap();

    process
        .run(|sys: Syscalls| {
            let m = &mut GuestMem::new();
            let sub = m.alloc(48);
            // 50ms: not an immediate clock, so this takes the slow path.
            put_clock_subscription(m, sub, 3, 50_000_000);
            let events = m.alloc(32);
            let nevents = m.alloc(4);
            let start = Instant::now();
            assert_eq!(
                sys.poll_oneoff(&mut m.mem, sub, events, 1, nevents),
                Errno::Success
            );
            assert!(start.elapsed() >= Duration::from_millis(45));
            assert_eq!(m.u32_at(nevents), 1);
            assert_eq!(m.u64_at(events), 3);
            0
        })
        .unwrap();
}

#[test]
fn poll_read_subscription_wakes_on_late_write() {
    let host = WasiHost::new();
    let process = Arc::new(WasiProcess::new(
        host,
        "proc",
        ProcessOptions {
            mounts: vec![workspace_mount(workspace_fs(&[]))],
            ..Default::default()
        },
    ));
    process.initialize().unwrap();

    let stdin = process.stdin();
    let runner = {
        let process = process.clone();
        thread::spawn(move || {
            process.run(|sys: Syscalls| {
                let m = &mut GuestMem::new();
                let sub = m.alloc(48);
                put_fd_read_subscription(m, sub, 9, 0);
                let events = m.alloc(32);
                let nevents = m.alloc(4);
                let start = Instant::now();
                assert_eq!(
                    sys.poll_oneoff(&mut m.mem, sub, events, 1, nevents),
                    Errno::Success
                );
                // Suspended until the embedder wrote.
                assert!(start.elapsed() >= Duration::from_millis(40));
                assert_eq!(m.u32_at(nevents), 1);
                assert_eq!(m.u64_at(events + 16), 5); // buffered byte count
                0
            })
        })
    };

    thread::sleep(Duration::from_millis(60));
    stdin.write(b"later").unwrap();
    assert_eq!(runner.join().unwrap().unwrap(), 0);
}

// ============================================================================
// Process lifecycle
// ============================================================================

#[test]
fn args_and_environ_reach_the_guest() {
    let ws = workspace_fs(&[("src/Main.agda", b"module Main where")]);
    let host = WasiHost::new();
    let process = WasiProcess::new(
        host,
        "agda",
        ProcessOptions {
            args: vec![
                ProcessArg::from("--lsp"),
                ProcessArg::Uri(Url::parse("memfs://project/src/Main.agda").unwrap()),
            ],
            env: vec![("Agda_datadir".to_string(), "/.agdaData".to_string())],
            mounts: vec![workspace_mount(ws), agda_data_mount()],
            ..Default::default()
        },
    );
    process.initialize().unwrap();

    process
        .run(|sys: Syscalls| {
            let m = &mut GuestMem::new();

            let argc_ptr = m.alloc(4);
            let argv_size_ptr = m.alloc(4);
            assert_eq!(
                sys.args_sizes_get(&mut m.mem, argc_ptr, argv_size_ptr),
                Errno::Success
            );
            let argc = m.u32_at(argc_ptr);
            assert_eq!(argc, 3);
            let buf_size = m.u32_at(argv_size_ptr);

            let argv_ptr = m.alloc(argc * 4);
            let buf_ptr = m.alloc(buf_size);
            assert_eq!(sys.args_get(&mut m.mem, argv_ptr, buf_ptr), Errno::Success);

            let read_cstr = |m: &GuestMem, ptr: u32| -> String {
                let mut end = ptr as usize;
                while m.mem[end] != 0 {
                    end += 1;
                }
                String::from_utf8(m.mem[ptr as usize..end].to_vec()).unwrap()
            };
            assert_eq!(read_cstr(m, m.u32_at(argv_ptr)), "agda");
            assert_eq!(read_cstr(m, m.u32_at(argv_ptr + 4)), "--lsp");
            assert_eq!(
                read_cstr(m, m.u32_at(argv_ptr + 8)),
                "/workspace/src/Main.agda"
            );

            let envc_ptr = m.alloc(4);
            let env_size_ptr = m.alloc(4);
            assert_eq!(
                sys.environ_sizes_get(&mut m.mem, envc_ptr, env_size_ptr),
                Errno::Success
            );
            assert_eq!(m.u32_at(envc_ptr), 1);
            let environ_ptr = m.alloc(4);
            let env_buf_ptr = m.alloc(m.u32_at(env_size_ptr));
            assert_eq!(
                sys.environ_get(&mut m.mem, environ_ptr, env_buf_ptr),
                Errno::Success
            );
            assert_eq!(
                read_cstr(m, m.u32_at(environ_ptr)),
                "Agda_datadir=/.agdaData"
            );
            0
        })
        .unwrap();
}

#[test]
fn proc_exit_code_is_reported() {
    let host = WasiHost::new();
    let process = WasiProcess::new(
        host,
        "proc",
        ProcessOptions {
            mounts: vec![workspace_mount(workspace_fs(&[]))],
            ..Default::default()
        },
    );
    process.initialize().unwrap();

    let code = process
        .run(|sys: Syscalls| {
            let m = &mut GuestMem::new();
            sys.proc_exit(&mut m.mem, 7);
            // A real module traps here; a cooperative guest returns.
            99
        })
        .unwrap();
    assert_eq!(code, 7);
    assert_eq!(process.exit_code(), Some(7));
}

#[test]
fn terminate_releases_blocked_guest() {
    let host = WasiHost::new();
    let process = Arc::new(WasiProcess::new(
        host,
        "stuck",
        ProcessOptions {
            mounts: vec![workspace_mount(workspace_fs(&[]))],
            ..Default::default()
        },
    ));
    process.initialize().unwrap();

    let runner = {
        let process = process.clone();
        thread::spawn(move || {
            process.run(|sys: Syscalls| {
                let m = &mut GuestMem::new();
                // Blocks on stdin until termination destroys the pipe,
                // which reads as end of stream.
                let bytes = guest_read(&sys, m, 0, 16).unwrap();
                assert!(bytes.is_empty());
                0
            })
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(process.terminate(), TERMINATED_EXIT_CODE);
    assert_eq!(runner.join().unwrap().unwrap(), TERMINATED_EXIT_CODE);
    assert_eq!(process.exit_code(), Some(TERMINATED_EXIT_CODE));
}

#[test]
fn traced_process_still_behaves() {
    let ws = workspace_fs(&[("t.txt", b"traced")]);
    let host = WasiHost::new();
    let process = WasiProcess::new(
        host,
        "traced",
        ProcessOptions {
            mounts: vec![workspace_mount(ws)],
            trace: true,
            ..Default::default()
        },
    );
    process.initialize().unwrap();

    let code = process
        .run(|sys: Syscalls| {
            let m = &mut GuestMem::new();
            let ws_fd = find_preopen(&sys, m, "/workspace").unwrap();
            let fd = guest_open(
                &sys,
                m,
                ws_fd,
                "t.txt",
                Oflags::empty(),
                Rights::FD_READ,
                Rights::empty(),
                Fdflags::empty(),
            )
            .unwrap();
            assert_eq!(guest_read(&sys, m, fd, 16).unwrap(), b"traced");
            sys.proc_exit(&mut m.mem, 0);
            0
        })
        .unwrap();
    assert_eq!(code, 0);
}
