//! WASI preview-1 ABI types and constants
//!
//! This module defines the stable interface between the host and the guest:
//! error numbers, file types, rights masks, and open flags. Values follow
//! the preview-1 ABI and must stay bit-exact for module compatibility.

use bitflags::bitflags;

/// Standard file descriptors
pub const STDIN_FD: u32 = 0;
pub const STDOUT_FD: u32 = 1;
pub const STDERR_FD: u32 = 2;

/// First descriptor number handed out for preopens
pub const FIRST_PREOPEN_FD: u32 = 3;

/// Error codes returned to the guest (`errno` namespace)
///
/// The full preview-1 set is declared even though only a subset is ever
/// produced by this host; guests compare against the standard values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Errno {
    Success = 0,
    Toobig = 1,
    Acces = 2,
    Addrinuse = 3,
    Addrnotavail = 4,
    Afnosupport = 5,
    Again = 6,
    Already = 7,
    Badf = 8,
    Badmsg = 9,
    Busy = 10,
    Canceled = 11,
    Child = 12,
    Connaborted = 13,
    Connrefused = 14,
    Connreset = 15,
    Deadlk = 16,
    Destaddrreq = 17,
    Dom = 18,
    Dquot = 19,
    Exist = 20,
    Fault = 21,
    Fbig = 22,
    Hostunreach = 23,
    Idrm = 24,
    Ilseq = 25,
    Inprogress = 26,
    Intr = 27,
    Inval = 28,
    Io = 29,
    Isconn = 30,
    Isdir = 31,
    Loop = 32,
    Mfile = 33,
    Mlink = 34,
    Msgsize = 35,
    Multihop = 36,
    Nametoolong = 37,
    Netdown = 38,
    Netreset = 39,
    Netunreach = 40,
    Nfile = 41,
    Nobufs = 42,
    Nodev = 43,
    Noent = 44,
    Noexec = 45,
    Nolck = 46,
    Nolink = 47,
    Nomem = 48,
    Nomsg = 49,
    Noprotoopt = 50,
    Nospc = 51,
    Nosys = 52,
    Notconn = 53,
    Notdir = 54,
    Notempty = 55,
    Notrecoverable = 56,
    Notsock = 57,
    Notsup = 58,
    Notty = 59,
    Nxio = 60,
    Overflow = 61,
    Ownerdead = 62,
    Perm = 63,
    Pipe = 64,
    Proto = 65,
    Protonosupport = 66,
    Prototype = 67,
    Range = 68,
    Rofs = 69,
    Spipe = 70,
    Srch = 71,
    Stale = 72,
    Timedout = 73,
    Txtbsy = 74,
    Xdev = 75,
    Notcapable = 76,
}

impl Errno {
    /// The wire value written into guest memory and the call frame
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Decode a wire value. Unknown codes collapse to `Inval`.
    pub fn from_raw(code: u16) -> Self {
        use Errno::*;
        match code {
            0 => Success,
            1 => Toobig,
            2 => Acces,
            3 => Addrinuse,
            4 => Addrnotavail,
            5 => Afnosupport,
            6 => Again,
            7 => Already,
            8 => Badf,
            9 => Badmsg,
            10 => Busy,
            11 => Canceled,
            12 => Child,
            13 => Connaborted,
            14 => Connrefused,
            15 => Connreset,
            16 => Deadlk,
            17 => Destaddrreq,
            18 => Dom,
            19 => Dquot,
            20 => Exist,
            21 => Fault,
            22 => Fbig,
            23 => Hostunreach,
            24 => Idrm,
            25 => Ilseq,
            26 => Inprogress,
            27 => Intr,
            28 => Inval,
            29 => Io,
            30 => Isconn,
            31 => Isdir,
            32 => Loop,
            33 => Mfile,
            34 => Mlink,
            35 => Msgsize,
            36 => Multihop,
            37 => Nametoolong,
            38 => Netdown,
            39 => Netreset,
            40 => Netunreach,
            41 => Nfile,
            42 => Nobufs,
            43 => Nodev,
            44 => Noent,
            45 => Noexec,
            46 => Nolck,
            47 => Nolink,
            48 => Nomem,
            49 => Nomsg,
            50 => Noprotoopt,
            51 => Nospc,
            52 => Nosys,
            53 => Notconn,
            54 => Notdir,
            55 => Notempty,
            56 => Notrecoverable,
            57 => Notsock,
            58 => Notsup,
            59 => Notty,
            60 => Nxio,
            61 => Overflow,
            62 => Ownerdead,
            63 => Perm,
            64 => Pipe,
            65 => Proto,
            66 => Protonosupport,
            67 => Prototype,
            68 => Range,
            69 => Rofs,
            70 => Spipe,
            71 => Srch,
            72 => Stale,
            73 => Timedout,
            74 => Txtbsy,
            75 => Xdev,
            76 => Notcapable,
            _ => Inval,
        }
    }
}

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "errno {} ({:?})", self.code(), self)
    }
}

/// File types reported in `fdstat`, `filestat`, and `dirent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Filetype {
    Unknown = 0,
    BlockDevice = 1,
    CharacterDevice = 2,
    Directory = 3,
    RegularFile = 4,
    SocketDgram = 5,
    SocketStream = 6,
    SymbolicLink = 7,
}

impl Filetype {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// `fd_seek` origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Whence {
    Set = 0,
    Cur = 1,
    End = 2,
}

impl Whence {
    pub fn from_raw(code: u8) -> Option<Self> {
        match code {
            0 => Some(Whence::Set),
            1 => Some(Whence::Cur),
            2 => Some(Whence::End),
            _ => None,
        }
    }
}

/// Clock identifiers for `clock_res_get` / `clock_time_get`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Clockid {
    Realtime = 0,
    Monotonic = 1,
    ProcessCputime = 2,
    ThreadCputime = 3,
}

impl Clockid {
    pub fn from_raw(code: u32) -> Option<Self> {
        match code {
            0 => Some(Clockid::Realtime),
            1 => Some(Clockid::Monotonic),
            2 => Some(Clockid::ProcessCputime),
            3 => Some(Clockid::ThreadCputime),
            _ => None,
        }
    }
}

/// Poll subscription kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Eventtype {
    Clock = 0,
    FdRead = 1,
    FdWrite = 2,
}

impl Eventtype {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Preopen kinds (only directories exist in preview-1)
pub const PREOPENTYPE_DIR: u8 = 0;

bitflags! {
    /// Per-descriptor rights mask, checked on every operation
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u64 {
        const FD_DATASYNC = 1 << 0;
        const FD_READ = 1 << 1;
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        const FD_SYNC = 1 << 4;
        const FD_TELL = 1 << 5;
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        const PATH_CREATE_FILE = 1 << 10;
        const PATH_LINK_SOURCE = 1 << 11;
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        const PATH_RENAME_SOURCE = 1 << 16;
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
    }
}

impl Rights {
    /// Base rights for an open regular file
    pub fn file_base() -> Rights {
        Rights::FD_DATASYNC
            | Rights::FD_READ
            | Rights::FD_SEEK
            | Rights::FD_FDSTAT_SET_FLAGS
            | Rights::FD_SYNC
            | Rights::FD_TELL
            | Rights::FD_WRITE
            | Rights::FD_FILESTAT_GET
            | Rights::FD_FILESTAT_SET_SIZE
            | Rights::FD_FILESTAT_SET_TIMES
            | Rights::POLL_FD_READWRITE
    }

    /// Base rights for an open directory
    pub fn directory_base() -> Rights {
        Rights::FD_FDSTAT_SET_FLAGS
            | Rights::FD_SYNC
            | Rights::FD_FILESTAT_GET
            | Rights::PATH_CREATE_DIRECTORY
            | Rights::PATH_CREATE_FILE
            | Rights::PATH_OPEN
            | Rights::FD_READDIR
            | Rights::PATH_READLINK
            | Rights::PATH_RENAME_SOURCE
            | Rights::PATH_RENAME_TARGET
            | Rights::PATH_FILESTAT_GET
            | Rights::PATH_FILESTAT_SET_SIZE
            | Rights::PATH_FILESTAT_SET_TIMES
            | Rights::PATH_REMOVE_DIRECTORY
            | Rights::PATH_UNLINK_FILE
    }

    /// Rights inherited by descriptors opened through a directory
    pub fn directory_inheriting() -> Rights {
        Rights::directory_base() | Rights::file_base()
    }

    /// Rights for stdio character descriptors (read xor write is applied
    /// on top by the pipe direction)
    pub fn character_base() -> Rights {
        Rights::FD_READ
            | Rights::FD_WRITE
            | Rights::FD_FDSTAT_SET_FLAGS
            | Rights::FD_FILESTAT_GET
            | Rights::POLL_FD_READWRITE
    }

    /// Drop every right that implies mutating the backing store
    pub fn read_only(self) -> Rights {
        self - (Rights::FD_WRITE
            | Rights::FD_ALLOCATE
            | Rights::FD_DATASYNC
            | Rights::FD_FILESTAT_SET_SIZE
            | Rights::FD_FILESTAT_SET_TIMES
            | Rights::PATH_CREATE_DIRECTORY
            | Rights::PATH_CREATE_FILE
            | Rights::PATH_FILESTAT_SET_SIZE
            | Rights::PATH_FILESTAT_SET_TIMES
            | Rights::PATH_RENAME_SOURCE
            | Rights::PATH_RENAME_TARGET
            | Rights::PATH_REMOVE_DIRECTORY
            | Rights::PATH_UNLINK_FILE
            | Rights::PATH_SYMLINK)
    }
}

bitflags! {
    /// Descriptor flags (`fdstat.fs_flags`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Fdflags: u16 {
        const APPEND = 1 << 0;
        const DSYNC = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RSYNC = 1 << 3;
        const SYNC = 1 << 4;
    }
}

bitflags! {
    /// `path_open` open flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Oflags: u16 {
        const CREAT = 1 << 0;
        const DIRECTORY = 1 << 1;
        const EXCL = 1 << 2;
        const TRUNC = 1 << 3;
    }
}

bitflags! {
    /// `path_open` / `path_filestat_get` lookup flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Lookupflags: u32 {
        const SYMLINK_FOLLOW = 1 << 0;
    }
}

bitflags! {
    /// Clock subscription flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Subclockflags: u16 {
        const ABSTIME = 1 << 0;
    }
}

bitflags! {
    /// Read/write event flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Eventrwflags: u16 {
        const HANGUP = 1 << 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_wire_values() {
        assert_eq!(Errno::Success.code(), 0);
        assert_eq!(Errno::Badf.code(), 8);
        assert_eq!(Errno::Noent.code(), 44);
        assert_eq!(Errno::Notdir.code(), 54);
        assert_eq!(Errno::Timedout.code(), 73);
        assert_eq!(Errno::Notcapable.code(), 76);
    }

    #[test]
    fn errno_roundtrip() {
        for code in 0..=76u16 {
            assert_eq!(Errno::from_raw(code).code(), code);
        }
        // Unknown codes collapse rather than panic
        assert_eq!(Errno::from_raw(999), Errno::Inval);
    }

    #[test]
    fn directory_rights_cover_file_rights_via_inheritance() {
        let inheriting = Rights::directory_inheriting();
        assert!(inheriting.contains(Rights::file_base()));
        assert!(inheriting.contains(Rights::directory_base()));
    }

    #[test]
    fn read_only_mask_drops_write() {
        let rights = Rights::file_base().read_only();
        assert!(!rights.contains(Rights::FD_WRITE));
        assert!(rights.contains(Rights::FD_READ));
        let dir = Rights::directory_base().read_only();
        assert!(!dir.contains(Rights::PATH_CREATE_FILE));
        assert!(dir.contains(Rights::PATH_OPEN));
    }

    #[test]
    fn whence_from_raw() {
        assert_eq!(Whence::from_raw(0), Some(Whence::Set));
        assert_eq!(Whence::from_raw(2), Some(Whence::End));
        assert_eq!(Whence::from_raw(3), None);
    }
}
