//! WASI preview-1 ABI surface: constants, enums, bit masks, and the
//! bit-exact struct codecs used on both sides of the call transport.

pub mod abi;
pub mod codec;

pub use abi::{
    Clockid, Errno, Eventrwflags, Eventtype, Fdflags, Filetype, Lookupflags, Oflags, Rights,
    Subclockflags, Whence, FIRST_PREOPEN_FD, STDERR_FD, STDIN_FD, STDOUT_FD,
};
pub use codec::{
    Dirent, Event, Fdstat, Filestat, Iovec, MemoryView, Prestat, Subscription, SubscriptionU,
};
